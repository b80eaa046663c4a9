//! End-to-end sweeps over tempdir trees through a fake host connector.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{tempdir, TempDir};

use hvsweep::engine::{SweepEngine, SweepOptions};
use hvsweep::error::Error;
use hvsweep::inventory::source::{
    CheckpointInfo, ClusterInfo, HostConnector, HostDefaults, HostSession, VmInfo,
};
use hvsweep::inventory;
use hvsweep::model::FileKind;
use hvsweep::vhd::chain::DiskRead;
use hvsweep::AppConfig;

const VM_ID: &str = "2ddd67b0-2c2f-4d45-ab16-43b7fbbf3d51";
const CHECKPOINT_ID: &str = "7f3a1c22-98e1-4b7d-b7c0-1f2e3d4c5b6a";

// ---- fake connector -------------------------------------------------------

#[derive(Clone)]
struct FakeHost {
    defaults: HostDefaults,
    cluster: Option<ClusterInfo>,
    vms: Vec<VmInfo>,
    csv_roots: Vec<String>,
    reachable: bool,
}

impl Default for FakeHost {
    fn default() -> Self {
        FakeHost {
            defaults: HostDefaults {
                vm_config_path: String::new(),
                virtual_disk_path: String::new(),
                registration_dir: String::new(),
            },
            cluster: None,
            vms: Vec::new(),
            csv_roots: Vec::new(),
            reachable: true,
        }
    }
}

struct FakeConnector {
    hosts: HashMap<String, FakeHost>,
}

impl FakeConnector {
    fn new(hosts: Vec<(&str, FakeHost)>) -> Self {
        FakeConnector {
            hosts: hosts
                .into_iter()
                .map(|(name, host)| (name.to_string(), host))
                .collect(),
        }
    }
}

impl HostConnector for FakeConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn HostSession>, Error> {
        match self.hosts.get(host) {
            Some(data) if data.reachable => Ok(Box::new(FakeSession {
                data: data.clone(),
            })),
            _ => Err(Error::UnreachableHost {
                host: host.to_string(),
                reason: "fake host is down".to_string(),
            }),
        }
    }
}

struct FakeSession {
    data: FakeHost,
}

impl HostSession for FakeSession {
    fn defaults(&self) -> Result<HostDefaults, Error> {
        Ok(self.data.defaults.clone())
    }

    fn cluster(&self) -> Result<Option<ClusterInfo>, Error> {
        Ok(self.data.cluster.clone())
    }

    fn vms(&self) -> Result<Vec<VmInfo>, Error> {
        Ok(self.data.vms.clone())
    }

    fn cluster_storage_roots(&self) -> Result<Vec<String>, Error> {
        Ok(self.data.csv_roots.clone())
    }

    fn open_disk(&self, path: &Path) -> Result<Box<dyn DiskRead>, Error> {
        let file = fs::File::open(path).map_err(|source| Error::DiskIo {
            path: path.to_path_buf(),
            op: "open".to_string(),
            source,
        })?;
        Ok(Box::new(file))
    }

    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>, Error> {
        let entries = fs::read_dir(path).map_err(|err| Error::for_root(path, err))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::for_root(path, err))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

// ---- synthetic disk images ------------------------------------------------

fn build_vhdx(parent: Option<&str>) -> Vec<u8> {
    const METADATA_REGION_GUID: [u8; 16] = [
        0x06, 0xA2, 0x7C, 0x8B, 0x90, 0x47, 0x9A, 0x4B, 0xB8, 0xFE, 0x57, 0x5F, 0x05, 0x0F,
        0x88, 0x6E,
    ];
    const PARENT_LOCATOR_GUID: [u8; 16] = [
        0x2D, 0x5F, 0xD3, 0xA8, 0x0B, 0xB3, 0x4D, 0x45, 0xAB, 0xF7, 0xD3, 0xD8, 0x48, 0x34,
        0xAB, 0x0C,
    ];
    const METADATA_REGION: usize = 327_680;

    let mut image = vec![0u8; 400_000];
    image[0..8].copy_from_slice(b"vhdxfile");

    for table in [196_608usize, 262_144] {
        image[table..table + 4].copy_from_slice(b"regi");
        image[table + 8..table + 12].copy_from_slice(&1u32.to_le_bytes());
        image[table + 16..table + 32].copy_from_slice(&METADATA_REGION_GUID);
        image[table + 32..table + 40].copy_from_slice(&(METADATA_REGION as u64).to_le_bytes());
    }

    image[METADATA_REGION..METADATA_REGION + 8].copy_from_slice(b"metadata");
    let entry_count: u16 = if parent.is_some() { 1 } else { 0 };
    image[METADATA_REGION + 10..METADATA_REGION + 12]
        .copy_from_slice(&entry_count.to_le_bytes());

    if let Some(parent) = parent {
        let entry = METADATA_REGION + 32;
        image[entry..entry + 16].copy_from_slice(&PARENT_LOCATOR_GUID);
        image[entry + 16..entry + 20].copy_from_slice(&512u32.to_le_bytes());

        let locator = METADATA_REGION + 512;
        image[locator + 18..locator + 20].copy_from_slice(&1u16.to_le_bytes());

        let key = "absolute_win32_path";
        let key_offset = 32usize;
        let mut cursor = locator + key_offset;
        for unit in key.encode_utf16() {
            image[cursor..cursor + 2].copy_from_slice(&unit.to_le_bytes());
            cursor += 2;
        }
        let value_offset = key_offset + key.len() * 2;
        let mut value_len = 0;
        let mut cursor = locator + value_offset;
        for unit in parent.encode_utf16() {
            image[cursor..cursor + 2].copy_from_slice(&unit.to_le_bytes());
            cursor += 2;
            value_len += 2;
        }

        let record = locator + 20;
        image[record..record + 4].copy_from_slice(&(key_offset as u32).to_le_bytes());
        image[record + 4..record + 8].copy_from_slice(&(value_offset as u32).to_le_bytes());
        image[record + 8..record + 10].copy_from_slice(&((key.len() * 2) as u16).to_le_bytes());
        image[record + 10..record + 12].copy_from_slice(&(value_len as u16).to_le_bytes());
    }
    image
}

// ---- scenario helpers -----------------------------------------------------

struct Web01 {
    _tmp: TempDir,
    vms_dir: PathBuf,
    orphan_path: PathBuf,
    vm: VmInfo,
}

/// `web01` with one registered disk at `<tmp>/vms/web01/web01.vhdx` and
/// an unrelated `<tmp>/vms/orphan.vhdx` in the same tree.
fn build_web01_tree() -> Web01 {
    let tmp = tempdir().unwrap();
    let vms_dir = tmp.path().join("vms");
    let vm_dir = vms_dir.join("web01");
    fs::create_dir_all(&vm_dir).unwrap();

    let disk_path = vm_dir.join("web01.vhdx");
    fs::write(&disk_path, build_vhdx(None)).unwrap();

    let config_path = vm_dir.join(format!("{}.vmcx", VM_ID));
    fs::write(&config_path, b"config").unwrap();

    let orphan_path = vms_dir.join("orphan.vhdx");
    fs::write(&orphan_path, build_vhdx(None)).unwrap();

    let vm = VmInfo {
        id: VM_ID.to_string(),
        name: "web01".to_string(),
        generation: 2,
        config_path: config_path.to_string_lossy().into_owned(),
        checkpoints: Vec::new(),
        disk_paths: vec![disk_path.to_string_lossy().into_owned()],
        floppy_paths: Vec::new(),
        smart_paging_path: None,
        smart_paging_in_use: false,
    };

    Web01 {
        _tmp: tmp,
        vms_dir,
        orphan_path,
        vm,
    }
}

fn engine_for(hosts: Vec<(&str, FakeHost)>) -> SweepEngine {
    SweepEngine::with_connector(AppConfig::default(), Box::new(FakeConnector::new(hosts)))
}

fn scan_options(hosts: &[&str], paths: &[&Path]) -> SweepOptions {
    SweepOptions {
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        paths: paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        ..SweepOptions::default()
    }
}

// ---- tests ----------------------------------------------------------------

#[test]
fn unrelated_disk_in_vm_tree_is_the_only_orphan() {
    let scene = build_web01_tree();
    let engine = engine_for(vec![(
        "hv01",
        FakeHost {
            vms: vec![scene.vm.clone()],
            ..FakeHost::default()
        },
    )]);

    let report = engine
        .run(&scan_options(&["hv01"], &[&scene.vms_dir]))
        .unwrap();

    assert!(report.failed_roots.is_empty());
    assert!(report.host_failures.is_empty());
    assert_eq!(report.orphans.len(), 1, "orphans: {:?}", report.orphans);
    assert_eq!(
        report.orphans[0].path,
        scene.orphan_path.to_string_lossy()
    );
    assert_eq!(report.orphans[0].owning_host.as_deref(), Some("hv01"));
    assert_eq!(report.orphans[0].kind, FileKind::Disk);
}

#[test]
fn checkpoint_chain_disks_are_fully_excluded() {
    let tmp = tempdir().unwrap();
    let vm_dir = tmp.path().join("vms").join("web01");
    let snapshot_dir = vm_dir.join("Snapshots");
    fs::create_dir_all(&snapshot_dir).unwrap();

    // Current state on top of two checkpoint layers.
    let base = vm_dir.join("base.vhdx");
    fs::write(&base, build_vhdx(None)).unwrap();
    let mid = vm_dir.join("mid.avhdx");
    fs::write(&mid, build_vhdx(Some(&base.to_string_lossy()))).unwrap();
    let cur = vm_dir.join("cur.avhdx");
    fs::write(&cur, build_vhdx(Some(&mid.to_string_lossy()))).unwrap();

    let config_path = vm_dir.join(format!("{}.vmcx", VM_ID));
    fs::write(&config_path, b"config").unwrap();
    let checkpoint_config = snapshot_dir.join(format!("{}.vmcx", CHECKPOINT_ID));
    fs::write(&checkpoint_config, b"checkpoint").unwrap();

    let vm = VmInfo {
        id: VM_ID.to_string(),
        name: "web01".to_string(),
        generation: 2,
        config_path: config_path.to_string_lossy().into_owned(),
        checkpoints: vec![CheckpointInfo {
            id: CHECKPOINT_ID.to_string(),
            metadata_dir: snapshot_dir.to_string_lossy().into_owned(),
        }],
        disk_paths: vec![cur.to_string_lossy().into_owned()],
        floppy_paths: Vec::new(),
        smart_paging_path: None,
        smart_paging_in_use: false,
    };

    let engine = engine_for(vec![(
        "hv01",
        FakeHost {
            vms: vec![vm],
            ..FakeHost::default()
        },
    )]);
    let report = engine
        .run(&scan_options(&["hv01"], &[tmp.path()]))
        .unwrap();

    assert!(
        report.orphans.is_empty(),
        "expected none, got {:?}",
        report.orphans
    );
    assert!(report.failed_roots.is_empty());
}

#[test]
fn guid_xml_in_resource_types_is_never_reported() {
    let tmp = tempdir().unwrap();
    let resource_types = tmp.path().join("Resource Types");
    let stray_dir = tmp.path().join("stray");
    fs::create_dir_all(&resource_types).unwrap();
    fs::create_dir_all(&stray_dir).unwrap();

    let shielded = resource_types.join(format!("{}.xml", VM_ID));
    fs::write(&shielded, b"<resource/>").unwrap();
    let stray = stray_dir.join(format!("{}.xml", VM_ID));
    fs::write(&stray, b"<vm/>").unwrap();

    let engine = engine_for(vec![("hv01", FakeHost::default())]);
    let report = engine
        .run(&scan_options(&["hv01"], &[tmp.path()]))
        .unwrap();

    let reported: Vec<&str> = report.orphans.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(reported, vec![stray.to_string_lossy().as_ref()]);
}

#[test]
fn missing_explicit_path_fails_that_root_only() {
    let tmp = tempdir().unwrap();
    let good = tmp.path().join("good");
    fs::create_dir_all(&good).unwrap();
    fs::write(good.join("orphan.vhdx"), build_vhdx(None)).unwrap();
    let missing = tmp.path().join("does-not-exist");

    let engine = engine_for(vec![("hv01", FakeHost::default())]);
    let report = engine
        .run(&scan_options(&["hv01"], &[&good, &missing]))
        .unwrap();

    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.failed_roots.len(), 1);
    assert!(matches!(
        report.failed_roots[0].error,
        Error::PathNotFound { .. }
    ));
}

#[test]
fn unreachable_host_is_isolated_from_siblings() {
    let scene = build_web01_tree();
    let engine = engine_for(vec![
        (
            "hv01",
            FakeHost {
                vms: vec![scene.vm.clone()],
                ..FakeHost::default()
            },
        ),
        (
            "hv02",
            FakeHost {
                reachable: false,
                ..FakeHost::default()
            },
        ),
    ]);

    let report = engine
        .run(&scan_options(&["hv01", "hv02"], &[&scene.vms_dir]))
        .unwrap();

    assert_eq!(report.host_failures.len(), 1);
    assert_eq!(report.host_failures[0].host, "hv02");
    assert!(matches!(
        report.host_failures[0].error,
        Error::UnreachableHost { .. }
    ));
    assert_eq!(report.hosts_swept, 1);
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(
        report.orphans[0].path,
        scene.orphan_path.to_string_lossy()
    );
}

#[test]
fn malformed_path_is_rejected_before_any_host_work() {
    let engine = engine_for(vec![("hv01", FakeHost::default())]);
    let options = SweepOptions {
        hosts: vec!["hv01".to_string()],
        paths: vec!["not-absolute".to_string()],
        ..SweepOptions::default()
    };
    assert!(matches!(
        engine.run(&options),
        Err(Error::MalformedPath { .. })
    ));
}

fn cluster_hosts(csv_volume: &Path) -> Vec<(&'static str, FakeHost)> {
    let cluster = ClusterInfo {
        name: "hvclu".to_string(),
        primary_node: "node-a".to_string(),
        members: vec!["node-a".to_string(), "node-b".to_string()],
    };
    let template = FakeHost {
        cluster: Some(cluster),
        csv_roots: vec![csv_volume.to_string_lossy().into_owned()],
        ..FakeHost::default()
    };
    vec![("node-a", template.clone()), ("node-b", template)]
}

#[test]
fn cluster_volume_is_scanned_once_attributed_to_primary() {
    let tmp = tempdir().unwrap();
    let csv_volume = tmp.path().join("ClusterStorage").join("Volume1");
    fs::create_dir_all(&csv_volume).unwrap();
    let vm1 = csv_volume.join("vm1.vhdx");
    fs::write(&vm1, build_vhdx(None)).unwrap();

    let engine = engine_for(cluster_hosts(&csv_volume));
    let options = SweepOptions {
        hosts: vec!["node-a".to_string(), "node-b".to_string()],
        exclude_default_paths: true,
        exclude_vm_paths: true,
        ..SweepOptions::default()
    };
    let report = engine.run(&options).unwrap();

    assert_eq!(report.roots_scanned, 1);
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].path, vm1.to_string_lossy());
    assert_eq!(report.orphans[0].owning_host.as_deref(), Some("node-a"));
}

#[test]
fn ignore_cluster_membership_excludes_cluster_storage_entirely() {
    let tmp = tempdir().unwrap();
    let csv_volume = tmp.path().join("ClusterStorage").join("Volume1");
    fs::create_dir_all(&csv_volume).unwrap();
    fs::write(csv_volume.join("vm1.vhdx"), build_vhdx(None)).unwrap();

    let engine = engine_for(cluster_hosts(&csv_volume));
    let options = SweepOptions {
        hosts: vec!["node-a".to_string(), "node-b".to_string()],
        exclude_default_paths: true,
        exclude_vm_paths: true,
        ignore_cluster_membership: true,
        ..SweepOptions::default()
    };
    // With every ClusterStorage root dropped there is nothing left to
    // scan: a global precondition failure, not an empty success.
    assert!(matches!(engine.run(&options), Err(Error::NoScanTargets)));
}

#[test]
fn inventory_collection_is_idempotent() {
    let scene = build_web01_tree();
    let session = FakeSession {
        data: FakeHost {
            vms: vec![scene.vm.clone()],
            ..FakeHost::default()
        },
    };

    let first = inventory::collect(&session, "hv01", false, false).unwrap();
    let second = inventory::collect(&session, "hv01", false, false).unwrap();

    let first_set: HashSet<_> = first.known.into_iter().collect();
    let second_set: HashSet<_> = second.known.into_iter().collect();
    assert_eq!(first_set, second_set);
    assert!(!first_set.is_empty());
}

#[test]
fn include_vm_paths_turns_vm_directories_into_targets() {
    let scene = build_web01_tree();
    let session = FakeSession {
        data: FakeHost {
            vms: vec![scene.vm.clone()],
            ..FakeHost::default()
        },
    };

    let inventory = inventory::collect(&session, "hv01", false, true).unwrap();
    let vm_dir = scene.vms_dir.join("web01");
    assert!(inventory
        .targets
        .iter()
        .any(|t| Path::new(&t.path) == vm_dir));
}
