//! Hypervisor-backed connector: queries Hyper-V through PowerShell with
//! JSON output, filesystem work through the invoking process. Remote
//! session transport is out of scope: paths owned by a remote host are
//! expected to be reachable as given (admin shares or direct mounts).

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use super::source::{CheckpointInfo, ClusterInfo, HostConnector, HostDefaults, HostSession, VmInfo};
use crate::error::Error;
use crate::vhd::chain::DiskRead;

const REGISTRATION_DIR: &str = r"C:\ProgramData\Microsoft\Windows\Hyper-V\Virtual Machines";

pub struct LocalConnector;

impl HostConnector for LocalConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn HostSession>, Error> {
        let session = LocalSession {
            host: host.to_string(),
        };
        // Probe once; an unreachable host must fail here, not mid-collection.
        session.run(&format!(
            "Get-VMHost -ComputerName '{}' | Out-Null",
            session.host
        ))?;
        Ok(Box::new(session))
    }
}

struct LocalSession {
    host: String,
}

#[derive(Debug, Deserialize)]
struct RawHostDefaults {
    #[serde(rename = "VirtualMachinePath")]
    virtual_machine_path: String,
    #[serde(rename = "VirtualHardDiskPath")]
    virtual_hard_disk_path: String,
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "PrimaryNode")]
    primary_node: String,
    #[serde(rename = "Members")]
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawCheckpoint {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "MetadataDir")]
    metadata_dir: String,
}

#[derive(Debug, Deserialize)]
struct RawVm {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Generation")]
    generation: u32,
    #[serde(rename = "ConfigPath")]
    config_path: String,
    #[serde(rename = "Checkpoints", default)]
    checkpoints: Vec<RawCheckpoint>,
    #[serde(rename = "DiskPaths", default)]
    disk_paths: Vec<String>,
    #[serde(rename = "FloppyPaths", default)]
    floppy_paths: Vec<String>,
    #[serde(rename = "SmartPagingPath")]
    smart_paging_path: Option<String>,
    #[serde(rename = "SmartPagingInUse", default)]
    smart_paging_in_use: bool,
}

impl LocalSession {
    fn run(&self, script: &str) -> Result<String, Error> {
        debug!("powershell [{}]: {}", self.host, script);
        let output = Command::new("powershell.exe")
            .args(["-NoLogo", "-NoProfile", "-NonInteractive", "-Command", script])
            .output()
            .map_err(|err| Error::UnreachableHost {
                host: self.host.clone(),
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Query {
                host: self.host.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `ConvertTo-Json` collapses single-element pipelines to a bare
    /// object; normalize both shapes to a list.
    fn run_json_list<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<Vec<T>, Error> {
        let stdout = self.run(script)?;
        if stdout.is_empty() {
            return Ok(Vec::new());
        }
        let value: serde_json::Value =
            serde_json::from_str(&stdout).map_err(|err| self.decode_error(err))?;
        let items = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(|err| self.decode_error(err)))
            .collect()
    }

    fn decode_error(&self, err: impl std::fmt::Display) -> Error {
        Error::Query {
            host: self.host.clone(),
            reason: format!("bad JSON from hypervisor query: {}", err),
        }
    }
}

impl HostSession for LocalSession {
    fn defaults(&self) -> Result<HostDefaults, Error> {
        let script = format!(
            "Get-VMHost -ComputerName '{}' | Select-Object VirtualMachinePath, VirtualHardDiskPath | ConvertTo-Json -Compress",
            self.host
        );
        let raw: Vec<RawHostDefaults> = self.run_json_list(&script)?;
        let raw = raw.into_iter().next().ok_or_else(|| Error::Query {
            host: self.host.clone(),
            reason: "empty host defaults".to_string(),
        })?;
        Ok(HostDefaults {
            vm_config_path: raw.virtual_machine_path,
            virtual_disk_path: raw.virtual_hard_disk_path,
            registration_dir: REGISTRATION_DIR.to_string(),
        })
    }

    fn cluster(&self) -> Result<Option<ClusterInfo>, Error> {
        let script = format!(
            r#"$c = Get-Cluster -Name (Get-ClusterNode -Name '{host}' -ErrorAction SilentlyContinue).Cluster -ErrorAction SilentlyContinue
if ($c) {{
  $nodes = @(Get-ClusterNode -Cluster $c.Name | Sort-Object Name)
  [PSCustomObject]@{{
    Name = $c.Name
    PrimaryNode = $nodes[0].Name
    Members = @($nodes | ForEach-Object {{ $_.Name }})
  }} | ConvertTo-Json -Compress
}}"#,
            host = self.host
        );
        let raw: Vec<RawCluster> = self.run_json_list(&script)?;
        Ok(raw.into_iter().next().map(|c| ClusterInfo {
            name: c.name,
            primary_node: c.primary_node,
            members: c.members,
        }))
    }

    fn vms(&self) -> Result<Vec<VmInfo>, Error> {
        let script = format!(
            r#"Get-VM -ComputerName '{host}' | ForEach-Object {{
  $vm = $_
  [PSCustomObject]@{{
    Id = $vm.Id.Guid
    Name = $vm.Name
    Generation = $vm.Generation
    ConfigPath = Join-Path $vm.ConfigurationLocation ('Virtual Machines\' + $vm.Id.Guid + '.vmcx')
    Checkpoints = @($vm | Get-VMSnapshot | ForEach-Object {{
      [PSCustomObject]@{{
        Id = $_.Id.Guid
        MetadataDir = Join-Path $_.ConfigurationLocation 'Snapshots'
      }}
    }})
    DiskPaths = @($vm | Get-VMHardDiskDrive | ForEach-Object {{ $_.Path }})
    FloppyPaths = @($vm | Get-VMFloppyDiskDrive -ErrorAction SilentlyContinue | Where-Object {{ $_.Path }} | ForEach-Object {{ $_.Path }})
    SmartPagingPath = $vm.SmartPagingFilePath
    SmartPagingInUse = [bool]$vm.SmartPagingFileInUse
  }}
}} | ConvertTo-Json -Compress -Depth 5"#,
            host = self.host
        );
        let raw: Vec<RawVm> = self.run_json_list(&script)?;
        Ok(raw
            .into_iter()
            .map(|vm| VmInfo {
                id: vm.id,
                name: vm.name,
                generation: vm.generation,
                config_path: vm.config_path,
                checkpoints: vm
                    .checkpoints
                    .into_iter()
                    .map(|c| CheckpointInfo {
                        id: c.id,
                        metadata_dir: c.metadata_dir,
                    })
                    .collect(),
                disk_paths: vm.disk_paths,
                floppy_paths: vm.floppy_paths,
                smart_paging_path: vm.smart_paging_path,
                smart_paging_in_use: vm.smart_paging_in_use,
            })
            .collect())
    }

    fn cluster_storage_roots(&self) -> Result<Vec<String>, Error> {
        let script = r#"$root = Join-Path $env:SystemDrive 'ClusterStorage'
if (Test-Path $root) {
  Get-ChildItem -Path $root -Directory | ForEach-Object { $_.FullName } | ConvertTo-Json -Compress
}"#;
        self.run_json_list(script)
    }

    fn open_disk(&self, path: &Path) -> Result<Box<dyn DiskRead>, Error> {
        crate::vhd::open_shared(path).map(|file| Box::new(file) as Box<dyn DiskRead>)
    }

    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>, Error> {
        let entries = std::fs::read_dir(path).map_err(|err| Error::for_root(path, err))?;
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
