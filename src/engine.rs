//! Sweep orchestration: inventory fan-out, cluster deduplication, scan
//! fan-out, one reduction into the final report.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cluster;
use crate::config::AppConfig;
use crate::error::Error;
use crate::inventory::{self, source::ClusterInfo, source::HostConnector, HostInventory};
use crate::model::{ExclusionSet, FailedRoot, HostFailure, OrphanedFile, ScanTarget};
use crate::scanner;
use crate::utils::path::{is_unc_share, normalize_dir_path};

/// One invocation's worth of options, resolved from the CLI surface.
#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub hosts: Vec<String>,
    /// Explicit search roots. When present, default and VM paths are
    /// opt-in; when absent, they are opt-out.
    pub paths: Vec<String>,
    pub include_default_paths: bool,
    pub include_vm_paths: bool,
    pub exclude_default_paths: bool,
    pub exclude_vm_paths: bool,
    pub ignore_cluster_membership: bool,
}

impl SweepOptions {
    /// Explicit paths flip the polarity of the include flags.
    fn resolved_includes(&self) -> (bool, bool) {
        if self.paths.is_empty() {
            (!self.exclude_default_paths, !self.exclude_vm_paths)
        } else {
            (self.include_default_paths, self.include_vm_paths)
        }
    }
}

#[derive(Debug)]
pub struct SweepReport {
    pub orphans: Vec<OrphanedFile>,
    pub failed_roots: Vec<FailedRoot>,
    pub host_failures: Vec<HostFailure>,
    pub warnings: Vec<Error>,
    pub hosts_swept: usize,
    pub roots_scanned: usize,
    pub known_disk_files: usize,
    pub known_metadata_files: usize,
    pub inventory_duration: Duration,
    pub scan_duration: Duration,
    pub collected_at: DateTime<Local>,
}

pub struct SweepEngine {
    config: AppConfig,
    connector: Box<dyn HostConnector>,
}

impl SweepEngine {
    pub fn new(config: AppConfig) -> Self {
        Self::with_connector(config, Box::new(inventory::local::LocalConnector))
    }

    pub fn with_connector(config: AppConfig, connector: Box<dyn HostConnector>) -> Self {
        Self { config, connector }
    }

    /// Runs the full sweep:
    /// 1. Per-host inventory collection (parallel, failures isolated)
    /// 2. Reduction into one exclusion set + resolved scan roots
    /// 3. Cluster deduplication and subpath removal
    /// 4. Per-root reconciliation scan (parallel, failures isolated)
    pub fn run(&self, options: &SweepOptions) -> Result<SweepReport, Error> {
        let collected_at = Local::now();

        // Reject malformed operator paths before any host work.
        let explicit_paths: Vec<String> = options
            .paths
            .iter()
            .map(|p| normalize_dir_path(p))
            .collect::<Result<_, _>>()?;

        let hosts = self.resolve_hosts(options);
        let (include_defaults, include_vm_paths) = options.resolved_includes();
        info!(
            "Sweeping {} host(s); defaults={}, vm-paths={}",
            hosts.len(),
            include_defaults,
            include_vm_paths
        );

        // Phase 1: inventory
        let inventory_start = Instant::now();
        let collected: Vec<(String, Result<HostInventory, Error>)> = hosts
            .par_iter()
            .map(|host| {
                let result = self
                    .connector
                    .connect(host)
                    .and_then(|session| {
                        inventory::collect(
                            session.as_ref(),
                            host,
                            include_defaults,
                            include_vm_paths,
                        )
                    });
                (host.clone(), result)
            })
            .collect();
        let inventory_duration = inventory_start.elapsed();

        // Reduction: immutable per-host records merged once.
        let mut inventories: Vec<HostInventory> = Vec::new();
        let mut host_failures: Vec<HostFailure> = Vec::new();
        for (host, result) in collected {
            match result {
                Ok(inventory) => inventories.push(inventory),
                Err(error) => {
                    warn!("host '{}' dropped from sweep: {}", host, error);
                    host_failures.push(HostFailure { host, error });
                }
            }
        }
        let hosts_swept = inventories.len();

        let clusters: Vec<ClusterInfo> = {
            let mut clusters: Vec<ClusterInfo> = Vec::new();
            for inventory in &inventories {
                if let Some(cluster) = &inventory.cluster {
                    if !clusters.contains(cluster) {
                        clusters.push(cluster.clone());
                    }
                }
            }
            clusters
        };

        let mut warnings: Vec<Error> = Vec::new();
        let mut targets: Vec<ScanTarget> = Vec::new();
        let mut known = Vec::new();
        for inventory in inventories {
            targets.extend(inventory.targets);
            known.extend(inventory.known);
            warnings.extend(inventory.warnings);
        }

        // Explicit roots: shared paths scan once unowned; local-form
        // paths are scanned in each surviving host's context.
        for path in &explicit_paths {
            if is_unc_share(path) {
                targets.push(ScanTarget::new(path.clone(), None));
            } else {
                for host in &hosts {
                    if host_failures.iter().any(|f| f.host.eq_ignore_ascii_case(host)) {
                        continue;
                    }
                    targets.push(ScanTarget::new(path.clone(), Some(host.clone())));
                }
            }
        }

        let known = cluster::dedupe_known(&clusters, known, options.ignore_cluster_membership);
        let targets =
            cluster::dedupe_targets(&clusters, targets, options.ignore_cluster_membership);
        let targets = cluster::remove_subpaths(targets);

        if targets.is_empty() {
            return Err(Error::NoScanTargets);
        }

        let mut exclusions = ExclusionSet::new();
        for reference in &known {
            exclusions.insert(reference);
        }
        debug!(
            "exclusion set: {} disks, {} metadata; {} scan roots",
            exclusions.disk_count(),
            exclusions.metadata_count(),
            targets.len()
        );

        // Phase 2: scan
        let ignore_patterns = scanner::compile_ignore_patterns(&self.config.ignore_patterns);
        let scan_start = Instant::now();
        let outcomes: DashMap<usize, Result<Vec<OrphanedFile>, Error>> = DashMap::new();
        targets.par_iter().enumerate().for_each(|(index, target)| {
            outcomes.insert(index, scanner::scan_root(target, &exclusions, &ignore_patterns));
        });
        let scan_duration = scan_start.elapsed();

        let mut orphans: Vec<OrphanedFile> = Vec::new();
        let mut failed_roots: Vec<FailedRoot> = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            match outcomes.remove(&index).map(|(_, v)| v) {
                Some(Ok(found)) => orphans.extend(found),
                Some(Err(error)) => {
                    warn!("scan of {} failed: {}", target.path, error);
                    failed_roots.push(FailedRoot {
                        target: target.clone(),
                        error,
                    });
                }
                None => unreachable!("every target produces an outcome"),
            }
        }
        orphans.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            "Sweep complete: {} orphan(s), {} failed root(s), {} unreachable host(s)",
            orphans.len(),
            failed_roots.len(),
            host_failures.len()
        );

        Ok(SweepReport {
            orphans,
            failed_roots,
            host_failures,
            warnings,
            hosts_swept,
            roots_scanned: targets.len(),
            known_disk_files: exclusions.disk_count(),
            known_metadata_files: exclusions.metadata_count(),
            inventory_duration,
            scan_duration,
            collected_at,
        })
    }

    fn resolve_hosts(&self, options: &SweepOptions) -> Vec<String> {
        if !options.hosts.is_empty() {
            return options.hosts.clone();
        }
        if !self.config.hosts.is_empty() {
            return self.config.hosts.clone();
        }
        vec![local_host_name()]
    }
}

fn local_host_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
