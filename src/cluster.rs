//! Cluster-shared-volume deduplication. Every node of a failover cluster
//! mounts the same CSV paths, so a naive per-host sweep would scan and
//! attribute each shared file once per node. One designated primary node
//! owns CSV work; everything CSV-shaped on a non-primary member is either
//! re-attributed to the primary or, under `ignore_cluster_membership`,
//! dropped outright.

use ahash::AHashSet;
use tracing::debug;

use crate::inventory::source::ClusterInfo;
use crate::model::{ManagedFileReference, ScanTarget};
use crate::utils::path::{fold_path_key, is_under, under_cluster_storage};

fn cluster_for<'a>(clusters: &'a [ClusterInfo], host: &str) -> Option<&'a ClusterInfo> {
    clusters.iter().find(|c| c.is_member(host))
}

/// Rewrites scan targets for cluster redundancy:
/// - a CSV target on a non-primary member moves to the primary node
///   (dropped under `ignore_cluster_membership`);
/// - non-CSV targets owned by a non-primary member get
///   `skip_cluster_storage`, so a broad root like `C:\` does not wander
///   into a mount the primary already covers;
/// - exact duplicates collapse.
pub fn dedupe_targets(
    clusters: &[ClusterInfo],
    targets: Vec<ScanTarget>,
    ignore_cluster_membership: bool,
) -> Vec<ScanTarget> {
    let mut result: Vec<ScanTarget> = Vec::new();
    let mut seen: AHashSet<(String, Option<String>)> = AHashSet::new();

    for mut target in targets {
        let cluster = target
            .owner_host
            .as_deref()
            .and_then(|host| cluster_for(clusters, host));

        if let Some(cluster) = cluster {
            let host = target.owner_host.as_deref().unwrap_or_default();
            if under_cluster_storage(&target.path) {
                if ignore_cluster_membership {
                    debug!("dropping cluster storage target {}", target.path);
                    continue;
                }
                if !cluster.is_primary(host) {
                    target.owner_host = Some(cluster.primary_node.clone());
                }
            } else if !cluster.is_primary(host) {
                target.skip_cluster_storage = true;
            }
        } else if ignore_cluster_membership && under_cluster_storage(&target.path) {
            continue;
        }

        let key = (
            fold_path_key(&target.path),
            target.owner_host.as_ref().map(|h| h.to_ascii_lowercase()),
        );
        if seen.insert(key) {
            result.push(target);
        }
    }
    result
}

/// Same collapse for known-file references, so the exclusion set carries
/// each CSV file exactly once, attributed to the primary node.
pub fn dedupe_known(
    clusters: &[ClusterInfo],
    known: Vec<ManagedFileReference>,
    ignore_cluster_membership: bool,
) -> Vec<ManagedFileReference> {
    let mut result: Vec<ManagedFileReference> = Vec::new();
    let mut seen: AHashSet<(String, Option<String>, crate::model::FileKind)> = AHashSet::new();

    for mut reference in known {
        if under_cluster_storage(&reference.path) {
            if let Some(cluster) = reference
                .owning_host
                .as_deref()
                .and_then(|host| cluster_for(clusters, host))
            {
                if !ignore_cluster_membership {
                    reference.owning_host = Some(cluster.primary_node.clone());
                }
            }
        }
        let key = (
            fold_path_key(&reference.path),
            reference.owning_host.as_ref().map(|h| h.to_ascii_lowercase()),
            reference.kind,
        );
        if seen.insert(key) {
            result.push(reference);
        }
    }
    result
}

/// Removes scan roots wholly contained in another resolved root with a
/// compatible owner (same host, or either side unowned). The container
/// is kept; scanning the contained root again would only duplicate work.
pub fn remove_subpaths(targets: Vec<ScanTarget>) -> Vec<ScanTarget> {
    let mut result: Vec<ScanTarget> = Vec::new();

    for target in targets {
        let mut contained = false;
        result.retain(|kept| {
            if owners_compatible(kept, &target) {
                if is_under(&kept.path, &target.path) {
                    contained = true;
                } else if is_under(&target.path, &kept.path) {
                    return false;
                }
            }
            true
        });
        if !contained {
            result.push(target);
        }
    }
    result
}

fn owners_compatible(a: &ScanTarget, b: &ScanTarget) -> bool {
    match (&a.owner_host, &b.owner_host) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => true,
    }
}
