//! Operator-facing rendering of a sweep report: colored console output
//! and CSV export. Detection only: deletion stays with the operator.

use std::path::Path;

use colored::*;

use crate::engine::SweepReport;
use crate::error::Error;
use crate::model::FileKind;

fn kind_label(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Metadata => "metadata",
        FileKind::Disk => "disk",
        FileKind::DirectoryRoot => "directory",
    }
}

pub fn print_report(report: &SweepReport) {
    println!();
    println!(
        "{}",
        format!(
            "Sweep of {} host(s), {} root(s): collected {}",
            report.hosts_swept,
            report.roots_scanned,
            report.collected_at.format("%Y-%m-%d %H:%M:%S")
        )
        .bold()
    );
    println!(
        "Known files excluded: {} disks, {} metadata  (inventory {:.1}s, scan {:.1}s)",
        report.known_disk_files,
        report.known_metadata_files,
        report.inventory_duration.as_secs_f64(),
        report.scan_duration.as_secs_f64(),
    );

    if report.orphans.is_empty() {
        println!("{}", "No orphaned files found.".green());
    } else {
        println!();
        println!(
            "{}",
            format!("{} orphaned file(s):", report.orphans.len())
                .red()
                .bold()
        );
        for orphan in &report.orphans {
            let host = orphan.owning_host.as_deref().unwrap_or("<shared>");
            println!(
                "  {:<10} {:<14} {}",
                kind_label(orphan.kind).yellow(),
                host.cyan(),
                orphan.path
            );
        }
    }

    if !report.failed_roots.is_empty() {
        println!();
        println!(
            "{}",
            format!("{} root(s) could not be scanned:", report.failed_roots.len()).yellow()
        );
        for failed in &report.failed_roots {
            println!("  {}: {}", failed.target.path, failed.error);
        }
    }

    if !report.host_failures.is_empty() {
        println!();
        println!(
            "{}",
            format!("{} host(s) unreachable:", report.host_failures.len()).yellow()
        );
        for failure in &report.host_failures {
            println!("  {}: {}", failure.host, failure.error);
        }
    }

    if !report.warnings.is_empty() {
        println!();
        println!(
            "{}",
            format!("{} inventory warning(s):", report.warnings.len()).yellow()
        );
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }
}

/// Writes orphans to CSV: one row per file, with the collection
/// timestamp so stale reports are recognizable.
pub fn write_csv(report: &SweepReport, path: &Path) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer
        .write_record(["path", "owning_host", "kind", "detected_at"])
        .map_err(csv_error)?;
    let detected_at = report.collected_at.to_rfc3339();
    for orphan in &report.orphans {
        writer
            .write_record([
                orphan.path.as_str(),
                orphan.owning_host.as_deref().unwrap_or(""),
                kind_label(orphan.kind),
                detected_at.as_str(),
            ])
            .map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_error(err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("csv write failed: {:?}", other),
        )),
    }
}
