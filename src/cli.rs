use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)] // requires `derive` feature
#[command(name = "hvsweep")]
#[command(about = "Finds orphaned Hyper-V VM files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sweep hosts and report orphaned VM files
    Scan(ScanArgs),
    /// Parse one disk file and print its differencing-disk parent chain
    Chain(ChainArgs),
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Host(s) to sweep; repeatable. Defaults to configuration, then the
    /// local machine.
    #[arg(long = "host")]
    pub hosts: Vec<String>,

    /// Explicit search root(s); repeatable. When given, default and VM
    /// paths are only scanned if explicitly included.
    #[arg(long = "path")]
    pub paths: Vec<String>,

    /// Also scan each host's default VM and virtual-disk paths
    #[arg(long, conflicts_with = "exclude_default_paths")]
    pub include_default_paths: bool,

    /// Also scan the directories of every registered VM
    #[arg(long, conflicts_with = "exclude_vm_paths")]
    pub include_vm_paths: bool,

    /// Skip each host's default paths (only without --path)
    #[arg(long)]
    pub exclude_default_paths: bool,

    /// Skip registered-VM directories (only without --path)
    #[arg(long)]
    pub exclude_vm_paths: bool,

    /// Treat ClusterStorage paths as out of scope instead of retargeting
    /// them to the cluster's primary node
    #[arg(long)]
    pub ignore_cluster_membership: bool,

    /// Write the orphan list to a CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ChainArgs {
    /// Disk file to walk (.vhd / .vhdx / .avhd / .avhdx)
    pub disk: PathBuf,
}
