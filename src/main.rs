mod cli;
mod logging;

use std::process;

use anyhow::Context;
use clap::Parser;
use cli::{ChainArgs, Cli, Commands, ScanArgs};
use dotenv::dotenv;
use hvsweep::engine::{SweepEngine, SweepOptions};
use hvsweep::{config, inventory, report};
use tracing::error;

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Scan(scan_args)) => run_scan(scan_args),
        Some(Commands::Chain(chain_args)) => run_chain(chain_args),
        Some(Commands::PrintConfig) | None => print_config(),
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run_scan(args: ScanArgs) -> anyhow::Result<()> {
    let config = config::load_configuration().context("loading configuration")?;
    let engine = SweepEngine::new(config);
    let options = SweepOptions {
        hosts: args.hosts,
        paths: args.paths,
        include_default_paths: args.include_default_paths,
        include_vm_paths: args.include_vm_paths,
        exclude_default_paths: args.exclude_default_paths,
        exclude_vm_paths: args.exclude_vm_paths,
        ignore_cluster_membership: args.ignore_cluster_membership,
    };

    let sweep = engine.run(&options).context("running sweep")?;
    report::print_report(&sweep);
    if let Some(csv_path) = args.csv {
        report::write_csv(&sweep, &csv_path)
            .with_context(|| format!("writing {}", csv_path.display()))?;
        println!("Wrote {} orphan(s) to {}", sweep.orphans.len(), csv_path.display());
    }
    Ok(())
}

fn run_chain(args: ChainArgs) -> anyhow::Result<()> {
    let (chain, error) = inventory::expand_disk_chain(&args.disk);
    for (depth, disk) in chain.iter().enumerate() {
        println!("{}{}", "  ".repeat(depth), disk.display());
    }
    if let Some(err) = error {
        anyhow::bail!("chain walk incomplete: {}", err);
    }
    Ok(())
}

fn print_config() -> anyhow::Result<()> {
    let config = config::load_configuration().context("loading configuration")?;
    println!("Configuration: {:?}", config);
    Ok(())
}
