use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use keel::cli::{
    Commands, GlobalArgs, run_open, run_reconcile, run_recover, run_run, run_status,
};

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Encrypted local store kept in step with the identity service", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("keel=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = GlobalArgs {
        config: cli.config,
        data_dir: cli.data_dir,
    };
    let config = global.store_config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Open { json } => run_open(&config, json),
            Commands::Reconcile {
                snapshot,
                owner,
                json,
            } => run_reconcile(&config, &snapshot, owner.as_deref(), json),
            Commands::Recover { snapshot, json } => run_recover(&config, &snapshot, json).await,
            Commands::Run { snapshot, once } => run_run(&config, &snapshot, once).await,
            Commands::Status { json } => run_status(&config, json),
        }
    })
}
