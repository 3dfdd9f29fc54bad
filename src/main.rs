use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use ledgerbench::config_loader;
use ledgerbench::schedule::{generate_schedules, write_schedule_files};

/// Prepare a storage-growth benchmark run directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the run configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Data root under which the run directory is created
    #[arg(short, long, default_value = "data")]
    output: PathBuf,
}

/// First `<prefix>-<k>` (k >= 1) under `root` that does not exist yet
fn next_run_dir(root: &Path, prefix: &str) -> PathBuf {
    (1..)
        .map(|k| root.join(format!("{}-{}", prefix, k)))
        .find(|path| !path.exists())
        .unwrap_or_else(|| root.join(prefix))
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Starting ledgerbench run preparation");
    info!("Configuration file: {:?}", args.config);
    info!("Data root: {:?}", args.output);

    let config = config_loader::load_run_config(&args.config)?;

    fs::create_dir_all(&args.output)
        .wrap_err_with(|| format!("Failed to create data root '{}'", args.output.display()))?;

    let prefix = format!("{}-{}", config.stream_name, config.mode);
    let run_dir = next_run_dir(&args.output, &prefix);
    fs::create_dir_all(&run_dir)
        .wrap_err_with(|| format!("Failed to create run directory '{}'", run_dir.display()))?;
    info!("Run directory: {:?}", run_dir);

    config_loader::save_run_config(&config, &run_dir)?;

    let schedules = generate_schedules(
        &config.txpm,
        config.test_duration_minutes(),
        &config.stream_name,
    )?;
    let files = write_schedule_files(&run_dir, &schedules)?;
    info!("Wrote {} replay schedules", files.len());

    info!(
        "Run prepared: {} nodes, {} mode, {} KB transactions, {:?} test, sampling every {:?}",
        config.num_nodes,
        config.mode,
        config.tx_size_kb,
        config.test_duration,
        config.measure_delay
    );
    Ok(())
}
