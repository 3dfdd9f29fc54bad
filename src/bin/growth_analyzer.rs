//! Storage-growth analysis CLI for ledgerbench runs.
//!
//! Fits per-run growth, trains the cross-run model, reshapes detailed disk
//! listings and produces rough closed-form estimates.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};

use ledgerbench::analysis::{
    self,
    detailed_usage::DEFAULT_CHAIN_ROOT,
    growth::write_extrapolation_csv,
    report,
    types::{AnalysisMetadata, ModelReport},
    DatasetBuilder, DirectoryRunSource, RunSource,
};
use ledgerbench::config::{AnalysisConfig, ChainMode, RunFilter};
use ledgerbench::config_loader::{self, RUN_CONFIG_FILE};
use ledgerbench::sampler::CancellationToken;

#[derive(Parser)]
#[command(name = "growth-analyzer")]
#[command(about = "Storage-growth analysis for ledgerbench runs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding one sub-directory per run
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Output directory for reports
    #[arg(short, long, default_value = "analysis_output")]
    output: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Analysis settings YAML (warm-up, split, seed, filter)
    #[arg(long)]
    analysis_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dataset from every matching run and train the model
    Train {
        /// Only use runs with this transaction size (KB)
        #[arg(long)]
        tx_size: Option<f64>,

        /// Only use runs of this chain mode (offchain, onchain)
        #[arg(long)]
        mode: Option<ChainMode>,

        /// Seed for the train/test shuffle
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Fit and extrapolate the growth of every series of one run
    Estimate {
        /// Run identifier (directory name under the data directory)
        #[arg(long)]
        run: String,
    },

    /// Reshape the raw detailed disk listings of one run
    Detailed {
        /// Run identifier (directory name under the data directory)
        #[arg(long)]
        run: String,

        /// Leave per-stream subfolders out of the reshaped files
        #[arg(long)]
        no_streams: bool,

        /// Path prefix removed from listed subfolders
        #[arg(long, default_value = DEFAULT_CHAIN_ROOT)]
        strip_prefix: String,
    },

    /// Rough growth estimate from yearly transaction volumes per party
    Approx {
        /// YAML map of party name to transactions per year
        #[arg(long)]
        volumes: PathBuf,

        /// Transaction size in KB
        #[arg(long)]
        tx_size: f64,
    },

    /// List runs matching a transaction size and/or matrix
    Search {
        /// Transaction size in KB
        #[arg(long)]
        tx_size: Option<f64>,

        /// YAML transaction matrix the run must match exactly
        #[arg(long)]
        txpm: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let mut settings = config_loader::load_analysis_config(cli.analysis_config.as_deref())?;
    let source = DirectoryRunSource::new(&cli.data_dir);

    match cli.command {
        Commands::Train {
            tx_size,
            mode,
            seed,
        } => {
            apply_train_overrides(&mut settings, tx_size, mode, seed);
            run_training(&cli.output, &cli.data_dir, &source, &settings)?;
        }

        Commands::Estimate { run } => {
            run_estimate(&cli.output, &source, &run, &settings)?;
        }

        Commands::Detailed {
            run,
            no_streams,
            strip_prefix,
        } => {
            let config = source.load_config(&run)?;
            let reshaped =
                analysis::reshape_run(&source.run_dir(&run), &config, &strip_prefix, no_streams)?;
            for (node, usage) in reshaped.iter().enumerate() {
                println!(
                    "{}: {} listings, subfolders: {}",
                    config.node_label(node),
                    usage.rows.len(),
                    usage.header.join(", ")
                );
            }
        }

        Commands::Approx { volumes, tx_size } => {
            let content = fs::read_to_string(&volumes)
                .with_context(|| format!("Failed to read volumes from {}", volumes.display()))?;
            let party_volumes: BTreeMap<String, f64> = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse volumes from {}", volumes.display()))?;

            let matrix = analysis::matrix_from_party_volumes(&party_volumes)?;
            let estimate = analysis::approximate_growth(&matrix, tx_size);

            create_output_dir(&cli.output)?;
            report::generate_json_report(&estimate, &cli.output.join("approx_estimate.json"))?;
            report::print_approx_summary(&estimate);
        }

        Commands::Search { tx_size, txpm } => {
            let filter = RunFilter {
                tx_size_kb: tx_size,
                mode: None,
                txpm: txpm.as_deref().map(config_loader::load_matrix).transpose()?,
            };
            let found = analysis::search_runs(&source, &filter)?;
            if found.is_empty() {
                println!("No matching runs in {}", cli.data_dir.display());
            }
            for (run_id, config) in found {
                println!(
                    "{}  ({} nodes, {}, {} KB)",
                    source.run_dir(&run_id).display(),
                    config.num_nodes,
                    config.mode,
                    config.tx_size_kb
                );
            }
        }
    }

    Ok(())
}

/// Fold CLI overrides into the analysis settings.
///
/// Training always uses a single chain mode; offchain when none is given.
fn apply_train_overrides(
    settings: &mut AnalysisConfig,
    tx_size: Option<f64>,
    mode: Option<ChainMode>,
    seed: Option<u64>,
) {
    if tx_size.is_some() {
        settings.filter.tx_size_kb = tx_size;
    }
    if mode.is_some() {
        settings.filter.mode = mode;
    }
    if settings.filter.mode.is_none() {
        log::info!("No chain mode given, training on offchain runs");
        settings.filter.mode = Some(ChainMode::Offchain);
    }
    if seed.is_some() {
        settings.seed = seed;
    }
}

fn create_output_dir(output: &Path) -> Result<()> {
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory: {}", output.display()))
}

fn run_training(
    output: &Path,
    data_dir: &Path,
    source: &DirectoryRunSource,
    settings: &AnalysisConfig,
) -> Result<()> {
    log::info!("Building dataset from {}...", data_dir.display());
    let build = DatasetBuilder::new(settings.clone()).build(source, &CancellationToken::new())?;

    for (kind, count) in build.skip_counts() {
        log::info!("Skipped {} runs: {}", count, kind);
    }

    let model = analysis::train(&build.dataset, settings)?;

    let model_report = ModelReport {
        metadata: create_metadata(data_dir, settings),
        model,
        dataset_rows: build.dataset.len(),
        runs_used: build.runs_used,
        skipped: build.skipped,
    };

    create_output_dir(output)?;
    report::generate_json_report(&model_report, &output.join("model_report.json"))?;
    report::generate_text_report(&model_report, &output.join("model_report.txt"))?;
    report::print_summary(&model_report);

    Ok(())
}

fn run_estimate(
    output: &Path,
    source: &DirectoryRunSource,
    run_id: &str,
    settings: &AnalysisConfig,
) -> Result<()> {
    let run_dir = source.run_dir(run_id);
    if !run_dir.join(RUN_CONFIG_FILE).is_file() {
        return Err(eyre!("{} is not a run directory", run_dir.display()));
    }

    let config = config_loader::load_run_config(&run_dir.join(RUN_CONFIG_FILE))?;
    let samples = source.load_series(run_id)?;
    let estimate = analysis::estimate_run(run_id, &config, &samples, settings)?;

    let run_output = output.join(run_id);
    create_output_dir(&run_output)?;
    report::generate_json_report(&estimate, &run_output.join("growth_report.json"))?;
    report::generate_growth_text_report(&estimate, &run_output.join("growth_report.txt"))?;

    if !estimate.series.is_empty() {
        for &days in &config.plot_horizons_days {
            let path = run_output.join(format!("extrapolation_{}d.csv", days));
            write_extrapolation_csv(&path, &estimate, days)?;
            log::info!("Extrapolation curve written to {}", path.display());
        }
    }

    report::print_growth_summary(&estimate);
    Ok(())
}

fn create_metadata(data_dir: &Path, settings: &AnalysisConfig) -> AnalysisMetadata {
    AnalysisMetadata {
        analysis_timestamp: chrono::Utc::now().to_rfc3339(),
        data_dir: data_dir.display().to_string(),
        filter: settings.filter.clone(),
        seed: settings.seed,
    }
}
