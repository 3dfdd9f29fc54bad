//! # Ledgerbench - storage-growth benchmarking for permissioned ledger networks
//!
//! This library measures how the per-node disk footprint of a stream-based
//! ledger grows under a configurable transaction load, and learns a model
//! that predicts that growth for loads that were never benchmarked.
//!
//! ## Overview
//!
//! A benchmark run replays a transaction-rate matrix between nodes while a
//! sampler records chain size, published item volume and per-node disk usage
//! at a fixed cadence. Afterwards every run is reduced to growth slopes, and
//! the slopes of many runs train a weighted least-squares model.
//!
//! ## Architecture
//!
//! - `config`: Run snapshot, analysis settings and the transaction matrix
//! - `config_loader`: YAML loading, validation and snapshot writing
//! - `error`: Error taxonomy shared by sampling and analysis
//! - `schedule`: Per-sender replay schedules derived from the matrix
//! - `sampler`: Paced measurement loop over chain and disk probes
//! - `analysis`: Growth fits, detailed usage, dataset building, regression
//!   and reports
//! - `utils`: Display units
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ledgerbench::analysis::{train, DatasetBuilder, DirectoryRunSource};
//! use ledgerbench::config::AnalysisConfig;
//! use ledgerbench::sampler::CancellationToken;
//!
//! let analysis = AnalysisConfig::default();
//! let source = DirectoryRunSource::new("data");
//! let build = DatasetBuilder::new(analysis.clone()).build(&source, &CancellationToken::new())?;
//! let model = train(&build.dataset, &analysis)?;
//! println!("coefficients: {:?}", model.coefficients);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Run Configuration
//!
//! Every run directory holds a `config.yaml` snapshot:
//!
//! ```yaml
//! num_nodes: 3
//! txpm:
//!   - [0, 4, 4]
//!   - [0, 0, 4]
//!   - [0, 0, 0]
//! mode: offchain
//! master_sub_all: true
//! tx_size_kb: 1.53
//! test_duration: 10h
//! measure_delay: 5s
//! ```
//!
//! ## Error Handling
//!
//! Library operations return `Result<T, GrowthError>`; loaders, reports and
//! binaries use `color_eyre` for error reporting with context.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod schedule;
pub mod sampler;
pub mod analysis;
pub mod utils;
