//! Storage-growth analysis of recorded benchmark runs.
//!
//! This module turns measurement series into per-run growth fits, assembles
//! them into a cross-run dataset and trains the weighted regression model.

pub mod types;
pub mod measurements;
pub mod growth;
pub mod detailed_usage;
pub mod dataset;
pub mod regression;
pub mod approx;
pub mod report;

pub use types::*;
pub use measurements::{read_measurements, write_measurements, MeasurementWriter, RunRecord};
pub use growth::{estimate_run, fit_growth, warm_up_start_row};
pub use detailed_usage::{parse_detailed_rows, reshape_run, DetailedUsage};
pub use dataset::{node_load_features, search_runs, DatasetBuilder, DirectoryRunSource, RunSource};
pub use regression::{test_set_size, train};
pub use approx::{approximate_growth, matrix_from_party_volumes};
pub use report::{generate_json_report, generate_text_report, print_summary};
