//! Cross-run dataset assembly.
//!
//! Every historical run that passes the filter contributes one feature row
//! per node: the node's static load (traffic sent, received and neither,
//! each scaled by the transaction size) paired with the slope of its disk
//! usage. Runs that cannot contribute are recorded with the reason.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::growth::{fit_growth, series_column, warm_up_start_row};
use super::measurements::{read_measurements, MEASUREMENTS_FILE};
use super::types::*;
use crate::config::{AnalysisConfig, RunConfig, RunFilter};
use crate::config_loader::RUN_CONFIG_FILE;
use crate::error::GrowthError;
use crate::sampler::CancellationToken;

/// Enumerates historical runs and loads their persisted state
pub trait RunSource {
    /// Identifiers of every candidate run, in a stable order
    fn list_runs(&self) -> Result<Vec<String>, GrowthError>;

    fn load_config(&self, run_id: &str) -> Result<RunConfig, GrowthError>;

    fn load_series(&self, run_id: &str) -> Result<Vec<MeasurementSample>, GrowthError>;
}

/// Runs stored as sub-directories of a data root
#[derive(Debug, Clone)]
pub struct DirectoryRunSource {
    root: PathBuf,
}

impl DirectoryRunSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }
}

impl RunSource for DirectoryRunSource {
    /// Sub-directories holding a configuration snapshot, sorted by name
    fn list_runs(&self) -> Result<Vec<String>, GrowthError> {
        let entries = fs::read_dir(&self.root).map_err(|e| GrowthError::io(&self.root, e))?;

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GrowthError::io(&self.root, e))?;
            let path = entry.path();
            if path.is_dir() && path.join(RUN_CONFIG_FILE).is_file() {
                runs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        runs.sort();
        Ok(runs)
    }

    fn load_config(&self, run_id: &str) -> Result<RunConfig, GrowthError> {
        let path = self.run_dir(run_id).join(RUN_CONFIG_FILE);
        let content = fs::read_to_string(&path).map_err(|e| GrowthError::io(&path, e))?;
        let config: RunConfig = serde_yaml::from_str(&content)
            .map_err(|e| GrowthError::ParseError(format!("{}: {}", path.display(), e)))?;
        config
            .validate()
            .map_err(|e| GrowthError::ParseError(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    fn load_series(&self, run_id: &str) -> Result<Vec<MeasurementSample>, GrowthError> {
        read_measurements(&self.run_dir(run_id).join(MEASUREMENTS_FILE))
    }
}

/// Per-node `[sent, received, other]` load in KB per minute
pub fn node_load_features(config: &RunConfig) -> Vec<[f64; 3]> {
    let total = config.txpm.total_per_min();
    (0..config.num_nodes)
        .map(|node| {
            let sent = config.txpm.sent_per_min(node);
            let received = config.txpm.received_per_min(node);
            let other = total.saturating_sub(sent).saturating_sub(received);
            [
                sent as f64 * config.tx_size_kb,
                received as f64 * config.tx_size_kb,
                other as f64 * config.tx_size_kb,
            ]
        })
        .collect()
}

/// Feature rows of one run.
///
/// When the master node subscribes to every stream its row is left out.
pub fn run_feature_rows(
    run_id: &str,
    config: &RunConfig,
    samples: &[MeasurementSample],
    analysis: &AnalysisConfig,
) -> Result<Vec<FeatureRow>, GrowthError> {
    let last = samples.last().ok_or_else(|| {
        GrowthError::InsufficientData(format!("run {} has no samples", run_id))
    })?;
    if last.disk_usage_kb.len() != config.num_nodes {
        return Err(GrowthError::ParseError(format!(
            "run {} has {} disk series for {} nodes",
            run_id,
            last.disk_usage_kb.len(),
            config.num_nodes
        )));
    }

    let start_row = warm_up_start_row(analysis.warm_up(config.mode), config.measure_delay);
    let times: Vec<f64> = samples.iter().map(|s| s.elapsed_secs).collect();
    let features = node_load_features(config);
    let first_node = usize::from(config.master_sub_all);

    let mut rows = Vec::with_capacity(config.num_nodes - first_node);
    for (node, node_features) in features.iter().enumerate().skip(first_node) {
        let values = series_column(samples, AGGREGATE_COLUMNS + node)?;
        let coefficient = fit_growth(&times, &values, start_row)?;
        rows.push(FeatureRow {
            run_id: run_id.to_string(),
            node,
            features: *node_features,
            target_slope: coefficient.slope,
            weight: last.elapsed_secs,
        });
    }

    Ok(rows)
}

/// Builds the training dataset from every run a source lists
pub struct DatasetBuilder {
    analysis: AnalysisConfig,
}

impl DatasetBuilder {
    pub fn new(analysis: AnalysisConfig) -> Self {
        Self { analysis }
    }

    /// Scan every run, skipping (and recording) those that do not qualify.
    ///
    /// Cancellation is checked before each run; a cancelled scan returns
    /// `GrowthError::Cancelled` rather than a partial dataset.
    pub fn build<S: RunSource + ?Sized>(
        &self,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<DatasetBuild, GrowthError> {
        let runs = source.list_runs()?;
        info!("Scanning {} candidate runs", runs.len());

        let mut build = DatasetBuild::default();
        for run_id in runs {
            if cancel.is_cancelled() {
                info!("Dataset scan cancelled before run {}", run_id);
                return Err(GrowthError::Cancelled);
            }

            match self.run_rows(source, &run_id) {
                Ok(rows) => {
                    debug!("{}: {} feature rows", run_id, rows.len());
                    build.dataset.rows.extend(rows);
                    build.runs_used.push(run_id);
                }
                Err(e @ GrowthError::ConfigMismatch(_)) => {
                    debug!("Skipping {}: {}", run_id, e);
                    build.skipped.push(SkippedRun::new(&run_id, &e));
                }
                Err(e) => {
                    warn!("Skipping {}: {}", run_id, e);
                    build.skipped.push(SkippedRun::new(&run_id, &e));
                }
            }
        }

        info!(
            "Dataset: {} rows from {} runs, {} runs skipped",
            build.dataset.len(),
            build.runs_used.len(),
            build.skipped.len()
        );
        Ok(build)
    }

    fn run_rows<S: RunSource + ?Sized>(
        &self,
        source: &S,
        run_id: &str,
    ) -> Result<Vec<FeatureRow>, GrowthError> {
        let config = source.load_config(run_id)?;
        self.analysis.filter.check(&config)?;
        let samples = source.load_series(run_id)?;
        run_feature_rows(run_id, &config, &samples, &self.analysis)
    }
}

/// Runs whose configuration passes `filter`, with their configuration
pub fn search_runs<S: RunSource + ?Sized>(
    source: &S,
    filter: &RunFilter,
) -> Result<Vec<(String, RunConfig)>, GrowthError> {
    let mut found = Vec::new();
    for run_id in source.list_runs()? {
        match source.load_config(&run_id) {
            Ok(config) => {
                if filter.check(&config).is_ok() {
                    found.push((run_id, config));
                }
            }
            Err(e) => warn!("Cannot read configuration of {}: {}", run_id, e),
        }
    }
    Ok(found)
}
