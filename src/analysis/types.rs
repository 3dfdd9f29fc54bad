//! Core data types for storage-growth analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{ChainMode, RunFilter};
use crate::error::GrowthError;

/// Seconds since the start of a run
pub type ElapsedSecs = f64;

/// Number of aggregate columns preceding the per-node disk columns
pub const AGGREGATE_COLUMNS: usize = 2;

/// One sampling tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub elapsed_secs: ElapsedSecs,
    /// Cumulative size of blocks seen since the run started
    pub chain_growth_kb: f64,
    /// Cumulative size of all published stream items
    pub items_size_kb: f64,
    /// Chain directory size per node, master node first
    pub disk_usage_kb: Vec<f64>,
}

impl MeasurementSample {
    /// Persisted layout: `[elapsed, chainKB, itemsKB, disk0..diskN-1]`
    pub fn to_row(&self) -> Vec<f64> {
        let mut row = Vec::with_capacity(1 + AGGREGATE_COLUMNS + self.disk_usage_kb.len());
        row.push(self.elapsed_secs);
        row.push(self.chain_growth_kb);
        row.push(self.items_size_kb);
        row.extend_from_slice(&self.disk_usage_kb);
        row
    }

    pub fn from_row(row: &[f64]) -> Result<Self, GrowthError> {
        if row.len() < 1 + AGGREGATE_COLUMNS {
            return Err(GrowthError::ParseError(format!(
                "measurement row has {} columns, expected at least {}",
                row.len(),
                1 + AGGREGATE_COLUMNS
            )));
        }
        Ok(Self {
            elapsed_secs: row[0],
            chain_growth_kb: row[1],
            items_size_kb: row[2],
            disk_usage_kb: row[3..].to_vec(),
        })
    }

    /// Number of value series (aggregates plus one per node)
    pub fn series_count(&self) -> usize {
        AGGREGATE_COLUMNS + self.disk_usage_kb.len()
    }

    /// Value of series `index`: 0 = chain growth, 1 = items, 2.. = node disks
    pub fn series_value(&self, index: usize) -> Option<f64> {
        match index {
            0 => Some(self.chain_growth_kb),
            1 => Some(self.items_size_kb),
            i => self.disk_usage_kb.get(i - AGGREGATE_COLUMNS).copied(),
        }
    }
}

/// Raw recursive listing captured at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUsageRow {
    pub elapsed_secs: ElapsedSecs,
    pub blob: String,
}

/// Linear fit `value = slope * t + intercept` of one series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthCoefficient {
    /// KB per second
    pub slope: f64,
    pub intercept: f64,
}

/// Per-node load summary paired with its observed disk growth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub run_id: String,
    pub node: usize,
    /// `[sentPerMin * txSize, receivedPerMin * txSize, otherPerMin * txSize]`
    pub features: [f64; 3],
    pub target_slope: f64,
    /// Total elapsed time of the run the row came from
    pub weight: f64,
}

/// Feature rows assembled from historical runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub rows: Vec<FeatureRow>,
}

impl Dataset {
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A run left out of the dataset, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRun {
    pub run_id: String,
    /// Stable error kind, e.g. `config_mismatch`
    pub kind: String,
    pub reason: String,
}

impl SkippedRun {
    pub fn new(run_id: &str, err: &GrowthError) -> Self {
        Self {
            run_id: run_id.to_string(),
            kind: err.kind().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Outcome of a dataset scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetBuild {
    pub dataset: Dataset,
    pub runs_used: Vec<String>,
    pub skipped: Vec<SkippedRun>,
}

impl DatasetBuild {
    /// Number of skipped runs per error kind
    pub fn skip_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for skip in &self.skipped {
            *counts.entry(skip.kind.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Predicted or measured value of one series at one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonEstimate {
    /// 0 means the measured window
    pub horizon_days: u32,
    pub end_secs: f64,
    /// Delta from baseline (measured window) or extrapolated value, in KB
    pub value_kb: f64,
    /// `value_kb` converted to `size_unit`
    pub display_value: f64,
    pub size_unit: String,
    pub time_unit: String,
}

/// Growth fit of one series of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEstimate {
    pub label: String,
    pub coefficient: GrowthCoefficient,
    pub horizons: Vec<HorizonEstimate>,
}

/// A series the estimator could not fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSeries {
    pub label: String,
    pub kind: String,
    pub reason: String,
}

/// Growth fits for every series of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunGrowthReport {
    pub run_id: String,
    pub mode: ChainMode,
    pub warm_up_secs: f64,
    pub start_row: usize,
    pub samples: usize,
    pub series: Vec<SeriesEstimate>,
    pub failed_series: Vec<FailedSeries>,
}

/// Learned cross-run model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Coefficients for sent, received and other traffic (KB/min * KB)
    pub coefficients: [f64; 3],
    pub intercept: f64,
    pub mean_squared_error: f64,
    pub r2_score: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

impl TrainedModel {
    pub fn predict(&self, features: &[f64; 3]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features.iter())
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Metadata describing an analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analysis_timestamp: String,
    pub data_dir: String,
    pub filter: RunFilter,
    pub seed: Option<u64>,
}

/// Trained model plus the dataset bookkeeping behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub metadata: AnalysisMetadata,
    pub model: TrainedModel,
    pub dataset_rows: usize,
    pub runs_used: Vec<String>,
    pub skipped: Vec<SkippedRun>,
}
