use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GrowthError;

/// Where stream items are stored by the ledger under test
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// Items are published off-chain; nodes keep the payload locally
    Offchain,
    /// Items are embedded in blocks and replicated everywhere
    Onchain,
}

impl ChainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainMode::Offchain => "offchain",
            ChainMode::Onchain => "onchain",
        }
    }
}

impl std::fmt::Display for ChainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChainMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offchain" | "off" => Ok(ChainMode::Offchain),
            "onchain" | "on" => Ok(ChainMode::Onchain),
            other => Err(format!("Unknown chain mode: {}", other)),
        }
    }
}

/// Square matrix of transactions per minute; `rate(i, j)` is the load node
/// `i` sends to node `j`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct TransactionMatrix(Vec<Vec<u32>>);

impl TransactionMatrix {
    pub fn new(rows: Vec<Vec<u32>>) -> Self {
        Self(rows)
    }

    /// Number of nodes (rows) in the matrix
    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn rows(&self) -> &[Vec<u32>] {
        &self.0
    }

    pub fn rate(&self, sender: usize, receiver: usize) -> u32 {
        self.0
            .get(sender)
            .and_then(|row| row.get(receiver))
            .copied()
            .unwrap_or(0)
    }

    /// Transactions per minute sent by `node` (row sum)
    pub fn sent_per_min(&self, node: usize) -> u64 {
        self.0
            .get(node)
            .map(|row| row.iter().map(|&r| r as u64).sum())
            .unwrap_or(0)
    }

    /// Transactions per minute received by `node` (column sum)
    pub fn received_per_min(&self, node: usize) -> u64 {
        self.0.iter().map(|row| row.get(node).copied().unwrap_or(0) as u64).sum()
    }

    /// Total transactions per minute across the whole network
    pub fn total_per_min(&self) -> u64 {
        self.0.iter().flatten().map(|&r| r as u64).sum()
    }

    /// Active (sender, receiver) pairs, ordered by sender then receiver
    pub fn active_pairs(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        self.0.iter().enumerate().flat_map(|(i, row)| {
            row.iter()
                .enumerate()
                .filter(move |&(j, &rate)| rate > 0 && i != j)
                .map(move |(j, &rate)| (i, j, rate))
        })
    }

    /// Check the matrix is `num_nodes` square with a zero diagonal
    pub fn validate(&self, num_nodes: usize) -> Result<(), ValidationError> {
        if self.0.len() != num_nodes {
            return Err(ValidationError::InvalidMatrix(format!(
                "expected {} rows, found {}",
                num_nodes,
                self.0.len()
            )));
        }
        for (i, row) in self.0.iter().enumerate() {
            if row.len() != num_nodes {
                return Err(ValidationError::InvalidMatrix(format!(
                    "row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    num_nodes
                )));
            }
            if row[i] != 0 {
                return Err(ValidationError::InvalidMatrix(format!(
                    "diagonal entry ({}, {}) must be 0, found {}",
                    i, i, row[i]
                )));
            }
        }
        Ok(())
    }
}

/// Configuration snapshot stored alongside every run's measurement series
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunConfig {
    /// Number of nodes including the master node (index 0)
    pub num_nodes: usize,
    /// Human-readable node labels used in reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    pub txpm: TransactionMatrix,
    pub mode: ChainMode,
    /// Master node subscribes to every stream
    #[serde(default)]
    pub master_sub_all: bool,
    /// Capture recursive per-subfolder disk usage every tick
    #[serde(default)]
    pub disk_space_detailed: bool,
    /// Shared transaction size in KB
    pub tx_size_kb: f64,
    #[serde(with = "humantime_serde")]
    pub test_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub measure_delay: Duration,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Extrapolation horizons in days; 0 means the measured window
    #[serde(default = "default_plot_horizons")]
    pub plot_horizons_days: Vec<u32>,
}

fn default_stream_name() -> String {
    "stream".to_string()
}

fn default_plot_horizons() -> Vec<u32> {
    vec![0, 365]
}

impl RunConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_nodes == 0 {
            return Err(ValidationError::InvalidRun(
                "num_nodes must be at least 1".to_string(),
            ));
        }
        self.txpm.validate(self.num_nodes)?;

        if !(self.tx_size_kb > 0.0) {
            return Err(ValidationError::InvalidRun(format!(
                "tx_size_kb must be positive, found {}",
                self.tx_size_kb
            )));
        }
        if self.measure_delay.is_zero() {
            return Err(ValidationError::InvalidRun(
                "measure_delay must be positive".to_string(),
            ));
        }
        if self.test_duration.is_zero() {
            return Err(ValidationError::InvalidRun(
                "test_duration must be positive".to_string(),
            ));
        }
        if self.stream_name.is_empty() {
            return Err(ValidationError::InvalidRun(
                "stream_name cannot be empty".to_string(),
            ));
        }
        if let Some(labels) = &self.labels {
            if labels.len() != self.num_nodes {
                return Err(ValidationError::InvalidRun(format!(
                    "{} labels given for {} nodes",
                    labels.len(),
                    self.num_nodes
                )));
            }
        }
        Ok(())
    }

    pub fn test_duration_minutes(&self) -> f64 {
        self.test_duration.as_secs_f64() / 60.0
    }

    pub fn measure_delay_secs(&self) -> f64 {
        self.measure_delay.as_secs_f64()
    }

    /// Label for node `i`, falling back to `node<i>`
    pub fn node_label(&self, i: usize) -> String {
        self.labels
            .as_ref()
            .and_then(|l| l.get(i).cloned())
            .unwrap_or_else(|| format!("node{}", i))
    }

    /// Stream carrying traffic from `sender` to `receiver`, e.g. `stream0-1`
    pub fn stream_id(&self, sender: usize, receiver: usize) -> String {
        stream_id(&self.stream_name, sender, receiver)
    }
}

pub fn stream_id(base: &str, sender: usize, receiver: usize) -> String {
    format!("{}{}-{}", base, sender, receiver)
}

/// Which historical runs take part in an analysis
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RunFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_size_kb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ChainMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txpm: Option<TransactionMatrix>,
}

impl RunFilter {
    /// `Err(ConfigMismatch)` when the run falls outside the filter
    pub fn check(&self, config: &RunConfig) -> Result<(), GrowthError> {
        if let Some(size) = self.tx_size_kb {
            if (size - config.tx_size_kb).abs() > f64::EPSILON * size.abs().max(1.0) {
                return Err(GrowthError::ConfigMismatch(format!(
                    "tx_size_kb {} != {}",
                    config.tx_size_kb, size
                )));
            }
        }
        if let Some(mode) = self.mode {
            if mode != config.mode {
                return Err(GrowthError::ConfigMismatch(format!(
                    "mode {} != {}",
                    config.mode, mode
                )));
            }
        }
        if let Some(txpm) = &self.txpm {
            if txpm != &config.txpm {
                return Err(GrowthError::ConfigMismatch(
                    "transaction matrix differs".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Settings for the cross-run analysis
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rows before this point are discarded for offchain runs
    #[serde(with = "humantime_serde")]
    pub offchain_warm_up: Duration,
    /// Rows before this point are discarded for onchain runs
    #[serde(with = "humantime_serde")]
    pub onchain_warm_up: Duration,
    /// Upper bound on the held-out test set
    pub min_test_set: usize,
    /// Fraction of rows held out for testing
    pub test_ratio: f64,
    /// Seed for the train/test shuffle; random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub filter: RunFilter,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            offchain_warm_up: Duration::from_secs(90),
            onchain_warm_up: Duration::from_secs(600),
            min_test_set: 5,
            test_ratio: 0.2,
            seed: None,
            filter: RunFilter::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_test_set == 0 {
            return Err(ValidationError::InvalidAnalysis(
                "min_test_set must be at least 1".to_string(),
            ));
        }
        if !(self.test_ratio > 0.0 && self.test_ratio <= 1.0) {
            return Err(ValidationError::InvalidAnalysis(format!(
                "test_ratio must be in (0, 1], found {}",
                self.test_ratio
            )));
        }
        Ok(())
    }

    /// Warm-up period for the given chain mode
    pub fn warm_up(&self, mode: ChainMode) -> Duration {
        match mode {
            ChainMode::Offchain => self.offchain_warm_up,
            ChainMode::Onchain => self.onchain_warm_up,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid run configuration: {0}")]
    InvalidRun(String),
    #[error("Invalid transaction matrix: {0}")]
    InvalidMatrix(String),
    #[error("Invalid analysis configuration: {0}")]
    InvalidAnalysis(String),
}
