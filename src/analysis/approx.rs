//! Closed-form growth estimate from yearly transaction volumes.
//!
//! Every party exchanges its yearly volume with one aggregator node. Offchain
//! nodes store items they send twice (source copy plus stream) and items they
//! receive once; onchain every node stores all traffic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GrowthError;
use crate::utils::units::minutes_per_year;

/// Label of the node every party trades with
pub const AGGREGATOR_LABEL: &str = "aggregator";

/// Fixed offchain metadata per node, GB/year
pub const OFFCHAIN_METADATA_GB: f64 = 2.0;

/// Onchain block and index overhead
pub const ONCHAIN_OVERHEAD: f64 = 1.1;

const KB_PER_GB: f64 = 1024.0 * 1024.0;

/// Fractional transactions per minute between parties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyMatrix {
    /// Party names followed by the aggregator
    pub labels: Vec<String>,
    pub rates_per_min: Vec<Vec<f64>>,
}

impl PartyMatrix {
    pub fn sent(&self, node: usize) -> f64 {
        self.rates_per_min[node].iter().sum()
    }

    pub fn received(&self, node: usize) -> f64 {
        self.rates_per_min.iter().map(|row| row[node]).sum()
    }

    pub fn total(&self) -> f64 {
        self.rates_per_min.iter().flatten().sum()
    }
}

/// Build the party matrix from transactions per year by party name.
///
/// Parties are ordered by name; the aggregator is the last node.
pub fn matrix_from_party_volumes(
    volumes: &BTreeMap<String, f64>,
) -> Result<PartyMatrix, GrowthError> {
    if volumes.is_empty() {
        return Err(GrowthError::InsufficientData(
            "no parties given".to_string(),
        ));
    }
    if let Some((name, v)) = volumes.iter().find(|(_, v)| !(**v >= 0.0)) {
        return Err(GrowthError::ParseError(format!(
            "party '{}' has invalid volume {}",
            name, v
        )));
    }

    let n = volumes.len();
    let per_min: Vec<f64> = volumes.values().map(|v| v / minutes_per_year()).collect();

    let mut rates_per_min = vec![vec![0.0; n + 1]; n + 1];
    for (i, rate) in per_min.iter().enumerate() {
        rates_per_min[i][n] = *rate;
        rates_per_min[n][i] = *rate;
    }

    let mut labels: Vec<String> = volumes.keys().cloned().collect();
    labels.push(AGGREGATOR_LABEL.to_string());

    Ok(PartyMatrix {
        labels,
        rates_per_min,
    })
}

/// Rough storage growth in GB/year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproxEstimate {
    pub labels: Vec<String>,
    pub tx_size_kb: f64,
    /// Items only, per node
    pub offchain_basic_gb_per_year: Vec<f64>,
    /// Items plus metadata, per node
    pub offchain_gb_per_year: Vec<f64>,
    /// Items only, shared by every node
    pub onchain_basic_gb_per_year: f64,
    pub onchain_gb_per_year: f64,
}

pub fn approximate_growth(matrix: &PartyMatrix, tx_size_kb: f64) -> ApproxEstimate {
    let conversion = tx_size_kb * minutes_per_year() / KB_PER_GB;

    let offchain_basic: Vec<f64> = (0..matrix.labels.len())
        .map(|i| (2.0 * matrix.sent(i) + matrix.received(i)) * conversion)
        .collect();
    let onchain_basic = matrix.total() * conversion;

    ApproxEstimate {
        labels: matrix.labels.clone(),
        tx_size_kb,
        offchain_gb_per_year: offchain_basic
            .iter()
            .map(|gb| gb + OFFCHAIN_METADATA_GB)
            .collect(),
        offchain_basic_gb_per_year: offchain_basic,
        onchain_basic_gb_per_year: onchain_basic,
        onchain_gb_per_year: onchain_basic * ONCHAIN_OVERHEAD,
    }
}
