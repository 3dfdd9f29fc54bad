//! Weighted least-squares model of disk growth against node load.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::types::*;
use crate::config::AnalysisConfig;
use crate::error::GrowthError;

const FEATURES: usize = 3;

/// Size of the held-out set: `min(min_test_set, ceil(test_ratio * n))`
pub fn test_set_size(n: usize, min_test_set: usize, test_ratio: f64) -> usize {
    let by_ratio = (test_ratio * n as f64).ceil() as usize;
    min_test_set.min(by_ratio)
}

/// Weighted least squares with an intercept.
///
/// Returns `(intercept, coefficients)`. Rank-deficient designs get the
/// minimum-norm solution.
pub fn fit_weighted(rows: &[FeatureRow]) -> Result<(f64, [f64; FEATURES]), GrowthError> {
    if rows.is_empty() {
        return Err(GrowthError::InsufficientData(
            "no rows to fit".to_string(),
        ));
    }
    if rows.iter().any(|r| !(r.weight >= 0.0)) {
        return Err(GrowthError::InsufficientData(
            "row weights must be non-negative".to_string(),
        ));
    }
    if rows.iter().all(|r| r.weight == 0.0) {
        return Err(GrowthError::InsufficientData(
            "all row weights are zero".to_string(),
        ));
    }

    let n = rows.len();
    let scale: Vec<f64> = rows.iter().map(|r| r.weight.sqrt()).collect();
    let x = DMatrix::from_fn(n, FEATURES + 1, |i, j| {
        if j == 0 {
            scale[i]
        } else {
            scale[i] * rows[i].features[j - 1]
        }
    });
    let y = DVector::from_fn(n, |i, _| scale[i] * rows[i].target_slope);

    let svd = x.svd(true, true);
    let tolerance = svd.singular_values.max() * 1e-10;
    let beta = svd
        .solve(&y, tolerance)
        .map_err(|e| GrowthError::InsufficientData(format!("least squares failed: {}", e)))?;

    Ok((beta[0], [beta[1], beta[2], beta[3]]))
}

/// Mean squared error and R² of `predict` on `rows`
fn evaluate(rows: &[FeatureRow], predict: impl Fn(&[f64; FEATURES]) -> f64) -> (f64, f64) {
    let n = rows.len() as f64;
    let mean = rows.iter().map(|r| r.target_slope).sum::<f64>() / n;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for row in rows {
        let residual = row.target_slope - predict(&row.features);
        ss_res += residual * residual;
        ss_tot += (row.target_slope - mean).powi(2);
    }

    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    (ss_res / n, r2)
}

/// Shuffle, split, fit and evaluate.
///
/// The last `test_set_size` rows of the shuffled dataset are held out; the
/// rest train the model. The shuffle is reproducible when a seed is set.
pub fn train(dataset: &Dataset, analysis: &AnalysisConfig) -> Result<TrainedModel, GrowthError> {
    analysis
        .validate()
        .map_err(|e| GrowthError::InsufficientData(e.to_string()))?;

    let n = dataset.len();
    if n <= analysis.min_test_set {
        return Err(GrowthError::InsufficientData(format!(
            "{} feature rows, need more than {}",
            n, analysis.min_test_set
        )));
    }

    let mut rows = dataset.rows.clone();
    match analysis.seed {
        Some(seed) => rows.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => rows.shuffle(&mut rand::thread_rng()),
    }

    let cut = test_set_size(n, analysis.min_test_set, analysis.test_ratio);
    if cut == 0 {
        return Err(GrowthError::InsufficientData(
            "empty test set".to_string(),
        ));
    }
    let (train_rows, test_rows) = rows.split_at(n - cut);
    debug!("Training on {} rows, testing on {}", train_rows.len(), test_rows.len());

    let (intercept, coefficients) = fit_weighted(train_rows)?;
    let mut model = TrainedModel {
        coefficients,
        intercept,
        mean_squared_error: 0.0,
        r2_score: 0.0,
        train_rows: train_rows.len(),
        test_rows: test_rows.len(),
    };

    let (mse, r2) = evaluate(test_rows, |f| model.predict(f));
    model.mean_squared_error = mse;
    model.r2_score = r2;

    info!(
        "Model: coefficients [{:.5}, {:.5}, {:.5}], intercept {:.5}, MSE {:.5}, R² {:.3}",
        coefficients[0], coefficients[1], coefficients[2], intercept, mse, r2
    );
    Ok(model)
}
