//! Per-run growth estimation.
//!
//! Each series of a run is fitted with ordinary least squares after
//! discarding the warm-up rows, where stream creation and connection
//! set-up inflate the early growth rate. The resulting line is used either
//! for the delta over the measured window or for extrapolation to a
//! horizon in days.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use csv::WriterBuilder;
use log::{debug, warn};

use super::types::*;
use crate::config::{AnalysisConfig, RunConfig};
use crate::error::GrowthError;
use crate::utils::units::{size_factor, size_unit, time_unit};

/// Points on an extrapolation curve
pub const EXTRAPOLATION_POINTS: usize = 500;

const SECS_PER_DAY: f64 = 86_400.0;

/// Labels of the aggregate series, in column order
pub const AGGREGATE_LABELS: [&str; AGGREGATE_COLUMNS] = ["chain size", "total size items"];

/// Index of the first row past the warm-up period.
///
/// Ties round to even, so 2.5 rows become 2.
pub fn warm_up_start_row(warm_up: Duration, measure_delay: Duration) -> usize {
    let delay = measure_delay.as_secs_f64();
    if delay <= 0.0 {
        return 0;
    }
    (warm_up.as_secs_f64() / delay).round_ties_even() as usize
}

/// Fit `value = slope * t + intercept` over rows `start_row..`
pub fn fit_growth(
    times: &[f64],
    values: &[f64],
    start_row: usize,
) -> Result<GrowthCoefficient, GrowthError> {
    if times.len() != values.len() {
        return Err(GrowthError::ParseError(format!(
            "{} timestamps for {} values",
            times.len(),
            values.len()
        )));
    }

    let xs = times.get(start_row..).unwrap_or(&[]);
    let ys = values.get(start_row..).unwrap_or(&[]);
    if xs.len() < 2 {
        return Err(GrowthError::InsufficientData(format!(
            "{} rows after warm-up row {}, need at least 2",
            xs.len(),
            start_row
        )));
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }

    if sxx <= 0.0 {
        return Err(GrowthError::InsufficientData(
            "all post-warm-up rows share one timestamp".to_string(),
        ));
    }

    let slope = sxy / sxx;
    Ok(GrowthCoefficient {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

impl GrowthCoefficient {
    pub fn predict(&self, t: f64) -> f64 {
        self.slope * t + self.intercept
    }

    /// `points` evenly spaced `(t, value)` pairs from `from` to `to`, both included
    pub fn extrapolate(&self, from: f64, to: f64, points: usize) -> Vec<(f64, f64)> {
        match points {
            0 => Vec::new(),
            1 => vec![(from, self.predict(from))],
            _ => {
                let step = (to - from) / (points - 1) as f64;
                (0..points)
                    .map(|i| {
                        let t = if i == points - 1 { to } else { from + step * i as f64 };
                        (t, self.predict(t))
                    })
                    .collect()
            }
        }
    }
}

/// Every value minus the value at `start_row`
pub fn deltas_from_baseline(values: &[f64], start_row: usize) -> Result<Vec<f64>, GrowthError> {
    let baseline = values.get(start_row).copied().ok_or_else(|| {
        GrowthError::InsufficientData(format!(
            "baseline row {} missing from a series of {} rows",
            start_row,
            values.len()
        ))
    })?;
    Ok(values.iter().map(|v| v - baseline).collect())
}

/// Series labels of a run: the aggregates, then one per node
pub fn series_labels(config: &RunConfig, node_count: usize) -> Vec<String> {
    AGGREGATE_LABELS
        .iter()
        .map(|l| l.to_string())
        .chain((0..node_count).map(|i| config.node_label(i)))
        .collect()
}

/// Column `index` of a sample series (see `MeasurementSample::series_value`)
pub fn series_column(samples: &[MeasurementSample], index: usize) -> Result<Vec<f64>, GrowthError> {
    samples
        .iter()
        .map(|s| {
            s.series_value(index).ok_or_else(|| {
                GrowthError::ParseError(format!(
                    "row at {}s has no series {}",
                    s.elapsed_secs, index
                ))
            })
        })
        .collect()
}

/// Fit every series of a run and evaluate it at the configured horizons.
///
/// Series that cannot be fitted are reported in `failed_series`; the run
/// itself only fails when it has no samples.
pub fn estimate_run(
    run_id: &str,
    config: &RunConfig,
    samples: &[MeasurementSample],
    analysis: &AnalysisConfig,
) -> Result<RunGrowthReport, GrowthError> {
    let last = samples.last().ok_or_else(|| {
        GrowthError::InsufficientData(format!("run {} has no samples", run_id))
    })?;

    let warm_up = analysis.warm_up(config.mode);
    let start_row = warm_up_start_row(warm_up, config.measure_delay);
    let times: Vec<f64> = samples.iter().map(|s| s.elapsed_secs).collect();
    let labels = series_labels(config, last.disk_usage_kb.len());

    let mut fitted = Vec::new();
    let mut failed_series = Vec::new();

    for (index, label) in labels.iter().enumerate() {
        let outcome = series_column(samples, index).and_then(|values| {
            let coefficient = fit_growth(&times, &values, start_row)?;
            let delta = deltas_from_baseline(&values, start_row)?;
            Ok((coefficient, delta.last().copied().unwrap_or(0.0)))
        });

        match outcome {
            Ok((coefficient, window_delta)) => {
                debug!(
                    "{} / {}: slope {:.4} KB/s, intercept {:.2}",
                    run_id, label, coefficient.slope, coefficient.intercept
                );
                fitted.push((label.clone(), coefficient, window_delta));
            }
            Err(e) => {
                warn!("{} / {}: {}", run_id, label, e);
                failed_series.push(FailedSeries {
                    label: label.clone(),
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let final_size = last
        .to_row()
        .iter()
        .skip(1)
        .fold(0.0_f64, |acc, v| acc.max(*v));
    let test_secs = config.test_duration.as_secs_f64();

    let mut horizons_by_series: Vec<Vec<HorizonEstimate>> = vec![Vec::new(); fitted.len()];
    for &days in &config.plot_horizons_days {
        let (end_secs, size_base) = if days == 0 {
            (last.elapsed_secs, final_size)
        } else {
            let end = days as f64 * SECS_PER_DAY;
            (end, final_size * end / test_secs)
        };
        let (size_name, size_factor) = size_unit(size_base);
        let (time_name, _) = time_unit(end_secs);

        for ((_, coefficient, window_delta), horizons) in fitted.iter().zip(horizons_by_series.iter_mut()) {
            let value_kb = if days == 0 {
                *window_delta
            } else {
                coefficient.predict(end_secs)
            };
            horizons.push(HorizonEstimate {
                horizon_days: days,
                end_secs,
                value_kb,
                display_value: value_kb * size_factor,
                size_unit: size_name.to_string(),
                time_unit: time_name.to_string(),
            });
        }
    }

    let series = fitted
        .into_iter()
        .zip(horizons_by_series)
        .map(|((label, coefficient, _), horizons)| SeriesEstimate {
            label,
            coefficient,
            horizons,
        })
        .collect();

    Ok(RunGrowthReport {
        run_id: run_id.to_string(),
        mode: config.mode,
        warm_up_secs: warm_up.as_secs_f64(),
        start_row,
        samples: samples.len(),
        series,
        failed_series,
    })
}

/// Write the extrapolation curves of every fitted series for one horizon.
///
/// Columns are time followed by one value per series, in the units chosen
/// for that horizon. The curve runs from the end of the warm-up period to
/// the horizon.
pub fn write_extrapolation_csv(
    path: &Path,
    report: &RunGrowthReport,
    horizon_days: u32,
) -> Result<(), GrowthError> {
    let first = report
        .series
        .first()
        .and_then(|s| s.horizons.iter().find(|h| h.horizon_days == horizon_days))
        .ok_or_else(|| {
            GrowthError::InsufficientData(format!(
                "no fitted series for a {} day horizon",
                horizon_days
            ))
        })?;

    let (_, time_factor) = time_unit(first.end_secs);
    let size_factor = size_factor(&first.size_unit);

    let file = File::create(path).map_err(|e| GrowthError::io(path, e))?;
    let mut writer = WriterBuilder::new().from_writer(file);

    let mut header = vec![format!("time ({})", first.time_unit)];
    header.extend(
        report
            .series
            .iter()
            .map(|s| format!("{} ({})", s.label, first.size_unit)),
    );
    writer.write_record(&header)?;

    let curves: Vec<Vec<(f64, f64)>> = report
        .series
        .iter()
        .map(|s| {
            s.coefficient
                .extrapolate(report.warm_up_secs, first.end_secs, EXTRAPOLATION_POINTS)
        })
        .collect();

    for i in 0..EXTRAPOLATION_POINTS {
        let t = curves.first().and_then(|c| c.get(i)).map(|p| p.0).unwrap_or(0.0);
        let mut record = vec![(t * time_factor).to_string()];
        record.extend(curves.iter().map(|c| (c[i].1 * size_factor).to_string()));
        writer.write_record(&record)?;
    }

    writer.flush().map_err(|e| GrowthError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainMode, TransactionMatrix};

    fn linear(n: usize, step: f64, slope: f64, intercept: f64) -> (Vec<f64>, Vec<f64>) {
        let times: Vec<f64> = (0..n).map(|i| i as f64 * step).collect();
        let values = times.iter().map(|t| slope * t + intercept).collect();
        (times, values)
    }

    fn run_config(num_nodes: usize) -> RunConfig {
        RunConfig {
            num_nodes,
            labels: None,
            txpm: TransactionMatrix::new(vec![vec![0; num_nodes]; num_nodes]),
            mode: ChainMode::Offchain,
            master_sub_all: false,
            disk_space_detailed: false,
            tx_size_kb: 1.0,
            test_duration: Duration::from_secs(600),
            measure_delay: Duration::from_secs(5),
            stream_name: "stream".to_string(),
            plot_horizons_days: vec![0, 365],
        }
    }

    #[test]
    fn test_start_row() {
        assert_eq!(
            warm_up_start_row(Duration::from_secs(90), Duration::from_secs(5)),
            18
        );
        assert_eq!(
            warm_up_start_row(Duration::from_secs(600), Duration::from_secs(5)),
            120
        );
        // 2.5 rounds to even
        assert_eq!(
            warm_up_start_row(Duration::from_secs(5), Duration::from_secs(2)),
            2
        );
        assert_eq!(warm_up_start_row(Duration::from_secs(90), Duration::ZERO), 0);
    }

    #[test]
    fn test_fit_known_line() {
        let (times, mut values) = linear(60, 5.0, 3.0, 5.0);
        // Warm-up rows are ignored
        for v in values.iter_mut().take(18) {
            *v = 1e6;
        }
        let start = warm_up_start_row(Duration::from_secs(90), Duration::from_secs(5));
        let fit = fit_growth(&times, &values, start).unwrap();
        assert!((fit.slope - 3.0).abs() < 1e-9);
        assert!((fit.intercept - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_offset_only_moves_intercept() {
        let (times, values) = linear(40, 5.0, 1.7, 0.0);
        let shifted: Vec<f64> = values.iter().map(|v| v + 1234.5).collect();

        let a = fit_growth(&times, &values, 18).unwrap();
        let b = fit_growth(&times, &shifted, 18).unwrap();
        assert!((a.slope - b.slope).abs() < 1e-9);
        assert!((b.intercept - a.intercept - 1234.5).abs() < 1e-6);
    }

    #[test]
    fn test_insufficient_rows() {
        let (times, values) = linear(19, 5.0, 1.0, 0.0);
        let err = fit_growth(&times, &values, 18).unwrap_err();
        assert!(matches!(err, GrowthError::InsufficientData(_)));

        let err = fit_growth(&times, &values, 40).unwrap_err();
        assert!(matches!(err, GrowthError::InsufficientData(_)));

        let err = fit_growth(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0], 0).unwrap_err();
        assert!(matches!(err, GrowthError::InsufficientData(_)));
    }

    #[test]
    fn test_extrapolate() {
        let coef = GrowthCoefficient {
            slope: 2.0,
            intercept: 1.0,
        };
        let curve = coef.extrapolate(90.0, 1000.0, EXTRAPOLATION_POINTS);
        assert_eq!(curve.len(), EXTRAPOLATION_POINTS);
        assert_eq!(curve[0], (90.0, 181.0));
        assert_eq!(curve[EXTRAPOLATION_POINTS - 1], (1000.0, 2001.0));
        assert!(coef.extrapolate(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_deltas() {
        let deltas = deltas_from_baseline(&[1.0, 2.0, 4.0, 7.0], 1).unwrap();
        assert_eq!(deltas, vec![-1.0, 0.0, 2.0, 5.0]);
        assert!(deltas_from_baseline(&[1.0], 3).is_err());
    }

    #[test]
    fn test_estimate_run() {
        let config = run_config(2);
        let samples: Vec<MeasurementSample> = (0..60)
            .map(|i| {
                let t = i as f64 * 5.0;
                MeasurementSample {
                    elapsed_secs: t,
                    chain_growth_kb: 0.5 * t,
                    items_size_kb: 2.0 * t,
                    disk_usage_kb: vec![1000.0 + 3.0 * t, 500.0 + t],
                }
            })
            .collect();

        let report = estimate_run("run-1", &config, &samples, &AnalysisConfig::default()).unwrap();
        assert_eq!(report.start_row, 18);
        assert_eq!(report.samples, 60);
        assert!(report.failed_series.is_empty());

        let labels: Vec<&str> = report.series.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["chain size", "total size items", "node0", "node1"]);

        let node0 = &report.series[2];
        assert!((node0.coefficient.slope - 3.0).abs() < 1e-9);

        let window = &node0.horizons[0];
        assert_eq!(window.horizon_days, 0);
        assert!((window.value_kb - 3.0 * (295.0 - 90.0)).abs() < 1e-9);
        assert_eq!(window.time_unit, "seconds");
        assert_eq!(window.size_unit, "KB");

        let year = &node0.horizons[1];
        assert_eq!(year.time_unit, "months");
        assert!((year.value_kb - (1000.0 + 3.0 * 365.0 * 86_400.0)).abs() < 1e-3);
        assert_eq!(year.size_unit, "GB");
        assert!((year.display_value - year.value_kb / (1024.0 * 1024.0)).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_short_run_reports_failures() {
        let config = run_config(1);
        let samples: Vec<MeasurementSample> = (0..10)
            .map(|i| MeasurementSample {
                elapsed_secs: i as f64 * 5.0,
                chain_growth_kb: 0.0,
                items_size_kb: 0.0,
                disk_usage_kb: vec![i as f64],
            })
            .collect();

        let report = estimate_run("short", &config, &samples, &AnalysisConfig::default()).unwrap();
        assert!(report.series.is_empty());
        assert_eq!(report.failed_series.len(), 3);
        assert!(report
            .failed_series
            .iter()
            .all(|f| f.kind == "insufficient_data"));

        assert!(estimate_run("empty", &config, &[], &AnalysisConfig::default()).is_err());
    }

    #[test]
    fn test_write_extrapolation_csv() {
        let config = run_config(1);
        let samples: Vec<MeasurementSample> = (0..40)
            .map(|i| {
                let t = i as f64 * 5.0;
                MeasurementSample {
                    elapsed_secs: t,
                    chain_growth_kb: t,
                    items_size_kb: t,
                    disk_usage_kb: vec![t],
                }
            })
            .collect();
        let report = estimate_run("r", &config, &samples, &AnalysisConfig::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extrapolation_365d.csv");
        write_extrapolation_csv(&path, &report, 365).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), EXTRAPOLATION_POINTS + 1);
        assert!(lines[0].starts_with("time (months)"));
        assert!(lines[0].contains("node0"));

        assert!(write_extrapolation_csv(&path, &report, 7).is_err());
    }
}
