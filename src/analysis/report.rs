//! Report generation for growth estimates and trained models.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use super::approx::ApproxEstimate;
use super::types::*;

const FEATURE_NAMES: [&str; 3] = [
    "tx sent/min * tx size",
    "tx received/min * tx size",
    "other tx/min * tx size",
];

fn banner(lines: &mut Vec<String>, title: &str) {
    lines.push("=".repeat(80));
    lines.push(format!("{:^80}", title));
    lines.push("=".repeat(80));
    lines.push(String::new());
}

/// Generate JSON report
pub fn generate_json_report<T: Serialize>(report: &T, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Render a trained model and its dataset bookkeeping as text
pub fn render_model_report(report: &ModelReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    banner(&mut lines, "LEDGER STORAGE GROWTH MODEL");

    // Metadata
    lines.push(format!("Analysis Date: {}", report.metadata.analysis_timestamp));
    lines.push(format!("Data Directory: {}", report.metadata.data_dir));
    if let Some(size) = report.metadata.filter.tx_size_kb {
        lines.push(format!("Transaction Size: {} KB", size));
    }
    if let Some(mode) = report.metadata.filter.mode {
        lines.push(format!("Mode: {}", mode));
    }
    match report.metadata.seed {
        Some(seed) => lines.push(format!("Shuffle Seed: {}", seed)),
        None => lines.push("Shuffle Seed: random".to_string()),
    }
    lines.push(String::new());

    banner(&mut lines, "DATASET");
    lines.push(format!("Feature rows: {}", report.dataset_rows));
    lines.push(format!("Runs used: {}", report.runs_used.len()));
    for run in &report.runs_used {
        lines.push(format!("  {}", run));
    }
    lines.push(format!("Runs skipped: {}", report.skipped.len()));
    for skip in &report.skipped {
        lines.push(format!("  {} [{}]: {}", skip.run_id, skip.kind, skip.reason));
    }
    lines.push(String::new());

    banner(&mut lines, "COEFFICIENTS (KB/s)");
    let model = &report.model;
    for (name, coef) in FEATURE_NAMES.iter().zip(model.coefficients.iter()) {
        lines.push(format!("  {:<28} {:.5}", name, coef));
    }
    lines.push(format!("  {:<28} {:.5}", "intercept", model.intercept));
    lines.push(String::new());

    lines.push(format!(
        "Training rows: {}, test rows: {}",
        model.train_rows, model.test_rows
    ));
    lines.push(format!("Mean squared error: {:.6}", model.mean_squared_error));
    lines.push(format!("Variance score (R²): {:.4}", model.r2_score));
    lines.push(String::new());

    // Footer
    lines.push("=".repeat(80));
    lines.join("\n")
}

/// Render per-series growth fits of one run as text
pub fn render_growth_report(report: &RunGrowthReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    banner(&mut lines, &format!("STORAGE GROWTH OF {}", report.run_id));

    lines.push(format!("Mode: {}", report.mode));
    lines.push(format!(
        "Warm-up: {:.0}s (first {} of {} samples discarded)",
        report.warm_up_secs, report.start_row, report.samples
    ));
    lines.push(String::new());

    for series in &report.series {
        lines.push(format!("{}:", series.label));
        lines.push(format!(
            "  slope {:.5} KB/s, intercept {:.2} KB",
            series.coefficient.slope, series.coefficient.intercept
        ));
        for h in &series.horizons {
            if h.horizon_days == 0 {
                lines.push(format!(
                    "  measured window ({:.0}s): +{:.2} {}",
                    h.end_secs, h.display_value, h.size_unit
                ));
            } else {
                lines.push(format!(
                    "  after {} days: {:.2} {}",
                    h.horizon_days, h.display_value, h.size_unit
                ));
            }
        }
    }

    if !report.failed_series.is_empty() {
        lines.push(String::new());
        lines.push("Series without a fit:".to_string());
        for failed in &report.failed_series {
            lines.push(format!("  {} [{}]: {}", failed.label, failed.kind, failed.reason));
        }
    }
    lines.push(String::new());

    // Footer
    lines.push("=".repeat(80));
    lines.join("\n")
}

/// Generate human-readable text report of a trained model
pub fn generate_text_report(report: &ModelReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_model_report(report))
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Generate human-readable text report of one run's growth
pub fn generate_growth_text_report(report: &RunGrowthReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_growth_report(report))
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &ModelReport) {
    println!("\n=== STORAGE GROWTH MODEL SUMMARY ===\n");
    println!("Feature rows: {}", report.dataset_rows);
    println!("Runs used: {}", report.runs_used.len());

    if !report.skipped.is_empty() {
        let mut counts = std::collections::BTreeMap::new();
        for skip in &report.skipped {
            *counts.entry(skip.kind.as_str()).or_insert(0usize) += 1;
        }
        println!("Runs skipped: {}", report.skipped.len());
        for (kind, count) in counts {
            println!("  {}: {}", kind, count);
        }
    }

    println!("\nCoefficients:");
    for (name, coef) in FEATURE_NAMES.iter().zip(report.model.coefficients.iter()) {
        println!("  {}: {:.5}", name, coef);
    }
    println!("  intercept: {:.5}", report.model.intercept);
    println!("Mean squared error: {:.6}", report.model.mean_squared_error);
    println!("Variance score: {:.4}", report.model.r2_score);

    println!();
}

pub fn print_growth_summary(report: &RunGrowthReport) {
    println!("\n=== {} ===\n", report.run_id);
    for series in &report.series {
        let tally: Vec<String> = series
            .horizons
            .iter()
            .map(|h| format!("{}d: {:.2} {}", h.horizon_days, h.display_value, h.size_unit))
            .collect();
        println!(
            "{:<20} {:>12.5} KB/s  {}",
            series.label,
            series.coefficient.slope,
            tally.join(", ")
        );
    }
    for failed in &report.failed_series {
        println!("{:<20} no fit: {}", failed.label, failed.reason);
    }
    println!();
}

pub fn print_approx_summary(estimate: &ApproxEstimate) {
    println!("\n=== ROUGH GROWTH ESTIMATE ({} KB/tx) ===\n", estimate.tx_size_kb);
    println!(
        "GB per year onchain (shared): {:.2} basic, {:.2} total",
        estimate.onchain_basic_gb_per_year, estimate.onchain_gb_per_year
    );
    println!("GB per year per node offchain:");
    for ((label, basic), total) in estimate
        .labels
        .iter()
        .zip(&estimate.offchain_basic_gb_per_year)
        .zip(&estimate.offchain_gb_per_year)
    {
        println!("  {:<20} {:.2} basic, {:.2} total", label, basic, total);
    }
    println!();
}
