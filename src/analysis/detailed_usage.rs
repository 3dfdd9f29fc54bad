//! Reshaping of raw recursive disk listings.
//!
//! A listing is a run of `size<TAB>path` lines. The paths of the first
//! listing of a run fix the column header; every later listing must name
//! the same subfolders in the same order.

use std::fs::File;
use std::path::Path;
use std::sync::LazyLock;

use csv::{QuoteStyle, WriterBuilder};
use log::{debug, info};
use regex::Regex;

use super::measurements::{raw_usage_file, read_raw_usage, split_usage_file};
use super::types::RawUsageRow;
use crate::config::RunConfig;
use crate::error::GrowthError;

/// Chain data directory of a node; stripped from listed paths
pub const DEFAULT_CHAIN_ROOT: &str = "/root/.multichain/";

static TOKEN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n|\n|\t").expect("Invalid separator regex"));

/// One listing aligned to the header
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedRow {
    pub elapsed_secs: f64,
    /// KB per subfolder, in header order
    pub sizes_kb: Vec<f64>,
}

/// Per-subfolder usage of one node over a run
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedUsage {
    pub header: Vec<String>,
    pub rows: Vec<DetailedRow>,
}

/// Split a raw listing into `(size, path)` pairs
fn tokenize(blob: &str) -> Result<Vec<(&str, &str)>, GrowthError> {
    let tokens: Vec<&str> = TOKEN_SEPARATOR
        .split(blob)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.len() % 2 != 0 {
        return Err(GrowthError::ParseError(format!(
            "listing has {} tokens, expected size/path pairs",
            tokens.len()
        )));
    }

    Ok(tokens.chunks(2).map(|pair| (pair[0], pair[1])).collect())
}

fn column_name<'a>(path: &'a str, strip_prefix: &str) -> &'a str {
    path.strip_prefix(strip_prefix).unwrap_or(path)
}

/// Parse every listing of a node into aligned columns.
///
/// Fails with `ParseError` when a size is not numeric or when a listing's
/// subfolders differ from the first listing's.
pub fn parse_detailed_rows(
    rows: &[RawUsageRow],
    strip_prefix: &str,
) -> Result<DetailedUsage, GrowthError> {
    let first = rows.first().ok_or_else(|| {
        GrowthError::ParseError("no detailed usage rows".to_string())
    })?;

    let header: Vec<String> = tokenize(&first.blob)?
        .into_iter()
        .map(|(_, path)| column_name(path, strip_prefix).to_string())
        .collect();

    let mut parsed = Vec::with_capacity(rows.len());
    for row in rows {
        let pairs = tokenize(&row.blob)?;
        if pairs.len() != header.len() {
            return Err(GrowthError::ParseError(format!(
                "listing at {}s has {} subfolders, header has {}",
                row.elapsed_secs,
                pairs.len(),
                header.len()
            )));
        }

        let mut sizes_kb = Vec::with_capacity(pairs.len());
        for ((size, path), expected) in pairs.into_iter().zip(&header) {
            let name = column_name(path, strip_prefix);
            if name != expected {
                return Err(GrowthError::ParseError(format!(
                    "listing at {}s has '{}' where '{}' was expected",
                    row.elapsed_secs, name, expected
                )));
            }
            let value = size.parse::<f64>().map_err(|_| {
                GrowthError::ParseError(format!(
                    "listing at {}s: size '{}' of '{}' is not a number",
                    row.elapsed_secs, size, name
                ))
            })?;
            sizes_kb.push(value);
        }

        parsed.push(DetailedRow {
            elapsed_secs: row.elapsed_secs,
            sizes_kb,
        });
    }

    Ok(DetailedUsage {
        header,
        rows: parsed,
    })
}

impl DetailedUsage {
    /// Values of the subfolder `name`
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.header.iter().position(|h| h == name)?;
        Some(self.rows.iter().map(|r| r.sizes_kb[index]).collect())
    }

    /// Copy without per-stream subfolders (any containing `stream_name`)
    pub fn without_streams(&self, stream_name: &str) -> DetailedUsage {
        let keep: Vec<usize> = self
            .header
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.contains(stream_name))
            .map(|(i, _)| i)
            .collect();

        DetailedUsage {
            header: keep.iter().map(|&i| self.header[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| DetailedRow {
                    elapsed_secs: r.elapsed_secs,
                    sizes_kb: keep.iter().map(|&i| r.sizes_kb[i]).collect(),
                })
                .collect(),
        }
    }

    /// Write `time,<subfolder>...` followed by one row per listing
    pub fn write_split_csv(&self, path: &Path) -> Result<(), GrowthError> {
        let file = File::create(path).map_err(|e| GrowthError::io(path, e))?;
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(file);

        let mut header = vec!["time".to_string()];
        header.extend(self.header.iter().cloned());
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.elapsed_secs.to_string()];
            record.extend(row.sizes_kb.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush().map_err(|e| GrowthError::io(path, e))?;
        Ok(())
    }
}

/// Reshape the raw listings of every node of a run into `diskspace<i>split.csv`.
///
/// The run must hold one listing file per declared node.
pub fn reshape_run(
    run_dir: &Path,
    config: &RunConfig,
    strip_prefix: &str,
    drop_streams: bool,
) -> Result<Vec<DetailedUsage>, GrowthError> {
    if !config.disk_space_detailed {
        return Err(GrowthError::ConfigMismatch(format!(
            "{} was not sampled in detailed mode",
            run_dir.display()
        )));
    }

    let missing: Vec<usize> = (0..config.num_nodes)
        .filter(|&i| !raw_usage_file(run_dir, i).exists())
        .collect();
    if !missing.is_empty() {
        return Err(GrowthError::ParseError(format!(
            "{} declares {} nodes but has no listings for nodes {:?}",
            run_dir.display(),
            config.num_nodes,
            missing
        )));
    }
    if raw_usage_file(run_dir, config.num_nodes).exists() {
        return Err(GrowthError::ParseError(format!(
            "{} holds listings beyond its {} declared nodes",
            run_dir.display(),
            config.num_nodes
        )));
    }

    let mut reshaped = Vec::with_capacity(config.num_nodes);
    for node in 0..config.num_nodes {
        let raw = read_raw_usage(&raw_usage_file(run_dir, node))?;
        let mut usage = parse_detailed_rows(&raw, strip_prefix)?;
        if drop_streams {
            usage = usage.without_streams(&config.stream_name);
        }
        usage.write_split_csv(&split_usage_file(run_dir, node))?;
        debug!(
            "node {}: {} listings, {} subfolders",
            node,
            usage.rows.len(),
            usage.header.len()
        );
        reshaped.push(usage);
    }

    info!(
        "Reshaped detailed usage of {} nodes in {}",
        reshaped.len(),
        run_dir.display()
    );
    Ok(reshaped)
}
