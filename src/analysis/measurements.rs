//! Persistence of measurement series and in-memory run records.
//!
//! `measurements.csv` holds one quoted row per tick,
//! `[elapsed, chainKB, itemsKB, disk0..diskN-1]`, every value rounded to two
//! decimals. In detailed mode `diskspace<i>.csv` holds `[elapsed, rawBlob]`
//! for node `i`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, ReaderBuilder, Writer, WriterBuilder};
use log::debug;

use super::types::*;
use crate::config::RunConfig;
use crate::error::GrowthError;
use crate::sampler::SampleSink;

pub const MEASUREMENTS_FILE: &str = "measurements.csv";

/// `diskspace<i>.csv`: raw recursive listings of node `i`
pub fn raw_usage_file(run_dir: &Path, node: usize) -> PathBuf {
    run_dir.join(format!("diskspace{}.csv", node))
}

/// `diskspace<i>split.csv`: listings reshaped into one column per subfolder
pub fn split_usage_file(run_dir: &Path, node: usize) -> PathBuf {
    run_dir.join(format!("diskspace{}split.csv", node))
}

/// Round to the two decimals kept on disk
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn quoted_writer(file: File) -> Writer<File> {
    WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .from_writer(file)
}

fn append(path: &Path) -> Result<File, GrowthError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| GrowthError::io(path, e))
}

fn write_sample(writer: &mut Writer<File>, sample: &MeasurementSample) -> Result<(), GrowthError> {
    let fields: Vec<String> = sample.to_row().into_iter().map(|v| round2(v).to_string()).collect();
    writer.write_record(&fields)?;
    Ok(())
}

/// Write a complete series, replacing any existing file
pub fn write_measurements(path: &Path, samples: &[MeasurementSample]) -> Result<(), GrowthError> {
    let file = File::create(path).map_err(|e| GrowthError::io(path, e))?;
    let mut writer = quoted_writer(file);
    for sample in samples {
        write_sample(&mut writer, sample)?;
    }
    writer.flush().map_err(|e| GrowthError::io(path, e))?;
    Ok(())
}

/// Read and validate a measurement series
pub fn read_measurements(path: &Path) -> Result<Vec<MeasurementSample>, GrowthError> {
    let file = File::open(path).map_err(|e| GrowthError::io(path, e))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let row = record
            .iter()
            .map(|field| {
                field.trim().parse::<f64>().map_err(|_| {
                    GrowthError::ParseError(format!(
                        "{}: row {}: '{}' is not a number",
                        path.display(),
                        line + 1,
                        field
                    ))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        samples.push(MeasurementSample::from_row(&row)?);
    }

    validate_series(&samples)?;
    debug!("Read {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Check row width, time ordering and that cumulative counters never decrease
pub fn validate_series(samples: &[MeasurementSample]) -> Result<(), GrowthError> {
    for pair in samples.windows(2) {
        check_successor(&pair[0], &pair[1])?;
    }
    Ok(())
}

fn check_successor(prev: &MeasurementSample, next: &MeasurementSample) -> Result<(), GrowthError> {
    if next.disk_usage_kb.len() != prev.disk_usage_kb.len() {
        return Err(GrowthError::ParseError(format!(
            "row at {}s has {} disk columns, previous row has {}",
            next.elapsed_secs,
            next.disk_usage_kb.len(),
            prev.disk_usage_kb.len()
        )));
    }
    if next.elapsed_secs < prev.elapsed_secs {
        return Err(GrowthError::ParseError(format!(
            "elapsed time goes backwards: {} after {}",
            next.elapsed_secs, prev.elapsed_secs
        )));
    }
    if next.chain_growth_kb < prev.chain_growth_kb {
        return Err(GrowthError::NonMonotonicCounter {
            counter: "chain_growth_kb",
            previous: prev.chain_growth_kb,
            current: next.chain_growth_kb,
        });
    }
    if next.items_size_kb < prev.items_size_kb {
        return Err(GrowthError::NonMonotonicCounter {
            counter: "items_size_kb",
            previous: prev.items_size_kb,
            current: next.items_size_kb,
        });
    }
    Ok(())
}

/// Read the raw listings captured for one node
pub fn read_raw_usage(path: &Path) -> Result<Vec<RawUsageRow>, GrowthError> {
    let file = File::open(path).map_err(|e| GrowthError::io(path, e))?;
    let mut reader = ReaderBuilder::new().has_headers(false).from_reader(file);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let elapsed = record.get(0).unwrap_or("").trim();
        let elapsed_secs = elapsed.parse::<f64>().map_err(|_| {
            GrowthError::ParseError(format!("{}: invalid elapsed time '{}'", path.display(), elapsed))
        })?;
        rows.push(RawUsageRow {
            elapsed_secs,
            blob: record.get(1).unwrap_or("").to_string(),
        });
    }
    Ok(rows)
}

/// Appends every tick to the run directory as it is sampled
pub struct MeasurementWriter {
    run_dir: PathBuf,
    measurements: Writer<File>,
    raw_usage: Vec<Writer<File>>,
}

impl MeasurementWriter {
    /// Open (or continue) the series files of a run
    pub fn create(run_dir: &Path, num_nodes: usize, detailed: bool) -> Result<Self, GrowthError> {
        let measurements = quoted_writer(append(&run_dir.join(MEASUREMENTS_FILE))?);
        let raw_usage = if detailed {
            (0..num_nodes)
                .map(|node| append(&raw_usage_file(run_dir, node)).map(quoted_writer))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            measurements,
            raw_usage,
        })
    }
}

impl SampleSink for MeasurementWriter {
    fn record(&mut self, sample: &MeasurementSample, detailed: Option<&[String]>) -> Result<(), GrowthError> {
        write_sample(&mut self.measurements, sample)?;
        self.measurements
            .flush()
            .map_err(|e| GrowthError::io(self.run_dir.join(MEASUREMENTS_FILE), e))?;

        if let Some(listings) = detailed {
            for (node, (writer, listing)) in self.raw_usage.iter_mut().zip(listings).enumerate() {
                writer.write_record(&[sample.elapsed_secs.to_string(), listing.clone()])?;
                writer
                    .flush()
                    .map_err(|e| GrowthError::io(raw_usage_file(&self.run_dir, node), e))?;
            }
        }
        Ok(())
    }
}

/// A run held in memory: its configuration snapshot and ordered samples.
///
/// Samples can only be appended through [`SampleSink`]; each append is
/// checked against the previous sample.
#[derive(Debug, Clone)]
pub struct RunRecord {
    id: String,
    config: RunConfig,
    samples: Vec<MeasurementSample>,
    raw_usage: Vec<Vec<RawUsageRow>>,
}

impl RunRecord {
    pub fn new(id: impl Into<String>, config: RunConfig) -> Self {
        let raw_usage = vec![Vec::new(); config.num_nodes];
        Self {
            id: id.into(),
            config,
            samples: Vec::new(),
            raw_usage,
        }
    }

    /// Rebuild a record from persisted samples
    pub fn from_samples(
        id: impl Into<String>,
        config: RunConfig,
        samples: Vec<MeasurementSample>,
    ) -> Result<Self, GrowthError> {
        let mut record = Self::new(id, config);
        for sample in samples {
            record.record(&sample, None)?;
        }
        Ok(record)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn samples(&self) -> &[MeasurementSample] {
        &self.samples
    }

    pub fn raw_usage(&self, node: usize) -> &[RawUsageRow] {
        self.raw_usage.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Elapsed time of the last sample, the run's weight in the dataset
    pub fn final_elapsed(&self) -> Option<f64> {
        self.samples.last().map(|s| s.elapsed_secs)
    }
}

impl SampleSink for RunRecord {
    fn record(&mut self, sample: &MeasurementSample, detailed: Option<&[String]>) -> Result<(), GrowthError> {
        if sample.disk_usage_kb.len() != self.config.num_nodes {
            return Err(GrowthError::ParseError(format!(
                "sample has {} disk columns, run '{}' has {} nodes",
                sample.disk_usage_kb.len(),
                self.id,
                self.config.num_nodes
            )));
        }
        if let Some(prev) = self.samples.last() {
            check_successor(prev, sample)?;
        }

        if let Some(listings) = detailed {
            for (rows, listing) in self.raw_usage.iter_mut().zip(listings) {
                rows.push(RawUsageRow {
                    elapsed_secs: sample.elapsed_secs,
                    blob: listing.clone(),
                });
            }
        }
        self.samples.push(sample.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainMode, TransactionMatrix};
    use std::time::Duration;

    fn sample(t: f64, chain: f64, items: f64, disks: &[f64]) -> MeasurementSample {
        MeasurementSample {
            elapsed_secs: t,
            chain_growth_kb: chain,
            items_size_kb: items,
            disk_usage_kb: disks.to_vec(),
        }
    }

    fn config(num_nodes: usize) -> RunConfig {
        RunConfig {
            num_nodes,
            labels: None,
            txpm: TransactionMatrix::new(vec![vec![0; num_nodes]; num_nodes]),
            mode: ChainMode::Offchain,
            master_sub_all: false,
            disk_space_detailed: true,
            tx_size_kb: 1.0,
            test_duration: Duration::from_secs(60),
            measure_delay: Duration::from_secs(5),
            stream_name: "stream".to_string(),
            plot_horizons_days: vec![0],
        }
    }

    #[test]
    fn test_write_then_read_within_rounding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MEASUREMENTS_FILE);
        let samples = vec![
            sample(0.013, 0.0, 0.0, &[1024.456, 2048.0]),
            sample(5.0072, 1.2345, 128.0, &[1030.111, 2050.999]),
            sample(10.2, 2.5, 256.004, &[1040.0, 2061.3333]),
        ];

        write_measurements(&path, &samples).unwrap();
        let read = read_measurements(&path).unwrap();

        assert_eq!(read.len(), samples.len());
        for (a, b) in samples.iter().zip(&read) {
            for (x, y) in a.to_row().iter().zip(b.to_row()) {
                assert!((x - y).abs() <= 0.005 + 1e-9, "{} vs {}", x, y);
            }
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("\"0.01\",\"0\",\"0\",\"1024.46\",\"2048\""));
    }

    #[test]
    fn test_decreasing_counter_rejected() {
        let samples = vec![
            sample(0.0, 0.0, 10.0, &[1.0]),
            sample(5.0, 1.0, 5.0, &[1.0]),
        ];
        assert!(matches!(
            validate_series(&samples),
            Err(GrowthError::NonMonotonicCounter { counter: "items_size_kb", .. })
        ));
    }

    #[test]
    fn test_malformed_row_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MEASUREMENTS_FILE);
        std::fs::write(&path, "\"0\",\"0\",\"0\",\"abc\"\n").unwrap();
        assert!(matches!(read_measurements(&path), Err(GrowthError::ParseError(_))));
    }

    #[test]
    fn test_writer_appends_raw_listings() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MeasurementWriter::create(dir.path(), 2, true).unwrap();
        let listings = vec!["4\t/a\r\n8\t/b".to_string(), "1\t/a".to_string()];

        writer.record(&sample(0.0, 0.0, 0.0, &[1.0, 2.0]), Some(&listings)).unwrap();
        writer.record(&sample(5.0, 1.0, 1.0, &[1.5, 2.5]), Some(&listings)).unwrap();
        drop(writer);

        let series = read_measurements(&dir.path().join(MEASUREMENTS_FILE)).unwrap();
        assert_eq!(series.len(), 2);

        let raw = read_raw_usage(&raw_usage_file(dir.path(), 0)).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].elapsed_secs, 5.0);
        assert_eq!(raw[1].blob, "4\t/a\r\n8\t/b");
    }

    #[test]
    fn test_run_record_checks_appends() {
        let mut record = RunRecord::new("run-0", config(2));
        record.record(&sample(0.0, 0.0, 0.0, &[1.0, 2.0]), None).unwrap();
        record.record(&sample(5.0, 0.5, 1.0, &[1.0, 2.0]), None).unwrap();

        assert!(record.record(&sample(10.0, 0.5, 1.0, &[1.0]), None).is_err());
        assert!(record.record(&sample(10.0, 0.1, 1.0, &[1.0, 2.0]), None).is_err());
        assert_eq!(record.samples().len(), 2);
        assert_eq!(record.final_elapsed(), Some(5.0));
    }
}
