//! Replay schedules derived from a transaction-rate matrix.
//!
//! Every active (sender, receiver) pair becomes one record telling the
//! external load generator how long to wait between transactions and how
//! many it must send over the test duration.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{stream_id, TransactionMatrix};
use crate::error::GrowthError;

/// One replay instruction for a single stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub stream_id: String,
    pub receiver: usize,
    /// Pause between consecutive transactions in milliseconds
    pub delay_ms: u64,
    /// Number of transactions sent over the whole test
    pub loop_count: u64,
}

/// All records of one sender, ordered by receiver index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSchedule {
    pub sender: usize,
    pub records: Vec<ScheduleRecord>,
}

/// Build the replay schedule for every sender with at least one positive rate.
///
/// `delay_ms = round(60000 / rate)` (ties to even) and `loop_count = ceil(rate * duration_minutes)`.
/// Fails with `InsufficientData` when `duration_minutes` is not positive, since
/// no record could then satisfy `loop_count >= 1`.
pub fn generate_schedules(
    matrix: &TransactionMatrix,
    duration_minutes: f64,
    stream_base: &str,
) -> Result<Vec<SenderSchedule>, GrowthError> {
    if !(duration_minutes > 0.0) {
        return Err(GrowthError::InsufficientData(format!(
            "test duration must be positive, found {} minutes",
            duration_minutes
        )));
    }

    let mut schedules: Vec<SenderSchedule> = Vec::new();

    for (sender, receiver, rate) in matrix.active_pairs() {
        let record = ScheduleRecord {
            stream_id: stream_id(stream_base, sender, receiver),
            receiver,
            // rates above 120000/min would round to 0 ms; the engine needs a positive pause
            delay_ms: ((60_000.0 / rate as f64).round_ties_even() as u64).max(1),
            loop_count: (rate as f64 * duration_minutes).ceil() as u64,
        };

        match schedules.last_mut() {
            Some(schedule) if schedule.sender == sender => schedule.records.push(record),
            _ => schedules.push(SenderSchedule {
                sender,
                records: vec![record],
            }),
        }
    }

    debug!(
        "Generated {} stream schedules for {} senders",
        schedules.iter().map(|s| s.records.len()).sum::<usize>(),
        schedules.len()
    );

    Ok(schedules)
}

/// Path of the replay file for `sender` inside `dir`
pub fn schedule_file(dir: &Path, sender: usize) -> PathBuf {
    dir.join(format!("node{}.csv", sender))
}

/// Write one `node<i>.csv` per sender with rows `[delayMs, streamId, loopCount]`
pub fn write_schedule_files(dir: &Path, schedules: &[SenderSchedule]) -> Result<Vec<PathBuf>, GrowthError> {
    let mut written = Vec::with_capacity(schedules.len());

    for schedule in schedules {
        let path = schedule_file(dir, schedule.sender);
        let file = File::create(&path).map_err(|e| GrowthError::io(&path, e))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Always)
            .from_writer(file);

        for record in &schedule.records {
            writer.write_record(&[
                record.delay_ms.to_string(),
                record.stream_id.clone(),
                record.loop_count.to_string(),
            ])?;
        }
        writer.flush().map_err(|e| GrowthError::io(&path, e))?;
        written.push(path);
    }

    info!("Wrote {} replay schedule files to {}", written.len(), dir.display());
    Ok(written)
}
