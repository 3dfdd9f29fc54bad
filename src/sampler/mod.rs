//! Live measurement sampler.
//!
//! Polls the chain and every node's disk at a fixed cadence for the length of
//! a run plus a settling tail, producing one [`MeasurementSample`] per tick.
//! Ticks target `start + k * measure_delay`; the sampler sleeps until the next
//! boundary and never samples early. A tick that overruns its slot is followed
//! immediately by the next one and all later boundaries move back by the
//! overrun.

pub mod clock;
pub mod probes;

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::types::MeasurementSample;
use crate::config::{stream_id, RunConfig, TransactionMatrix};
use crate::error::GrowthError;

pub use clock::{CancellationToken, Clock, ManualClock, SystemClock};
pub use probes::{ChainQuery, DiskProbe, FailureMode, RetryPolicy};

/// Receives every sample as soon as it is taken
pub trait SampleSink {
    /// `detailed` carries one raw listing per node when detailed mode is on
    fn record(&mut self, sample: &MeasurementSample, detailed: Option<&[String]>) -> Result<(), GrowthError>;
}

/// Grace period after the nominal duration: 5% of it, clamped to [60s, 180s]
pub fn tail_for(test_duration: Duration) -> Duration {
    Duration::from_secs_f64((0.05 * test_duration.as_secs_f64()).clamp(60.0, 180.0))
}

/// Everything the sampler needs to know about the run it observes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub num_nodes: usize,
    pub txpm: TransactionMatrix,
    pub master_sub_all: bool,
    pub detailed: bool,
    pub tx_size_kb: f64,
    pub stream_name: String,
    #[serde(with = "humantime_serde")]
    pub measure_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub test_duration: Duration,
    pub retry: RetryPolicy,
    pub on_failure: FailureMode,
}

impl SamplerConfig {
    /// Baseline behaviour: one attempt per query, abort on failure
    pub fn from_run(config: &RunConfig) -> Self {
        Self {
            num_nodes: config.num_nodes,
            txpm: config.txpm.clone(),
            master_sub_all: config.master_sub_all,
            detailed: config.disk_space_detailed,
            tx_size_kb: config.tx_size_kb,
            stream_name: config.stream_name.clone(),
            measure_delay: config.measure_delay,
            test_duration: config.test_duration,
            retry: RetryPolicy::none(),
            on_failure: FailureMode::Abort,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, on_failure: FailureMode) -> Self {
        self.retry = retry;
        self.on_failure = on_failure;
        self
    }

    pub fn tail(&self) -> Duration {
        tail_for(self.test_duration)
    }

    /// Sampling stops once elapsed time reaches this
    pub fn total_duration(&self) -> Duration {
        self.test_duration + self.tail()
    }
}

/// Counters carried from one tick to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplerState {
    pub recent_block_height: u64,
    pub cumulative_chain_kb: f64,
    pub last_items_kb: f64,
    pub tick_index: u64,
}

/// How a sampling session ended
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingSummary {
    /// Samples handed to the sink
    pub samples: u64,
    /// Ticks skipped after exhausting retries
    pub gaps: u64,
    /// Ticks whose work ran past the next boundary
    pub overruns: u64,
    /// Accumulated boundary shift caused by overruns
    #[serde(with = "humantime_serde")]
    pub drift: Duration,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub cancelled: bool,
}

pub struct Sampler<Q, P, C> {
    config: SamplerConfig,
    chain: Q,
    disk: P,
    clock: C,
    cancel: CancellationToken,
    state: SamplerState,
}

impl<Q, P, C> Sampler<Q, P, C>
where
    Q: ChainQuery,
    P: DiskProbe,
    C: Clock,
{
    pub fn new(config: SamplerConfig, chain: Q, disk: P, clock: C, cancel: CancellationToken) -> Self {
        Self {
            config,
            chain,
            disk,
            clock,
            cancel,
            state: SamplerState::default(),
        }
    }

    pub fn state(&self) -> &SamplerState {
        &self.state
    }

    /// Sample until `test_duration + tail` has elapsed or the token is cancelled.
    ///
    /// Each call is a fresh session: tick index and counters start from zero.
    pub fn run(&mut self, sink: &mut dyn SampleSink) -> Result<SamplingSummary, GrowthError> {
        self.state = SamplerState::default();
        let start = self.clock.now();
        let total = self.config.total_duration();
        let delay = self.config.measure_delay;
        let mut summary = SamplingSummary::default();

        info!(
            "Sampling every {:?} for {:?} (including {:?} tail)",
            delay,
            total,
            self.config.tail()
        );

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= total {
                break;
            }

            match self.tick(elapsed.as_secs_f64()) {
                Ok((sample, detailed)) => {
                    sink.record(&sample, detailed.as_deref())?;
                    summary.samples += 1;
                    debug!(
                        "Tick {} at {:.2}s: chain {:.2} KB, items {:.2} KB",
                        self.state.tick_index, sample.elapsed_secs, sample.chain_growth_kb, sample.items_size_kb
                    );
                }
                Err(GrowthError::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Err(GrowthError::ExternalQueryFailure(msg))
                    if self.config.on_failure == FailureMode::RecordGap =>
                {
                    warn!("Tick {} skipped: {}", self.state.tick_index, msg);
                    summary.gaps += 1;
                }
                Err(err) => return Err(err),
            }

            self.state.tick_index += 1;

            let target = start + summary.drift + delay.mul_f64(self.state.tick_index as f64);
            let now = self.clock.now();
            if now > target {
                let overrun = now - target;
                debug!("Tick {} overran its slot by {:?}", self.state.tick_index - 1, overrun);
                summary.overruns += 1;
                summary.drift += overrun;
            } else if !self.sleep_until(target) {
                summary.cancelled = true;
                break;
            }
        }

        summary.elapsed = self.clock.now().saturating_sub(start);
        info!(
            "Sampling finished after {:?}: {} samples, {} gaps, {} overruns{}",
            summary.elapsed,
            summary.samples,
            summary.gaps,
            summary.overruns,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    /// Block until `target`; false when cancelled first
    fn sleep_until(&self, target: Duration) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = self.clock.now();
            if now >= target {
                return true;
            }
            self.clock.sleep(target - now);
        }
    }

    /// Take one sample at `elapsed_secs`
    fn tick(&mut self, elapsed_secs: f64) -> Result<(MeasurementSample, Option<Vec<String>>), GrowthError> {
        self.update_chain_size()?;

        let items_kb = self.count_items()? as f64 * self.config.tx_size_kb;
        if items_kb < self.state.last_items_kb {
            return Err(GrowthError::NonMonotonicCounter {
                counter: "items_size_kb",
                previous: self.state.last_items_kb,
                current: items_kb,
            });
        }
        self.state.last_items_kb = items_kb;

        let mut disk_usage_kb = Vec::with_capacity(self.config.num_nodes);
        for node in 0..self.config.num_nodes {
            let disk = &mut self.disk;
            let usage = self.config.retry.run(&self.clock, &self.cancel, "disk usage", || {
                disk.total_usage_kb(node)
            })?;
            disk_usage_kb.push(usage);
        }

        let detailed = if self.config.detailed {
            let mut listings = Vec::with_capacity(self.config.num_nodes);
            for node in 0..self.config.num_nodes {
                let disk = &mut self.disk;
                let listing = self.config.retry.run(&self.clock, &self.cancel, "usage listing", || {
                    disk.recursive_usage_listing(node)
                })?;
                listings.push(listing);
            }
            Some(listings)
        } else {
            None
        };

        Ok((
            MeasurementSample {
                elapsed_secs,
                chain_growth_kb: self.state.cumulative_chain_kb,
                items_size_kb: items_kb,
                disk_usage_kb,
            },
            detailed,
        ))
    }

    /// Add the newest block's size when the height moved.
    ///
    /// Only the latest block is counted even if several appeared since the
    /// previous poll.
    fn update_chain_size(&mut self) -> Result<(), GrowthError> {
        let chain = &mut self.chain;
        let height = self
            .config
            .retry
            .run(&self.clock, &self.cancel, "block height", || chain.block_height())?;

        if height == self.state.recent_block_height {
            return Ok(());
        }
        if height < self.state.recent_block_height {
            return Err(GrowthError::NonMonotonicCounter {
                counter: "block_height",
                previous: self.state.recent_block_height as f64,
                current: height as f64,
            });
        }

        let chain = &mut self.chain;
        let size = self
            .config
            .retry
            .run(&self.clock, &self.cancel, "block size", || chain.block_size(height))?;

        self.state.cumulative_chain_kb += size as f64 / 1024.0;
        self.state.recent_block_height = height;
        Ok(())
    }

    /// Total published items, from the master node alone when it follows
    /// every stream, otherwise summed per sender over its own streams
    fn count_items(&mut self) -> Result<u64, GrowthError> {
        if self.config.master_sub_all {
            let chain = &mut self.chain;
            let counts = self
                .config
                .retry
                .run(&self.clock, &self.cancel, "stream listing", || chain.stream_item_counts(0))?;
            return Ok(counts.values().sum());
        }

        let mut total = 0;
        for sender in 0..self.config.num_nodes {
            let receivers: Vec<usize> = (0..self.config.num_nodes)
                .filter(|&r| r != sender && self.config.txpm.rate(sender, r) > 0)
                .collect();
            if receivers.is_empty() {
                continue;
            }

            let chain = &mut self.chain;
            let counts = self
                .config
                .retry
                .run(&self.clock, &self.cancel, "stream listing", || chain.stream_item_counts(sender))?;

            for receiver in receivers {
                let stream = stream_id(&self.config.stream_name, sender, receiver);
                let items = counts.get(&stream).ok_or_else(|| {
                    GrowthError::ExternalQueryFailure(format!(
                        "stream '{}' missing from node {} listing",
                        stream, sender
                    ))
                })?;
                total += items;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::measurements::RunRecord;
    use crate::config::ChainMode;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Chain that grows one block and one item per stream on every height query
    struct FakeChain {
        height: u64,
        items: u64,
        streams: Vec<String>,
        fail_heights: RefCell<Vec<u64>>,
        latency: Duration,
        clock: Rc<ManualClock>,
        polls: u64,
        /// Poll at which the item counters restart from zero
        items_reset_at: Option<u64>,
        /// Poll at which the reported height steps back
        height_rewind_at: Option<u64>,
    }

    impl FakeChain {
        fn new(streams: &[&str], clock: Rc<ManualClock>) -> Self {
            Self {
                height: 0,
                items: 0,
                streams: streams.iter().map(|s| s.to_string()).collect(),
                fail_heights: RefCell::new(Vec::new()),
                latency: Duration::ZERO,
                clock,
                polls: 0,
                items_reset_at: None,
                height_rewind_at: None,
            }
        }
    }

    impl ChainQuery for FakeChain {
        fn block_height(&mut self) -> Result<u64, GrowthError> {
            self.clock.advance(self.latency);
            self.polls += 1;
            if self.fail_heights.borrow().contains(&self.polls) {
                return Err(GrowthError::ExternalQueryFailure("rpc timeout".to_string()));
            }
            self.height += 1;
            self.items += 1;
            if self.items_reset_at == Some(self.polls) {
                self.items = 0;
            }
            if self.height_rewind_at == Some(self.polls) {
                self.height -= 2;
            }
            Ok(self.height)
        }

        fn block_size(&mut self, _height: u64) -> Result<u64, GrowthError> {
            Ok(2048)
        }

        fn stream_item_counts(&mut self, _node: usize) -> Result<HashMap<String, u64>, GrowthError> {
            Ok(self.streams.iter().map(|s| (s.clone(), self.items)).collect())
        }
    }

    struct FakeDisk;

    impl DiskProbe for FakeDisk {
        fn total_usage_kb(&mut self, node: usize) -> Result<f64, GrowthError> {
            Ok(1000.0 + node as f64)
        }

        fn recursive_usage_listing(&mut self, node: usize) -> Result<String, GrowthError> {
            Ok(format!("{}\t/root/.multichain/chain1/blocks\r\n{}\t/root/.multichain/chain1", node, node + 1))
        }
    }

    fn run_config(master_sub_all: bool) -> RunConfig {
        RunConfig {
            num_nodes: 3,
            labels: None,
            txpm: TransactionMatrix::new(vec![vec![0, 0, 0], vec![0, 0, 2], vec![0, 0, 0]]),
            mode: ChainMode::Offchain,
            master_sub_all,
            disk_space_detailed: false,
            tx_size_kb: 2.0,
            test_duration: Duration::from_secs(600),
            measure_delay: Duration::from_secs(5),
            stream_name: "stream".to_string(),
            plot_horizons_days: vec![0],
        }
    }

    #[test]
    fn test_tail_clamped() {
        assert_eq!(tail_for(Duration::from_secs(60)), Duration::from_secs(60));
        assert_eq!(tail_for(Duration::from_secs(2400)), Duration::from_secs(120));
        assert_eq!(tail_for(Duration::from_secs(36000)), Duration::from_secs(180));
    }

    #[test]
    fn test_ticks_land_on_boundaries() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(true);
        let chain = FakeChain::new(&["stream1-2"], clock.clone());
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(
            SamplerConfig::from_run(&config),
            chain,
            FakeDisk,
            clock.clone(),
            CancellationToken::new(),
        );
        let summary = sampler.run(&mut record).unwrap();

        // 600s + 60s tail at 5s cadence
        assert_eq!(summary.samples, 132);
        assert!(record.samples().len() >= 100);
        for (k, sample) in record.samples().iter().enumerate() {
            assert!((sample.elapsed_secs - 5.0 * k as f64).abs() < 1e-6);
        }
        assert_eq!(summary.overruns, 0);
        assert!(!summary.cancelled);
    }

    #[test]
    fn test_counters_accumulate() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(false);
        let chain = FakeChain::new(&["stream1-2"], clock.clone());
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(
            SamplerConfig::from_run(&config),
            chain,
            FakeDisk,
            clock.clone(),
            CancellationToken::new(),
        );
        sampler.run(&mut record).unwrap();

        let samples = record.samples();
        // one 2 KB block per tick
        assert_eq!(samples[0].chain_growth_kb, 2.0);
        assert_eq!(samples[9].chain_growth_kb, 20.0);
        // one 2 KB item per tick on the single active stream
        assert_eq!(samples[9].items_size_kb, 20.0);
        assert_eq!(samples[0].disk_usage_kb, vec![1000.0, 1001.0, 1002.0]);
        assert_eq!(sampler.state().recent_block_height, samples.len() as u64);
    }

    #[test]
    fn test_overrun_shifts_boundaries() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(true);
        let mut chain = FakeChain::new(&["stream1-2"], clock.clone());
        chain.latency = Duration::from_secs(7);
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(
            SamplerConfig::from_run(&config),
            chain,
            FakeDisk,
            clock.clone(),
            CancellationToken::new(),
        );
        let summary = sampler.run(&mut record).unwrap();

        let samples = record.samples();
        assert!(summary.overruns > 0);
        // elapsed is taken before the slow query, so consecutive ticks are 7s apart
        for pair in samples.windows(2) {
            assert!((pair[1].elapsed_secs - pair[0].elapsed_secs - 7.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_query_failure_aborts_by_default() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(true);
        let chain = FakeChain::new(&["stream1-2"], clock.clone());
        chain.fail_heights.borrow_mut().push(3);
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(
            SamplerConfig::from_run(&config),
            chain,
            FakeDisk,
            clock.clone(),
            CancellationToken::new(),
        );
        let result = sampler.run(&mut record);

        assert!(matches!(result, Err(GrowthError::ExternalQueryFailure(_))));
        assert_eq!(record.samples().len(), 2);
    }

    #[test]
    fn test_retry_then_gap() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(true);
        let chain = FakeChain::new(&["stream1-2"], clock.clone());
        // poll 3 fails once and is retried; polls 10 and 11 exhaust two attempts
        chain.fail_heights.borrow_mut().extend([3, 10, 11]);
        let mut record = RunRecord::new("run-0", config.clone());

        let sampler_config = SamplerConfig::from_run(&config).with_retry(
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(100),
                multiplier: 2.0,
            },
            FailureMode::RecordGap,
        );
        let mut sampler = Sampler::new(sampler_config, chain, FakeDisk, clock.clone(), CancellationToken::new());
        let summary = sampler.run(&mut record).unwrap();

        assert_eq!(summary.gaps, 1);
        assert_eq!(summary.samples + summary.gaps, 132);
    }

    #[test]
    fn test_detailed_listings_recorded() {
        let clock = Rc::new(ManualClock::new());
        let mut config = run_config(true);
        config.disk_space_detailed = true;
        let chain = FakeChain::new(&["stream1-2"], clock.clone());
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(
            SamplerConfig::from_run(&config),
            chain,
            FakeDisk,
            clock.clone(),
            CancellationToken::new(),
        );
        sampler.run(&mut record).unwrap();

        assert_eq!(record.raw_usage(2).len(), record.samples().len());
        assert!(record.raw_usage(2)[0].blob.starts_with("2\t"));
    }

    #[test]
    fn test_missing_stream_is_query_failure() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(false);
        let chain = FakeChain::new(&["other"], clock.clone());
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(
            SamplerConfig::from_run(&config),
            chain,
            FakeDisk,
            clock.clone(),
            CancellationToken::new(),
        );
        assert!(matches!(
            sampler.run(&mut record),
            Err(GrowthError::ExternalQueryFailure(_))
        ));
    }

    #[test]
    fn test_cancelled_session_stops_early() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(true);
        let chain = FakeChain::new(&["stream1-2"], clock.clone());
        let mut record = RunRecord::new("run-0", config.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut sampler = Sampler::new(SamplerConfig::from_run(&config), chain, FakeDisk, clock.clone(), cancel);
        let summary = sampler.run(&mut record).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.samples, 0);
    }

    fn gap_tolerant(config: &RunConfig) -> SamplerConfig {
        SamplerConfig::from_run(config).with_retry(
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(100),
                multiplier: 2.0,
            },
            FailureMode::RecordGap,
        )
    }

    #[test]
    fn test_item_counter_reset_is_rejected() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(false);
        let mut chain = FakeChain::new(&["stream1-2"], clock.clone());
        chain.items_reset_at = Some(4);
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(gap_tolerant(&config), chain, FakeDisk, clock.clone(), CancellationToken::new());
        let result = sampler.run(&mut record);

        match result {
            Err(GrowthError::NonMonotonicCounter { counter, previous, current }) => {
                assert_eq!(counter, "items_size_kb");
                assert_eq!(previous, 6.0);
                assert_eq!(current, 0.0);
            }
            other => panic!("expected NonMonotonicCounter, got {:?}", other),
        }
        assert_eq!(record.samples().len(), 3);
    }

    #[test]
    fn test_block_height_rewind_is_rejected() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(true);
        let mut chain = FakeChain::new(&["stream1-2"], clock.clone());
        chain.height_rewind_at = Some(4);
        let mut record = RunRecord::new("run-0", config.clone());

        let mut sampler = Sampler::new(gap_tolerant(&config), chain, FakeDisk, clock.clone(), CancellationToken::new());
        let result = sampler.run(&mut record);

        match result {
            Err(GrowthError::NonMonotonicCounter { counter, previous, current }) => {
                assert_eq!(counter, "block_height");
                assert_eq!(previous, 3.0);
                assert_eq!(current, 2.0);
            }
            other => panic!("expected NonMonotonicCounter, got {:?}", other),
        }
        assert_eq!(record.samples().len(), 3);
    }

    #[test]
    fn test_each_run_starts_fresh() {
        let clock = Rc::new(ManualClock::new());
        let config = run_config(true);
        let chain = FakeChain::new(&["stream1-2"], clock.clone());

        let mut sampler = Sampler::new(
            SamplerConfig::from_run(&config),
            chain,
            FakeDisk,
            clock.clone(),
            CancellationToken::new(),
        );
        let mut first = RunRecord::new("run-0", config.clone());
        sampler.run(&mut first).unwrap();

        let mut second = RunRecord::new("run-1", config.clone());
        let summary = sampler.run(&mut second).unwrap();

        assert_eq!(summary.samples, 132);
        assert_eq!(summary.overruns, 0);
        assert_eq!(second.samples().len(), 132);
        for (k, sample) in second.samples().iter().enumerate() {
            assert!((sample.elapsed_secs - 5.0 * k as f64).abs() < 1e-6);
        }
        assert_eq!(second.samples()[0].chain_growth_kb, 2.0);
        assert_eq!(sampler.state().tick_index, 132);
    }
}
