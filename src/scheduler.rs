//! Refresh loop keeping the pool at its target size
//!
//! The scheduler alternates between two modes. While bootstrapping it pulls
//! fresh candidates from the feeds until the pool reaches its target; once
//! steady it only re-validates what is already pooled, dropping dead entries
//! into the retry book, and falls back to bootstrapping when the pool thins
//! out. Due retries are attempted on every cycle.

use crate::pool::{ProxyPool, RetryBook};
use crate::proxy::crawler::CandidateSource;
use crate::proxy::models::{Candidate, ProxyKey};
use crate::proxy::parser::{ProxyParser, QualityFilter};
use crate::proxy::validator::ValidationEngine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default number of live proxies to collect
const DEFAULT_TARGET_POOL: usize = 50;

/// Default pool size under which fresh candidates are fetched again
const DEFAULT_REPLENISH_BELOW: usize = 20;

/// Default pause between steady cycles in seconds
const DEFAULT_STEADY_INTERVAL_SECS: u64 = 300;

/// Default pause after a bootstrap cycle that fell short, in seconds
const DEFAULT_BOOTSTRAP_INTERVAL_SECS: u64 = 30;

/// Default pause after a fetch that produced nothing, in seconds
const DEFAULT_EMPTY_FETCH_BACKOFF_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Bootstrapping,
    Steady,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bootstrapping => f.write_str("bootstrapping"),
            Mode::Steady => f.write_str("steady"),
        }
    }
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub target_pool: usize,
    pub replenish_below: usize,
    pub steady_interval: Duration,
    pub bootstrap_interval: Duration,
    pub empty_fetch_backoff: Duration,
    /// Filter applied to every fetched line
    pub filter: QualityFilter,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_pool: DEFAULT_TARGET_POOL,
            replenish_below: DEFAULT_REPLENISH_BELOW,
            steady_interval: Duration::from_secs(DEFAULT_STEADY_INTERVAL_SECS),
            bootstrap_interval: Duration::from_secs(DEFAULT_BOOTSTRAP_INTERVAL_SECS),
            empty_fetch_backoff: Duration::from_secs(DEFAULT_EMPTY_FETCH_BACKOFF_SECS),
            filter: QualityFilter::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target_pool(mut self, target_pool: usize) -> Self {
        self.target_pool = target_pool;
        self
    }

    pub fn with_replenish_below(mut self, replenish_below: usize) -> Self {
        self.replenish_below = replenish_below;
        self
    }

    pub fn with_steady_interval(mut self, interval: Duration) -> Self {
        self.steady_interval = interval;
        self
    }

    pub fn with_bootstrap_interval(mut self, interval: Duration) -> Self {
        self.bootstrap_interval = interval;
        self
    }

    pub fn with_empty_fetch_backoff(mut self, backoff: Duration) -> Self {
        self.empty_fetch_backoff = backoff;
        self
    }

    pub fn with_filter(mut self, filter: QualityFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Summary of one scheduler cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    /// Mode the cycle ran in
    pub mode: Mode,
    /// Raw lines delivered by the feeds
    pub fetched_lines: usize,
    /// Fresh candidates that were probed
    pub candidates: usize,
    /// New or refreshed live entries
    pub found: usize,
    /// Pooled entries that failed re-validation
    pub removed: usize,
    /// Retry-book entries that came back to life
    pub resurrected: usize,
    pub pool_size: usize,
    pub next_mode: Mode,
    /// Pause before the next cycle
    pub delay: Duration,
}

impl CycleReport {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            fetched_lines: 0,
            candidates: 0,
            found: 0,
            removed: 0,
            resurrected: 0,
            pool_size: 0,
            next_mode: mode,
            delay: Duration::ZERO,
        }
    }
}

pub struct Scheduler {
    engine: ValidationEngine,
    source: Arc<dyn CandidateSource>,
    retry: RetryBook,
    config: SchedulerConfig,
    mode: Mode,
}

impl Scheduler {
    pub fn new(
        engine: ValidationEngine,
        source: Arc<dyn CandidateSource>,
        retry: RetryBook,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            source,
            retry,
            config,
            mode: Mode::Bootstrapping,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn pool(&self) -> &ProxyPool {
        self.engine.pool()
    }

    pub fn retry_book(&self) -> &RetryBook {
        &self.retry
    }

    /// Run cycles until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let report = tokio::select! {
                report = self.run_cycle() => report,
                _ = &mut shutdown => {
                    info!("Scheduler shutting down mid-cycle");
                    return;
                }
            };
            info!(
                "Cycle ({} -> {}): {} found, {} removed, {} resurrected, pool {}; next in {}s",
                report.mode,
                report.next_mode,
                report.found,
                report.removed,
                report.resurrected,
                report.pool_size,
                report.delay.as_secs()
            );

            tokio::select! {
                _ = tokio::time::sleep(report.delay) => {}
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// Run one cycle in the current mode, then pick the next mode.
    ///
    /// Dropping the returned future mid-cycle keeps the current mode and
    /// whatever was merged into the pool so far.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Utc::now();
        let mut report = CycleReport::new(self.mode);

        let empty_fetch = match self.mode {
            Mode::Bootstrapping => self.bootstrap(&mut report).await,
            Mode::Steady => {
                self.maintain(&mut report).await;
                false
            }
        };
        self.resurrect(started, &mut report).await;

        let size = self.pool().size();
        report.pool_size = size;
        let (next_mode, delay) = match self.mode {
            Mode::Bootstrapping if size >= self.config.target_pool => {
                (Mode::Steady, self.config.steady_interval)
            }
            Mode::Bootstrapping if empty_fetch => {
                (Mode::Bootstrapping, self.config.empty_fetch_backoff)
            }
            Mode::Bootstrapping => (Mode::Bootstrapping, self.config.bootstrap_interval),
            Mode::Steady if size < self.config.replenish_below => {
                (Mode::Bootstrapping, self.config.bootstrap_interval)
            }
            Mode::Steady => (Mode::Steady, self.config.steady_interval),
        };

        if next_mode != self.mode {
            info!("Switching from {} to {} (pool size {})", self.mode, next_mode, size);
        }
        self.mode = next_mode;
        report.next_mode = next_mode;
        report.delay = delay;
        report
    }

    /// Fetch, parse and validate fresh candidates. Returns true when the
    /// feeds produced nothing.
    async fn bootstrap(&self, report: &mut CycleReport) -> bool {
        let batches = self.source.fetch().await;
        report.fetched_lines = batches.iter().map(|b| b.lines.len()).sum();
        if report.fetched_lines == 0 {
            warn!("Sources returned no lines");
            return true;
        }

        let mut seen: HashSet<ProxyKey> = HashSet::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut skipped = 0;
        for batch in &batches {
            let parsed = ProxyParser::parse_lines(
                &batch.lines,
                batch.protocol.hint(),
                &batch.protocol.policy(),
                &self.config.filter,
            );
            debug!(
                "{}: {} candidates, {} rejected, {} duplicates",
                batch.source,
                parsed.candidates.len(),
                parsed.rejected,
                parsed.duplicates
            );

            for candidate in parsed.candidates {
                let key = candidate.key();
                if self.pool().contains(&key) || self.retry.is_blacklisted(&key) {
                    skipped += 1;
                    continue;
                }
                if seen.insert(key) {
                    candidates.push(candidate);
                }
            }
        }
        report.candidates = candidates.len();

        let needed = self.config.target_pool.saturating_sub(self.pool().size());
        if needed == 0 || candidates.is_empty() {
            return false;
        }
        info!(
            "Bootstrapping: {} fresh candidates ({} skipped), {} more live proxies wanted",
            candidates.len(),
            skipped,
            needed
        );

        let config = self.engine.config().clone().with_target_alive(Some(needed));
        let batch = self.engine.with_config(config).validate_batch(candidates).await;
        for entry in &batch.live {
            self.retry.record_success(&entry.key());
        }
        report.found = batch.alive();
        false
    }

    /// Re-validate every pooled entry with its working protocol.
    async fn maintain(&self, report: &mut CycleReport) {
        let candidates: Vec<Candidate> = self
            .pool()
            .snapshot()
            .iter()
            .map(|entry| entry.to_candidate())
            .collect();
        if candidates.is_empty() {
            return;
        }

        let config = self.engine.config().clone().with_target_alive(None);
        let batch = self.engine.with_config(config).validate_batch(candidates).await;
        report.found = batch.alive();

        let now = Utc::now();
        for candidate in batch.dead {
            if self.pool().remove(&candidate.key()).is_some() {
                report.removed += 1;
            }
            self.retry.record_failure(candidate, now);
        }
    }

    /// Give retry-book entries due by `cycle_start` another probe. Entries
    /// that failed during this cycle wait for the next one.
    async fn resurrect(&self, cycle_start: DateTime<Utc>, report: &mut CycleReport) {
        let mut due = self.retry.due(cycle_start);
        due.retain(|candidate| {
            let pooled = self.pool().contains(&candidate.key());
            if pooled {
                self.retry.record_success(&candidate.key());
            }
            !pooled
        });
        if due.is_empty() {
            return;
        }

        debug!("Retrying {} dropped proxies", due.len());
        let config = self.engine.config().clone().with_target_alive(None);
        let batch = self.engine.with_config(config).validate_batch(due).await;

        for entry in &batch.live {
            self.retry.record_success(&entry.key());
        }
        report.resurrected = batch.alive();

        let now = Utc::now();
        for candidate in batch.dead {
            self.retry.record_failure(candidate, now);
        }
    }
}
