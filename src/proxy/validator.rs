//! Concurrent batch validation
//!
//! Candidates are probed chunk by chunk on a bounded number of concurrent
//! probes. Live verdicts are merged into the pool the moment they arrive, so
//! readers see progress long before a large batch finishes.

use crate::pool::ProxyPool;
use crate::proxy::checker::ProxyChecker;
use crate::proxy::models::{Candidate, FailureReason, LiveProxy, Verdict};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default number of concurrent probes
const DEFAULT_CONCURRENCY: usize = 25;

/// Default number of candidates per chunk
const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default pause between chunks in milliseconds
const DEFAULT_CHUNK_PAUSE_MS: u64 = 250;

/// Configuration for batch validation
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Maximum probes in flight at once
    pub concurrency: usize,
    pub chunk_size: usize,
    /// Stop as soon as this many live proxies were found
    pub target_alive: Option<usize>,
    pub chunk_pause: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            target_alive: None,
            chunk_pause: Duration::from_millis(DEFAULT_CHUNK_PAUSE_MS),
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_target_alive(mut self, target_alive: Option<usize>) -> Self {
        self.target_alive = target_alive;
        self
    }

    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }
}

/// Failure counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureTally {
    pub timeout: usize,
    pub connection_error: usize,
    pub bad_status: usize,
    pub parse_error: usize,
}

impl FailureTally {
    fn record(&mut self, reason: &FailureReason) {
        match reason {
            FailureReason::Timeout => self.timeout += 1,
            FailureReason::ConnectionError(_) => self.connection_error += 1,
            FailureReason::BadStatus(_) => self.bad_status += 1,
            FailureReason::ParseError(_) => self.parse_error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.timeout + self.connection_error + self.bad_status + self.parse_error
    }
}

/// What a batch validation produced
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Live entries in completion order
    pub live: Vec<LiveProxy>,
    /// Candidates whose probe failed
    pub dead: Vec<Candidate>,
    /// Probes completed, live and dead
    pub checked: usize,
    pub failures: FailureTally,
    pub stopped_early: bool,
}

impl BatchReport {
    pub fn alive(&self) -> usize {
        self.live.len()
    }

    pub fn success_rate(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            self.live.len() as f64 / self.checked as f64 * 100.0
        }
    }
}

/// Fans candidates out over the checker and feeds survivors into the pool
#[derive(Clone)]
pub struct ValidationEngine {
    checker: ProxyChecker,
    pool: ProxyPool,
    config: ValidatorConfig,
}

impl ValidationEngine {
    pub fn new(checker: ProxyChecker, pool: ProxyPool, config: ValidatorConfig) -> Self {
        Self {
            checker,
            pool,
            config,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    /// A copy of this engine with different settings, sharing checker and pool
    pub fn with_config(&self, config: ValidatorConfig) -> Self {
        Self {
            checker: self.checker.clone(),
            pool: self.pool.clone(),
            config,
        }
    }

    /// Probe a batch of candidates, merging every live verdict into the pool.
    pub async fn validate_batch(&self, candidates: Vec<Candidate>) -> BatchReport {
        let mut report = BatchReport::default();
        if candidates.is_empty() {
            return report;
        }

        let total = candidates.len();
        let concurrency = self.config.concurrency.max(1);
        let chunk_size = self.config.chunk_size.max(1);
        let chunk_count = total.div_ceil(chunk_size);
        let started = Instant::now();

        info!(
            "Validating {} candidates in {} chunks ({} concurrent probes, target: {})",
            total,
            chunk_count,
            concurrency,
            self.config
                .target_alive
                .map_or("none".to_string(), |t| t.to_string())
        );

        let mut remaining = candidates.into_iter();
        for chunk_index in 0..chunk_count {
            if chunk_index > 0 && !self.config.chunk_pause.is_zero() {
                tokio::time::sleep(self.config.chunk_pause).await;
            }

            let chunk: Vec<Candidate> = remaining.by_ref().take(chunk_size).collect();
            debug!(
                "Chunk {}/{}: probing {} candidates",
                chunk_index + 1,
                chunk_count,
                chunk.len()
            );

            let mut verdicts = stream::iter(chunk)
                .map(|candidate| self.guarded_probe(candidate))
                .buffer_unordered(concurrency);

            while let Some(verdict) = verdicts.next().await {
                report.checked += 1;
                match verdict {
                    Verdict::Live(entry) => {
                        if self.pool.merge(entry.clone()) {
                            debug!("New live proxy {}", entry);
                        }
                        report.live.push(entry);
                    }
                    Verdict::Dead { candidate, reason } => {
                        report.failures.record(&reason);
                        report.dead.push(candidate);
                    }
                }

                if self.target_reached(&report) {
                    report.stopped_early = true;
                    break;
                }
            }

            info!(
                "Chunk {}/{} done: {} alive / {} checked",
                chunk_index + 1,
                chunk_count,
                report.alive(),
                report.checked
            );

            if report.stopped_early {
                info!(
                    "Target of {} live proxies reached, stopping early",
                    report.alive()
                );
                break;
            }
        }

        info!(
            "Validation finished: {} alive / {} checked ({:.1}%) in {:.1}s",
            report.alive(),
            report.checked,
            report.success_rate(),
            started.elapsed().as_secs_f64()
        );
        report
    }

    fn target_reached(&self, report: &BatchReport) -> bool {
        self.config
            .target_alive
            .is_some_and(|target| report.alive() >= target)
    }

    /// Probe one candidate; a panicking probe becomes a dead verdict.
    async fn guarded_probe(&self, candidate: Candidate) -> Verdict {
        let fallback = candidate.clone();
        match AssertUnwindSafe(self.checker.probe(candidate))
            .catch_unwind()
            .await
        {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!("Probe of {} panicked", fallback.key());
                Verdict::dead(
                    fallback,
                    FailureReason::ParseError("probe panicked".to_string()),
                )
            }
        }
    }
}
