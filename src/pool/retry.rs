//! Resurrection schedule for proxies that dropped out of the pool
//!
//! A dead key waits out a delay that grows with each consecutive failure and
//! is blacklisted for good once it reaches the failure limit.

use crate::proxy::models::{Candidate, ProxyKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Backoff delays per consecutive failure: first retry is immediate.
const DEFAULT_DELAYS_SECS: [u64; 4] = [0, 5 * 60, 30 * 60, 2 * 60 * 60];

/// Consecutive failures after which a key is never retried again
const DEFAULT_MAX_FAILURES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
    pub max_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

impl RetryPolicy {
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Delay before the retry that follows the `failures`-th consecutive failure
    pub fn delay_for(&self, failures: u32) -> Duration {
        let index = failures.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RetryState {
    Scheduled {
        failures: u32,
        next_retry: DateTime<Utc>,
    },
    Blacklisted {
        failures: u32,
    },
}

#[derive(Debug, Clone)]
struct RetryEntry {
    candidate: Candidate,
    state: RetryState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub scheduled: usize,
    pub blacklisted: usize,
}

/// Shared book of dead keys awaiting resurrection
#[derive(Debug, Clone, Default)]
pub struct RetryBook {
    policy: RetryPolicy,
    entries: Arc<Mutex<HashMap<ProxyKey, RetryEntry>>>,
}

impl RetryBook {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            entries: Arc::default(),
        }
    }

    /// Record another consecutive failure for the candidate's key.
    pub fn record_failure(&self, candidate: Candidate, now: DateTime<Utc>) -> RetryState {
        let key = candidate.key();
        let mut entries = self.entries.lock();

        let failures = match entries.get(&key).map(|e| &e.state) {
            Some(RetryState::Blacklisted { failures }) => {
                return RetryState::Blacklisted {
                    failures: *failures,
                }
            }
            Some(RetryState::Scheduled { failures, .. }) => failures + 1,
            None => 1,
        };

        let state = if failures >= self.policy.max_failures {
            RetryState::Blacklisted { failures }
        } else {
            let delay = chrono::Duration::from_std(self.policy.delay_for(failures))
                .unwrap_or_else(|_| chrono::Duration::zero());
            RetryState::Scheduled {
                failures,
                next_retry: now + delay,
            }
        };

        entries.insert(
            key,
            RetryEntry {
                candidate,
                state: state.clone(),
            },
        );
        state
    }

    /// Forget the key after it came back to life.
    pub fn record_success(&self, key: &ProxyKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Candidates whose retry time has come.
    ///
    /// They stay in the book until a success or failure is recorded for them.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Candidate> {
        self.entries
            .lock()
            .values()
            .filter(|entry| {
                matches!(entry.state, RetryState::Scheduled { next_retry, .. } if next_retry <= now)
            })
            .map(|entry| entry.candidate.clone())
            .collect()
    }

    pub fn state(&self, key: &ProxyKey) -> Option<RetryState> {
        self.entries.lock().get(key).map(|e| e.state.clone())
    }

    pub fn is_blacklisted(&self, key: &ProxyKey) -> bool {
        matches!(self.state(key), Some(RetryState::Blacklisted { .. }))
    }

    pub fn stats(&self) -> RetryStats {
        let entries = self.entries.lock();
        let blacklisted = entries
            .values()
            .filter(|e| matches!(e.state, RetryState::Blacklisted { .. }))
            .count();
        RetryStats {
            scheduled: entries.len() - blacklisted,
            blacklisted,
        }
    }
}
