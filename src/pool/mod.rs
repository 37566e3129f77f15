//! Shared store of live proxies
//!
//! Every pool mutation goes through [`ProxyPool`]. Reads hand out copies so
//! callers can sort and serialize without holding the lock.

pub mod retry;

pub use retry::{RetryBook, RetryPolicy, RetryState, RetryStats};

use crate::proxy::models::{LiveProxy, ProxyKey, ProxyType};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct PoolState {
    entries: HashMap<ProxyKey, LiveProxy>,
    last_updated: Option<DateTime<Utc>>,
}

/// Health summary for serving layers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub fastest_ms: Option<u64>,
    pub median_ms: Option<u64>,
    pub by_protocol: Vec<(ProxyType, usize)>,
}

/// Cheaply cloneable handle to the live proxy pool
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    state: Arc<RwLock<PoolState>>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the proxy's `host:port`.
    ///
    /// Returns true when the key was not in the pool before.
    pub fn merge(&self, entry: LiveProxy) -> bool {
        let key = entry.key();
        let mut state = self.state.write();
        let previous = state.entries.insert(key, entry);
        state.last_updated = Some(Utc::now());
        previous.is_none()
    }

    pub fn remove(&self, key: &ProxyKey) -> Option<LiveProxy> {
        let mut state = self.state.write();
        let removed = state.entries.remove(key);
        if removed.is_some() {
            state.last_updated = Some(Utc::now());
        }
        removed
    }

    pub fn get(&self, key: &ProxyKey) -> Option<LiveProxy> {
        self.state.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &ProxyKey) -> bool {
        self.state.read().entries.contains_key(key)
    }

    /// Point-in-time copy of every entry, in no particular order
    pub fn snapshot(&self) -> Vec<LiveProxy> {
        self.state.read().entries.values().cloned().collect()
    }

    /// The `n` fastest entries, fastest first
    pub fn ranked_top(&self, n: usize) -> Vec<LiveProxy> {
        let mut entries = self.snapshot();
        entries.sort_by(|a, b| {
            a.latency_ms
                .cmp(&b.latency_ms)
                .then_with(|| a.key().cmp(&b.key()))
        });
        entries.truncate(n);
        entries
    }

    pub fn size(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// When the pool last changed; `None` if it never has
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_updated
    }

    pub fn stats(&self) -> PoolStats {
        let (mut latencies, protocols, last_updated) = {
            let state = self.state.read();
            let latencies: Vec<u64> = state.entries.values().map(|e| e.latency_ms).collect();
            let protocols: Vec<ProxyType> = state.entries.values().map(|e| e.protocol).collect();
            (latencies, protocols, state.last_updated)
        };
        latencies.sort_unstable();

        let by_protocol = ProxyType::ALL
            .iter()
            .map(|p| (*p, protocols.iter().filter(|q| *q == p).count()))
            .filter(|(_, count)| *count > 0)
            .collect();

        PoolStats {
            size: latencies.len(),
            last_updated,
            fastest_ms: latencies.first().copied(),
            median_ms: latencies.get(latencies.len() / 2).copied(),
            by_protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Candidate;

    fn entry(host: &str, port: u16, protocol: ProxyType, latency_ms: u64) -> LiveProxy {
        let candidate = Candidate::new(host.to_string(), port, Some(protocol));
        LiveProxy::from_candidate(&candidate, protocol, latency_ms, None)
    }

    #[test]
    fn test_merge_is_idempotent_and_last_wins() {
        let pool = ProxyPool::new();
        assert!(pool.last_updated().is_none());

        assert!(pool.merge(entry("1.1.1.1", 8080, ProxyType::Http, 300)));
        assert!(!pool.merge(entry("1.1.1.1", 8080, ProxyType::Socks5, 120)));

        assert_eq!(pool.size(), 1);
        let stored = pool.get(&ProxyKey::new("1.1.1.1", 8080)).unwrap();
        assert_eq!(stored.protocol, ProxyType::Socks5);
        assert_eq!(stored.latency_ms, 120);
        assert!(pool.last_updated().is_some());
    }

    #[test]
    fn test_concurrent_merges_of_one_key() {
        let pool = ProxyPool::new();
        std::thread::scope(|scope| {
            for i in 0..16u64 {
                let pool = pool.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        pool.merge(entry("2.2.2.2", 3128, ProxyType::Http, i));
                    }
                });
            }
        });

        assert_eq!(pool.size(), 1);
        assert!(pool.get(&ProxyKey::new("2.2.2.2", 3128)).unwrap().latency_ms < 16);
    }

    #[test]
    fn test_ranked_top_orders_and_truncates() {
        let pool = ProxyPool::new();
        for (i, latency) in [500u64, 20, 300, 20, 90].iter().enumerate() {
            pool.merge(entry("3.3.3.3", 8000 + i as u16, ProxyType::Http, *latency));
        }

        let top = pool.ranked_top(3);
        let latencies: Vec<u64> = top.iter().map(|e| e.latency_ms).collect();
        assert_eq!(latencies, vec![20, 20, 90]);

        assert_eq!(pool.ranked_top(50).len(), 5);
        assert!(pool.ranked_top(0).is_empty());
        assert!(pool
            .ranked_top(5)
            .windows(2)
            .all(|w| w[0].latency_ms <= w[1].latency_ms));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let pool = ProxyPool::new();
        pool.merge(entry("4.4.4.4", 80, ProxyType::Http, 10));
        let snapshot = pool.snapshot();
        pool.remove(&ProxyKey::new("4.4.4.4", 80));

        assert_eq!(snapshot.len(), 1);
        assert!(pool.is_empty());
        assert!(pool.remove(&ProxyKey::new("4.4.4.4", 80)).is_none());
    }

    #[test]
    fn test_stats() {
        let pool = ProxyPool::new();
        assert_eq!(pool.stats().size, 0);
        assert_eq!(pool.stats().fastest_ms, None);

        pool.merge(entry("5.5.5.5", 80, ProxyType::Http, 40));
        pool.merge(entry("5.5.5.6", 80, ProxyType::Socks5, 10));
        pool.merge(entry("5.5.5.7", 80, ProxyType::Http, 70));

        let stats = pool.stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.fastest_ms, Some(10));
        assert_eq!(stats.median_ms, Some(40));
        assert_eq!(
            stats.by_protocol,
            vec![(ProxyType::Http, 2), (ProxyType::Socks5, 1)]
        );
    }
}
