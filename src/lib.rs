//! Live Proxy Pool - harvests, validates and serves working proxies
//!
//! Raw endpoints are pulled from public proxy-list feeds, probed through real
//! outbound requests with bounded concurrency, and kept in a shared pool that
//! is re-validated and replenished as proxies die.

pub mod logging;
pub mod pool;
pub mod proxy;
pub mod scheduler;

pub use pool::{PoolStats, ProxyPool, RetryBook, RetryPolicy};
pub use proxy::*;
pub use scheduler::{CycleReport, Mode, Scheduler, SchedulerConfig};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
