//! Scripted probe transport shared by unit tests

use crate::proxy::checker::{ProbeResponse, ProbeTransport};
use crate::proxy::models::FailureReason;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Responder = dyn Fn(&str, &str) -> Result<ProbeResponse, FailureReason> + Send + Sync;

pub struct MockTransport {
    responder: Box<Responder>,
    delay: Option<Duration>,
    hang_on: Vec<String>,
    calls: AtomicUsize,
    proxies: Mutex<HashSet<String>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<ProbeResponse, FailureReason> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            hang_on: Vec::new(),
            calls: AtomicUsize::new(0),
            proxies: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Never answer for proxy URLs containing `needle`.
    pub fn with_hang_on(mut self, needle: &str) -> Self {
        self.hang_on.push(needle.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of distinct proxy URLs that were dialled
    pub fn distinct_proxies(&self) -> usize {
        self.proxies.lock().len()
    }
}

#[async_trait]
impl ProbeTransport for MockTransport {
    async fn get(
        &self,
        proxy_url: &str,
        target_url: &str,
        _timeout: Duration,
    ) -> Result<ProbeResponse, FailureReason> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.proxies.lock().insert(proxy_url.to_string());

        if self.hang_on.iter().any(|needle| proxy_url.contains(needle.as_str())) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(proxy_url, target_url)
    }
}
