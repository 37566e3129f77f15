//! Proxy checker module for probing candidates through real outbound requests

use crate::proxy::geo::GeoLocator;
use crate::proxy::models::{Candidate, FailureReason, LiveProxy, Verdict};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default timeout for a single probe request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 8;

/// Default user agent for probe requests
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Probe response bodies beyond this are cut before IP extraction
const MAX_BODY_CHARS: usize = 4096;

/// Status codes that still prove a working tunnel on reachability targets
const REACHABILITY_STATUSES: [u16; 4] = [200, 401, 403, 404];

static IPV4_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b").expect("Invalid IPv4 regex")
});

/// An endpoint requested through a proxy to prove it forwards traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub url: String,
    pub accepted: Vec<u16>,
    /// Whether the body carries the caller's IP address
    pub echoes_ip: bool,
}

impl ProbeTarget {
    /// An IP-echo endpoint; only a 200 counts.
    pub fn ip_echo(url: &str) -> Self {
        Self {
            url: url.to_string(),
            accepted: vec![200],
            echoes_ip: true,
        }
    }

    /// An endpoint where any well-formed rejection still proves the tunnel works.
    pub fn reachability(url: &str) -> Self {
        Self {
            url: url.to_string(),
            accepted: REACHABILITY_STATUSES.to_vec(),
            echoes_ip: false,
        }
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.accepted.contains(&status)
    }

    pub fn defaults() -> Vec<ProbeTarget> {
        vec![
            ProbeTarget::ip_echo("https://api.ipify.org?format=text"),
            ProbeTarget::reachability("https://api.github.com/user"),
            ProbeTarget::ip_echo("http://httpbin.org/ip"),
        ]
    }
}

/// Status and body of a response received through a proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Performs a GET through a proxy
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn get(
        &self,
        proxy_url: &str,
        target_url: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, FailureReason>;
}

/// Production transport backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }

    /// Create a reqwest client dialling the given proxy
    fn create_client(&self, proxy_url: &str, timeout: Duration) -> Result<Client, FailureReason> {
        // Lists mean a CONNECT-capable plain proxy by "https", not TLS to the proxy.
        let dial_url = match proxy_url.strip_prefix("https://") {
            Some(rest) => format!("http://{}", rest),
            None => proxy_url.to_string(),
        };

        let reqwest_proxy = ReqwestProxy::all(&dial_url)
            .map_err(|e| FailureReason::ConnectionError(format!("invalid proxy url: {}", e)))?;

        Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| FailureReason::ConnectionError(format!("client build failed: {}", e)))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

fn classify(error: &reqwest::Error) -> FailureReason {
    if error.is_timeout() {
        FailureReason::Timeout
    } else if error.is_body() || error.is_decode() {
        FailureReason::ParseError(error.to_string())
    } else {
        FailureReason::ConnectionError(error.to_string())
    }
}

#[async_trait]
impl ProbeTransport for ReqwestTransport {
    async fn get(
        &self,
        proxy_url: &str,
        target_url: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, FailureReason> {
        let client = self.create_client(proxy_url, timeout)?;
        let response = client
            .get(target_url)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(&e))?;
        Ok(ProbeResponse::new(
            status,
            body.chars().take(MAX_BODY_CHARS).collect::<String>(),
        ))
    }
}

/// Pull the caller's IP out of an IP-echo body.
///
/// Understands plain-text bodies and JSON objects with an `origin`, `ip` or
/// `query` field; comma lists (chained proxies) yield their first address.
pub fn extract_ip(body: &str) -> Option<String> {
    let body = body.trim();

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        let field = ["origin", "ip", "query"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()));
        if let Some(value) = field {
            let first = value.split(',').next().unwrap_or(value).trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }

    IPV4_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each probe request
    pub timeout: Duration,
    /// Targets tried in order for every protocol
    pub targets: Vec<ProbeTarget>,
    pub user_agent: String,
    /// Path to MMDB file for geolocation (optional)
    pub mmdb_path: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            targets: ProbeTarget::defaults(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            mmdb_path: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_targets(mut self, targets: Vec<ProbeTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// Proxy checker that turns a candidate into a verdict
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    transport: Arc<dyn ProbeTransport>,
    geo_locator: Option<GeoLocator>,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        let transport = Arc::new(ReqwestTransport::new(&config.user_agent));
        Self::with_transport(config, transport)
    }

    /// Create a checker over a custom transport
    pub fn with_transport(config: CheckerConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        let geo_locator = config
            .mmdb_path
            .as_ref()
            .and_then(|path| match GeoLocator::from_path(path) {
                Ok(locator) => Some(locator),
                Err(e) => {
                    warn!("Geo tagging disabled, cannot open {}: {}", path, e);
                    None
                }
            });

        Self {
            config,
            transport,
            geo_locator,
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe a single candidate.
    ///
    /// Protocols are tried in order and targets in order within a protocol;
    /// the first accepted response wins. Any failure, rejected status or
    /// broken transport, moves on to the next target; a protocol fails only
    /// once every target has failed through it.
    pub async fn probe(&self, candidate: Candidate) -> Verdict {
        let mut last_failure = None;

        for &protocol in &candidate.test_protocols {
            let proxy_url = candidate.proxy_url(protocol);
            let start = Instant::now();

            for target in &self.config.targets {
                let outcome = tokio::time::timeout(
                    self.config.timeout,
                    self.transport.get(&proxy_url, &target.url, self.config.timeout),
                )
                .await
                .unwrap_or(Err(FailureReason::Timeout));

                let reason = match outcome {
                    Ok(response) if target.accepts(response.status) => {
                        let latency_ms = start.elapsed().as_millis() as u64;
                        let external_ip = if target.echoes_ip {
                            extract_ip(&response.body)
                        } else {
                            None
                        };
                        debug!(
                            "{} is live via {} ({} -> HTTP {}, {}ms)",
                            candidate.key(),
                            protocol,
                            target.url,
                            response.status,
                            latency_ms
                        );

                        let entry =
                            LiveProxy::from_candidate(&candidate, protocol, latency_ms, external_ip);
                        let entry = match &self.geo_locator {
                            Some(geo) => geo.tag(entry),
                            None => entry,
                        };
                        return Verdict::Live(entry);
                    }
                    Ok(response) => FailureReason::BadStatus(response.status),
                    Err(reason) => reason,
                };

                trace!("{} via {} failed on {}: {}", candidate.key(), protocol, target.url, reason);
                last_failure = Some(reason);
            }
        }

        let reason = last_failure
            .unwrap_or_else(|| FailureReason::ConnectionError("nothing to probe".to_string()));
        Verdict::dead(candidate, reason)
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}
