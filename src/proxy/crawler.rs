//! Proxy crawler module for fetching raw candidate lines from proxy-list feeds
//!
//! This module provides functionality for:
//! - Describing feeds and the protocol policy their entries get tested with
//! - Loading feed definitions from a text file
//! - Downloading feeds and extracting `host:port` lines from text or HTML

use crate::proxy::models::{ProxyType, TestPolicy};
use crate::proxy::parser::{ProtocolHint, ProxyParser};
use crate::Result;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Feeds downloaded at the same time
const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Regex pattern to match IP:PORT patterns in text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// What a feed says about the protocol of its entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceProtocol {
    /// Every entry speaks this protocol.
    Categorized(ProxyType),
    /// Entries may speak any protocol of the set.
    Mixed(Vec<ProxyType>),
}

impl SourceProtocol {
    pub fn mixed() -> Self {
        SourceProtocol::Mixed(ProxyType::ALL.to_vec())
    }

    /// How lines from this feed are parsed
    pub fn hint(&self) -> ProtocolHint {
        match self {
            SourceProtocol::Categorized(protocol) => ProtocolHint::Declared(*protocol),
            SourceProtocol::Mixed(_) => ProtocolHint::Auto,
        }
    }

    /// Which protocols entries from this feed are probed with
    pub fn policy(&self) -> TestPolicy {
        match self {
            SourceProtocol::Categorized(_) => TestPolicy::Declared,
            SourceProtocol::Mixed(set) if set.is_empty() => TestPolicy::mixed(),
            SourceProtocol::Mixed(set) => TestPolicy::Mixed(set.clone()),
        }
    }
}

impl fmt::Display for SourceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceProtocol::Categorized(protocol) => write!(f, "{}", protocol),
            SourceProtocol::Mixed(set) => {
                let names: Vec<&str> = set.iter().map(|p| p.scheme()).collect();
                write!(f, "mixed:{}", names.join(","))
            }
        }
    }
}

impl FromStr for SourceProtocol {
    type Err = anyhow::Error;

    /// Accepts `http`, `socks5`, ..., `mixed` or `mixed:http,socks5`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.split_once(':') {
            None if s == "mixed" => Ok(SourceProtocol::mixed()),
            None => Ok(SourceProtocol::Categorized(s.parse()?)),
            Some(("mixed", list)) => {
                let mut set = Vec::new();
                for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    let protocol: ProxyType = name.parse()?;
                    if !set.contains(&protocol) {
                        set.push(protocol);
                    }
                }
                Ok(SourceProtocol::Mixed(set))
            }
            Some(_) => Err(anyhow!("invalid source protocol '{}'", s)),
        }
    }
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Feeds downloaded at the same time
    pub concurrency: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// A proxy-list feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    /// Name of the proxy source
    pub name: String,
    /// URL to fetch proxies from
    pub url: String,
    pub protocol: SourceProtocol,
}

impl ProxySource {
    pub fn new(name: &str, url: &str, protocol: SourceProtocol) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            protocol,
        }
    }

    pub fn categorized(name: &str, url: &str, protocol: ProxyType) -> Self {
        Self::new(name, url, SourceProtocol::Categorized(protocol))
    }

    /// Parse one line of a sources file: `<protocol|mixed[:p1,p2]> <url> [name]`.
    ///
    /// Blank lines and `#` comments yield `None`. Without a name the URL is
    /// used as one.
    pub fn from_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut fields = line.split_whitespace();
        let protocol: SourceProtocol = fields
            .next()
            .ok_or_else(|| anyhow!("empty source line"))?
            .parse()?;
        let url = fields
            .next()
            .ok_or_else(|| anyhow!("source line '{}' has no url", line))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(anyhow!("source url '{}' is not http(s)", url));
        }
        let name = fields.next().unwrap_or(url);

        Ok(Some(Self::new(name, url, protocol)))
    }

    /// Load every source from a sources file
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read sources file {}", path.display()))?;

        let mut sources = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let source = Self::from_line(line)
                .with_context(|| format!("{}:{}", path.display(), number + 1))?;
            sources.extend(source);
        }
        Ok(sources)
    }
}

/// Raw lines from one feed, with the protocol policy they carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBatch {
    pub source: String,
    pub lines: Vec<String>,
    pub protocol: SourceProtocol,
}

/// Supplier of raw candidate lines
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Fetch every configured feed. Feeds that fail contribute no lines.
    async fn fetch(&self) -> Vec<SourceBatch>;
}

/// Proxy crawler for fetching proxy lists from websites
pub struct ProxyCrawler {
    config: CrawlerConfig,
    client: Client,
    sources: Vec<ProxySource>,
}

impl ProxyCrawler {
    /// Create a crawler over the built-in feeds
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default(), Self::get_common_sources())
    }

    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig, sources: Vec<ProxySource>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            config,
            client,
            sources,
        })
    }

    pub fn sources(&self) -> &[ProxySource] {
        &self.sources
    }

    /// Download a feed and extract its candidate lines
    pub async fn crawl_source(&self, source: &ProxySource) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&source.url)
            .send()
            .await?
            .error_for_status()?;
        let content = response.text().await?;
        Ok(Self::extract_lines(&content))
    }

    /// Pull candidate lines out of raw feed content
    ///
    /// This method tries multiple parsing strategies:
    /// 1. Line-by-line, keeping every line the parser accepts
    /// 2. Regex-based IP:PORT extraction, for HTML and other markup
    pub fn extract_lines(content: &str) -> Vec<String> {
        let lines: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| ProxyParser::parse_line(line, ProtocolHint::Unknown).is_ok())
            .map(str::to_string)
            .collect();

        if !lines.is_empty() {
            return lines;
        }

        Self::extract_with_regex(content)
    }

    /// Extract `ip:port` strings using regex pattern matching
    fn extract_with_regex(content: &str) -> Vec<String> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str();
                let port: u16 = cap.get(2)?.as_str().parse().ok()?;

                // Validate IP address parts
                if host.split('.').any(|part| part.parse::<u8>().is_err()) {
                    return None;
                }
                if port == 0 {
                    return None;
                }

                Some(format!("{}:{}", host, port))
            })
            .collect()
    }

    /// Built-in public proxy-list feeds
    pub fn get_common_sources() -> Vec<ProxySource> {
        vec![
            ProxySource::categorized(
                "databay-http",
                "https://cdn.jsdelivr.net/gh/databay-labs/free-proxy-list/http.txt",
                ProxyType::Http,
            ),
            ProxySource::categorized(
                "databay-https",
                "https://cdn.jsdelivr.net/gh/databay-labs/free-proxy-list/https.txt",
                ProxyType::Https,
            ),
            ProxySource::categorized(
                "databay-socks5",
                "https://cdn.jsdelivr.net/gh/databay-labs/free-proxy-list/socks5.txt",
                ProxyType::Socks5,
            ),
            ProxySource::categorized(
                "iplocate-http",
                "https://raw.githubusercontent.com/iplocate/free-proxy-list/main/protocols/http.txt",
                ProxyType::Http,
            ),
            ProxySource::categorized(
                "iplocate-socks4",
                "https://raw.githubusercontent.com/iplocate/free-proxy-list/main/protocols/socks4.txt",
                ProxyType::Socks4,
            ),
            ProxySource::categorized(
                "iplocate-socks5",
                "https://raw.githubusercontent.com/iplocate/free-proxy-list/main/protocols/socks5.txt",
                ProxyType::Socks5,
            ),
            ProxySource::categorized(
                "monosans-http",
                "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
                ProxyType::Http,
            ),
            ProxySource::categorized(
                "thespeedx-socks5",
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
                ProxyType::Socks5,
            ),
            ProxySource::new(
                "hendrikbgr-mixed",
                "https://raw.githubusercontent.com/hendrikbgr/Free-Proxy-Repo/master/proxy_list.txt",
                SourceProtocol::mixed(),
            ),
            ProxySource::new(
                "mrmarble-mixed",
                "https://raw.githubusercontent.com/MrMarble/proxy-list/main/all.txt",
                SourceProtocol::mixed(),
            ),
        ]
    }
}

#[async_trait]
impl CandidateSource for ProxyCrawler {
    async fn fetch(&self) -> Vec<SourceBatch> {
        let batches: Vec<SourceBatch> = stream::iter(self.sources.iter().cloned())
            .map(|source| async move {
                let lines = match self.crawl_source(&source).await {
                    Ok(lines) => {
                        debug!("{}: {} lines", source.name, lines.len());
                        lines
                    }
                    Err(e) => {
                        warn!("Failed to fetch {} ({}): {:#}", source.name, source.url, e);
                        Vec::new()
                    }
                };
                SourceBatch {
                    source: source.name,
                    lines,
                    protocol: source.protocol,
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let total: usize = batches.iter().map(|b| b.lines.len()).sum();
        info!("Fetched {} raw lines from {} sources", total, batches.len());
        batches
    }
}
