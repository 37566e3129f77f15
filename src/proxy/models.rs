//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Every protocol, in the order mixed sources are tried.
    pub const ALL: [ProxyType; 4] = [
        ProxyType::Http,
        ProxyType::Https,
        ProxyType::Socks4,
        ProxyType::Socks5,
    ];

    /// Guess a protocol from well-known proxy ports. Unknown ports are http.
    pub fn from_port(port: u16) -> Self {
        match port {
            80 | 8080 | 3128 => ProxyType::Http,
            443 | 8443 => ProxyType::Https,
            1080 | 1081 => ProxyType::Socks5,
            1090 | 4145 => ProxyType::Socks4,
            _ => ProxyType::Http,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown proxy protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for ProxyType {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

/// Proxy authentication credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

/// Identity of a proxy in the pool; the protocol is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyKey {
    pub host: String,
    pub port: u16,
}

impl ProxyKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which protocols a candidate gets probed with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TestPolicy {
    /// Only the declared protocol (categorized sources).
    #[default]
    Declared,
    /// The given set, declared protocol first (mixed sources).
    Mixed(Vec<ProxyType>),
}

impl TestPolicy {
    pub fn mixed() -> Self {
        TestPolicy::Mixed(ProxyType::ALL.to_vec())
    }
}

/// Format the `protocol://[user:pass@]host:port` URL used to dial a proxy.
fn proxy_url(protocol: ProxyType, host: &str, port: u16, auth: Option<&ProxyAuth>) -> String {
    let auth_part = auth.map_or(String::new(), |auth| {
        format!("{}:{}@", auth.username, auth.password)
    });

    format!("{}://{}{}:{}", protocol, auth_part, host, port)
}

/// A parsed, not yet verified proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
    /// Protocol hinted by the source or the port; `None` when unknown.
    pub declared: Option<ProxyType>,
    /// Ordered, non-empty, duplicate-free list of protocols to try.
    pub test_protocols: Vec<ProxyType>,
}

impl Candidate {
    /// Create a candidate without authentication.
    ///
    /// A known declared protocol is the only one tested; an unknown one
    /// means every protocol is tried.
    pub fn new(host: String, port: u16, declared: Option<ProxyType>) -> Self {
        let test_protocols = match declared {
            Some(protocol) => vec![protocol],
            None => ProxyType::ALL.to_vec(),
        };

        Self {
            host,
            port,
            auth: None,
            declared,
            test_protocols,
        }
    }

    pub fn with_auth(mut self, username: String, password: String) -> Self {
        self.auth = Some(ProxyAuth::new(username, password));
        self
    }

    /// Apply a source's test policy.
    ///
    /// For mixed sources the declared protocol (if it is part of the set) is
    /// tried first, followed by the rest of the set in its given order.
    pub fn with_policy(mut self, policy: &TestPolicy) -> Self {
        if let TestPolicy::Mixed(set) = policy {
            let mut protocols = Vec::with_capacity(set.len());
            if let Some(declared) = self.declared.filter(|d| set.contains(d)) {
                protocols.push(declared);
            }
            for protocol in set {
                if !protocols.contains(protocol) {
                    protocols.push(*protocol);
                }
            }
            if !protocols.is_empty() {
                self.test_protocols = protocols;
            }
        }
        self
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey::new(self.host.clone(), self.port)
    }

    pub fn proxy_url(&self, protocol: ProxyType) -> String {
        proxy_url(protocol, &self.host, self.port, self.auth.as_ref())
    }

    /// Get the candidate string in IP:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the candidate string in USER:PASS@IP:PORT format when credentialed
    pub fn to_full_string(&self) -> String {
        match &self.auth {
            Some(auth) => format!(
                "{}:{}@{}:{}",
                auth.username, auth.password, self.host, self.port
            ),
            None => self.to_simple_string(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let protocols: Vec<&str> = self.test_protocols.iter().map(|p| p.scheme()).collect();
        write!(f, "{} [{}]", self.to_simple_string(), protocols.join(","))
    }
}

/// Why a probe failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FailureReason {
    #[error("timed out")]
    Timeout,
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("unexpected HTTP status {0}")]
    BadStatus(u16),
    #[error("unreadable response: {0}")]
    ParseError(String),
}

impl FailureReason {
    pub fn category(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::ConnectionError(_) => "connection-error",
            FailureReason::BadStatus(_) => "bad-status",
            FailureReason::ParseError(_) => "parse-error",
        }
    }
}

/// A proxy that passed a probe and is kept in the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveProxy {
    pub host: String,
    pub port: u16,
    /// The protocol that actually worked.
    pub protocol: ProxyType,
    pub auth: Option<ProxyAuth>,
    pub latency_ms: u64,
    /// Exit IP as reported by an IP-echo target, if one answered.
    pub external_ip: Option<String>,
    /// ISO country code of the exit IP, when geo tagging is enabled.
    pub country: Option<String>,
    pub verified_at: DateTime<Utc>,
}

impl LiveProxy {
    pub fn from_candidate(
        candidate: &Candidate,
        protocol: ProxyType,
        latency_ms: u64,
        external_ip: Option<String>,
    ) -> Self {
        Self {
            host: candidate.host.clone(),
            port: candidate.port,
            protocol,
            auth: candidate.auth.clone(),
            latency_ms,
            external_ip,
            country: None,
            verified_at: Utc::now(),
        }
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey::new(self.host.clone(), self.port)
    }

    pub fn url(&self) -> String {
        proxy_url(self.protocol, &self.host, self.port, self.auth.as_ref())
    }

    /// Turn the entry back into a candidate that re-tests only its working protocol.
    pub fn to_candidate(&self) -> Candidate {
        Candidate {
            host: self.host.clone(),
            port: self.port,
            auth: self.auth.clone(),
            declared: Some(self.protocol),
            test_protocols: vec![self.protocol],
        }
    }
}

impl fmt::Display for LiveProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}ms)", self.url(), self.latency_ms)
    }
}

/// Outcome of probing one candidate
#[derive(Debug, Clone)]
pub enum Verdict {
    Live(LiveProxy),
    Dead {
        candidate: Candidate,
        reason: FailureReason,
    },
}

impl Verdict {
    pub fn dead(candidate: Candidate, reason: FailureReason) -> Self {
        Verdict::Dead { candidate, reason }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Verdict::Live(_))
    }

    pub fn key(&self) -> ProxyKey {
        match self {
            Verdict::Live(entry) => entry.key(),
            Verdict::Dead { candidate, .. } => candidate.key(),
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            Verdict::Live(_) => None,
            Verdict::Dead { reason, .. } => Some(reason),
        }
    }
}
