//! Proxy module for parsing, fetching and checking proxies
//!
//! This module provides functionality for:
//! - Parsing proxies from various formats (IP:PORT, USER:PASS@IP:PORT, IP:PORT:USER:PASS, etc.)
//! - Fetching raw proxy lists from public feeds
//! - Probing candidates under protocol uncertainty
//! - Validating large batches with bounded concurrency

pub mod checker;
pub mod crawler;
pub mod geo;
pub mod models;
pub mod parser;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use checker::{CheckerConfig, ProbeTarget, ProbeTransport, ProxyChecker, ReqwestTransport};
pub use crawler::{
    CandidateSource, CrawlerConfig, ProxyCrawler, ProxySource, SourceBatch, SourceProtocol,
};
pub use geo::GeoLocator;
pub use models::{
    Candidate, FailureReason, LiveProxy, ProxyAuth, ProxyKey, ProxyType, TestPolicy, Verdict,
};
pub use parser::{ParseError, ProtocolHint, ProxyParser, QualityFilter};
pub use validator::{BatchReport, ValidationEngine, ValidatorConfig};
