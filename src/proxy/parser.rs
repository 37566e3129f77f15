//! Proxy parser module for turning raw proxy-list lines into candidates

use crate::proxy::models::{Candidate, ProxyKey, ProxyType, TestPolicy, UnknownProtocol};
use crate::Result;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Scheme prefixes stripped from raw lines, with the protocol they imply
const SCHEME_PREFIXES: [(&str, ProxyType); 4] = [
    ("http://", ProxyType::Http),
    ("https://", ProxyType::Https),
    ("socks4://", ProxyType::Socks4),
    ("socks5://", ProxyType::Socks5),
];

/// Host prefixes that can never be usable public proxies
const PRIVATE_PREFIXES: [&str; 4] = ["127.", "10.", "192.168.", "172."];

/// How to decide the declared protocol of a parsed line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolHint {
    /// Use the scheme prefix if present, otherwise the port heuristic.
    #[default]
    Auto,
    /// Nothing is known; every protocol will be tested.
    Unknown,
    /// The source documents the protocol.
    Declared(ProxyType),
}

impl FromStr for ProtocolHint {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ProtocolHint::Auto),
            "unknown" | "mixed" => Ok(ProtocolHint::Unknown),
            other => other.parse().map(ProtocolHint::Declared),
        }
    }
}

/// Reasons a line is not a usable candidate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("blank or comment line")]
    Blank,
    #[error("no port separator in '{0}'")]
    MissingPort(String),
    #[error("port '{0}' is not numeric")]
    InvalidPort(String),
    #[error("port {0} is outside 1-65535")]
    PortOutOfRange(u64),
    #[error("empty host")]
    EmptyHost,
    #[error("host '{0}' contains whitespace")]
    InvalidHost(String),
    #[error("host '{0}' is private or loopback")]
    PrivateHost(String),
    #[error("host '{0}' has no dot")]
    UndottedHost(String),
}

/// Post-parse filter that rejects hosts no public proxy can have
#[derive(Debug, Clone)]
pub struct QualityFilter {
    pub reject_private: bool,
    /// Reject dot-less hostnames instead of merely ordering them last.
    pub require_dotted_host: bool,
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self {
            reject_private: true,
            require_dotted_host: false,
        }
    }
}

impl QualityFilter {
    /// A filter that lets everything through
    pub fn permissive() -> Self {
        Self {
            reject_private: false,
            require_dotted_host: false,
        }
    }

    pub fn is_private_host(host: &str) -> bool {
        PRIVATE_PREFIXES.iter().any(|prefix| host.starts_with(prefix))
    }

    pub fn check(&self, candidate: &Candidate) -> std::result::Result<(), ParseError> {
        if self.reject_private && Self::is_private_host(&candidate.host) {
            return Err(ParseError::PrivateHost(candidate.host.clone()));
        }
        if self.require_dotted_host && !candidate.host.contains('.') {
            return Err(ParseError::UndottedHost(candidate.host.clone()));
        }
        Ok(())
    }
}

/// Candidates parsed from one source batch
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub candidates: Vec<Candidate>,
    /// Lines that failed parsing or the quality filter (blank lines excluded)
    pub rejected: usize,
    pub duplicates: usize,
}

/// Proxy parser for parsing proxies from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - USER:PASS@IP:PORT
    /// - IP:PORT:USER:PASS
    /// - scheme://IP:PORT
    /// - scheme://USER:PASS@IP:PORT
    pub fn parse_line(line: &str, hint: ProtocolHint) -> std::result::Result<Candidate, ParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Err(ParseError::Blank);
        }

        let (scheme_type, rest) = Self::strip_scheme(line);
        let rest = rest.trim_end_matches('/');

        let (auth, host_port) = match rest.rsplit_once('@') {
            Some((auth, host_port)) => (Some(Self::split_auth(auth)), host_port),
            None => (None, rest),
        };

        let (host, port, auth) = match Self::split_colon_auth(host_port) {
            Some((host, port, user, pass)) if auth.is_none() => {
                (host, port, Some((user.to_string(), pass.to_string())))
            }
            _ => {
                let (host, port) = host_port
                    .rsplit_once(':')
                    .ok_or_else(|| ParseError::MissingPort(line.to_string()))?;
                (host, port, auth)
            }
        };

        let host = host.trim();
        if host.is_empty() {
            return Err(ParseError::EmptyHost);
        }
        if host.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidHost(host.to_string()));
        }
        let port = Self::parse_port(port)?;

        let declared = match hint {
            ProtocolHint::Auto => Some(scheme_type.unwrap_or_else(|| ProxyType::from_port(port))),
            ProtocolHint::Unknown => None,
            ProtocolHint::Declared(protocol) => Some(protocol),
        };

        let candidate = Candidate::new(host.to_string(), port, declared);
        Ok(match auth {
            Some((username, password)) if !username.is_empty() => {
                candidate.with_auth(username, password)
            }
            _ => candidate,
        })
    }

    fn strip_scheme(line: &str) -> (Option<ProxyType>, &str) {
        for (prefix, protocol) in SCHEME_PREFIXES {
            match line.get(..prefix.len()) {
                Some(head) if head.eq_ignore_ascii_case(prefix) => {
                    return (Some(protocol), &line[prefix.len()..]);
                }
                _ => {}
            }
        }
        (None, line)
    }

    fn split_auth(auth: &str) -> (String, String) {
        match auth.split_once(':') {
            Some((user, pass)) => (user.to_string(), pass.to_string()),
            None => (auth.to_string(), String::new()),
        }
    }

    /// Recognise the IP:PORT:USER:PASS layout.
    fn split_colon_auth(host_port: &str) -> Option<(&str, &str, &str, &str)> {
        let parts: Vec<&str> = host_port.split(':').collect();
        match parts.as_slice() {
            [host, port, user, pass]
                if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
            {
                Some((host, port, user, pass))
            }
            _ => None,
        }
    }

    fn parse_port(port: &str) -> std::result::Result<u16, ParseError> {
        let port = port.trim();
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidPort(port.to_string()));
        }
        let value: u64 = port
            .parse()
            .map_err(|_| ParseError::InvalidPort(port.to_string()))?;
        match u16::try_from(value) {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ParseError::PortOutOfRange(value)),
        }
    }

    /// Parse a whole source batch.
    ///
    /// Applies the test policy and quality filter, drops repeated `host:port`
    /// keys and orders dot-less hosts after dotted ones.
    pub fn parse_lines<I, S>(
        lines: I,
        hint: ProtocolHint,
        policy: &TestPolicy,
        filter: &QualityFilter,
    ) -> ParsedBatch
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut batch = ParsedBatch::default();
        let mut seen: HashSet<ProxyKey> = HashSet::new();
        let mut undotted = Vec::new();

        for line in lines {
            let line = line.as_ref();
            let candidate = match Self::parse_line(line, hint)
                .and_then(|c| filter.check(&c).map(|_| c))
            {
                Ok(candidate) => candidate.with_policy(policy),
                Err(ParseError::Blank) => continue,
                Err(e) => {
                    debug!("Skipping '{}': {}", line.trim(), e);
                    batch.rejected += 1;
                    continue;
                }
            };

            if !seen.insert(candidate.key()) {
                batch.duplicates += 1;
                continue;
            }

            if candidate.host.contains('.') {
                batch.candidates.push(candidate);
            } else {
                undotted.push(candidate);
            }
        }

        batch.candidates.extend(undotted);
        batch
    }

    /// Parse proxies from a string (multiple lines), skipping bad lines
    pub fn parse_string(content: &str, hint: ProtocolHint) -> Vec<Candidate> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, hint).ok())
            .collect()
    }

    /// Parse proxies from a file
    pub fn parse_file<P: AsRef<Path>>(path: P, hint: ProtocolHint) -> Result<Vec<Candidate>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content, hint))
    }

    /// Save candidates to a file, one per line
    pub fn save_to_file<P: AsRef<Path>>(
        candidates: &[Candidate],
        path: P,
        full_format: bool,
    ) -> Result<()> {
        let content: String = candidates
            .iter()
            .map(|c| {
                if full_format {
                    c.to_full_string()
                } else {
                    c.to_simple_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_auto_detects_socks5() {
        let candidate = ProxyParser::parse_line("1.2.3.4:1080", ProtocolHint::Auto).unwrap();
        assert_eq!(candidate.host, "1.2.3.4");
        assert_eq!(candidate.port, 1080);
        assert_eq!(candidate.declared, Some(ProxyType::Socks5));
        assert_eq!(candidate.test_protocols, vec![ProxyType::Socks5]);
    }

    #[test]
    fn test_parse_credentialed() {
        let candidate =
            ProxyParser::parse_line("alice:secret@5.6.7.8:8080", ProtocolHint::Auto).unwrap();
        assert_eq!(candidate.host, "5.6.7.8");
        assert_eq!(candidate.port, 8080);
        let auth = candidate.auth.unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "secret");
    }

    #[test]
    fn test_parse_user_without_password() {
        let candidate = ProxyParser::parse_line("alice@5.6.7.8:8080", ProtocolHint::Auto).unwrap();
        let auth = candidate.auth.unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "");
    }

    #[test]
    fn test_parse_colon_auth_format() {
        let candidate =
            ProxyParser::parse_line("5.6.7.8:3128:user:pass", ProtocolHint::Auto).unwrap();
        assert_eq!(candidate.host, "5.6.7.8");
        assert_eq!(candidate.port, 3128);
        assert_eq!(candidate.auth.unwrap().username, "user");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(
            ProxyParser::parse_line("not-a-proxy", ProtocolHint::Auto),
            Err(ParseError::MissingPort("not-a-proxy".to_string()))
        );
        assert!(matches!(
            ProxyParser::parse_line("1.2.3.4:abc", ProtocolHint::Auto),
            Err(ParseError::InvalidPort(_))
        ));
        assert_eq!(
            ProxyParser::parse_line("1.2.3.4:70000", ProtocolHint::Auto),
            Err(ParseError::PortOutOfRange(70000))
        );
        assert_eq!(
            ProxyParser::parse_line("1.2.3.4:0", ProtocolHint::Auto),
            Err(ParseError::PortOutOfRange(0))
        );
        assert_eq!(
            ProxyParser::parse_line(":8080", ProtocolHint::Auto),
            Err(ParseError::EmptyHost)
        );
        assert_eq!(
            ProxyParser::parse_line("Updated at: 12", ProtocolHint::Auto),
            Err(ParseError::InvalidHost("Updated at".to_string()))
        );
        assert_eq!(
            ProxyParser::parse_line("Last updated 2024-01-01 10:30", ProtocolHint::Auto),
            Err(ParseError::InvalidHost("Last updated 2024-01-01 10".to_string()))
        );
    }

    #[test]
    fn test_parse_blank_and_comment() {
        assert_eq!(ProxyParser::parse_line("  ", ProtocolHint::Auto), Err(ParseError::Blank));
        assert_eq!(
            ProxyParser::parse_line("# socks list", ProtocolHint::Auto),
            Err(ParseError::Blank)
        );
    }

    #[test]
    fn test_parse_strips_scheme() {
        let candidate =
            ProxyParser::parse_line("socks4://9.9.9.9:8080/", ProtocolHint::Auto).unwrap();
        assert_eq!(candidate.host, "9.9.9.9");
        assert_eq!(candidate.port, 8080);
        // the scheme beats the port heuristic
        assert_eq!(candidate.declared, Some(ProxyType::Socks4));

        let declared = ProxyParser::parse_line(
            "socks5://u:p@9.9.9.9:1080",
            ProtocolHint::Declared(ProxyType::Http),
        )
        .unwrap();
        assert_eq!(declared.declared, Some(ProxyType::Http));
        assert!(declared.auth.is_some());
    }

    #[test]
    fn test_parse_splits_on_last_colon() {
        let candidate = ProxyParser::parse_line("[2001:db8::1]:8080", ProtocolHint::Auto).unwrap();
        assert_eq!(candidate.host, "[2001:db8::1]");
        assert_eq!(candidate.port, 8080);
    }

    #[test]
    fn test_unknown_hint_tests_everything() {
        let candidate = ProxyParser::parse_line("1.2.3.4:8080", ProtocolHint::Unknown).unwrap();
        assert_eq!(candidate.declared, None);
        assert_eq!(candidate.test_protocols, ProxyType::ALL.to_vec());
    }

    #[test]
    fn test_protocol_hint_from_str() {
        assert_eq!("auto".parse::<ProtocolHint>(), Ok(ProtocolHint::Auto));
        assert_eq!("mixed".parse::<ProtocolHint>(), Ok(ProtocolHint::Unknown));
        assert_eq!(
            "socks4".parse::<ProtocolHint>(),
            Ok(ProtocolHint::Declared(ProxyType::Socks4))
        );
        assert!("gopher".parse::<ProtocolHint>().is_err());
    }

    #[test]
    fn test_quality_filter() {
        let filter = QualityFilter::default();
        for host in ["127.0.0.1", "10.1.1.1", "192.168.0.2", "172.16.5.5"] {
            let candidate = Candidate::new(host.to_string(), 8080, None);
            assert_eq!(
                filter.check(&candidate),
                Err(ParseError::PrivateHost(host.to_string()))
            );
        }
        let public = Candidate::new("8.8.4.4".to_string(), 8080, None);
        assert!(filter.check(&public).is_ok());

        let undotted = Candidate::new("proxyhost".to_string(), 8080, None);
        assert!(filter.check(&undotted).is_ok());
        let strict = QualityFilter {
            require_dotted_host: true,
            ..QualityFilter::default()
        };
        assert!(matches!(strict.check(&undotted), Err(ParseError::UndottedHost(_))));
    }

    #[test]
    fn test_parse_lines_filters_and_dedupes() {
        let lines = [
            "# comment",
            "",
            "1.1.1.1:8080",
            "proxyhost:3128",
            "2.2.2.2:1080",
            "1.1.1.1:8080",
            "http://1.1.1.1:8080",
            "192.168.1.1:8080",
            "garbage",
        ];
        let batch = ProxyParser::parse_lines(
            lines,
            ProtocolHint::Auto,
            &TestPolicy::mixed(),
            &QualityFilter::default(),
        );

        let keys: Vec<String> = batch.candidates.iter().map(|c| c.key().to_string()).collect();
        assert_eq!(keys, vec!["1.1.1.1:8080", "2.2.2.2:1080", "proxyhost:3128"]);
        assert_eq!(batch.duplicates, 2);
        assert_eq!(batch.rejected, 2);
        assert_eq!(batch.candidates[1].test_protocols[0], ProxyType::Socks5);
        assert_eq!(batch.candidates[1].test_protocols.len(), 4);
    }

    #[test]
    fn test_parse_string() {
        let content = r#"
8.8.8.8:8080
9.9.9.9:8080:user:pass
# This is a comment
http://4.4.4.4:8080
invalid
"#;
        let candidates = ProxyParser::parse_string(content, ProtocolHint::Auto);
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "8.8.8.8:1080").unwrap();
        writeln!(file, "alice:secret@5.6.7.8:8080").unwrap();
        let candidates = ProxyParser::parse_file(file.path(), ProtocolHint::Auto).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].declared, Some(ProxyType::Socks5));
    }

    #[test]
    fn test_save_to_file() {
        let candidates = ProxyParser::parse_string(
            "8.8.8.8:1080\nalice:secret@5.6.7.8:8080",
            ProtocolHint::Auto,
        );
        let file = tempfile::NamedTempFile::new().unwrap();

        ProxyParser::save_to_file(&candidates, file.path(), true).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "8.8.8.8:1080\nalice:secret@5.6.7.8:8080");

        ProxyParser::save_to_file(&candidates, file.path(), false).unwrap();
        let reloaded = ProxyParser::parse_file(file.path(), ProtocolHint::Auto).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.iter().all(|c| c.auth.is_none()));
    }
}
