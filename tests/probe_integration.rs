mod common;

use common::{closed_port, FakeServer, EXIT_IP, TARGET_URL};
use live_proxy_pool::pool::ProxyPool;
use live_proxy_pool::proxy::checker::{CheckerConfig, ProbeTarget, ProxyChecker};
use live_proxy_pool::proxy::models::{Candidate, FailureReason, ProxyType, TestPolicy, Verdict};
use live_proxy_pool::proxy::parser::{ProtocolHint, ProxyParser, QualityFilter};
use live_proxy_pool::proxy::validator::{ValidationEngine, ValidatorConfig};
use std::time::Duration;

fn checker() -> ProxyChecker {
    let config = CheckerConfig::new()
        .with_timeout(Duration::from_secs(5))
        .with_targets(vec![ProbeTarget::ip_echo(TARGET_URL)]);
    ProxyChecker::with_config(config)
}

#[tokio::test]
async fn test_http_proxy_is_live() {
    let proxy = FakeServer::echo_proxy().await;
    let candidate =
        ProxyParser::parse_line(&proxy.host_port(), ProtocolHint::Declared(ProxyType::Http))
            .unwrap();

    match checker().probe(candidate).await {
        Verdict::Live(entry) => {
            assert_eq!(entry.protocol, ProxyType::Http);
            assert_eq!(entry.port, proxy.addr.port());
            assert_eq!(entry.external_ip.as_deref(), Some(EXIT_IP));
        }
        other => panic!("expected live verdict, got {:?}", other),
    }
    assert_eq!(proxy.connections(), 1);
}

#[tokio::test]
async fn test_mixed_candidate_finds_working_protocol() {
    let proxy = FakeServer::echo_proxy().await;
    let candidate = Candidate::new("127.0.0.1".to_string(), proxy.addr.port(), Some(ProxyType::Socks5))
        .with_policy(&TestPolicy::Mixed(vec![ProxyType::Socks5, ProxyType::Http]));
    assert_eq!(candidate.test_protocols, vec![ProxyType::Socks5, ProxyType::Http]);

    match checker().probe(candidate).await {
        Verdict::Live(entry) => assert_eq!(entry.protocol, ProxyType::Http),
        other => panic!("expected live verdict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refused_proxy_is_dead() {
    let candidate = Candidate::new("127.0.0.1".to_string(), closed_port(), Some(ProxyType::Http));
    let verdict = checker().probe(candidate).await;

    assert!(matches!(
        verdict.failure_reason(),
        Some(FailureReason::ConnectionError(_))
    ));
}

#[tokio::test]
async fn test_rejected_status_is_dead() {
    let proxy = FakeServer::start(503, "upstream down").await;
    let candidate = Candidate::new("127.0.0.1".to_string(), proxy.addr.port(), Some(ProxyType::Http));
    let verdict = checker().probe(candidate).await;

    assert_eq!(verdict.failure_reason(), Some(&FailureReason::BadStatus(503)));
}

#[tokio::test]
async fn test_engine_pools_only_working_proxies() {
    let mut proxies = Vec::new();
    for _ in 0..3 {
        proxies.push(FakeServer::echo_proxy().await);
    }

    let mut lines: Vec<String> = proxies.iter().map(|p| p.host_port()).collect();
    lines.push(format!("127.0.0.1:{}", closed_port()));
    lines.push("garbage".to_string());
    lines.push(proxies[0].host_port());

    let batch = ProxyParser::parse_lines(
        &lines,
        ProtocolHint::Declared(ProxyType::Http),
        &TestPolicy::Declared,
        &QualityFilter::permissive(),
    );
    assert_eq!(batch.candidates.len(), 4);
    assert_eq!(batch.rejected, 1);
    assert_eq!(batch.duplicates, 1);

    let pool = ProxyPool::new();
    let engine = ValidationEngine::new(
        checker(),
        pool.clone(),
        ValidatorConfig::new()
            .with_concurrency(2)
            .with_chunk_size(2)
            .with_chunk_pause(Duration::from_millis(10)),
    );
    let report = engine.validate_batch(batch.candidates).await;

    assert_eq!(report.checked, 4);
    assert_eq!(report.alive(), 3);
    assert_eq!(report.failures.connection_error, 1);
    assert_eq!(pool.size(), 3);

    let ranked = pool.ranked_top(10);
    assert_eq!(ranked.len(), 3);
    assert!(ranked.windows(2).all(|w| w[0].latency_ms <= w[1].latency_ms));
    assert!(pool.last_updated().is_some());
}
