use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use live_proxy_pool::{
    logging,
    pool::{ProxyPool, RetryBook, RetryPolicy},
    proxy::{
        CandidateSource, CheckerConfig, CrawlerConfig, LiveProxy, ProtocolHint, ProxyChecker,
        ProxyCrawler, ProxyParser, ProxySource, QualityFilter, TestPolicy, ValidationEngine,
        ValidatorConfig,
    },
    scheduler::{Scheduler, SchedulerConfig},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Harvests public proxy lists and keeps a pool of verified working proxies
#[derive(Parser)]
#[command(name = "live-proxy-pool")]
#[command(about = "Harvests public proxy lists and keeps a pool of verified working proxies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse proxies from a file
    Parse {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for parsed proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Protocol: auto (scheme or port), unknown, http, https, socks4, socks5
        #[arg(short = 't', long, default_value = "auto")]
        proxy_type: String,
    },
    /// Fetch raw proxy lists from feeds
    Crawl {
        /// Sources file: `<protocol|mixed[:p1,p2]> <url> [name]` per line
        #[arg(short, long)]
        sources: Option<PathBuf>,
        /// Output file for crawled proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Timeout in seconds for HTTP requests
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Check proxies from a file once
    Check {
        /// Input file containing proxies
        input: PathBuf,
        /// Protocol: auto (scheme or port), unknown, http, https, socks4, socks5
        #[arg(short = 't', long, default_value = "auto")]
        proxy_type: String,
        /// Try every protocol, declared one first
        #[arg(long)]
        mixed: bool,
        /// Number of concurrent probes
        #[arg(short = 'n', long, default_value = "25")]
        concurrency: usize,
        /// Timeout in seconds per probe request
        #[arg(long, default_value = "8")]
        timeout: u64,
        /// Candidates per chunk
        #[arg(long, default_value = "100")]
        chunk_size: usize,
        /// Stop once this many live proxies were found
        #[arg(long)]
        target: Option<usize>,
        /// How many of the fastest proxies to print
        #[arg(long, default_value = "20")]
        top: usize,
        /// Print the ranked proxies as JSON
        #[arg(long)]
        json: bool,
        /// Output file for working proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// MaxMind MMDB file for country tagging
        #[arg(long)]
        mmdb: Option<String>,
    },
    /// Keep a live pool refreshed until interrupted
    Run {
        /// Sources file: `<protocol|mixed[:p1,p2]> <url> [name]` per line
        #[arg(short, long)]
        sources: Option<PathBuf>,
        /// Live proxies to collect
        #[arg(long, default_value = "50")]
        target_pool: usize,
        /// Fetch fresh candidates when the pool drops below this size
        #[arg(long, default_value = "20")]
        replenish_below: usize,
        /// Seconds between re-validation cycles
        #[arg(long, default_value = "300")]
        interval_secs: u64,
        /// Number of concurrent probes
        #[arg(short = 'n', long, default_value = "25")]
        concurrency: usize,
        /// Timeout in seconds per probe request
        #[arg(long, default_value = "8")]
        timeout: u64,
        /// How many of the fastest proxies to print on exit
        #[arg(long, default_value = "10")]
        top: usize,
        /// MaxMind MMDB file for country tagging
        #[arg(long)]
        mmdb: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Parse {
            input,
            output,
            proxy_type,
        } => {
            let hint: ProtocolHint = proxy_type.parse()?;
            let candidates = ProxyParser::parse_file(&input, hint)?;

            println!("Parsed {} proxies from {:?}", candidates.len(), input);

            if let Some(output_path) = output {
                ProxyParser::save_to_file(&candidates, &output_path, true)?;
                println!("Saved parsed proxies to {:?}", output_path);
            } else {
                for candidate in &candidates {
                    println!("{}", candidate);
                }
            }
        }
        Commands::Crawl {
            sources,
            output,
            timeout,
        } => {
            let config = CrawlerConfig::new().with_timeout(Duration::from_secs(timeout));
            let crawler = ProxyCrawler::with_config(config, load_sources(sources)?)?;

            let mut candidates = Vec::new();
            for batch in crawler.fetch().await {
                let parsed = ProxyParser::parse_lines(
                    &batch.lines,
                    batch.protocol.hint(),
                    &batch.protocol.policy(),
                    &QualityFilter::default(),
                );
                println!(
                    "Found {} proxies from {} ({})",
                    parsed.candidates.len(),
                    batch.source,
                    batch.protocol
                );
                candidates.extend(parsed.candidates);
            }

            candidates.sort_by_key(|c| c.key());
            candidates.dedup_by_key(|c| c.key());
            println!("\nTotal unique proxies: {}", candidates.len());

            if let Some(output_path) = output {
                ProxyParser::save_to_file(&candidates, &output_path, true)?;
                println!("Saved proxies to {:?}", output_path);
            } else {
                for candidate in &candidates {
                    println!("{}", candidate.to_full_string());
                }
            }
        }
        Commands::Check {
            input,
            proxy_type,
            mixed,
            concurrency,
            timeout,
            chunk_size,
            target,
            top,
            json,
            output,
            mmdb,
        } => {
            let hint: ProtocolHint = proxy_type.parse()?;
            let policy = if mixed {
                TestPolicy::mixed()
            } else {
                TestPolicy::Declared
            };
            let content = std::fs::read_to_string(&input)?;
            let parsed =
                ProxyParser::parse_lines(content.lines(), hint, &policy, &QualityFilter::default());

            println!(
                "Loaded {} proxies from {:?} ({} rejected, {} duplicates)",
                parsed.candidates.len(),
                input,
                parsed.rejected,
                parsed.duplicates
            );
            println!(
                "Checking with {} concurrent probes, timeout: {}s",
                concurrency, timeout
            );
            println!();

            let engine = build_engine(
                timeout,
                mmdb,
                ValidatorConfig::new()
                    .with_concurrency(concurrency)
                    .with_chunk_size(chunk_size)
                    .with_target_alive(target),
            );
            let report = engine.validate_batch(parsed.candidates).await;

            println!(
                "Results: {} good, {} bad ({} timeout, {} connection error, {} bad status, {} parse error){}",
                report.alive(),
                report.dead.len(),
                report.failures.timeout,
                report.failures.connection_error,
                report.failures.bad_status,
                report.failures.parse_error,
                if report.stopped_early { ", stopped early" } else { "" }
            );

            if let Some(output_path) = output {
                let good: Vec<_> = report.live.iter().map(LiveProxy::to_candidate).collect();
                ProxyParser::save_to_file(&good, &output_path, true)?;
                println!("Saved {} good proxies to {:?}", good.len(), output_path);
            }

            print_ranked(&engine.pool().ranked_top(top), json)?;
        }
        Commands::Run {
            sources,
            target_pool,
            replenish_below,
            interval_secs,
            concurrency,
            timeout,
            top,
            mmdb,
        } => {
            if replenish_below > target_pool {
                return Err(anyhow!(
                    "--replenish-below ({}) must not exceed --target-pool ({})",
                    replenish_below,
                    target_pool
                ));
            }

            let crawler = ProxyCrawler::with_config(CrawlerConfig::new(), load_sources(sources)?)?;
            let engine = build_engine(
                timeout,
                mmdb,
                ValidatorConfig::new().with_concurrency(concurrency),
            );
            let config = SchedulerConfig::new()
                .with_target_pool(target_pool)
                .with_replenish_below(replenish_below)
                .with_steady_interval(Duration::from_secs(interval_secs));

            let mut scheduler = Scheduler::new(
                engine,
                Arc::new(crawler),
                RetryBook::new(RetryPolicy::default()),
                config,
            );
            info!(
                "Keeping {} live proxies, replenishing below {}. Press Ctrl+C to stop.",
                target_pool, replenish_below
            );
            scheduler
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;

            let pool = scheduler.pool();
            println!("{}", serde_json::to_string_pretty(&pool.stats())?);
            print_ranked(&pool.ranked_top(top), false)?;
        }
    }

    Ok(())
}

fn load_sources(path: Option<PathBuf>) -> Result<Vec<ProxySource>> {
    let sources = match path {
        Some(path) => ProxySource::load_file(path)?,
        None => ProxyCrawler::get_common_sources(),
    };
    if sources.is_empty() {
        return Err(anyhow!("no proxy sources configured"));
    }
    Ok(sources)
}

fn build_engine(timeout: u64, mmdb: Option<String>, config: ValidatorConfig) -> ValidationEngine {
    let mut checker_config = CheckerConfig::new().with_timeout(Duration::from_secs(timeout));
    if let Some(path) = mmdb {
        checker_config = checker_config.with_mmdb_path(path);
    }
    ValidationEngine::new(
        ProxyChecker::with_config(checker_config),
        ProxyPool::new(),
        config,
    )
}

fn print_ranked(entries: &[LiveProxy], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }

    if !entries.is_empty() {
        println!("\nWorking proxies:");
        for entry in entries {
            println!(
                "  {} ({}ms{}{})",
                entry.url(),
                entry.latency_ms,
                entry
                    .external_ip
                    .as_ref()
                    .map_or(String::new(), |ip| format!(", exit {}", ip)),
                entry
                    .country
                    .as_ref()
                    .map_or(String::new(), |c| format!(", {}", c))
            );
        }
    }
    Ok(())
}
