//! identrace CLI - probe platforms for evidence of an identifier.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use identrace::{
    proxy::{ProxyEndpoint, ProxyPool, DEFAULT_FAILURE_THRESHOLD},
    proxy_check::ProxyChecker,
    strategies::StrategyChain,
    CampaignResult, DomainChecker, EmailValidator, IdentifierValidator, OrchestratorConfig,
    PlatformRegistry, PlatformSearchOrchestrator, ProbeStatus, SearchCampaign, SmtpVerdict,
};

/// identrace - Identifier reconnaissance across third-party platforms
#[derive(Parser)]
#[command(name = "identrace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe platforms for an identifier
    Search(SearchArgs),

    /// List configured categories and platforms
    Platforms {
        /// Platform registry file (JSON); defaults to the built-in registry
        #[arg(long)]
        platforms: Option<PathBuf>,
    },

    /// Validate an identifier without probing anything
    Validate {
        /// Identifier to validate
        identifier: String,

        /// Also estimate deliverability (DNS and SMTP)
        #[arg(long)]
        check_domain: bool,
    },
}

#[derive(Parser)]
struct SearchArgs {
    /// Identifier to search for
    identifier: String,

    /// Categories to probe (comma-separated)
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "marketplaces,discussions,google"
    )]
    categories: Vec<String>,

    /// Concurrent probes per category (clamped to 1-10)
    #[arg(short, long, default_value = "5")]
    workers: usize,

    /// Per-probe timeout in seconds
    #[arg(long, default_value = "60")]
    probe_timeout: u64,

    /// Per-category timeout in seconds
    #[arg(long, default_value = "300")]
    category_timeout: u64,

    /// Pause between probe dispatches in milliseconds
    #[arg(long, default_value = "500")]
    delay_ms: u64,

    /// Best-match confidence at or above which a platform counts as found
    #[arg(long, default_value = "0.75")]
    found_threshold: f64,

    /// Proxy list file, one proxy per line
    #[arg(long)]
    proxy_file: Option<PathBuf>,

    /// Proxy URL (e.g., http://127.0.0.1:8080 or socks5://127.0.0.1:1080); repeatable
    #[arg(long)]
    proxy: Vec<String>,

    /// Consecutive failures before a proxy is taken out of rotation
    #[arg(long, default_value_t = DEFAULT_FAILURE_THRESHOLD)]
    failure_threshold: u32,

    /// Check every proxy against echo services before searching
    #[arg(long)]
    validate_proxies: bool,

    /// Platform registry file (JSON); defaults to the built-in registry
    #[arg(long)]
    platforms: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Compact tab-separated output
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Search(args) => run_search(args).await,
        Commands::Platforms { platforms } => list_platforms(platforms),
        Commands::Validate {
            identifier,
            check_domain,
        } => validate(&identifier, check_domain).await,
    }
}

fn load_registry(path: Option<PathBuf>) -> Result<PlatformRegistry> {
    Ok(match path {
        Some(path) => PlatformRegistry::from_file(path)?,
        None => PlatformRegistry::builtin()?,
    })
}

fn list_platforms(path: Option<PathBuf>) -> Result<()> {
    let registry = load_registry(path)?;

    println!("Configured platforms:\n");
    for category in registry.categories() {
        println!("  {}:", category);
        for platform in registry.platforms(category).unwrap_or_default() {
            let mut notes = Vec::new();
            if platform.requires_authentication {
                notes.push("login required".to_string());
            }
            if let Some(path) = &platform.search_path {
                notes.push(format!("search {}", path));
            }
            if notes.is_empty() {
                println!("    {:<22} {}", platform.name, platform.base_address);
            } else {
                println!(
                    "    {:<22} {} ({})",
                    platform.name,
                    platform.base_address,
                    notes.join(", ")
                );
            }
        }
        println!();
    }
    println!("Usage: identrace search user@example.com -c marketplaces,discussions");
    Ok(())
}

async fn validate(identifier: &str, resolve: bool) -> Result<()> {
    let validation = EmailValidator::new().validate(identifier.trim());

    println!("Identifier: {}", identifier.trim());
    println!("Well formed: {}", validation.well_formed);
    for (key, value) in &validation.details {
        println!("  {}: {}", key, value);
    }

    if !validation.well_formed {
        anyhow::bail!(
            "Invalid identifier: {}",
            validation.reason().unwrap_or("rejected")
        );
    }

    if resolve {
        let report = DomainChecker::new().check_email(identifier).await?;
        let domain = &report.domain;
        println!(
            "Domain {} resolves: {} ({} addresses)",
            domain.domain, domain.domain_resolves, domain.address_count
        );
        println!("MX records: {}", domain.mx_exists);
        for mx in &domain.mx_hosts {
            println!("  {} {}", mx.preference, mx.exchange);
        }
        let smtp = match &report.smtp {
            SmtpVerdict::Accepted => "recipient accepted".to_string(),
            SmtpVerdict::Deferred(code) => format!("temporary failure ({})", code),
            SmtpVerdict::Rejected(code) => format!("rejected ({})", code),
            SmtpVerdict::Unreachable(reason) => format!("unreachable: {}", reason),
            SmtpVerdict::Skipped => "skipped, no mail exchanger".to_string(),
        };
        println!("SMTP: {}", smtp);
        println!(
            "Deliverability: {} (score {}/100)",
            report.verdict.as_str(),
            report.score
        );
    }
    Ok(())
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let registry = load_registry(args.platforms.clone())?;

    let config = OrchestratorConfig {
        worker_budget: args.workers,
        probe_timeout_secs: args.probe_timeout,
        category_timeout_secs: args.category_timeout,
        inter_dispatch_delay_ms: args.delay_ms,
        found_threshold: args.found_threshold,
    };

    let cancel = CancellationToken::new();
    let mut orchestrator = PlatformSearchOrchestrator::new(StrategyChain::standard())
        .with_config(config)
        .with_cancellation(cancel.clone());

    // Setup proxy pool if any proxies were given
    let pool = match &args.proxy_file {
        Some(path) => ProxyPool::from_file(path)?,
        None => ProxyPool::new(),
    }
    .with_failure_threshold(args.failure_threshold);
    for raw in &args.proxy {
        pool.add_proxy(ProxyEndpoint::parse(raw)?).await;
    }
    if !pool.is_empty().await {
        if args.validate_proxies {
            let stats = ProxyChecker::new().validate_all(&pool).await;
            eprintln!(
                "Proxies: {} working, {} failed of {}",
                stats.working, stats.failed, stats.total
            );
            for record in pool.best(5).await {
                let latency = record.average_latency.unwrap_or_default();
                eprintln!("  {} ({:.2}s)", record.address(), latency.as_secs_f64());
            }
        }
        if matches!(args.format, OutputFormat::Text) {
            eprintln!("Using {} proxies", pool.len().await);
        }
        orchestrator = orchestrator.with_proxy_pool(Arc::new(pool));
    }

    // Ctrl-C stops new probes; in-flight ones finish before exit
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, waiting for in-flight probes...");
            cancel.cancel();
        }
    });

    let campaign = SearchCampaign::new(registry, orchestrator);
    let result = campaign.run(&args.identifier, &args.categories).await?;

    match args.format {
        OutputFormat::Text => print_text(&result),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Compact => print_compact(&result),
    }

    Ok(())
}

fn status_label(status: ProbeStatus) -> &'static str {
    match status {
        ProbeStatus::Found => "FOUND",
        ProbeStatus::PotentialMatch => "POTENTIAL",
        ProbeStatus::NotFound => "not found",
        ProbeStatus::Error => "ERROR",
    }
}

fn print_text(result: &CampaignResult) {
    println!(
        "\nResults for \"{}\" (started {}):",
        result.identifier(),
        result.started_at().format("%Y-%m-%d %H:%M:%S UTC")
    );

    for (category, outcomes) in result.categories() {
        println!("\n[{}]", category);
        for outcome in outcomes {
            println!(
                "  {:<10} {} ({})",
                status_label(outcome.status()),
                outcome.platform_name(),
                outcome.platform_address()
            );
            if outcome.status() == ProbeStatus::Error {
                println!("             {}", outcome.error_detail());
            }
            for m in outcome.matches() {
                println!("             {:.2} {}", m.confidence_score, m.title);
                println!("                  {}", m.locator);
                if !m.snippet.is_empty() {
                    println!("                  {}", m.snippet);
                }
            }
        }
    }

    let summary = result.summary();
    println!(
        "\nSummary: {} probed, {} found, {} potential, {} not found, {} errors",
        summary.total_probed,
        summary.found_count,
        summary.potential_count,
        summary.not_found_count(),
        summary.error_count
    );
    println!("Hit rate: {:.2}%", summary.hit_rate_percent);
}

fn print_compact(result: &CampaignResult) {
    for (category, outcomes) in result.categories() {
        for outcome in outcomes {
            let detail = match outcome.status() {
                ProbeStatus::Error => outcome.error_detail().to_string(),
                _ => outcome
                    .matches()
                    .first()
                    .map(|m| m.locator.clone())
                    .unwrap_or_default(),
            };
            println!(
                "{}\t{}\t{}\t{:.2}\t{}",
                category,
                outcome.platform_name(),
                outcome.status().as_str(),
                outcome.best_confidence().unwrap_or(0.0),
                detail
            );
        }
    }
}
