//! Fundcrawl main entry point
//!
//! Command-line interface for running crawl cycles and exclusion rechecks.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use fundcrawl::config::load_config_with_hash;
use fundcrawl::scheduler::{run_cycle, CycleOptions, CycleScope, CycleSummary, DiscoveryMode};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fundcrawl: an adaptive funding-program crawler
///
/// Fundcrawl discovers and extracts structured funding-program data from
/// configured institutional websites. Each invocation runs one cycle:
/// frontier discovery, a bounded batch of fetches per institution, and an
/// optional recheck of low-confidence exclusions.
#[derive(Parser, Debug)]
#[command(name = "fundcrawl")]
#[command(version)]
#[command(about = "An adaptive funding-program crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Link discovery mode
    #[arg(long, value_enum, default_value = "incremental")]
    mode: ModeArg,

    /// How many institutions this run covers
    #[arg(long, value_enum, default_value = "cycle")]
    scope: ScopeArg,

    /// Crawl only this institution id
    #[arg(long, value_name = "ID")]
    institution: Option<String>,

    /// Recheck up to N low-confidence exclusions after crawling
    #[arg(long, value_name = "N")]
    max_rechecks: Option<usize>,

    /// Let the recheck phase remove confirmed false positives
    #[arg(long, requires = "max_rechecks")]
    auto_remove: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Incremental,
    Deep,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    Cycle,
    Full,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, &config_hash);
        return Ok(());
    }

    let options = CycleOptions {
        mode: match cli.mode {
            ModeArg::Incremental => DiscoveryMode::Incremental,
            ModeArg::Deep => DiscoveryMode::Deep,
        },
        scope: match cli.scope {
            ScopeArg::Cycle => CycleScope::Cycle,
            ScopeArg::Full => CycleScope::Full,
        },
        institution: cli.institution,
        max_rechecks: cli.max_rechecks,
        auto_remove: cli.auto_remove,
    };

    let summary = run_cycle(config, options)
        .await
        .context("crawl cycle failed")?;
    print_summary(&summary);
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fundcrawl=info,warn"),
            1 => EnvFilter::new("fundcrawl=debug,info"),
            2 => EnvFilter::new("fundcrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &fundcrawl::Config, config_hash: &str) {
    println!("=== Fundcrawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  State directory: {}", config.crawler.state_dir);
    println!("  Database: {}", config.crawler.database_path);
    println!(
        "  Max concurrent fetches: {}",
        config.crawler.max_concurrent_fetches
    );
    println!(
        "  Confidence threshold: {}",
        config.crawler.confidence_threshold
    );
    println!(
        "  Freshness window: {} days",
        config.crawler.freshness_window_days
    );
    println!(
        "  Cycle deadline: {}s",
        config.crawler.cycle_deadline_secs
    );
    println!("  Config hash: {}", config_hash);

    println!("\nInstitutions ({}):", config.institutions.len());
    for institution in &config.institutions {
        println!(
            "  - {} ({}), depth {}, {} pages/cycle{}",
            institution.id,
            institution.name,
            institution.max_depth,
            institution.max_pages_per_cycle,
            if institution.requires_session {
                ", session login"
            } else {
                ""
            }
        );
        for seed in &institution.base_urls {
            println!("    * {}", seed);
        }
    }

    println!("\n✓ Configuration is valid");
}

fn print_summary(summary: &CycleSummary) {
    println!("\n=== Cycle Summary ===");
    println!("Pages fetched:       {}", summary.pages_fetched);
    println!("Pages excluded:      {}", summary.pages_excluded);
    println!("Pages deferred:      {}", summary.pages_deferred);
    println!("Pages failed:        {}", summary.pages_failed);
    println!("Exclusions reversed: {}", summary.exclusions_reversed);

    if !summary.per_institution.is_empty() {
        println!("\nPer institution:");
        for (id, inst) in &summary.per_institution {
            println!(
                "  {}: {} fetched, {} excluded, {} deferred, {} failed",
                id, inst.pages_fetched, inst.pages_excluded, inst.pages_deferred, inst.pages_failed
            );
        }
    }
}
