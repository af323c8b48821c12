//! Congressional disclosure copy-trading engine.
//!
//! Runs a fleet of agents that either mirror the disclosed trades of
//! tracked individuals/committees or trade a technical strategy, driven
//! by a once-a-day scheduler plus intraday open/close tasks.

mod agents;
mod clients;
mod db;
mod error;
mod matching;
mod models;
mod retry;
mod schedule;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::agents::{AgentConfig, AgentKind, AgentRegistry};
use crate::clients::http::{HttpBrokerGateway, HttpMarketDataFeed, HttpTradeFeed};
use crate::clients::AppContext;
use crate::db::Database;
use crate::matching::{MatcherConfig, NameMatcher};
use crate::retry::RetryPolicy;
use crate::schedule::daily::{DailySchedulerConfig, DailyScheduler};
use crate::schedule::intraday::{IntradayScheduler, ScheduleKind};
use crate::schedule::{SystemClock, TimeOfDay, TradingCalendar};

/// Disclosure copy-trading engine CLI.
#[derive(Parser)]
#[command(name = "congress-copier")]
#[command(about = "Copy trades from congressional disclosures", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./congress_copier.db?mode=rwc")]
    database: String,

    /// Agent definitions (JSON array of agent configs)
    #[arg(short, long, default_value = "agents.json")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine: daily cycle plus intraday open/close tasks
    Run {
        /// Daily cycle trigger time (UTC, HH:MM)
        #[arg(long, default_value = "16:45")]
        run_at: String,

        /// Market-open task time for technical agents (UTC, HH:MM)
        #[arg(long, default_value = "13:31")]
        open_at: String,

        /// Market-close task time for technical agents (UTC, HH:MM)
        #[arg(long, default_value = "19:55")]
        close_at: String,

        /// Dispatch agents one at a time instead of concurrently
        #[arg(long)]
        sequential: bool,
    },

    /// Run one full daily cycle immediately and exit
    ExecuteNow {
        /// Dispatch agents one at a time instead of concurrently
        #[arg(long)]
        sequential: bool,
    },

    /// Show persisted execution history and order counts
    Status,

    /// List and validate the configured agents
    Agents,

    /// Score a name against one or more candidates
    MatchCheck {
        /// Target name, e.g. a configured tracked entity
        target: String,

        /// Candidate names as they appear on disclosures
        candidates: Vec<String>,

        /// District code for the target (e.g. OH02 or OH-2)
        #[arg(long)]
        district: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Run {
            run_at,
            open_at,
            close_at,
            sequential,
        } => {
            let sequential = *sequential;
            let run_at = TimeOfDay::parse(run_at)?;
            let open_at = TimeOfDay::parse(open_at)?;
            let close_at = TimeOfDay::parse(close_at)?;

            let ctx = build_context(&cli).await?;
            let registry = build_registry(&cli, Arc::clone(&ctx)).await?;

            let daily = DailyScheduler::new(
                DailySchedulerConfig {
                    run_at,
                    tick_interval: Duration::from_secs(60),
                    parallel: !sequential,
                },
                Arc::clone(&registry),
                Arc::clone(&ctx),
                TradingCalendar::default(),
            );
            let intraday = IntradayScheduler::new(
                Arc::clone(&registry),
                Arc::clone(&ctx),
                TradingCalendar::default(),
                Duration::from_secs(30),
            );

            for config in load_agent_configs(&cli.config)? {
                if config.kind == AgentKind::Technical {
                    intraday
                        .add_task(&config.id, ScheduleKind::MarketOpen, open_at)
                        .await?;
                    intraday
                        .add_task(&config.id, ScheduleKind::MarketClose, close_at)
                        .await?;
                }
            }

            daily.start().await;
            intraday.start().await;

            let status = registry.factory_status().await;
            println!("\n=== Congress Copier ===");
            println!("Agents:        {} registered, {} enabled", status.registered_count, status.enabled_count);
            println!("Daily cycle:   {run_at} UTC");
            println!("Open/close:    {open_at} / {close_at} UTC");
            println!("Dispatch:      {}", if sequential { "sequential" } else { "parallel" });
            println!("\nPress Ctrl+C to stop.\n");

            tokio::signal::ctrl_c().await?;
            println!("\nShutting down...");
            daily.stop().await;
            intraday.stop().await;

            let status = daily.status().await;
            println!(
                "Runs: {} ({} failed, success rate {:.0}%)",
                status.runs,
                status.failed_runs,
                status.success_rate * 100.0
            );
        }

        Commands::ExecuteNow { sequential } => {
            let ctx = build_context(&cli).await?;
            let registry = build_registry(&cli, Arc::clone(&ctx)).await?;
            let daily = DailyScheduler::new(
                DailySchedulerConfig {
                    parallel: !*sequential,
                    ..DailySchedulerConfig::default()
                },
                registry,
                ctx,
                TradingCalendar::default(),
            );

            let summary = daily.execute_now().await?;
            println!("\n=== Execution Summary ({}) ===", summary.date);
            println!("Success:          {}", summary.success);
            println!("Trades processed: {}", summary.total_trades_processed);
            println!("Orders placed:    {}", summary.total_orders_placed);
            for (agent_id, result) in &summary.results {
                println!(
                    "  {:<20} {} ({} orders, {:?})",
                    agent_id,
                    if result.success { "ok" } else { "FAILED" },
                    result.orders_placed,
                    result.duration
                );
            }
            for error in &summary.errors {
                println!("  error: {error}");
            }
        }

        Commands::Status => {
            let store = Database::new(&cli.database)
                .await
                .context("failed to open database")?;

            let summaries = store.summary_count().await?;
            let orders = store.total_order_count().await?;
            let today = chrono::Utc::now().date_naive();
            let rows = store.results_for_date(today).await?;

            println!("\n=== Engine Status ===");
            println!("Stored summaries: {summaries}");
            println!("Orders placed:    {orders}");
            if rows.is_empty() {
                println!("No execution recorded for {today}.");
            } else {
                println!("\n--- Today ({today}) ---");
                for row in &rows {
                    let result = Database::parse_result(row);
                    println!(
                        "  {:<20} {} ({} trades, {} orders)",
                        row.agent_id,
                        if result.success { "ok" } else { "FAILED" },
                        result.trades_processed,
                        result.orders_placed
                    );
                    for error in &result.errors {
                        println!("    error: {error}");
                    }
                }
            }
        }

        Commands::Agents => {
            let configs = load_agent_configs(&cli.config)?;
            println!("\n{:<20} {:<12} {:<8} TARGETS", "ID", "KIND", "ENABLED");
            println!("{}", "-".repeat(64));
            for config in configs {
                let targets = match config.kind {
                    AgentKind::Technical => config.ticker.clone().unwrap_or_default(),
                    _ => config
                        .tracked_entities
                        .iter()
                        .map(|e| e.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                };
                let valid = match config.validate() {
                    Ok(()) => "yes".to_string(),
                    Err(e) => format!("INVALID: {e}"),
                };
                println!(
                    "{:<20} {:<12} {:<8} {}",
                    config.id,
                    config.kind.as_str(),
                    config.enabled,
                    targets
                );
                if !valid.starts_with("yes") {
                    println!("  {valid}");
                }
            }
        }

        Commands::MatchCheck {
            target,
            candidates,
            district,
        } => {
            let matcher = NameMatcher::new(MatcherConfig::default());
            println!("\nTarget: {target}");
            for candidate in candidates {
                let score = matcher.score(target, district.as_deref(), candidate, None);
                let verdict = if score >= matcher.config().match_threshold {
                    "MATCH"
                } else {
                    "no match"
                };
                println!("  {candidate:<32} {score:.3}  {verdict}");
            }
        }
    }

    Ok(())
}

/// Build the shared collaborator context from environment configuration.
async fn build_context(cli: &Cli) -> Result<Arc<AppContext>> {
    let feed_url = std::env::var("DISCLOSURE_FEED_URL")
        .context("DISCLOSURE_FEED_URL not set")?;
    let market_data_url = std::env::var("MARKET_DATA_URL")
        .context("MARKET_DATA_URL not set")?;

    let store = Database::new(&cli.database)
        .await
        .context("failed to open database")?;

    Ok(Arc::new(AppContext {
        feed: Arc::new(HttpTradeFeed::new(feed_url)?),
        broker: Arc::new(HttpBrokerGateway::from_env()?),
        market_data: Arc::new(HttpMarketDataFeed::new(market_data_url)?),
        store: Arc::new(store),
        retry: RetryPolicy::default(),
        clock: Arc::new(SystemClock),
    }))
}

/// Create agents from the JSON config file. Invalid configs are logged and
/// skipped, never fatal for the rest of the fleet.
async fn build_registry(cli: &Cli, ctx: Arc<AppContext>) -> Result<Arc<AgentRegistry>> {
    let registry = Arc::new(AgentRegistry::new(ctx));
    for config in load_agent_configs(&cli.config)? {
        let id = config.id.clone();
        if registry.create(config).await.is_none() {
            warn!(agent = %id, "Agent skipped");
        }
    }

    let status = registry.factory_status().await;
    if status.registered_count == 0 {
        anyhow::bail!("no valid agents configured in {}", cli.config);
    }
    info!(
        registered = status.registered_count,
        failed = status.failed_creations,
        "Agent fleet ready"
    );
    Ok(registry)
}

fn load_agent_configs(path: &str) -> Result<Vec<AgentConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read agent config {path}"))?;
    let configs: Vec<AgentConfig> =
        serde_json::from_str(&raw).with_context(|| format!("invalid agent config {path}"))?;
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn top_level_flags_survive_subcommand_inspection() {
        let cli = Cli::try_parse_from([
            "congress-copier",
            "run",
            "--run-at",
            "17:00",
            "--sequential",
        ])
        .unwrap();

        match &cli.command {
            Commands::Run {
                run_at, sequential, ..
            } => {
                assert_eq!(run_at, "17:00");
                assert!(*sequential);
            }
            _ => panic!("expected the run subcommand"),
        }
        // The top-level flags must still be readable after the match.
        assert_eq!(cli.config, "agents.json");
        assert_eq!(cli.log_level, "info");
    }
}
