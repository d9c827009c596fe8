//! moot-daemon - hosting process for the moot-court engine.
//!
//! On start the daemon opens the engine database, charges any downtime to
//! running speaker timers (startup recovery) and then ticks the timer of
//! every LIVE match at a fixed interval until interrupted. Turns whose time
//! runs out are completed by the tick itself.
//!
//! All engine calls are blocking `SQLite` work and run on Tokio's blocking
//! pool. Several daemons (or API servers) may share one database file; the
//! engine serializes their writes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use moot_core::{Engine, EngineError, MatchId, MootConfig, RecoveryOutcome};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// moot-daemon - timer ticking and crash recovery for live moot-court matches
#[derive(Parser, Debug)]
#[command(name = "moot-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "moot.toml")]
    config: PathBuf,

    /// Path to the engine database (`SQLite`), overriding the config file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overriding the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Settings resolved from the config file and command line.
struct Settings {
    config: MootConfig,
    database_path: PathBuf,
    log_level: String,
}

impl Settings {
    fn new(args: &Args) -> Result<Self> {
        // A missing file means defaults; a present but broken one is fatal.
        let config = if args.config.exists() {
            MootConfig::from_file(&args.config).with_context(|| {
                format!("failed to load configuration from {}", args.config.display())
            })?
        } else {
            MootConfig::default()
        };
        let database_path = args
            .database
            .clone()
            .unwrap_or_else(|| config.daemon.database_path.clone());
        let log_level = args
            .log_level
            .clone()
            .unwrap_or_else(|| config.daemon.log_level.clone());
        Ok(Self {
            config,
            database_path,
            log_level,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::new(&args)?;
    init_tracing(&settings.log_level, args.log_file.as_ref())?;

    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async_main(settings))
}

fn init_tracing(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("failed to open log file {}", log_file.display()))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

async fn async_main(settings: Settings) -> Result<()> {
    let Settings {
        config,
        database_path,
        ..
    } = settings;
    info!(
        database = %database_path.display(),
        tick_interval_ms = config.daemon.tick_interval_ms,
        "starting moot-daemon"
    );

    let engine_config = config.engine.clone();
    let engine = tokio::task::spawn_blocking(move || Engine::open(&database_path, engine_config))
        .await
        .context("database open task panicked")?
        .context("failed to open engine database")?;

    if config.daemon.run_recovery_on_start {
        run_recovery(engine.clone()).await?;
    } else {
        info!("startup recovery disabled by configuration");
    }

    tick_loop(engine, config.daemon.tick_interval()).await;
    info!("moot-daemon stopped");
    Ok(())
}

/// Runs startup recovery; per-match failures are logged, not fatal.
async fn run_recovery(engine: Engine) -> Result<()> {
    let result = tokio::task::spawn_blocking(move || engine.run_startup_recovery())
        .await
        .context("recovery task panicked")?;
    match result {
        Ok(reports) => {
            for report in &reports {
                if report.outcome == RecoveryOutcome::Adjusted {
                    debug!(
                        match_id = %report.match_id,
                        remaining_before = ?report.remaining_before,
                        remaining_after = ?report.remaining_after,
                        downtime_seconds = report.downtime_seconds,
                        "timer adjusted"
                    );
                }
            }
        },
        // Unrecovered matches heal on their next tick.
        Err(err) => warn!(error = %err, "startup recovery could not list live matches"),
    }
    Ok(())
}

async fn tick_loop(engine: Engine, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || tick_live_matches(&engine)).await {
                    Ok(Ok(ticked)) => debug!(ticked, "tick pass finished"),
                    Ok(Err(err)) => warn!(error = %err, "could not list live matches"),
                    Err(err) => warn!(error = %err, "tick task panicked"),
                }
            }
            result = &mut shutdown => {
                if let Err(err) = result {
                    warn!(error = %err, "failed to listen for shutdown signal");
                }
                info!("shutdown requested");
                break;
            }
        }
    }
}

/// Ticks every LIVE match once; returns how many timers were ticked.
fn tick_live_matches(engine: &Engine) -> Result<usize, EngineError> {
    let live = engine.list_live_matches()?;
    let mut ticked = 0;
    for match_id in live {
        if tick_one(engine, match_id) {
            ticked += 1;
        }
    }
    Ok(ticked)
}

fn tick_one(engine: &Engine, match_id: MatchId) -> bool {
    match engine.tick(match_id) {
        Ok(outcome) => {
            if let Some(turn) = outcome.auto_completed_turn {
                info!(
                    match_id = %match_id,
                    turn_order = turn.turn_order,
                    "speaker time expired"
                );
            }
            true
        },
        // A match that has not advanced its first turn has no timer yet.
        Err(EngineError::NotFound { entity: "timer", .. }) => false,
        Err(err) if err.is_retryable() => {
            debug!(match_id = %match_id, "database busy; tick deferred");
            false
        },
        Err(err) => {
            warn!(match_id = %match_id, error = %err, "tick failed");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("moot.toml");
        std::fs::write(
            &config_path,
            "[daemon]\ndatabase_path = \"from-file.db\"\nlog_level = \"warn\"\n",
        )
        .unwrap();

        let args = Args::try_parse_from([
            "moot-daemon",
            "--config",
            config_path.to_str().unwrap(),
            "--database",
            "from-cli.db",
        ])
        .unwrap();
        let settings = Settings::new(&args).unwrap();
        assert_eq!(settings.database_path, PathBuf::from("from-cli.db"));
        assert_eq!(settings.log_level, "warn");
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let args = Args::try_parse_from(["moot-daemon", "--config", "/nonexistent/moot.toml"])
            .unwrap();
        let settings = Settings::new(&args).unwrap();
        assert_eq!(settings.database_path, PathBuf::from("moot.db"));
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.config, MootConfig::default());
    }
}
