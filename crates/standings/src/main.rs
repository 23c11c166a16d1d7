//! Standings server entry point.
//!
//! Parses the command line, loads the configuration, initializes logging and
//! runs one fleet instance until a shutdown signal arrives.

mod cli;
mod config;
mod signals;

use anyhow::{anyhow, Context};
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use standings_server::{StandingsServer, Transports};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Application
// ============================================================================

struct Application {
    config: AppConfig,
    server: Arc<StandingsServer>,
}

impl Application {
    async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(instance_id) = args.instance_id {
            config.server.instance_id = instance_id;
        }
        if let Some(level) = args.log_level {
            config.logging.level = level;
        }
        config.validate().map_err(|e| anyhow!("Invalid configuration: {e}"))?;

        setup_logging(&config.logging, args.json_logs)?;
        info!("📂 Loaded configuration from {}", args.config_path.display());

        let server_config = config
            .to_server_config()
            .map_err(|e| anyhow!("Invalid configuration: {e}"))?;
        let server = StandingsServer::new(server_config, Transports::in_memory());

        Ok(Self { config, server })
    }

    async fn run(self) -> anyhow::Result<()> {
        self.server.start().await.context("starting standings server")?;

        let monitoring = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATS_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let stats = server.stats().await;
                    info!(
                        "📊 {} connections | {} leaderboards | {} broadcasts ({} throttled) | {} cache errors",
                        stats.connections,
                        stats.tracked_partitions,
                        stats.broadcast.published,
                        stats.broadcast.throttled,
                        stats.cache.errors
                    );
                }
            })
        };

        info!("✅ Instance {} is running", self.server.instance_id());
        info!(
            "🏆 Tracking {} leaderboard(s), sweeping every {}s",
            self.config.server.tracked.len(),
            self.config.server.sweep_interval_secs
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        signals::wait_for_shutdown().await?;
        info!("🛑 Shutdown signal received, leaving the fleet...");

        monitoring.abort();
        self.server.shutdown().await?;

        let stats = self.server.stats().await;
        info!("📊 Final statistics:");
        info!("  - Broadcasts published: {}", stats.broadcast.published);
        info!("  - Remote updates delivered: {}", stats.broadcast.remote_deliveries);
        info!("  - Bus events received: {}", stats.bus.received);
        info!("  - Cache hits/misses: {}/{}", stats.cache.hits, stats.cache.misses);
        info!("👋 Standings server stopped");
        Ok(())
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(config: &LoggingSettings, json_format: bool) -> anyhow::Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }
}
