use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rulekeeper::config::ServiceConfig;
use rulekeeper::http::{AppState, HttpServer};
use rulekeeper::ratelimit::{CounterStore, InMemoryCounterStore, RedisCounterStore};
use rulekeeper::rules::{InMemoryRuleStore, RedisRuleStore, RuleStore};
use rulekeeper::storage::redis_connection;
use rulekeeper::sweeper::ExpiredRuleSweeper;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rulekeeper")]
#[command(about = "Multi-tenant rule management service", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting Rulekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        remote = %config.remote.base_url,
        rate_limit_requests = config.rate_limiting.requests,
        rate_limit_period_secs = config.rate_limiting.period_secs,
        "Configuration loaded"
    );

    let rules: Arc<dyn RuleStore>;
    let counters: Arc<dyn CounterStore>;
    match &config.storage.redis_url {
        Some(url) => {
            let connection = redis_connection(url, &config.storage).await?;
            rules = Arc::new(RedisRuleStore::new(connection.clone(), &config.storage));
            counters = Arc::new(RedisCounterStore::new(connection));
            info!(
                key_prefix = %config.storage.key_prefix,
                "Rules and rate limit counters stored in Redis"
            );
        }
        None => {
            rules = Arc::new(InMemoryRuleStore::with_audit_capacity(
                config.storage.audit_capacity,
            ));
            counters = Arc::new(InMemoryCounterStore::new());
            warn!("No Redis URL configured, rules and counters are local and lost on restart");
        }
    }

    let state = AppState::from_config(&config, rules.clone(), counters)?;

    let sweeper = ExpiredRuleSweeper::from_config(rules, &config.sweeper).spawn();
    info!(interval_secs = config.sweeper.interval_secs, "Expired rule sweeper spawned");

    let server = HttpServer::new(config.server.listen_addr, state);
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.shutdown().await?;
    served?;

    info!("Rulekeeper stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
