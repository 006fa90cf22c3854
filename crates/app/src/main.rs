//! Binary entry point: CLI parsing, component wiring, and the HTTP listener.
//! Everything behind the wiring — token validation, caching, forwarding,
//! usage accounting, auditing — lives in the library crates; this is where
//! it's all assembled for a single running process.

mod admin;
mod config;
mod sink;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use llmproxy_audit::{AuditSink, FileAuditSink, SqlAuditStore};
use llmproxy_cache::{MemoryCache, RedisCache, ResponseCache};
use llmproxy_core::telemetry::{self, LogFormat};
use llmproxy_dispatcher::{Dispatcher, DispatcherConfig};
use llmproxy_eventbus::{DurableEventBus, EventBus, InMemoryBus, PostgresEventLog};
use llmproxy_gateway::aggregator::{AggregatorConfig, CacheHitAggregator};
use llmproxy_gateway::config::{PipelineConfig, ProviderProfile};
use llmproxy_gateway::validator::TokenValidator;
use llmproxy_gateway::{forward, AppState};
use llmproxy_store::{ProjectStore, SqlStore, TokenStore};
use tokio::net::TcpListener;

use crate::config::{CacheBackend, Config, DbDriver};
use crate::sink::TracingEventSink;

const VALIDATOR_POSITIVE_TTL: Duration = Duration::from_secs(30);
const MEMORY_CACHE_BUDGET_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "llmproxy", about = "Transparent reverse proxy for upstream LLM APIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy and management HTTP server.
    Serve,
    /// Apply pending store/eventbus/audit migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let log_format: LogFormat = std::env::var("LOG_FORMAT").ok().unwrap_or_default().parse().unwrap_or_default();
    telemetry::init(log_format);

    match cli.command {
        Command::Migrate => run_migrate(&config).await,
        Command::Serve => run_serve(config).await,
    }
}

async fn run_migrate(config: &Config) -> anyhow::Result<()> {
    if config.db_driver == DbDriver::Sqlite && config.database_url.contains(":memory:") {
        anyhow::bail!("refusing to migrate an in-memory database; set DATABASE_URL/DATABASE_PATH");
    }
    let store = SqlStore::connect(&config.database_url).await?;
    store.migrate().await?;
    tracing::info!("token/project store migrations applied");

    if config.observability_enabled {
        let log = PostgresEventLog::connect(&config.database_url).await?;
        log.migrate().await?;
        tracing::info!("event log migrations applied");
    }

    if config.audit_db_enabled {
        let audit_store = SqlAuditStore::connect(&config.database_url).await?;
        audit_store.migrate().await?;
        tracing::info!("audit store migrations applied");
    }

    Ok(())
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(SqlStore::connect_with_pool_size(&config.database_url, config.database_pool_size).await?);
    store.migrate().await?;

    let tokens: Arc<dyn TokenStore> = store.clone();
    let projects: Arc<dyn ProjectStore> = store.clone();

    let validator = TokenValidator::new(tokens.clone(), projects.clone(), VALIDATOR_POSITIVE_TTL);
    let aggregator_config = AggregatorConfig {
        capacity: config.cache_stats_buffer_size,
        ..AggregatorConfig::default()
    };
    let aggregator = Arc::new(CacheHitAggregator::spawn(tokens.clone(), aggregator_config));

    let cache: Option<Arc<dyn ResponseCache>> = if config.http_cache_enabled {
        Some(match config.http_cache_backend {
            CacheBackend::InMemory => Arc::new(MemoryCache::new(MEMORY_CACHE_BUDGET_BYTES)) as Arc<dyn ResponseCache>,
            CacheBackend::Redis => {
                let url = config
                    .redis_cache_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("REDIS_CACHE_URL is required when HTTP_CACHE_BACKEND=redis"))?;
                Arc::new(RedisCache::connect(url, config.redis_cache_key_prefix.clone()).await?)
                    as Arc<dyn ResponseCache>
            }
        })
    } else {
        None
    };

    let event_bus: Arc<dyn EventBus> = if config.observability_enabled {
        let log = Arc::new(PostgresEventLog::connect(&config.database_url).await?);
        log.migrate().await?;
        let (dispatcher, _handle) =
            Dispatcher::new(log.clone(), TracingEventSink, DispatcherConfig::default());
        tokio::spawn(dispatcher.run());
        Arc::new(DurableEventBus::new(log))
    } else {
        Arc::new(InMemoryBus::new(config.observability_buffer_size))
    };

    let mut audit_sink = FileAuditSink::open(&config.audit_log_path)?;
    if config.audit_db_enabled {
        let audit_store = SqlAuditStore::connect(&config.database_url).await?;
        audit_store.migrate().await?;
        audit_sink = audit_sink.with_store(Arc::new(audit_store));
    }
    let audit: Arc<dyn AuditSink> = Arc::new(audit_sink);

    let provider = ProviderProfile {
        base_url: std::env::var("UPSTREAM_BASE_URL").unwrap_or_else(|_| ProviderProfile::default().base_url),
        ..ProviderProfile::default()
    };
    let http_client = forward::build_client(&provider)?;

    let pipeline_config = PipelineConfig {
        enforce_project_active: config.enforce_project_active,
        http_cache_enabled: config.http_cache_enabled,
        default_cache_ttl: config.http_cache_default_ttl,
        max_cache_object_bytes: config.http_cache_max_object_bytes,
        event_bus_capacity: config.observability_buffer_size,
        ..PipelineConfig::default()
    };

    let state = Arc::new(AppState {
        tokens,
        projects,
        validator,
        cache,
        event_bus: event_bus.clone(),
        audit: audit.clone(),
        aggregator: aggregator.clone(),
        http_client,
        provider,
        config: pipeline_config,
        management_token: config.management_token.clone(),
    });

    let app = llmproxy_gateway::router(state.clone()).merge(admin::router(state.clone()));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "proxy listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    aggregator.stop(Duration::from_secs(5)).await;
    event_bus.stop();
    audit.close().await.ok();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
