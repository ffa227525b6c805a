use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("botpool=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;
    if let Some(port) = args.port {
        config.set_port(port);
    }
    if config.gateway.bot_token.trim().is_empty() {
        anyhow::bail!("no primary bot credential; set gateway.bot_token or BOT_TOKEN");
    }

    let store = match config.store.backend {
        config::StoreBackend::Redis => {
            let redis = botpool_store::RedisStore::connect(
                &config.store.redis_addr,
                &config.store.redis_user,
                &config.store.redis_pass,
            )
            .await
            .context("could not connect to the shared store")?;
            tracing::info!(addr = %config.store.redis_addr, "connected to the shared store");
            botpool_store::Store::Redis(redis)
        }
        config::StoreBackend::Memory => {
            tracing::warn!(
                "using the in-process store; rate windows and membership are not shared across instances"
            );
            botpool_store::Store::Memory(botpool_store::MemoryStore::new())
        }
    };

    let rate_gate =
        botpool_core::rate_gate::RateGate::new(store.clone(), config.dispatch.max_requests_5s);
    let registry = botpool_core::registry::SessionRegistry::new(store.clone());
    let capture = botpool_core::capture::CaptureBridge::new(
        store.clone(),
        rate_gate.clone(),
        Duration::from_millis(config.dispatch.ack_timeout_ms),
    );

    let primary = botpool_gateway::ShardManager::start(
        &config.gateway.bot_token,
        &config.gateway.gateway_url,
        config.gateway.api_base.as_deref(),
        config.gateway.shard_count,
    )
    .await
    .context("could not start the primary bot")?;
    let primary = Arc::new(primary);
    tracing::info!(shards = primary.shard_count(), "primary bot online");

    let bootstrap = botpool_core::bootstrap::BootstrapOptions {
        gateway_url: config.gateway.gateway_url.clone(),
        api_base: config.gateway.api_base.clone(),
    };
    botpool_core::bootstrap::populate_and_start_sessions(&store, &registry, &bootstrap).await;

    let state = botpool_core::AppState {
        store,
        registry: registry.clone(),
        rate_gate,
        capture,
        primary: primary.clone(),
        max_workers: config.dispatch.max_workers,
    };

    let app = botpool_api::build_router().with_state(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("could not bind {}", config.server.bind_address))?;
    tracing::info!("botpool is running on {}...", config.server.bind_address);

    let shutdown_signal = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down...");
        registry.close_all().await;
        primary.close_all();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
