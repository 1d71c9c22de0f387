mod api;
mod providers;
mod ws;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tm_core::accountant::default_cost_table;
use tm_core::kv::FileStore;
use tm_core::Core;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (registry, default_order) = providers::build_registry();

    let data_dir = std::env::var("TM_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let local = Arc::new(FileStore::open(std::path::PathBuf::from(data_dir).join("local.json")).await?);

    let config = match tm_core::config::load(local.as_ref(), &default_order).await {
        Ok(mut cfg) => {
            if cfg.provider_order.is_empty() {
                cfg.provider_order = default_order.clone();
            }
            cfg
        }
        Err(err) => {
            tracing::warn!(error = %err, "no valid persisted/env configuration found, using provider defaults");
            let mut cfg = tm_core::config::CoreConfig::default();
            cfg.provider_order = default_order.clone();
            cfg
        }
    };

    let core = Arc::new(Core::new(config, registry, local, None, default_cost_table()));
    core.init().await?;

    let senders = Arc::new(ws::WsSenders::default());
    let channel = core.request_channel(senders.clone(), None);
    let state = Arc::new(ws::AppState { channel, senders });

    let app = Router::new()
        .route("/ws", get(ws::upgrade))
        .with_state(state)
        .merge(api::router(core.clone()));

    let listen_addr = std::env::var("TM_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "translation core daemon listening");

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    let server_cancel = cancel.clone();
    tasks.spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
            .map_err(anyhow::Error::from)
    });

    let status_core = core.clone();
    let status_cancel = cancel.clone();
    tasks.spawn(async move {
        status_core
            .status
            .clone()
            .run_emitter(status_cancel, |view| {
                tracing::debug!(?view, "status badge update");
            })
            .await;
        Ok(())
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        Some(result) = tasks.join_next() => {
            match result {
                Ok(Err(err)) => tracing::error!(error = %err, "a supervised task returned an error"),
                Err(err) => tracing::error!(error = %err, "a supervised task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    cancel.cancel();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Err(err)) => tracing::error!(error = %err, "task failed during shutdown drain"),
            Err(err) => tracing::error!(error = %err, "task panicked during shutdown drain"),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}
