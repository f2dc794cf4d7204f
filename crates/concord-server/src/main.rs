mod config;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use concord_api::password::PasswordHasher;
use concord_api::router::build_router;
use concord_api::state::AppStateInner;
use concord_api::tokens::TokenService;
use concord_db::Database;
use concord_store::MemoryStore;
use concord_store::sweeper::run_expiry_loop;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging before reading the rest of the config so its warnings show
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config::log_filter().into()),
        )
        .init();

    let config = ServerConfig::from_env();

    if config.is_dev_jwt_secret() {
        warn!("CONCORD_JWT_SECRET is not set, using the development secret. Do not run this in production.");
    }

    let tokens = TokenService::new(&config.jwt_secret)?;
    let hasher = PasswordHasher::new(config.argon2_memory_kib, config.argon2_iterations)?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Ephemeral store: refresh sessions and the message bus
    let store = Arc::new(MemoryStore::new());
    let shutdown = CancellationToken::new();

    let sweeper = tokio::spawn(run_expiry_loop(
        store.clone(),
        config.session_sweep_interval,
        shutdown.clone(),
    ));

    let state = AppStateInner::new(db, store.clone(), store, tokens, hasher, shutdown.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Concord server listening on {}", config.listen_addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Sockets are upgraded out of hyper's tracking; this ends them.
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    info!("Concord server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
