//! medbridge-server entry point

use medbridge_store::SqliteStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medbridge_server::{build_router, config::ServerConfig, AppState};

#[tokio::main]
async fn main() {
    // Load configuration
    let (config, config_error) = match ServerConfig::load(
        std::path::Path::new("config.yaml")
            .exists()
            .then_some("config.yaml"),
    ) {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = ServerConfig::default();
            config.apply_env_overrides(|key| std::env::var(key).ok());
            (config, Some(e.to_string()))
        }
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .init();

    tracing::info!("Starting medbridge server...");

    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    // Create data directory
    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    let store = SqliteStore::open(config.database_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open store: {}", e);
        std::process::exit(1);
    });

    if config.auth.jwt.secret.is_none() && config.auth.jwt.public_key_file.is_none() {
        tracing::warn!("No JWT secret configured; using the development secret");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::new(config, store).unwrap_or_else(|e| {
        tracing::error!("Failed to initialize: {}", e);
        std::process::exit(1);
    });

    if !state.vault.is_enabled() {
        tracing::warn!("No ENCRYPTION_KEY configured; EHR tokens are stored unencrypted");
    }

    tracing::info!(
        ehrs = ?state.ehr_registry.known_ehrs(),
        client_id = %state.config.smart.client_id,
        "SMART client configured"
    );

    // Build router
    let app = build_router(Arc::new(state));

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Server error: {}", e);
    });

    tracing::info!("Server shut down gracefully");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
