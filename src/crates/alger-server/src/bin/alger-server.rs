//! Alger server binary.

use std::path::Path;
use std::sync::Arc;

use alger_dag::NodeRegistry;
use alger_server::db::{DatabaseConnection, SqliteGateway};
use alger_server::{AlgerServer, AppState, ServerConfig, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("failed to load configuration file: {err}. Using defaults.");
            let mut config = ServerConfig::default();
            config.apply_env();
            config
        }
    };
    tracing::info!("database path: {}", config.database.path);

    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::info!("connecting to database");
    let db = DatabaseConnection::new(&config.database_url()).await?;
    tracing::info!("running database migrations");
    db.run_migrations().await?;
    db.health_check().await?;

    let gateway = Arc::new(SqliteGateway::new(db));
    gateway.seed_defaults().await?;

    let state = Arc::new(ServerState::new(&config.limits));
    let app = AppState {
        config: Arc::new(config),
        gateway,
        registry: Arc::new(NodeRegistry::with_builtins()),
        state,
    };

    let server = AlgerServer::bind(app).await?;
    tracing::info!("starting alger server on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        _ = shutdown_signal() => tracing::info!("alger server shut down gracefully"),
    }
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received CTRL-C signal, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM signal, shutting down");
        }
    }
}
