//! appforge server entry point.
//!
//! Opens the storage backend, seeds templates, then starts the Axum HTTP
//! server with graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use appforge_core::credential::CredentialFormat;
use appforge_core::repository::Repository;
use appforge_server::config::{ServerConfig, StorageBackendType};
use appforge_server::routes;
use appforge_server::seed::seed_templates;
use appforge_server::state::AppState;
use appforge_storage::{MemoryBackend, StorageBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "appforge starting");

    let state = build_app_state(&config).await?;
    let app = routes::build(state, config.body_limit);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, public_url = %config.public_url, "appforge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("appforge server stopped");
    Ok(())
}

/// Open storage, seed templates and build the shared state.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            if let Some(parent) = std::path::Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            Arc::new(appforge_storage::RedbBackend::open(path).context("failed to open redb storage")?)
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
    };

    let format = match &config.credential_pattern {
        Some(pattern) => CredentialFormat::new(pattern).context("invalid APPFORGE_CREDENTIAL_PATTERN")?,
        None => CredentialFormat::default(),
    };

    let repository = Arc::new(Repository::new(storage, config.public_url.clone()));

    if let Some(dir) = &config.templates_dir {
        let stored = seed_templates(repository.as_ref(), dir).await?;
        info!(dir = %dir.display(), stored, "templates seeded");
    }

    if config.admin_token.is_none() {
        warn!("APPFORGE_ADMIN_TOKEN is not set; the admin API is open");
    }

    let state = AppState::new(repository, config.storage_backend.name())
        .with_admin_token(config.admin_token.clone())
        .with_format(format);
    Ok(Arc::new(state))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
