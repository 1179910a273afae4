//! `OrgVault` server entry point.
//!
//! Loads configuration, opens the storage backend, wires the core stores,
//! applies the optional seed document, then starts the Axum HTTP server with
//! graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use orgvault_core::seed::{Seed, apply_seed};
use orgvault_core::{Argon2Hasher, JwtSigner, SecretHasher, TokenSigner};
use orgvault_storage::{MemoryBackend, StorageBackend};

use orgvault_server::build_router;
use orgvault_server::config::{ServerConfig, StorageBackendType};
use orgvault_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    // JSON logs; RUST_LOG overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "OrgVault starting");
    if config.ephemeral_signing_key {
        warn!("dev mode: using a per-process signing key, tokens will not survive a restart");
    }

    let state = build_app_state(&config).await?;
    let app = build_router(Arc::clone(&state));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("cannot listen on {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "OrgVault server listening");

    tokio::spawn(shutdown_signal(shutdown_tx));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // A dropped sender also ends the wait.
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server terminated with an error")?;

    info!("OrgVault server stopped");
    Ok(())
}

/// Open storage, build the stores and apply the seed file if one is configured.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("storage: memory, all data is lost on exit");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "storage: redb");
            Arc::new(
                orgvault_storage::RedbBackend::open(path)
                    .context("cannot open redb database")?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("ORGVAULT_STORAGE=redb needs the redb-backend feature");
        }
    };

    let hasher: Arc<dyn SecretHasher> = Arc::new(Argon2Hasher::new(config.hash_pepper.clone()));
    let signer: Arc<dyn TokenSigner> = Arc::new(JwtSigner::new(
        config.signing_key.expose().as_bytes(),
        config.token_ttl,
    ));
    let state = Arc::new(AppState::new(storage, hasher, signer));

    if let Some(path) = &config.seed_file {
        let seed = Seed::from_path(path)
            .await
            .with_context(|| format!("failed to load seed file {path}"))?;
        let report = apply_seed(&seed, &state.hierarchy, &state.identity, &state.vault)
            .await
            .context("failed to apply seed")?;
        info!(
            ous = report.ous_created,
            divisions = report.divisions_created,
            users = report.users_created,
            credentials = report.credentials_created,
            "seed file applied"
        );
    }

    Ok(state)
}

/// Resolve on SIGINT or SIGTERM and flip the shutdown flag.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("draining connections before exit");
    let _ = shutdown_tx.send(true);
}
