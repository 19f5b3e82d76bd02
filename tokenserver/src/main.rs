//! Token server
//!
//! Exchanges identity assertions for node-scoped bearer tokens.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenserver::{
    load_or_generate_keypair, routes, AppState, ChainWorker, Config, MemoryAssignment,
    NodeAssignment, SqliteAssignment, TokenIssuer, Verifier, WorkerPool,
};
use tokenserver_core::ClaimsValidator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(?config, "Loaded configuration");
    if config.trusted_roots.is_empty() {
        tracing::warn!("No trusted roots configured; every assertion will be rejected");
    }

    let keypair = load_or_generate_keypair(&config.key_file)?;
    tracing::info!(
        public_key = %keypair.public_key().to_base64(),
        "Loaded token signing key"
    );

    match &config.database_path {
        Some(path) => {
            let backend = SqliteAssignment::open(path)
                .with_context(|| format!("Failed to open database {}", path))?;
            tracing::info!(path = %path, "Using SQLite assignment backend");
            serve(config.clone(), keypair, backend).await
        }
        None => {
            tracing::info!("Using in-memory assignment backend");
            serve(config.clone(), keypair, MemoryAssignment::new()).await
        }
    }
}

async fn serve<B>(config: Config, keypair: tokenserver_core::KeyPair, backend: B) -> Result<()>
where
    B: NodeAssignment + 'static,
{
    for node in &config.nodes {
        let id = backend.add_node(&node.url, node.capacity)?;
        tracing::info!(node = ?id, url = %node.url, capacity = node.capacity, "Registered node");
    }

    let pool = WorkerPool::start(config.worker_pool_size, ChainWorker::new())
        .context("Failed to start crypto workers")?;
    tracing::info!(workers = pool.size(), "Started crypto worker pool");

    let claims = ClaimsValidator::new(&config.audience)
        .with_secondary_issuers(config.secondary_issuers.iter().cloned());
    let verifier = Verifier::new(
        pool,
        Arc::new(config.trusted_roots.clone()),
        claims,
        config.worker_timeout(),
    );
    let state = Arc::new(
        AppState::new(
            verifier,
            backend,
            TokenIssuer::new(keypair, config.token_ttl()),
            config.services.iter().cloned(),
        )
        .with_backend_timeout(config.backend_timeout()),
    );

    let app = routes::create_router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Token server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    match Arc::try_unwrap(state) {
        Ok(state) => state.verifier.into_runner().shutdown(),
        Err(_) => tracing::warn!("Requests still in flight; leaving crypto workers to exit"),
    }
    Ok(())
}
