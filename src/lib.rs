pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use api::{app, create_router, AppState};
pub use logic::{diff_links, reconcile_steps, ValidationError};
pub use model::*;
pub use store::{MemoryStore, PostgresStore, Store};

use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::{AppConfig, StorageBackend};

/// Load configuration, prepare the configured store and serve until the
/// listener fails.
pub async fn run_server() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}, backend={:?}",
        config.server_address(),
        config.database.backend
    );

    match config.database.backend {
        StorageBackend::Postgres => {
            log::info!("Connecting to PostgreSQL...");
            let store = PostgresStore::new(
                &config.database_url(),
                config.database.max_connections.unwrap_or(20),
            )
            .await?;
            log::info!("Running database migrations...");
            store.migrate().await?;
            serve_store(Arc::new(store), &config).await
        }
        StorageBackend::Memory => {
            log::warn!("Using in-memory store, data is lost on shutdown");
            serve_store(Arc::new(MemoryStore::new()), &config).await
        }
    }
}

async fn serve_store<S: Store + 'static>(store: Arc<S>, config: &AppConfig) -> anyhow::Result<()> {
    seed::bootstrap_api_user(store.as_ref(), &config.auth).await?;

    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        log::info!("Loading seed data...");
        seed::load_seed_data(store.as_ref()).await?;
    }

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Case library API running on http://{}/api/v1/", bind_address);

    api::serve(listener, AppState::new(store, config.api)).await
}
