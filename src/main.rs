//! M-Pesa Marketplace - order and payment backend

use std::sync::Arc;

use anyhow::Result;
use mpesa_marketplace::config::{AppConfig, StoreBackend};
use mpesa_marketplace::http::{self, AppState};
use mpesa_marketplace::mpesa::DarajaClient;
use mpesa_marketplace::notify::Notifier;
use mpesa_marketplace::store::{Inventory, MemoryStore, OrderStore, PgStore};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let (orders, inventory): (Arc<dyn OrderStore>, Arc<dyn Inventory>) = match (config.store, &config.database_url) {
        (StoreBackend::Postgres, Some(url)) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            let store = Arc::new(PgStore::new(db));
            (store.clone(), store)
        }
        (StoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL must be set"),
        (StoreBackend::Memory, _) => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable; domain events will not be published");
                None
            }
        },
        None => None,
    };

    let notifier = Notifier::new(nats);
    tracing::info!(enabled = notifier.is_enabled(), "Domain event publishing");

    let api = Arc::new(DarajaClient::new(Arc::new(config.mpesa.clone()))?);
    let state = AppState::new(&config, orders, inventory, api, notifier);
    let app = http::router(state);

    let addr = format!("{}:{}", config.server_host, config.port);
    tracing::info!("🚀 M-Pesa Marketplace listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
