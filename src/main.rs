//! OpenSASE Ordering - order intake and payment service

use anyhow::Result;
use opensase_ordering::api::{self, AppState};
use opensase_ordering::domain::catalog::{demo_items, CatalogSource, StaticCatalog};
use opensase_ordering::gateway::{MpesaGateway, PaymentGateway, SimulatedGateway};
use opensase_ordering::store::{InMemoryOrderStore, OrderStore, PgCatalog, PgOrderStore};
use opensase_ordering::OrderingConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = OrderingConfig::from_env()?;

    let (catalog, store): (Arc<dyn CatalogSource>, Arc<dyn OrderStore>) = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            (Arc::new(PgCatalog::new(db.clone(), &config.currency)), Arc::new(PgOrderStore::new(db)))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, using the demo catalog and an in-memory order store");
            (Arc::new(StaticCatalog::new(demo_items(&config.currency))), Arc::new(InMemoryOrderStore::new()))
        }
    };

    let gateway: Arc<dyn PaymentGateway> = if config.mpesa.is_configured() {
        tracing::info!(environment = ?config.mpesa.environment, shortcode = %config.mpesa.business_shortcode, "using M-Pesa STK push");
        Arc::new(MpesaGateway::new(config.mpesa.clone())?)
    } else {
        tracing::warn!("M-Pesa credentials missing, mobile-money payments are simulated");
        Arc::new(SimulatedGateway::new(Duration::from_secs(2)))
    };

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => async_nats::connect(&url).await.map_err(|e| tracing::warn!(error = %e, "NATS unavailable, events not published")).ok(),
        Err(_) => None,
    };

    let state = AppState::new(config, catalog, gateway, store, nats);

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweeper.config.session_idle_timeout / 2);
        loop {
            tick.tick().await;
            let evicted = sweeper.sweep_idle_sessions().await;
            if evicted > 0 {
                tracing::info!(evicted, "idle checkout sessions dropped");
            }
        }
    });

    let app = api::router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    let port = std::env::var("PORT").unwrap_or_else(|_| "8083".to_string());
    tracing::info!("🚀 OpenSASE Ordering listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}
