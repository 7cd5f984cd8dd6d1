//! GeoMC Store - storefront and fulfillment service

use anyhow::Result;
use geomc_store::api::{self, AppState, Integrations};
use geomc_store::config::AppConfig;
use geomc_store::domain::events::EventPublisher;
use geomc_store::minecraft::{MojangProfiles, RconEntitlements};
use geomc_store::payments::{StripeClient, WebhookVerifier};
use geomc_store::services::RedirectUrls;
use geomc_store::storage::PgStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let cfg = AppConfig::from_env()?;

    let db = PgPoolOptions::new().max_connections(10).connect(&cfg.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &cfg.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, domain events will only be logged");
                None
            }
        },
        None => None,
    };

    let integrations = Integrations {
        processor: Arc::new(StripeClient::new(cfg.payment.clone())?),
        entitlements: Arc::new(RconEntitlements::new(cfg.rcon.clone())),
        profiles: Arc::new(MojangProfiles::new(&cfg.mojang)?),
        events: EventPublisher::new(nats),
    };
    let verifier = WebhookVerifier::new(cfg.payment.webhook_secret.clone(), cfg.payment.webhook_tolerance);
    let state = AppState::new(Arc::new(PgStore::new(db)), integrations, verifier, RedirectUrls::for_site(&cfg.site_url));
    let app = api::router(state);

    tracing::info!("🚀 GeoMC Store listening on 0.0.0.0:{}", cfg.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cfg.port)).await?, app).await?;
    Ok(())
}
