//! Application state for the Courier API.

use std::sync::Arc;

use anyhow::Result;
use courier_core::store;
use email_gateway::{GatewayConfig, MailTransport, SesMailer};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::ApiConfig;

pub struct AppState {
    pub db: SqlitePool,
    pub transport: Arc<dyn MailTransport>,
    pub http: reqwest::Client,
    pub gateway: GatewayConfig,
}

impl AppState {
    pub async fn new(config: &ApiConfig) -> Result<Self> {
        tracing::info!("Connecting to database: {}", config.database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;

        store::run_migrations(&pool).await?;

        let gateway = GatewayConfig::from_env();
        let transport: Arc<dyn MailTransport> = Arc::new(SesMailer::from_env().await);

        Ok(Self::with_parts(pool, transport, gateway))
    }

    /// Assemble from pre-built parts; tests use this with an in-memory pool
    /// and a mock transport.
    pub fn with_parts(
        db: SqlitePool,
        transport: Arc<dyn MailTransport>,
        gateway: GatewayConfig,
    ) -> Self {
        let http = gateway.http_client();
        Self {
            db,
            transport,
            http,
            gateway,
        }
    }
}
