//! Application state

use std::sync::Arc;

use praxis_events::EventCore;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub events: Arc<EventCore>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let events = Arc::new(EventCore::new(pool.clone(), config.webhook_secrets()));
        tracing::info!("Event core initialized");

        Self {
            pool,
            config,
            events,
        }
    }
}
