//! HTTP route definitions

pub mod admin;
pub mod health;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/webhooks/{source}", post(webhooks::receive_webhook))
        .route("/admin/webhooks", get(admin::list_webhooks))
        .route(
            "/admin/webhooks/replay-failed",
            post(admin::replay_failed_webhooks),
        )
        .route(
            "/admin/webhooks/{provider_event_id}/replay",
            post(admin::replay_webhook),
        )
        .with_state(state)
}
