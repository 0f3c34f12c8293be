//! Provider webhook endpoints.
//!
//! `POST /webhooks/stripe` receives platform-account events and
//! `POST /webhooks/stripe-connect` receives connected-account events. The
//! handler verifies the signature against the raw body, stores the delivery
//! durably, enqueues a processing job and returns 200. Everything else
//! happens asynchronously in the worker.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use praxis_events::WebhookSource;
use serde_json::{json, Value as JsonValue};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<JsonValue>> {
    let source = WebhookSource::from_path(&source)
        .ok_or_else(|| ApiError::NotFound(format!("webhook endpoint {source}")))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::SignatureInvalid)?;

    let outcome = state
        .events
        .ingest
        .verify_and_store(&body, signature, source)
        .await?;

    // A fully processed duplicate is acknowledged without re-enqueueing; the
    // provider stops retrying and no effects run twice.
    if outcome.already_processed {
        tracing::info!(
            provider_event_id = %outcome.event.id,
            "Duplicate delivery of processed event acknowledged"
        );
        return Ok(Json(json!({ "received": true, "duplicate": true })));
    }

    // Enqueue failure is a 5xx: the provider retries, and the stored row is
    // also covered by the recovery sweep.
    state.events.ingest.enqueue_for_processing(&outcome).await?;

    Ok(Json(json!({ "received": true })))
}
