//! Webhook administration routes.
//!
//! Operational surface for inspecting stored deliveries and replaying them
//! after a fix. These sit behind the deployment's network-level admin
//! boundary.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use praxis_events::{WebhookEventRecord, WebhookReplayResult, WebhookStatusFilter};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListWebhooksQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WebhookListResponse {
    pub webhooks: Vec<WebhookEventRecord>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<ListWebhooksQuery>,
) -> ApiResult<Json<WebhookListResponse>> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            WebhookStatusFilter::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status filter {raw}")))?,
        ),
        None => None,
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let webhooks = state.events.store.list(status, limit, offset).await?;

    Ok(Json(WebhookListResponse {
        webhooks,
        limit,
        offset,
    }))
}

pub async fn replay_webhook(
    State(state): State<AppState>,
    Path(provider_event_id): Path<String>,
) -> ApiResult<Json<WebhookReplayResult>> {
    let result = state.events.replay.replay(&provider_event_id).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize, Default)]
pub struct ReplayFailedRequest {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReplayFailedResponse {
    pub attempted: usize,
    pub succeeded: usize,
    pub results: Vec<WebhookReplayResult>,
}

pub async fn replay_failed_webhooks(
    State(state): State<AppState>,
    body: Option<Json<ReplayFailedRequest>>,
) -> ApiResult<Json<ReplayFailedResponse>> {
    let limit = body
        .and_then(|Json(req)| req.limit)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let results = state.events.replay.replay_all_failed(limit).await?;
    let succeeded = results.iter().filter(|r| r.success).count();

    Ok(Json(ReplayFailedResponse {
        attempted: results.len(),
        succeeded,
        results,
    }))
}
