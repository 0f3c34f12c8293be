//! Webhook replay.
//!
//! Re-runs a stored webhook through the processors directly, bypassing the
//! queue. Useful for recovering from transient errors, re-testing after a
//! bug fix, or manual intervention on terminally failed deliveries.

use uuid::Uuid;

use crate::envelope::ProviderEvent;
use crate::error::{EventError, EventResult};
use crate::processors::ProcessorSet;
use crate::store::{WebhookStatusFilter, WebhookStore};

/// Result of one replay attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebhookReplayResult {
    pub webhook_id: Uuid,
    pub provider_event_id: String,
    pub event_type: String,
    pub previous_error: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ReplayService {
    store: WebhookStore,
    processors: ProcessorSet,
}

impl ReplayService {
    pub fn new(store: WebhookStore, processors: ProcessorSet) -> Self {
        Self { store, processors }
    }

    /// Replay a single stored webhook by its provider event id.
    pub async fn replay(&self, provider_event_id: &str) -> EventResult<WebhookReplayResult> {
        let record = self
            .store
            .find_by_provider_id(provider_event_id)
            .await?
            .ok_or_else(|| {
                EventError::NotFound(format!("webhook event {provider_event_id}"))
            })?;

        tracing::info!(
            webhook_id = %record.id,
            provider_event_id = %record.provider_event_id,
            previous_error = ?record.error,
            "Replaying webhook"
        );

        let event: ProviderEvent = serde_json::from_value(record.payload.clone())
            .map_err(|e| EventError::InvalidPayload(format!("stored webhook payload: {e}")))?;

        let result = self.processors.process(&record, &event).await;

        let (success, error) = match &result {
            Ok(_) => {
                self.store.mark_processed(record.id).await?;
                (true, None)
            }
            Err(e) => {
                let stack = format!("{e:?}");
                self.store
                    .record_failure(record.id, &e.to_string(), &stack)
                    .await?;
                (false, Some(e.to_string()))
            }
        };

        tracing::info!(
            webhook_id = %record.id,
            provider_event_id = %record.provider_event_id,
            success = success,
            "Webhook replay completed"
        );

        Ok(WebhookReplayResult {
            webhook_id: record.id,
            provider_event_id: record.provider_event_id,
            event_type: record.event_type,
            previous_error: record.error,
            success,
            error,
        })
    }

    /// Replay every failed webhook, oldest first, up to `limit`.
    pub async fn replay_all_failed(&self, limit: i64) -> EventResult<Vec<WebhookReplayResult>> {
        let failed = self
            .store
            .list(Some(WebhookStatusFilter::Failed), limit, 0)
            .await?;

        let mut results = Vec::with_capacity(failed.len());
        for record in failed {
            match self.replay(&record.provider_event_id).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(
                        provider_event_id = %record.provider_event_id,
                        error = %e,
                        "Failed to replay webhook"
                    );
                    results.push(WebhookReplayResult {
                        webhook_id: record.id,
                        provider_event_id: record.provider_event_id,
                        event_type: record.event_type,
                        previous_error: record.error,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(results)
    }
}
