//! Webhook ingestion: verification, idempotent storage, job enqueue.
//!
//! The HTTP handler calls `verify_and_store` followed by
//! `enqueue_for_processing`, then returns 200 immediately; the actual effect
//! of the webhook is applied later by a dispatch worker.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::envelope::ProviderEvent;
use crate::error::{EventError, EventResult};
use crate::queue::{tasks, EnqueueOptions, JobQueue};
use crate::router::{route_event_type, WebhookRoute};
use crate::store::WebhookStore;
use crate::verify::verify_signature;

/// Which webhook endpoint a delivery arrived on; each has its own signing
/// secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookSource {
    /// Platform-account events.
    Account,
    /// Connected-account (Connect) events.
    Connect,
}

impl WebhookSource {
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "stripe" => Some(WebhookSource::Account),
            "stripe-connect" => Some(WebhookSource::Connect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Account => "stripe",
            WebhookSource::Connect => "stripe-connect",
        }
    }
}

/// Per-source signing secrets.
#[derive(Debug, Clone)]
pub struct WebhookSecrets {
    pub account: String,
    pub connect: String,
}

impl WebhookSecrets {
    pub fn new(account: String, connect: String) -> Self {
        Self { account, connect }
    }

    fn for_source(&self, source: WebhookSource) -> &str {
        match source {
            WebhookSource::Account => &self.account,
            WebhookSource::Connect => &self.connect,
        }
    }
}

/// Result of verifying and durably storing a delivery.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub event: ProviderEvent,
    pub webhook_id: Uuid,
    /// A previous delivery of this provider event already had its effects
    /// applied; the caller must not re-enqueue processing.
    pub already_processed: bool,
}

#[derive(Clone)]
pub struct WebhookIngest {
    store: WebhookStore,
    queue: JobQueue,
    secrets: WebhookSecrets,
}

impl WebhookIngest {
    pub fn new(store: WebhookStore, queue: JobQueue, secrets: WebhookSecrets) -> Self {
        Self {
            store,
            queue,
            secrets,
        }
    }

    /// Verify the signature against the raw body, then store the delivery.
    ///
    /// Verification failures reject before any database write. Exactly one
    /// durable row exists per distinct provider event id afterwards.
    pub async fn verify_and_store(
        &self,
        raw_body: &[u8],
        signature_header: &str,
        source: WebhookSource,
    ) -> EventResult<IngestOutcome> {
        verify_signature(self.secrets.for_source(source), raw_body, signature_header)?;

        let event = ProviderEvent::from_raw(raw_body)?;
        let payload: JsonValue = serde_json::from_slice(raw_body)
            .map_err(|e| EventError::InvalidPayload(e.to_string()))?;

        let stored = self
            .store
            .insert_if_new(source.as_str(), &event, &payload)
            .await?;

        tracing::info!(
            provider_event_id = %event.id,
            event_type = %event.event_type,
            webhook_id = %stored.webhook_id,
            already_processed = stored.already_processed,
            source = source.as_str(),
            "Webhook stored"
        );

        Ok(IngestOutcome {
            event,
            webhook_id: stored.webhook_id,
            already_processed: stored.already_processed,
        })
    }

    /// Enqueue the processing job for a stored delivery.
    ///
    /// The job key is the provider event id, so re-enqueueing an
    /// already-queued event is a no-op.
    pub async fn enqueue_for_processing(&self, outcome: &IngestOutcome) -> EventResult<()> {
        let task = match route_event_type(&outcome.event.event_type) {
            WebhookRoute::Onboarding => tasks::PROCESS_ONBOARDING_WEBHOOK,
            _ => tasks::PROCESS_STRIPE_WEBHOOK,
        };

        self.queue
            .enqueue(
                task,
                serde_json::json!({
                    "webhook_id": outcome.webhook_id,
                    "provider_event_id": outcome.event.id,
                }),
                EnqueueOptions::keyed(outcome.event.id.clone()),
            )
            .await
    }
}
