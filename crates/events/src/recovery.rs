//! Recovery sweep for stranded webhook rows.
//!
//! A webhook delivery is durably stored before its job is enqueued; when the
//! enqueue fails (queue unavailable), the HTTP caller gets a 5xx but the row
//! survives. This sweep finds unprocessed, never-failed rows past a grace
//! window that have no queue entry and re-enqueues them, so that failure
//! mode loses no data.

use time::Duration;

use crate::error::EventResult;
use crate::queue::{tasks, EnqueueOptions, JobQueue};
use crate::router::{route_event_type, WebhookRoute};
use crate::store::WebhookStore;

/// Deliveries younger than this are left alone; their enqueue may simply not
/// have happened yet.
const STRANDED_GRACE: Duration = Duration::minutes(5);

const SWEEP_BATCH: i64 = 100;

#[derive(Clone)]
pub struct RecoverySweep {
    store: WebhookStore,
    queue: JobQueue,
}

impl RecoverySweep {
    pub fn new(store: WebhookStore, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    /// Re-enqueue stranded webhook rows. Returns how many were re-enqueued.
    pub async fn requeue_stranded(&self) -> EventResult<usize> {
        let stranded = self.store.stranded(STRANDED_GRACE, SWEEP_BATCH).await?;
        let mut requeued = 0;

        for record in stranded {
            let task = match route_event_type(&record.event_type) {
                WebhookRoute::Onboarding => tasks::PROCESS_ONBOARDING_WEBHOOK,
                _ => tasks::PROCESS_STRIPE_WEBHOOK,
            };

            match self
                .queue
                .enqueue(
                    task,
                    serde_json::json!({
                        "webhook_id": record.id,
                        "provider_event_id": record.provider_event_id,
                    }),
                    EnqueueOptions::keyed(record.provider_event_id.clone()),
                )
                .await
            {
                Ok(()) => {
                    requeued += 1;
                    tracing::info!(
                        webhook_id = %record.id,
                        provider_event_id = %record.provider_event_id,
                        event_type = %record.event_type,
                        "Stranded webhook re-enqueued"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        webhook_id = %record.id,
                        error = %e,
                        "Failed to re-enqueue stranded webhook"
                    );
                }
            }
        }

        Ok(requeued)
    }
}
