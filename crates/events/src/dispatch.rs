//! Dispatch worker: claims queued jobs and applies their effect.
//!
//! Each job runs its steps sequentially (load, route, process, mark done);
//! across jobs the queue is a competing-consumers pool with no ordering
//! guarantee, so processors are full-state idempotent appliers.

use std::sync::Arc;

use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::envelope::ProviderEvent;
use crate::error::{EventError, EventResult};
use crate::processors::ProcessorSet;
use crate::publisher::EventPublisher;
use crate::queue::{tasks, JobQueue, QueuedJob};
use crate::registry::HandlerRegistry;
use crate::store::WebhookStore;

#[derive(Debug, Deserialize)]
struct WebhookJobPayload {
    webhook_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct EventJobPayload {
    event_id: Uuid,
}

pub struct DispatchWorker {
    worker_id: String,
    queue: JobQueue,
    store: WebhookStore,
    publisher: EventPublisher,
    processors: ProcessorSet,
    registry: Arc<HandlerRegistry>,
    poll_interval: Duration,
}

impl DispatchWorker {
    pub fn new(worker_id: String, pool: PgPool, registry: Arc<HandlerRegistry>) -> Self {
        let publisher = EventPublisher::new(pool.clone());
        Self {
            worker_id,
            queue: JobQueue::new(pool.clone()),
            store: WebhookStore::new(pool.clone()),
            publisher: publisher.clone(),
            processors: ProcessorSet::new(pool, publisher),
            registry,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Claim-and-process loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.worker_id, "Dispatch worker started");

        loop {
            if *shutdown.borrow() {
                tracing::info!(worker_id = %self.worker_id, "Dispatch worker stopping");
                return;
            }

            match self.process_one().await {
                // Claimed and handled a job; immediately look for the next.
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(
                        worker_id = %self.worker_id,
                        error = %e,
                        "Dispatch loop error"
                    );
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claim and process at most one job. Returns whether a job was claimed.
    pub async fn process_one(&self) -> EventResult<bool> {
        let Some(job) = self.queue.claim(&self.worker_id).await? else {
            return Ok(false);
        };

        match self.execute(&job).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
            }
            Err(e) => {
                if job.is_final_attempt() {
                    tracing::error!(
                        job_id = %job.id,
                        task = %job.task_identifier,
                        attempts = job.attempts,
                        error = %e,
                        "Job failed terminally; stored error is the only record"
                    );
                } else {
                    tracing::warn!(
                        job_id = %job.id,
                        task = %job.task_identifier,
                        attempts = job.attempts,
                        error = %e,
                        "Job failed; retry scheduled"
                    );
                }
                self.queue.fail(&job, &e.to_string()).await?;
            }
        }

        Ok(true)
    }

    async fn execute(&self, job: &QueuedJob) -> EventResult<()> {
        match job.task_identifier.as_str() {
            tasks::PROCESS_STRIPE_WEBHOOK | tasks::PROCESS_ONBOARDING_WEBHOOK => {
                self.process_webhook_job(job).await
            }
            tasks::PROCESS_EVENT_HANDLER | tasks::PROCESS_OUTBOX_EVENT => {
                self.process_event_job(job).await
            }
            other => {
                // Unknown tasks are acknowledged so a stale deployment can't
                // wedge the queue.
                tracing::warn!(job_id = %job.id, task = other, "Unknown task identifier");
                Ok(())
            }
        }
    }

    async fn process_webhook_job(&self, job: &QueuedJob) -> EventResult<()> {
        let payload: WebhookJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| EventError::InvalidPayload(format!("webhook job payload: {e}")))?;

        let record = self.store.get(payload.webhook_id).await?;

        // Secondary idempotency guard: a lock-expiry race can hand the same
        // job to two workers.
        if record.processed {
            tracing::info!(
                webhook_id = %record.id,
                provider_event_id = %record.provider_event_id,
                "Webhook already processed; skipping"
            );
            return Ok(());
        }

        let event: ProviderEvent = serde_json::from_value(record.payload.clone())
            .map_err(|e| EventError::InvalidPayload(format!("stored webhook payload: {e}")))?;

        match self.processors.process(&record, &event).await {
            Ok(outcome) => {
                self.store.mark_processed(record.id).await?;
                tracing::info!(
                    webhook_id = %record.id,
                    provider_event_id = %record.provider_event_id,
                    event_type = %record.event_type,
                    outcome = ?outcome,
                    "Webhook processed"
                );
                Ok(())
            }
            Err(e) => {
                let stack = format!("{e:?}");
                self.store
                    .record_failure(record.id, &e.to_string(), &stack)
                    .await?;
                // Re-throw so the queue schedules a retry with backoff.
                Err(e)
            }
        }
    }

    async fn process_event_job(&self, job: &QueuedJob) -> EventResult<()> {
        let payload: EventJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| EventError::InvalidPayload(format!("event job payload: {e}")))?;

        let event = self.publisher.load(payload.event_id).await?;

        if event.dispatched_at.is_some() {
            tracing::debug!(event_id = %event.event_id, "Event already dispatched; skipping");
            return Ok(());
        }

        let summary = self.registry.dispatch(&event).await?;
        self.publisher.mark_dispatched(event.event_id).await?;

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            invoked = summary.invoked,
            failed = summary.failed,
            stopped_by = ?summary.stopped_by,
            "Event fan-out complete"
        );

        Ok(())
    }
}
