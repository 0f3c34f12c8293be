//! Outbox drain.
//!
//! Transactionally published events have no fan-out job of their own (the
//! publisher can't know when the caller's transaction commits), so a sweep
//! enqueues `process-outbox-event` jobs for undispatched outbox rows. The
//! job key is the event id, which also dedupes against the immediate-enqueue
//! path used by best-effort publishes.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EventResult;
use crate::queue::{tasks, EnqueueOptions, JobQueue};

#[derive(Clone)]
pub struct OutboxDrain {
    pool: PgPool,
    queue: JobQueue,
}

impl OutboxDrain {
    pub fn new(pool: PgPool) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self { pool, queue }
    }

    /// Enqueue fan-out jobs for up to `batch` undispatched events.
    pub async fn drain(&self, batch: i64) -> EventResult<usize> {
        let pending: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT event_id FROM domain_events
            WHERE dispatched_at IS NULL
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;

        let mut enqueued = 0;
        for (event_id,) in pending {
            match self
                .queue
                .enqueue(
                    tasks::PROCESS_OUTBOX_EVENT,
                    serde_json::json!({ "event_id": event_id }),
                    EnqueueOptions::keyed(event_id.to_string()),
                )
                .await
            {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    tracing::warn!(
                        event_id = %event_id,
                        error = %e,
                        "Failed to enqueue outbox fan-out job"
                    );
                }
            }
        }

        if enqueued > 0 {
            tracing::info!(enqueued = enqueued, "Outbox drain enqueued fan-out jobs");
        }

        Ok(enqueued)
    }
}
