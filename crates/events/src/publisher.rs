//! Domain event publication.
//!
//! Two publication modes with distinct guarantees:
//!
//! - `publish_tx` writes the outbox row inside the caller's transaction, so
//!   the event commits atomically with the state change it describes.
//! - `publish` / `publish_simple` are best-effort, used only when the
//!   triggering action is itself an external API call and no local
//!   transaction exists to join. Event loss on a crash between the external
//!   call and the publish is an accepted, explicit exception to the
//!   audit-completeness invariant.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::envelope::{Actor, DomainEvent, DomainEventType, NewDomainEvent};
use crate::error::{EventError, EventResult};
use crate::queue::{tasks, EnqueueOptions, JobQueue};

/// How a domain event was published. Callers and tests can tell the strict
/// once-and-only-once contexts from accepted at-most-once ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Committed atomically with the caller's state mutation.
    Durable { event_id: Uuid },
    /// Written outside any transaction; may be lost on a crash.
    BestEffort { event_id: Uuid },
}

impl PublishOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            PublishOutcome::Durable { event_id } | PublishOutcome::BestEffort { event_id } => {
                *event_id
            }
        }
    }
}

#[derive(Clone)]
pub struct EventPublisher {
    pool: PgPool,
    queue: JobQueue,
}

impl EventPublisher {
    pub fn new(pool: PgPool) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self { pool, queue }
    }

    /// Publish inside the caller's transaction.
    ///
    /// The outbox row commits or rolls back with the business mutation;
    /// fan-out is picked up by the outbox drain after commit.
    pub async fn publish_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: NewDomainEvent,
    ) -> EventResult<PublishOutcome> {
        let event_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO domain_events
                (event_id, event_type, actor_id, actor_type, organization_id, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event_id)
        .bind(event.event_type.as_str())
        .bind(&event.actor.actor_id)
        .bind(event.actor.actor_type.as_str())
        .bind(event.organization_id)
        .bind(&event.payload)
        .execute(&mut **tx)
        .await?;

        Ok(PublishOutcome::Durable { event_id })
    }

    /// Best-effort publish outside any transaction.
    ///
    /// Also enqueues the fan-out job immediately; an enqueue failure is
    /// logged and left to the outbox drain.
    pub async fn publish(&self, event: NewDomainEvent) -> EventResult<PublishOutcome> {
        let event_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO domain_events
                (event_id, event_type, actor_id, actor_type, organization_id, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event_id)
        .bind(event.event_type.as_str())
        .bind(&event.actor.actor_id)
        .bind(event.actor.actor_type.as_str())
        .bind(event.organization_id)
        .bind(&event.payload)
        .execute(&self.pool)
        .await?;

        if let Err(e) = self
            .queue
            .enqueue(
                tasks::PROCESS_EVENT_HANDLER,
                serde_json::json!({ "event_id": event_id }),
                EnqueueOptions::keyed(event_id.to_string()),
            )
            .await
        {
            tracing::warn!(
                event_id = %event_id,
                error = %e,
                "Failed to enqueue fan-out job; outbox drain will pick it up"
            );
        }

        Ok(PublishOutcome::BestEffort { event_id })
    }

    /// Best-effort publish with an empty payload.
    pub async fn publish_simple(
        &self,
        event_type: DomainEventType,
        actor: Actor,
    ) -> EventResult<PublishOutcome> {
        self.publish(NewDomainEvent {
            event_type,
            actor,
            organization_id: None,
            payload: serde_json::Value::Null,
        })
        .await
    }

    /// Load a stored domain event for fan-out.
    pub async fn load(&self, event_id: Uuid) -> EventResult<DomainEvent> {
        sqlx::query_as(
            r#"
            SELECT event_id, event_type, actor_id, actor_type, organization_id,
                   payload, created_at, dispatched_at
            FROM domain_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EventError::NotFound(format!("domain event {event_id}")))
    }

    /// Mark an event's fan-out as complete.
    pub async fn mark_dispatched(&self, event_id: Uuid) -> EventResult<()> {
        sqlx::query("UPDATE domain_events SET dispatched_at = NOW() WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_variants_expose_event_id() {
        let id = Uuid::new_v4();
        assert_eq!(PublishOutcome::Durable { event_id: id }.event_id(), id);
        assert_eq!(PublishOutcome::BestEffort { event_id: id }.event_id(), id);
    }

    #[test]
    fn durable_and_best_effort_are_distinguishable() {
        let id = Uuid::new_v4();
        assert_ne!(
            PublishOutcome::Durable { event_id: id },
            PublishOutcome::BestEffort { event_id: id }
        );
    }
}
