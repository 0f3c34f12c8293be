//! Durable webhook store.
//!
//! One row per distinct provider event id, regardless of how many times the
//! provider retries delivery. Rows are never deleted; they are the audit
//! trail and the source of truth for retries and replay.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::envelope::ProviderEvent;
use crate::error::{EventError, EventResult};

/// Stored webhook event record.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub provider_event_id: String,
    pub source: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub processed: bool,
    pub processed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub error_stack: Option<String>,
    pub retry_count: i32,
    pub created_at: OffsetDateTime,
}

/// Result of the idempotent insert.
#[derive(Debug, Clone)]
pub struct StoredWebhook {
    pub webhook_id: Uuid,
    /// The provider event was seen before and its effects already applied.
    pub already_processed: bool,
}

#[derive(Clone)]
pub struct WebhookStore {
    pool: PgPool,
}

impl WebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a webhook row if this provider event id is new.
    ///
    /// The unique constraint on `provider_event_id` is the idempotency
    /// guard: a concurrent duplicate delivery loses the insert race and
    /// falls through to the lookup.
    pub async fn insert_if_new(
        &self,
        source: &str,
        event: &ProviderEvent,
        payload: &JsonValue,
    ) -> EventResult<StoredWebhook> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (provider_event_id, source, event_type, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event.id)
        .bind(source)
        .bind(&event.event_type)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id,)) = inserted {
            return Ok(StoredWebhook {
                webhook_id: id,
                already_processed: false,
            });
        }

        // Duplicate delivery: reuse the existing row.
        let (id, processed): (Uuid, bool) = sqlx::query_as(
            "SELECT id, processed FROM webhook_events WHERE provider_event_id = $1",
        )
        .bind(&event.id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            provider_event_id = %event.id,
            event_type = %event.event_type,
            processed = processed,
            "Duplicate webhook delivery"
        );

        Ok(StoredWebhook {
            webhook_id: id,
            already_processed: processed,
        })
    }

    pub async fn get(&self, id: Uuid) -> EventResult<WebhookEventRecord> {
        sqlx::query_as(
            r#"
            SELECT id, provider_event_id, source, event_type, payload, processed,
                   processed_at, error, error_stack, retry_count, created_at
            FROM webhook_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EventError::NotFound(format!("webhook event {id}")))
    }

    pub async fn find_by_provider_id(
        &self,
        provider_event_id: &str,
    ) -> EventResult<Option<WebhookEventRecord>> {
        let record = sqlx::query_as(
            r#"
            SELECT id, provider_event_id, source, event_type, payload, processed,
                   processed_at, error, error_stack, retry_count, created_at
            FROM webhook_events
            WHERE provider_event_id = $1
            "#,
        )
        .bind(provider_event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Mark a webhook's effects as applied.
    pub async fn mark_processed(&self, id: Uuid) -> EventResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = TRUE, processed_at = NOW(), error = NULL, error_stack = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a processing failure and bump the retry counter.
    ///
    /// After the queue exhausts `max_attempts`, this stored error is the
    /// only record of the terminal failure.
    pub async fn record_failure(&self, id: Uuid, error: &str, error_stack: &str) -> EventResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET error = $2, error_stack = $3, retry_count = retry_count + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(error_stack)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List stored webhooks, optionally filtered to failed or processed rows.
    pub async fn list(
        &self,
        status_filter: Option<WebhookStatusFilter>,
        limit: i64,
        offset: i64,
    ) -> EventResult<Vec<WebhookEventRecord>> {
        let base = r#"
            SELECT id, provider_event_id, source, event_type, payload, processed,
                   processed_at, error, error_stack, retry_count, created_at
            FROM webhook_events
        "#;

        let records = match status_filter {
            Some(WebhookStatusFilter::Failed) => {
                sqlx::query_as(&format!(
                    "{base} WHERE processed = FALSE AND error IS NOT NULL \
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            Some(WebhookStatusFilter::Processed) => {
                sqlx::query_as(&format!(
                    "{base} WHERE processed = TRUE \
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            Some(WebhookStatusFilter::Pending) => {
                sqlx::query_as(&format!(
                    "{base} WHERE processed = FALSE AND error IS NULL \
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "{base} ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    /// Unprocessed, never-failed rows older than the grace window with no
    /// queue entry at all.
    ///
    /// These are deliveries that were stored durably but whose enqueue was
    /// lost (QueueUnavailable after the insert); the recovery sweep
    /// re-enqueues them. Rows with a recorded error are excluded: a job that
    /// exhausted its attempts is a terminal failure, not a stranded one.
    pub async fn stranded(
        &self,
        grace: Duration,
        limit: i64,
    ) -> EventResult<Vec<WebhookEventRecord>> {
        let cutoff = OffsetDateTime::now_utc() - grace;

        let records = sqlx::query_as(
            r#"
            SELECT w.id, w.provider_event_id, w.source, w.event_type, w.payload,
                   w.processed, w.processed_at, w.error, w.error_stack,
                   w.retry_count, w.created_at
            FROM webhook_events w
            WHERE w.processed = FALSE
              AND w.error IS NULL
              AND w.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM queued_jobs j
                  WHERE j.job_key = w.provider_event_id
                    AND j.completed_at IS NULL
              )
            ORDER BY w.created_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatusFilter {
    Pending,
    Processed,
    Failed,
}

impl WebhookStatusFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WebhookStatusFilter::Pending),
            "processed" => Some(WebhookStatusFilter::Processed),
            "failed" => Some(WebhookStatusFilter::Failed),
            _ => None,
        }
    }
}
