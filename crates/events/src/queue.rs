//! Durable, Postgres-backed job queue.
//!
//! Decouples webhook HTTP latency from processing latency. Enqueue is
//! idempotent on `job_key` (a partial unique index over unconsumed jobs);
//! claims are exclusive single-row updates with `FOR UPDATE SKIP LOCKED`,
//! and a lock older than the lock timeout is reclaimable by another worker.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{EventError, EventResult};

/// Task identifiers used as queue routing keys.
pub mod tasks {
    pub const PROCESS_STRIPE_WEBHOOK: &str = "process-stripe-webhook";
    pub const PROCESS_ONBOARDING_WEBHOOK: &str = "process-onboarding-webhook";
    pub const PROCESS_EVENT_HANDLER: &str = "process-event-handler";
    pub const PROCESS_OUTBOX_EVENT: &str = "process-outbox-event";
}

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// A job lock older than this is considered abandoned and may be claimed by
/// another worker. Processors must tolerate the rare double-invocation this
/// allows; the provider-event-id uniqueness constraint is the secondary
/// idempotency guard.
pub const LOCK_TIMEOUT: Duration = Duration::minutes(10);

/// Retry delay for attempt `n` (1-based): 30s doubling per attempt, capped
/// at one hour.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exp = attempts.saturating_sub(1).clamp(0, 7) as u32;
    let secs = 30i64.saturating_mul(1i64 << exp);
    Duration::seconds(secs.min(3600))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJob {
    pub id: Uuid,
    pub task_identifier: String,
    pub payload: JsonValue,
    pub job_key: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: OffsetDateTime,
    pub locked_at: Option<OffsetDateTime>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
}

impl QueuedJob {
    /// True when this claim consumed the job's final attempt.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Dedup key; an unconsumed job with the same key makes enqueue a no-op.
    pub job_key: Option<String>,
    pub max_attempts: Option<i32>,
}

impl EnqueueOptions {
    pub fn keyed(job_key: impl Into<String>) -> Self {
        Self {
            job_key: Some(job_key.into()),
            max_attempts: None,
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job. Idempotent for a given `job_key` while a matching
    /// unconsumed job exists.
    pub async fn enqueue(
        &self,
        task_identifier: &str,
        payload: JsonValue,
        options: EnqueueOptions,
    ) -> EventResult<()> {
        let max_attempts = options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let result = sqlx::query(
            r#"
            INSERT INTO queued_jobs (task_identifier, payload, job_key, max_attempts)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_key) WHERE completed_at IS NULL DO NOTHING
            "#,
        )
        .bind(task_identifier)
        .bind(&payload)
        .bind(&options.job_key)
        .bind(max_attempts)
        .execute(&self.pool)
        .await
        .map_err(|e| EventError::QueueUnavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                task = task_identifier,
                job_key = ?options.job_key,
                "Job already queued, enqueue is a no-op"
            );
        }

        Ok(())
    }

    /// Claim one runnable job for exclusive processing.
    ///
    /// The claim bumps `attempts`, so a job is handed out at most
    /// `max_attempts` times across all workers.
    pub async fn claim(&self, worker_id: &str) -> EventResult<Option<QueuedJob>> {
        let now = OffsetDateTime::now_utc();
        let lock_expired_before = now - LOCK_TIMEOUT;

        let job = sqlx::query_as(
            r#"
            UPDATE queued_jobs
            SET locked_at = NOW(), locked_by = $1, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM queued_jobs
                WHERE completed_at IS NULL
                  AND run_at <= $2
                  AND attempts < max_attempts
                  AND (locked_at IS NULL OR locked_at < $3)
                ORDER BY run_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, task_identifier, payload, job_key, attempts, max_attempts,
                      run_at, locked_at, locked_by, last_error, created_at
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(lock_expired_before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Retire a job after successful processing.
    pub async fn complete(&self, job_id: Uuid) -> EventResult<()> {
        sqlx::query(
            r#"
            UPDATE queued_jobs
            SET completed_at = NOW(), locked_at = NULL, locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Release a failed job for a later retry with exponential backoff.
    ///
    /// Once `attempts` has reached `max_attempts` the claim query stops
    /// selecting the job: the failure is terminal and visible only through
    /// the stored error fields.
    pub async fn fail(&self, job: &QueuedJob, error: &str) -> EventResult<()> {
        let next_run = OffsetDateTime::now_utc() + backoff_delay(job.attempts);

        sqlx::query(
            r#"
            UPDATE queued_jobs
            SET locked_at = NULL, locked_by = NULL, last_error = $2, run_at = $3
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(error)
        .bind(next_run)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of unconsumed jobs carrying the given key. Used by tests and
    /// the recovery sweep.
    pub async fn live_jobs_for_key(&self, job_key: &str) -> EventResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM queued_jobs WHERE job_key = $1 AND completed_at IS NULL",
        )
        .bind(job_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(1), Duration::seconds(30));
        assert_eq!(backoff_delay(2), Duration::seconds(60));
        assert_eq!(backoff_delay(3), Duration::seconds(120));
        assert_eq!(backoff_delay(4), Duration::seconds(240));
        // Capped at one hour regardless of attempt count.
        assert_eq!(backoff_delay(8), Duration::seconds(3600));
        assert_eq!(backoff_delay(50), Duration::seconds(3600));
    }

    #[test]
    fn backoff_is_monotonic_until_cap() {
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = backoff_delay(attempt);
            assert!(delay >= previous, "attempt {attempt} regressed");
            previous = delay;
        }
    }

    #[test]
    fn zero_or_negative_attempts_use_base_delay() {
        assert_eq!(backoff_delay(0), Duration::seconds(30));
        assert_eq!(backoff_delay(-3), Duration::seconds(30));
    }

    #[test]
    fn final_attempt_detection() {
        let job = QueuedJob {
            id: Uuid::new_v4(),
            task_identifier: tasks::PROCESS_STRIPE_WEBHOOK.to_string(),
            payload: serde_json::json!({}),
            job_key: None,
            attempts: 5,
            max_attempts: 5,
            run_at: OffsetDateTime::now_utc(),
            locked_at: None,
            locked_by: None,
            last_error: None,
            created_at: OffsetDateTime::now_utc(),
        };
        assert!(job.is_final_attempt());
    }
}
