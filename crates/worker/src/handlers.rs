//! Concrete event handlers and the boot-time registry wiring.
//!
//! Handlers must tolerate redelivery: the fan-out job is at-least-once, so
//! every write here is keyed on the event id.

use std::sync::Arc;

use async_trait::async_trait;
use praxis_events::{
    DomainEvent, DomainEventType, EventError, EventHandler, EventResult, HandlerFlow,
    HandlerRegistry, Registration,
};
use sqlx::PgPool;

/// Records every subscribed event in the log stream. Runs first so the
/// audit trail exists even when a later handler halts propagation.
pub struct AuditLogHandler;

#[async_trait]
impl EventHandler for AuditLogHandler {
    async fn handle(&self, event: &DomainEvent) -> EventResult<HandlerFlow> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            actor_id = %event.actor_id,
            actor_type = %event.actor_type,
            organization_id = ?event.organization_id,
            "Audit: domain event"
        );
        Ok(HandlerFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "audit_log"
    }
}

/// Halts payment fan-out for practices under a compliance hold, so the
/// ledger never records funds the practice cannot touch.
pub struct ComplianceHoldHandler {
    pool: PgPool,
}

impl ComplianceHoldHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventHandler for ComplianceHoldHandler {
    async fn handle(&self, event: &DomainEvent) -> EventResult<HandlerFlow> {
        let Some(practice_id) = event.organization_id else {
            return Ok(HandlerFlow::Continue);
        };

        // A practice may have several connected accounts; any restricted one
        // puts the whole practice on hold.
        let on_hold: bool = sqlx::query_scalar(
            r#"
            SELECT COALESCE(bool_or(pa.disabled_reason IS NOT NULL), FALSE)
            FROM practice_accounts pa
            WHERE pa.practice_id = $1
            "#,
        )
        .bind(practice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EventError::Database(e.to_string()))?;

        if on_hold {
            tracing::warn!(
                event_id = %event.event_id,
                practice_id = %practice_id,
                "Practice account restricted; halting payment fan-out"
            );
            return Ok(HandlerFlow::Stop);
        }

        Ok(HandlerFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "compliance_hold"
    }
}

/// Appends successful payments to the reporting ledger read model.
pub struct PaymentLedgerHandler {
    pool: PgPool,
}

impl PaymentLedgerHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventHandler for PaymentLedgerHandler {
    async fn handle(&self, event: &DomainEvent) -> EventResult<HandlerFlow> {
        let amount_cents = event
            .payload
            .get("amount_cents")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let currency = event
            .payload
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or("usd");
        let provider_payment_id = event
            .payload
            .get("provider_payment_id")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        // Redelivery-safe: the event id is unique per ledger row.
        sqlx::query(
            r#"
            INSERT INTO payment_ledger
                (event_id, practice_id, provider_payment_id, amount_cents, currency, recorded_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.organization_id)
        .bind(provider_payment_id)
        .bind(amount_cents)
        .bind(currency)
        .execute(&self.pool)
        .await
        .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(HandlerFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "payment_ledger"
    }
}

/// Build the handler registry during worker boot. Registration happens
/// single-threaded here; the result is shared read-only.
pub fn build_registry(pool: &PgPool) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let audit: Arc<dyn EventHandler> = Arc::new(AuditLogHandler);
    for event_type in [
        DomainEventType::OnboardingStatusChanged,
        DomainEventType::OnboardingCompleted,
        DomainEventType::PaymentSucceeded,
        DomainEventType::PaymentFailed,
        DomainEventType::SubscriptionChanged,
    ] {
        registry.subscribe(event_type, Registration::new(audit.clone()).priority(100));
    }

    registry.subscribe(
        DomainEventType::PaymentSucceeded,
        Registration::new(Arc::new(ComplianceHoldHandler::new(pool.clone())))
            .priority(50)
            .stop_propagation(),
    );

    registry.subscribe(
        DomainEventType::PaymentSucceeded,
        Registration::new(Arc::new(PaymentLedgerHandler::new(pool.clone()))).priority(10),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[tokio::test]
    async fn registry_orders_payment_handlers_by_priority() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/praxis")
            .unwrap();

        let registry = build_registry(&pool);
        let names: Vec<&str> = registry
            .handlers_for(DomainEventType::PaymentSucceeded.as_str())
            .iter()
            .map(|r| r.handler.name())
            .collect();

        assert_eq!(names, vec!["audit_log", "compliance_hold", "payment_ledger"]);
    }

    async fn db_pool() -> PgPool {
        let url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect to test database");
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .expect("run migrations");
        pool
    }

    fn payment_event(practice_id: Uuid) -> DomainEvent {
        DomainEvent {
            event_id: Uuid::new_v4(),
            event_type: DomainEventType::PaymentSucceeded.as_str().to_string(),
            actor_id: "evt_hold_test".to_string(),
            actor_type: "webhook".to_string(),
            organization_id: Some(practice_id),
            payload: json!({
                "provider_payment_id": "pi_hold_test",
                "amount_cents": 5_000,
                "currency": "usd",
            }),
            created_at: OffsetDateTime::now_utc(),
            dispatched_at: None,
        }
    }

    async fn insert_practice(pool: &PgPool) -> Uuid {
        sqlx::query_scalar("INSERT INTO practices (name) VALUES ($1) RETURNING id")
            .bind(format!("Practice {}", Uuid::new_v4().simple()))
            .fetch_one(pool)
            .await
            .expect("insert practice")
    }

    async fn insert_account(pool: &PgPool, practice_id: Uuid, disabled_reason: Option<&str>) {
        sqlx::query(
            r#"
            INSERT INTO practice_accounts (stripe_account_id, practice_id, disabled_reason)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(format!("acct_{}", Uuid::new_v4().simple()))
        .bind(practice_id)
        .bind(disabled_reason)
        .execute(pool)
        .await
        .expect("insert practice account");
    }

    #[tokio::test]
    #[ignore]
    async fn any_restricted_account_puts_the_practice_on_hold() {
        let pool = db_pool().await;
        let practice_id = insert_practice(&pool).await;

        // Two connected accounts, only one restricted; the hold must not
        // depend on which row the lookup happens to see first.
        insert_account(&pool, practice_id, None).await;
        insert_account(&pool, practice_id, Some("requirements.past_due")).await;

        let handler = ComplianceHoldHandler::new(pool.clone());
        let flow = handler
            .handle(&payment_event(practice_id))
            .await
            .expect("handle");
        assert_eq!(flow, HandlerFlow::Stop);
    }

    #[tokio::test]
    #[ignore]
    async fn unrestricted_accounts_let_payments_through() {
        let pool = db_pool().await;
        let practice_id = insert_practice(&pool).await;
        insert_account(&pool, practice_id, None).await;
        insert_account(&pool, practice_id, None).await;

        let handler = ComplianceHoldHandler::new(pool.clone());
        let flow = handler
            .handle(&payment_event(practice_id))
            .await
            .expect("handle");
        assert_eq!(flow, HandlerFlow::Continue);

        // A practice with no mirrored accounts at all is not held either.
        let bare_practice = insert_practice(&pool).await;
        let flow = handler
            .handle(&payment_event(bare_practice))
            .await
            .expect("handle");
        assert_eq!(flow, HandlerFlow::Continue);
    }

    #[tokio::test]
    async fn every_domain_event_type_is_audited() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/praxis")
            .unwrap();

        let registry = build_registry(&pool);
        for event_type in [
            DomainEventType::OnboardingStatusChanged,
            DomainEventType::OnboardingCompleted,
            DomainEventType::PaymentSucceeded,
            DomainEventType::PaymentFailed,
            DomainEventType::SubscriptionChanged,
        ] {
            let names: Vec<&str> = registry
                .handlers_for(event_type.as_str())
                .iter()
                .map(|r| r.handler.name())
                .collect();
            assert!(names.contains(&"audit_log"), "{event_type} not audited");
        }
    }
}
