//! Payments processor for `payment_intent.*` and `charge.succeeded` events.
//!
//! Upserts `client_payments` keyed by the provider payment id, deriving the
//! full row from each payload, and publishes the derived payment events in
//! the same transaction.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::envelope::{Actor, DomainEventBuilder, DomainEventType, ProviderEvent};
use crate::error::{EventError, EventResult};
use crate::publisher::EventPublisher;
use crate::store::WebhookEventRecord;

/// Full payment state derived from one payment_intent or charge payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentState {
    pub provider_payment_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    /// Practice attributed via `metadata.practice_id` set at intent creation.
    pub practice_id: Option<Uuid>,
}

impl PaymentState {
    pub fn from_payload(object: &JsonValue) -> EventResult<Self> {
        // A charge and its payment_intent describe the same payment; keying
        // the charge by its `payment_intent` field collapses both deliveries
        // onto one row. Standalone charges fall back to their own id.
        let provider_payment_id = object
            .get("payment_intent")
            .and_then(JsonValue::as_str)
            .or_else(|| object.get("id").and_then(JsonValue::as_str))
            .ok_or_else(|| EventError::InvalidPayload("payment object missing id".to_string()))?
            .to_string();

        let amount_cents = object
            .get("amount")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| {
                EventError::InvalidPayload("payment object missing amount".to_string())
            })?;

        let currency = object
            .get("currency")
            .and_then(JsonValue::as_str)
            .unwrap_or("usd")
            .to_string();

        let status = object
            .get("status")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown")
            .to_string();

        let practice_id = object
            .get("metadata")
            .and_then(|m| m.get("practice_id"))
            .and_then(JsonValue::as_str)
            .and_then(|id| Uuid::parse_str(id).ok());

        Ok(Self {
            provider_payment_id,
            amount_cents,
            currency,
            status,
            practice_id,
        })
    }
}

#[derive(Clone)]
pub struct PaymentsProcessor {
    pool: PgPool,
    publisher: EventPublisher,
}

impl PaymentsProcessor {
    pub fn new(pool: PgPool, publisher: EventPublisher) -> Self {
        Self { pool, publisher }
    }

    pub async fn process(
        &self,
        record: &WebhookEventRecord,
        event: &ProviderEvent,
    ) -> EventResult<()> {
        let state = PaymentState::from_payload(&event.data.object)?;

        // Fall back to the connected account when metadata carries no
        // practice id.
        let practice_id = match state.practice_id {
            Some(id) => Some(id),
            None => self.practice_for_account(event.account.as_deref()).await?,
        };

        let mut tx = self.pool.begin().await?;

        // Full-state upsert; replaying or reordering deliveries converges on
        // the last-applied payload.
        sqlx::query(
            r#"
            INSERT INTO client_payments
                (provider_payment_id, practice_id, amount_cents, currency, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (provider_payment_id) DO UPDATE SET
                practice_id = EXCLUDED.practice_id,
                amount_cents = EXCLUDED.amount_cents,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(&state.provider_payment_id)
        .bind(practice_id)
        .bind(state.amount_cents)
        .bind(&state.currency)
        .bind(&state.status)
        .execute(&mut *tx)
        .await?;

        let derived = match event.event_type.as_str() {
            "payment_intent.succeeded" | "charge.succeeded" => {
                Some(DomainEventType::PaymentSucceeded)
            }
            "payment_intent.payment_failed" => Some(DomainEventType::PaymentFailed),
            // Other payment_intent.* events (created, processing, canceled)
            // only sync the row.
            _ => None,
        };

        if let Some(event_type) = derived {
            let mut builder = DomainEventBuilder::new(event_type)
                .actor(Actor::webhook(&event.id))
                .payload(serde_json::json!({
                    "provider_payment_id": state.provider_payment_id,
                    "amount_cents": state.amount_cents,
                    "currency": state.currency,
                    "status": state.status,
                }));
            if let Some(practice_id) = practice_id {
                builder = builder.organization(practice_id);
            }
            self.publisher.publish_tx(&mut tx, builder.build()).await?;
        }

        tx.commit().await?;

        tracing::info!(
            provider_payment_id = %state.provider_payment_id,
            amount_cents = state.amount_cents,
            status = %state.status,
            practice_id = ?practice_id,
            webhook_id = %record.id,
            "Payment state applied"
        );

        Ok(())
    }

    async fn practice_for_account(&self, account: Option<&str>) -> EventResult<Option<Uuid>> {
        let Some(account) = account else {
            return Ok(None);
        };

        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM practices WHERE stripe_account_id = $1")
                .bind(account)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payment_state_from_payment_intent() {
        let practice_id = Uuid::new_v4();
        let object = json!({
            "id": "pi_123",
            "amount": 25_000,
            "currency": "usd",
            "status": "succeeded",
            "metadata": { "practice_id": practice_id.to_string() }
        });

        let state = PaymentState::from_payload(&object).unwrap();
        assert_eq!(state.provider_payment_id, "pi_123");
        assert_eq!(state.amount_cents, 25_000);
        assert_eq!(state.currency, "usd");
        assert_eq!(state.status, "succeeded");
        assert_eq!(state.practice_id, Some(practice_id));
    }

    #[test]
    fn charge_is_keyed_by_its_payment_intent() {
        let charge = json!({
            "id": "ch_456",
            "amount": 1_000,
            "currency": "eur",
            "status": "succeeded",
            "payment_intent": "pi_789"
        });
        let intent = json!({
            "id": "pi_789",
            "amount": 1_000,
            "currency": "eur",
            "status": "succeeded"
        });

        // Both deliveries of the same payment converge on one row key, so
        // the upsert cannot duplicate it.
        let from_charge = PaymentState::from_payload(&charge).unwrap();
        let from_intent = PaymentState::from_payload(&intent).unwrap();
        assert_eq!(from_charge.provider_payment_id, "pi_789");
        assert_eq!(
            from_charge.provider_payment_id,
            from_intent.provider_payment_id
        );
        assert_eq!(from_charge.currency, "eur");
        assert_eq!(from_charge.practice_id, None);
    }

    #[test]
    fn standalone_charge_falls_back_to_charge_id() {
        let object = json!({
            "id": "ch_solo",
            "amount": 2_500,
            "status": "succeeded"
        });
        let state = PaymentState::from_payload(&object).unwrap();
        assert_eq!(state.provider_payment_id, "ch_solo");
    }

    #[test]
    fn missing_amount_is_rejected() {
        let err = PaymentState::from_payload(&json!({"id": "pi_1"})).unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload(_)));
    }

    #[test]
    fn malformed_practice_metadata_is_ignored() {
        let object = json!({
            "id": "pi_2",
            "amount": 100,
            "metadata": { "practice_id": "not-a-uuid" }
        });
        let state = PaymentState::from_payload(&object).unwrap();
        assert_eq!(state.practice_id, None);
    }

    #[test]
    fn apply_is_idempotent() {
        let object = json!({"id": "pi_3", "amount": 500, "status": "succeeded"});
        assert_eq!(
            PaymentState::from_payload(&object).unwrap(),
            PaymentState::from_payload(&object).unwrap()
        );
    }
}
