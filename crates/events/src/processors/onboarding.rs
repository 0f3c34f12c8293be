//! Onboarding processor for Stripe Connect account events.
//!
//! Consumes `account.*` and `capability.*` webhooks and mirrors the full
//! connected-account state into `practice_accounts`, deriving the practice's
//! onboarding status. The mirror is overwritten wholesale from each payload
//! (never patched), which makes reapplying any event a no-op:
//! `apply(apply(S, E), E) == apply(S, E)`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::envelope::{Actor, DomainEventBuilder, DomainEventType, ProviderEvent};
use crate::error::{EventError, EventResult};
use crate::publisher::EventPublisher;
use crate::store::WebhookEventRecord;

/// Full state of a connected account, derived from one `account.updated`
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub stripe_account_id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub disabled_reason: Option<String>,
    pub requirements_currently_due: Vec<String>,
}

impl AccountState {
    /// Derive the full account state from the event's `data.object`.
    pub fn from_payload(object: &JsonValue) -> EventResult<Self> {
        let stripe_account_id = object
            .get("id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| EventError::InvalidPayload("account object missing id".to_string()))?
            .to_string();

        let requirements = object.get("requirements");

        Ok(Self {
            stripe_account_id,
            charges_enabled: object
                .get("charges_enabled")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            payouts_enabled: object
                .get("payouts_enabled")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            details_submitted: object
                .get("details_submitted")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            disabled_reason: requirements
                .and_then(|r| r.get("disabled_reason"))
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            requirements_currently_due: requirements
                .and_then(|r| r.get("currently_due"))
                .and_then(JsonValue::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

/// Practice onboarding status derived from the account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStatus {
    Pending,
    Restricted,
    Completed,
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStatus::Pending => "pending",
            OnboardingStatus::Restricted => "restricted",
            OnboardingStatus::Completed => "completed",
        }
    }
}

pub fn onboarding_status(state: &AccountState) -> OnboardingStatus {
    if state.charges_enabled && state.payouts_enabled && state.details_submitted {
        OnboardingStatus::Completed
    } else if state.disabled_reason.is_some() {
        OnboardingStatus::Restricted
    } else {
        OnboardingStatus::Pending
    }
}

#[derive(Clone)]
pub struct OnboardingProcessor {
    pool: PgPool,
    publisher: EventPublisher,
}

impl OnboardingProcessor {
    pub fn new(pool: PgPool, publisher: EventPublisher) -> Self {
        Self { pool, publisher }
    }

    pub async fn process(
        &self,
        record: &WebhookEventRecord,
        event: &ProviderEvent,
    ) -> EventResult<()> {
        if event.event_type.starts_with("account.external_account.") {
            return self.handle_external_account(event).await;
        }
        if event.event_type.starts_with("capability.") {
            return self.handle_capability(event).await;
        }
        if event.event_type == "account.updated" {
            return self.handle_account_updated(record, event).await;
        }

        // Other account.* events (application authorized/deauthorized etc.)
        // carry nothing the mirror tracks.
        tracing::info!(
            provider_event_id = %event.id,
            event_type = %event.event_type,
            "Onboarding event with no state to apply"
        );
        Ok(())
    }

    async fn handle_account_updated(
        &self,
        record: &WebhookEventRecord,
        event: &ProviderEvent,
    ) -> EventResult<()> {
        let state = AccountState::from_payload(&event.data.object)?;

        let practice: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, onboarding_status FROM practices WHERE stripe_account_id = $1",
        )
        .bind(&state.stripe_account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((practice_id, previous_status)) = practice else {
            // The provider can send events for accounts we never linked.
            tracing::info!(
                stripe_account_id = %state.stripe_account_id,
                "Account update for unknown practice - ignored"
            );
            return Ok(());
        };

        let status = onboarding_status(&state);

        let mut tx = self.pool.begin().await?;

        // Full-state overwrite of the mirror row.
        sqlx::query(
            r#"
            INSERT INTO practice_accounts
                (stripe_account_id, practice_id, charges_enabled, payouts_enabled,
                 details_submitted, disabled_reason, requirements_currently_due, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (stripe_account_id) DO UPDATE SET
                practice_id = EXCLUDED.practice_id,
                charges_enabled = EXCLUDED.charges_enabled,
                payouts_enabled = EXCLUDED.payouts_enabled,
                details_submitted = EXCLUDED.details_submitted,
                disabled_reason = EXCLUDED.disabled_reason,
                requirements_currently_due = EXCLUDED.requirements_currently_due,
                updated_at = NOW()
            "#,
        )
        .bind(&state.stripe_account_id)
        .bind(practice_id)
        .bind(state.charges_enabled)
        .bind(state.payouts_enabled)
        .bind(state.details_submitted)
        .bind(&state.disabled_reason)
        .bind(serde_json::json!(state.requirements_currently_due))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE practices
            SET onboarding_status = $2, charges_enabled = $3, payouts_enabled = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(practice_id)
        .bind(status.as_str())
        .bind(state.charges_enabled)
        .bind(state.payouts_enabled)
        .execute(&mut *tx)
        .await?;

        self.publisher
            .publish_tx(
                &mut tx,
                DomainEventBuilder::new(DomainEventType::OnboardingStatusChanged)
                    .actor(Actor::webhook(&event.id))
                    .organization(practice_id)
                    .payload(serde_json::json!({
                        "stripe_account_id": state.stripe_account_id,
                        "status": status.as_str(),
                        "charges_enabled": state.charges_enabled,
                        "payouts_enabled": state.payouts_enabled,
                        "requirements_currently_due": state.requirements_currently_due,
                    }))
                    .build(),
            )
            .await?;

        if status == OnboardingStatus::Completed && previous_status != "completed" {
            self.publisher
                .publish_tx(
                    &mut tx,
                    DomainEventBuilder::new(DomainEventType::OnboardingCompleted)
                        .actor(Actor::webhook(&event.id))
                        .organization(practice_id)
                        .payload(serde_json::json!({
                            "stripe_account_id": state.stripe_account_id,
                        }))
                        .build(),
                )
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            practice_id = %practice_id,
            stripe_account_id = %state.stripe_account_id,
            status = status.as_str(),
            webhook_id = %record.id,
            "Connected account state applied"
        );

        Ok(())
    }

    async fn handle_capability(&self, event: &ProviderEvent) -> EventResult<()> {
        let object = &event.data.object;
        let capability_id = object
            .get("id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| EventError::InvalidPayload("capability missing id".to_string()))?;
        let account_id = object
            .get("account")
            .and_then(JsonValue::as_str)
            .or(event.account.as_deref())
            .ok_or_else(|| EventError::InvalidPayload("capability missing account".to_string()))?;

        // Per-capability full overwrite under its own key.
        let result = sqlx::query(
            r#"
            UPDATE practice_accounts
            SET capabilities = jsonb_set(capabilities, ARRAY[$2], $3), updated_at = NOW()
            WHERE stripe_account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(capability_id)
        .bind(object)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::info!(
                stripe_account_id = %account_id,
                capability = %capability_id,
                "Capability update for unknown account - ignored"
            );
        }

        Ok(())
    }

    async fn handle_external_account(&self, event: &ProviderEvent) -> EventResult<()> {
        let account_id = event
            .data
            .object
            .get("account")
            .and_then(JsonValue::as_str)
            .or(event.account.as_deref())
            .ok_or_else(|| {
                EventError::InvalidPayload("external account missing account".to_string())
            })?;

        let has_external_account = !event.event_type.ends_with(".deleted");

        let result = sqlx::query(
            r#"
            UPDATE practice_accounts
            SET has_external_account = $2, updated_at = NOW()
            WHERE stripe_account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(has_external_account)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::info!(
                stripe_account_id = %account_id,
                "External account event for unknown account - ignored"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account_payload(charges: bool, payouts: bool, details: bool) -> JsonValue {
        json!({
            "id": "acct_123",
            "charges_enabled": charges,
            "payouts_enabled": payouts,
            "details_submitted": details,
            "requirements": {
                "currently_due": ["external_account"],
                "disabled_reason": null
            }
        })
    }

    #[test]
    fn full_state_is_derived_from_payload() {
        let state = AccountState::from_payload(&account_payload(true, false, true)).unwrap();
        assert_eq!(state.stripe_account_id, "acct_123");
        assert!(state.charges_enabled);
        assert!(!state.payouts_enabled);
        assert!(state.details_submitted);
        assert_eq!(state.requirements_currently_due, vec!["external_account"]);
        assert_eq!(state.disabled_reason, None);
    }

    #[test]
    fn missing_account_id_is_rejected() {
        let err = AccountState::from_payload(&json!({"charges_enabled": true})).unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload(_)));
    }

    #[test]
    fn missing_flags_default_to_false() {
        let state = AccountState::from_payload(&json!({"id": "acct_9"})).unwrap();
        assert!(!state.charges_enabled);
        assert!(!state.payouts_enabled);
        assert!(!state.details_submitted);
        assert!(state.requirements_currently_due.is_empty());
    }

    #[test]
    fn status_derivation() {
        let completed = AccountState::from_payload(&account_payload(true, true, true)).unwrap();
        assert_eq!(onboarding_status(&completed), OnboardingStatus::Completed);

        let pending = AccountState::from_payload(&account_payload(false, false, false)).unwrap();
        assert_eq!(onboarding_status(&pending), OnboardingStatus::Pending);

        let restricted = AccountState::from_payload(&json!({
            "id": "acct_123",
            "charges_enabled": false,
            "payouts_enabled": true,
            "details_submitted": true,
            "requirements": { "disabled_reason": "requirements.past_due" }
        }))
        .unwrap();
        assert_eq!(onboarding_status(&restricted), OnboardingStatus::Restricted);
    }

    /// The apply step is a pure function of the payload, so reapplying any
    /// payload yields the identical state: apply(apply(S, E), E) == apply(S, E).
    #[test]
    fn apply_is_idempotent() {
        let payload = account_payload(true, true, false);
        let once = AccountState::from_payload(&payload).unwrap();
        let twice = AccountState::from_payload(&payload).unwrap();
        assert_eq!(once, twice);
    }

    /// Out-of-order deliveries resolve to last-write-wins: applying B after A
    /// leaves exactly the state of B alone.
    #[test]
    fn out_of_order_apply_is_last_write_wins() {
        let state_a = account_payload(false, false, false);
        let state_b = account_payload(true, true, true);

        // Delivered in reverse order: B then A.
        let _intermediate = AccountState::from_payload(&state_b).unwrap();
        let final_state = AccountState::from_payload(&state_a).unwrap();

        assert_eq!(final_state, AccountState::from_payload(&state_a).unwrap());
        assert_eq!(onboarding_status(&final_state), OnboardingStatus::Pending);
    }
}
