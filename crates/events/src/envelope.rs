//! Canonical event envelopes.
//!
//! Two shapes live here: the minimal view of an inbound provider (Stripe)
//! event, and the domain event envelope written to the outbox.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{EventError, EventResult};

/// Minimal parsed view of an inbound provider event.
///
/// Only the fields the core needs for routing and dedupe; everything else
/// stays opaque in `data.object`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    /// Connected account the event originates from, when delivered via a
    /// Connect webhook endpoint.
    #[serde(default)]
    pub account: Option<String>,
    pub data: ProviderEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEventData {
    pub object: JsonValue,
}

impl ProviderEvent {
    /// Parse the verified raw body into the minimal envelope.
    pub fn from_raw(raw: &[u8]) -> EventResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| EventError::InvalidPayload(format!("provider event: {e}")))
    }
}

/// Domain event types published by the event core and its processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventType {
    OnboardingStatusChanged,
    OnboardingCompleted,
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionChanged,
}

impl DomainEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventType::OnboardingStatusChanged => "ONBOARDING_STATUS_CHANGED",
            DomainEventType::OnboardingCompleted => "ONBOARDING_COMPLETED",
            DomainEventType::PaymentSucceeded => "PAYMENT_SUCCEEDED",
            DomainEventType::PaymentFailed => "PAYMENT_FAILED",
            DomainEventType::SubscriptionChanged => "SUBSCRIPTION_CHANGED",
        }
    }
}

impl fmt::Display for DomainEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Webhook,
    System,
    Api,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Webhook => "webhook",
            ActorType::System => "system",
            ActorType::Api => "api",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub actor_id: String,
    pub actor_type: ActorType,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            actor_id: id.into(),
            actor_type: ActorType::User,
        }
    }

    /// Actor for state changes driven by an inbound webhook; the id is the
    /// provider event id so the audit trail links back to the delivery.
    pub fn webhook(provider_event_id: impl Into<String>) -> Self {
        Self {
            actor_id: provider_event_id.into(),
            actor_type: ActorType::Webhook,
        }
    }

    pub fn system() -> Self {
        Self {
            actor_id: "system".to_string(),
            actor_type: ActorType::System,
        }
    }
}

/// A domain event ready for publication.
#[derive(Debug, Clone)]
pub struct NewDomainEvent {
    pub event_type: DomainEventType,
    pub actor: Actor,
    pub organization_id: Option<Uuid>,
    pub payload: JsonValue,
}

/// Builder for domain events, used by processors and domain services.
#[derive(Debug, Clone)]
pub struct DomainEventBuilder {
    event_type: DomainEventType,
    actor: Actor,
    organization_id: Option<Uuid>,
    payload: JsonValue,
}

impl DomainEventBuilder {
    pub fn new(event_type: DomainEventType) -> Self {
        Self {
            event_type,
            actor: Actor::system(),
            organization_id: None,
            payload: JsonValue::Null,
        }
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> NewDomainEvent {
        NewDomainEvent {
            event_type: self.event_type,
            actor: self.actor,
            organization_id: self.organization_id,
            payload: self.payload,
        }
    }
}

/// A domain event as stored in the outbox.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub actor_id: String,
    pub actor_type: String,
    pub organization_id: Option<Uuid>,
    pub payload: JsonValue,
    pub created_at: OffsetDateTime,
    pub dispatched_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_event_parses_minimal_envelope() {
        let raw = json!({
            "id": "evt_123",
            "type": "account.updated",
            "created": 1700000000,
            "data": { "object": { "id": "acct_1", "charges_enabled": true } }
        })
        .to_string();

        let event = ProviderEvent::from_raw(raw.as_bytes()).unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.event_type, "account.updated");
        assert!(event.account.is_none());
        assert_eq!(event.data.object["id"], "acct_1");
    }

    #[test]
    fn provider_event_rejects_garbage() {
        let err = ProviderEvent::from_raw(b"not json").unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload(_)));
    }

    #[test]
    fn builder_populates_envelope() {
        let org = Uuid::new_v4();
        let event = DomainEventBuilder::new(DomainEventType::PaymentSucceeded)
            .actor(Actor::webhook("evt_99"))
            .organization(org)
            .payload(json!({"amount_cents": 5000}))
            .build();

        assert_eq!(event.event_type, DomainEventType::PaymentSucceeded);
        assert_eq!(event.actor.actor_type, ActorType::Webhook);
        assert_eq!(event.actor.actor_id, "evt_99");
        assert_eq!(event.organization_id, Some(org));
        assert_eq!(event.payload["amount_cents"], 5000);
    }

    #[test]
    fn event_type_names_are_stable() {
        assert_eq!(
            DomainEventType::OnboardingCompleted.as_str(),
            "ONBOARDING_COMPLETED"
        );
        assert_eq!(DomainEventType::PaymentFailed.to_string(), "PAYMENT_FAILED");
    }
}
