//! Domain event processors.
//!
//! Each processor consumes one webhook payload and applies an idempotent
//! state transition to its own tables. Processors always re-derive the full
//! target state from the event payload instead of applying deltas, so
//! replays and out-of-order deliveries are safe.

mod onboarding;
mod payments;
mod subscriptions;

pub use onboarding::{onboarding_status, AccountState, OnboardingProcessor, OnboardingStatus};
pub use payments::{PaymentState, PaymentsProcessor};
pub use subscriptions::SubscriptionsProcessor;

use sqlx::PgPool;

use crate::envelope::ProviderEvent;
use crate::error::EventResult;
use crate::publisher::EventPublisher;
use crate::router::{route_event_type, WebhookRoute};
use crate::store::WebhookEventRecord;

/// How a webhook was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedAs {
    Onboarding,
    Payments,
    /// Subscription lifecycle is owned by the upstream billing integration.
    SubscriptionsSkipped,
    /// No handler configured; acknowledged as a no-op.
    Acknowledged,
}

/// The full set of domain processors, shared by the dispatch worker and the
/// replay service.
#[derive(Clone)]
pub struct ProcessorSet {
    onboarding: OnboardingProcessor,
    payments: PaymentsProcessor,
    subscriptions: SubscriptionsProcessor,
}

impl ProcessorSet {
    pub fn new(pool: PgPool, publisher: EventPublisher) -> Self {
        Self {
            onboarding: OnboardingProcessor::new(pool.clone(), publisher.clone()),
            payments: PaymentsProcessor::new(pool, publisher),
            subscriptions: SubscriptionsProcessor::new(),
        }
    }

    /// Route a stored webhook to exactly one processor and apply its effect.
    pub async fn process(
        &self,
        record: &WebhookEventRecord,
        event: &ProviderEvent,
    ) -> EventResult<ProcessedAs> {
        match route_event_type(&event.event_type) {
            WebhookRoute::Onboarding => {
                self.onboarding.process(record, event).await?;
                Ok(ProcessedAs::Onboarding)
            }
            WebhookRoute::Payments => {
                self.payments.process(record, event).await?;
                Ok(ProcessedAs::Payments)
            }
            WebhookRoute::Subscriptions => {
                self.subscriptions.process(event);
                Ok(ProcessedAs::SubscriptionsSkipped)
            }
            WebhookRoute::Acknowledge => {
                tracing::info!(
                    provider_event_id = %event.id,
                    event_type = %event.event_type,
                    "Unhandled provider event type - acknowledged without effect"
                );
                Ok(ProcessedAs::Acknowledged)
            }
        }
    }
}
