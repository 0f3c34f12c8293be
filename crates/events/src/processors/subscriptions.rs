//! Subscriptions processor.
//!
//! Subscription lifecycle (`customer.subscription.*`) is owned by the
//! upstream billing integration; the event core acknowledges these
//! deliveries without applying state so the audit trail stays complete.

use crate::envelope::ProviderEvent;

#[derive(Clone, Default)]
pub struct SubscriptionsProcessor;

impl SubscriptionsProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, event: &ProviderEvent) {
        tracing::info!(
            provider_event_id = %event.id,
            event_type = %event.event_type,
            "Subscription event delegated to billing integration - acknowledged"
        );
    }
}
