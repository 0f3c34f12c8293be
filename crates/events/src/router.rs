//! Event-type routing.
//!
//! Simple string-prefix dispatch from a provider event type to exactly one
//! domain processor. Unknown types fall through to an explicit
//! "acknowledged, no handler" outcome rather than an error; they are logged
//! at info so new event types show up in the stream.

/// Which domain processor handles an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRoute {
    Onboarding,
    Payments,
    Subscriptions,
    /// No handler configured; mark processed as a no-op.
    Acknowledge,
}

pub fn route_event_type(event_type: &str) -> WebhookRoute {
    // account.external_account.* is covered by the account. prefix.
    if event_type.starts_with("account.") || event_type.starts_with("capability.") {
        WebhookRoute::Onboarding
    } else if event_type.starts_with("customer.subscription.") {
        WebhookRoute::Subscriptions
    } else if event_type.starts_with("payment_intent.") || event_type == "charge.succeeded" {
        WebhookRoute::Payments
    } else {
        WebhookRoute::Acknowledge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_prefixes() {
        assert_eq!(route_event_type("account.updated"), WebhookRoute::Onboarding);
        assert_eq!(
            route_event_type("account.external_account.created"),
            WebhookRoute::Onboarding
        );
        assert_eq!(
            route_event_type("capability.updated"),
            WebhookRoute::Onboarding
        );
    }

    #[test]
    fn payment_prefixes() {
        assert_eq!(
            route_event_type("payment_intent.succeeded"),
            WebhookRoute::Payments
        );
        assert_eq!(
            route_event_type("payment_intent.payment_failed"),
            WebhookRoute::Payments
        );
        assert_eq!(route_event_type("charge.succeeded"), WebhookRoute::Payments);
    }

    #[test]
    fn subscription_lifecycle() {
        assert_eq!(
            route_event_type("customer.subscription.updated"),
            WebhookRoute::Subscriptions
        );
        assert_eq!(
            route_event_type("customer.subscription.deleted"),
            WebhookRoute::Subscriptions
        );
    }

    #[test]
    fn everything_else_is_acknowledged() {
        assert_eq!(route_event_type("charge.failed"), WebhookRoute::Acknowledge);
        assert_eq!(route_event_type("invoice.paid"), WebhookRoute::Acknowledge);
        assert_eq!(route_event_type("customer.created"), WebhookRoute::Acknowledge);
        assert_eq!(route_event_type(""), WebhookRoute::Acknowledge);
    }
}
