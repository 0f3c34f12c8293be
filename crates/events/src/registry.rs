//! In-process event handler registry and fan-out.
//!
//! The registry is an explicit object built during the worker's boot phase
//! (single-threaded registration), then shared read-only behind an `Arc`.
//! Dispatch runs handlers for an event type in descending-priority order,
//! awaiting each before the next; a failing handler is logged and isolated
//! from its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::{DomainEvent, DomainEventType};
use crate::error::EventResult;

/// What a handler wants done with the rest of the dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFlow {
    Continue,
    /// Halt lower-priority handlers for this dispatch only.
    Stop,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> EventResult<HandlerFlow>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// A handler plus its dispatch options.
pub struct Registration {
    pub handler: Arc<dyn EventHandler>,
    pub priority: i32,
    /// Declares that this handler may halt propagation; a `Stop` return is
    /// honored either way, the flag documents intent at the subscription
    /// site.
    pub stop_propagation: bool,
    /// Fail the enclosing dispatch job (triggering a queue retry) when this
    /// handler errors, instead of isolating the failure.
    pub fail_dispatch_on_error: bool,
}

impl Registration {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            priority: 0,
            stop_propagation: false,
            fail_dispatch_on_error: false,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn stop_propagation(mut self) -> Self {
        self.stop_propagation = true;
        self
    }

    pub fn fail_dispatch_on_error(mut self) -> Self {
        self.fail_dispatch_on_error = true;
        self
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub invoked: usize,
    pub failed: usize,
    /// Name of the handler that halted propagation, if any.
    pub stopped_by: Option<&'static str>,
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type.
    ///
    /// Called once per handler during boot; the vector stays sorted in
    /// descending-priority order, with ties keeping registration order.
    pub fn subscribe(&mut self, event_type: DomainEventType, registration: Registration) {
        let entries = self
            .handlers
            .entry(event_type.as_str().to_string())
            .or_default();
        entries.push(registration);
        entries.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }

    pub fn handlers_for(&self, event_type: &str) -> &[Registration] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fan out one event to its subscribers.
    ///
    /// Returns `Err` only when a handler marked `fail_dispatch_on_error`
    /// fails, so the enclosing job is retried.
    pub async fn dispatch(&self, event: &DomainEvent) -> EventResult<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        for registration in self.handlers_for(&event.event_type) {
            let name = registration.handler.name();
            summary.invoked += 1;

            match registration.handler.handle(event).await {
                Ok(HandlerFlow::Continue) => {}
                Ok(HandlerFlow::Stop) => {
                    tracing::debug!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        handler = name,
                        "Handler halted propagation"
                    );
                    summary.stopped_by = Some(name);
                    break;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        handler = name,
                        error = %e,
                        "Event handler failed"
                    );
                    if registration.fail_dispatch_on_error {
                        return Err(e);
                    }
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DomainEvent;
    use crate::error::EventError;
    use serde_json::json;
    use time::OffsetDateTime;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    fn test_event(event_type: DomainEventType) -> DomainEvent {
        DomainEvent {
            event_id: Uuid::new_v4(),
            event_type: event_type.as_str().to_string(),
            actor_id: "system".to_string(),
            actor_type: "system".to_string(),
            organization_id: None,
            payload: json!({}),
            created_at: OffsetDateTime::now_utc(),
            dispatched_at: None,
        }
    }

    /// Appends its name to a shared call log.
    struct LoggingHandler {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        flow: HandlerFlow,
    }

    #[async_trait]
    impl EventHandler for LoggingHandler {
        async fn handle(&self, _event: &DomainEvent) -> EventResult<HandlerFlow> {
            self.log.lock().await.push(self.name);
            Ok(self.flow)
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &DomainEvent) -> EventResult<HandlerFlow> {
            Err(EventError::Processor("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn logging(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        flow: HandlerFlow,
    ) -> Arc<dyn EventHandler> {
        Arc::new(LoggingHandler {
            name,
            log: log.clone(),
            flow,
        })
    }

    #[tokio::test]
    async fn handlers_run_in_descending_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        registry.subscribe(
            DomainEventType::PaymentSucceeded,
            Registration::new(logging("low", &log, HandlerFlow::Continue)).priority(5),
        );
        registry.subscribe(
            DomainEventType::PaymentSucceeded,
            Registration::new(logging("high", &log, HandlerFlow::Continue)).priority(10),
        );

        let summary = registry
            .dispatch(&test_event(DomainEventType::PaymentSucceeded))
            .await
            .unwrap();

        assert_eq!(summary.invoked, 2);
        assert_eq!(*log.lock().await, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn equal_priority_keeps_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        registry.subscribe(
            DomainEventType::PaymentSucceeded,
            Registration::new(logging("first", &log, HandlerFlow::Continue)).priority(1),
        );
        registry.subscribe(
            DomainEventType::PaymentSucceeded,
            Registration::new(logging("second", &log, HandlerFlow::Continue)).priority(1),
        );

        registry
            .dispatch(&test_event(DomainEventType::PaymentSucceeded))
            .await
            .unwrap();

        assert_eq!(*log.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn stop_halts_current_dispatch_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        registry.subscribe(
            DomainEventType::PaymentSucceeded,
            Registration::new(logging("guard", &log, HandlerFlow::Stop))
                .priority(10)
                .stop_propagation(),
        );
        registry.subscribe(
            DomainEventType::PaymentSucceeded,
            Registration::new(logging("downstream", &log, HandlerFlow::Continue)).priority(5),
        );

        let summary = registry
            .dispatch(&test_event(DomainEventType::PaymentSucceeded))
            .await
            .unwrap();

        assert_eq!(summary.stopped_by, Some("guard"));
        assert_eq!(*log.lock().await, vec!["guard"]);

        // A later dispatch (new event) is unaffected by the earlier stop.
        log.lock().await.clear();
        let summary = registry
            .dispatch(&test_event(DomainEventType::PaymentSucceeded))
            .await
            .unwrap();
        assert_eq!(summary.stopped_by, Some("guard"));
        assert_eq!(summary.invoked, 1);
    }

    #[tokio::test]
    async fn stop_is_honored_without_static_flag() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        registry.subscribe(
            DomainEventType::OnboardingCompleted,
            Registration::new(logging("unflagged", &log, HandlerFlow::Stop)).priority(10),
        );
        registry.subscribe(
            DomainEventType::OnboardingCompleted,
            Registration::new(logging("downstream", &log, HandlerFlow::Continue)).priority(1),
        );

        let summary = registry
            .dispatch(&test_event(DomainEventType::OnboardingCompleted))
            .await
            .unwrap();

        assert_eq!(summary.stopped_by, Some("unflagged"));
        assert_eq!(*log.lock().await, vec!["unflagged"]);
    }

    #[tokio::test]
    async fn handler_failure_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        registry.subscribe(
            DomainEventType::PaymentFailed,
            Registration::new(Arc::new(FailingHandler)).priority(10),
        );
        registry.subscribe(
            DomainEventType::PaymentFailed,
            Registration::new(logging("survivor", &log, HandlerFlow::Continue)).priority(5),
        );

        let summary = registry
            .dispatch(&test_event(DomainEventType::PaymentFailed))
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(*log.lock().await, vec!["survivor"]);
    }

    #[tokio::test]
    async fn fail_dispatch_on_error_propagates() {
        let mut registry = HandlerRegistry::new();
        registry.subscribe(
            DomainEventType::PaymentFailed,
            Registration::new(Arc::new(FailingHandler)).fail_dispatch_on_error(),
        );

        let result = registry
            .dispatch(&test_event(DomainEventType::PaymentFailed))
            .await;
        assert!(matches!(result, Err(EventError::Processor(_))));
    }

    #[tokio::test]
    async fn unknown_event_type_dispatches_to_nobody() {
        let registry = HandlerRegistry::new();
        let summary = registry
            .dispatch(&test_event(DomainEventType::SubscriptionChanged))
            .await
            .unwrap();
        assert_eq!(summary, DispatchSummary::default());
    }
}
