// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Praxis event/webhook core.
//!
//! Durable, at-least-once webhook processing for the practice-management
//! platform:
//!
//! - **Ingestion**: signature verification, idempotent storage keyed by the
//!   provider event id, job enqueue.
//! - **Job Queue**: Postgres-backed, dedup on job key, bounded retries with
//!   exponential backoff, exclusive claims with lock-timeout reclaim.
//! - **Dispatch**: workers route stored webhooks by event-type prefix to the
//!   onboarding / payments / subscriptions processors.
//! - **Publisher & Outbox**: transactional domain event publication, plus a
//!   best-effort mode for actions driven by external API calls.
//! - **Handler Registry**: priority-ordered in-process fan-out with
//!   stop-propagation and per-handler error isolation.

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod ingest;
pub mod outbox;
pub mod processors;
pub mod publisher;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod replay;
pub mod router;
pub mod store;
pub mod verify;

// Envelope
pub use envelope::{
    Actor, ActorType, DomainEvent, DomainEventBuilder, DomainEventType, NewDomainEvent,
    ProviderEvent,
};

// Error
pub use error::{EventError, EventResult};

// Ingestion
pub use ingest::{IngestOutcome, WebhookIngest, WebhookSecrets, WebhookSource};

// Queue
pub use queue::{tasks, EnqueueOptions, JobQueue, QueuedJob, DEFAULT_MAX_ATTEMPTS};

// Publisher
pub use publisher::{EventPublisher, PublishOutcome};

// Registry
pub use registry::{DispatchSummary, EventHandler, HandlerFlow, HandlerRegistry, Registration};

// Router
pub use router::{route_event_type, WebhookRoute};

// Store
pub use store::{StoredWebhook, WebhookEventRecord, WebhookStatusFilter, WebhookStore};

// Processors
pub use processors::{
    onboarding_status, AccountState, OnboardingStatus, PaymentState, ProcessedAs, ProcessorSet,
};

// Dispatch / maintenance
pub use dispatch::DispatchWorker;
pub use outbox::OutboxDrain;
pub use recovery::RecoverySweep;
pub use replay::{ReplayService, WebhookReplayResult};

use sqlx::PgPool;

/// The assembled event core: every service the API server and worker need,
/// wired over one pool.
#[derive(Clone)]
pub struct EventCore {
    pub ingest: WebhookIngest,
    pub store: WebhookStore,
    pub queue: JobQueue,
    pub publisher: EventPublisher,
    pub processors: ProcessorSet,
    pub replay: ReplayService,
    pub outbox: OutboxDrain,
    pub recovery: RecoverySweep,
}

impl EventCore {
    pub fn new(pool: PgPool, secrets: WebhookSecrets) -> Self {
        let store = WebhookStore::new(pool.clone());
        let queue = JobQueue::new(pool.clone());
        let publisher = EventPublisher::new(pool.clone());
        let processors = ProcessorSet::new(pool.clone(), publisher.clone());

        Self {
            ingest: WebhookIngest::new(store.clone(), queue.clone(), secrets),
            replay: ReplayService::new(store.clone(), processors.clone()),
            outbox: OutboxDrain::new(pool),
            recovery: RecoverySweep::new(store.clone(), queue.clone()),
            store,
            queue,
            publisher,
            processors,
        }
    }
}
