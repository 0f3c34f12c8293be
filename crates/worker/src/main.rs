// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Praxis Background Worker
//!
//! Runs the durable side of webhook processing:
//! - Dispatch workers claiming queued jobs (continuous polling)
//! - Outbox drain for transactionally published events (every 15 seconds)
//! - Recovery sweep for stranded webhook rows (every minute)
//! - Health check heartbeat (every 5 minutes)

mod handlers;

use std::sync::Arc;

use praxis_events::{DispatchWorker, JobQueue, OutboxDrain, RecoverySweep, WebhookStore};
use praxis_shared::create_pool;
use tokio::sync::watch;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    create_pool(&database_url).await
}

fn worker_concurrency() -> usize {
    std::env::var("WORKER_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Praxis Worker");

    let pool = create_db_pool().await?;

    // Handler registration happens here, single-threaded, before any job
    // is claimed.
    let registry = Arc::new(handlers::build_registry(&pool));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Dispatch workers: competing consumers over the job queue.
    let concurrency = worker_concurrency();
    let mut dispatchers = Vec::with_capacity(concurrency);
    for n in 0..concurrency {
        let worker = DispatchWorker::new(
            format!("worker-{n}"),
            pool.clone(),
            registry.clone(),
        );
        let rx = shutdown_rx.clone();
        dispatchers.push(tokio::spawn(async move { worker.run(rx).await }));
    }
    info!(concurrency = concurrency, "Dispatch workers started");

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Outbox drain (every 15 seconds)
    // Enqueues fan-out jobs for transactionally published events.
    let outbox = OutboxDrain::new(pool.clone());
    scheduler
        .add(Job::new_async("*/15 * * * * *", move |_uuid, _l| {
            let outbox = outbox.clone();
            Box::pin(async move {
                match outbox.drain(100).await {
                    Ok(0) => {}
                    Ok(n) => info!(enqueued = n, "Outbox drain cycle complete"),
                    Err(e) => error!(error = %e, "Outbox drain failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Outbox drain (every 15 seconds)");

    // Job 2: Recovery sweep (every minute)
    // Re-enqueues stored webhooks whose enqueue was lost.
    let recovery = RecoverySweep::new(
        WebhookStore::new(pool.clone()),
        JobQueue::new(pool.clone()),
    );
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let recovery = recovery.clone();
            Box::pin(async move {
                match recovery.requeue_stranded().await {
                    Ok(0) => {}
                    Ok(n) => info!(requeued = n, "Recovery sweep re-enqueued stranded webhooks"),
                    Err(e) => error!(error = %e, "Recovery sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Recovery sweep (every minute)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Praxis Worker started successfully");

    // Run until interrupted, then let in-flight jobs finish.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; stopping dispatch workers");
    let _ = shutdown_tx.send(true);

    for dispatcher in dispatchers {
        let _ = dispatcher.await;
    }

    info!("Praxis Worker stopped");
    Ok(())
}
