//! `rpaflow-worker` -- execution engine daemon.
//!
//! Signs in to the message broker as the service principal, registers
//! the engine's inbound queue, then runs the reconciliation sweep and
//! the recurrence trigger until terminated. Configuration is read from
//! the environment; see [`EngineConfig::from_env`].
//!
//! Set `LOG_FORMAT=json` for structured JSON log lines.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rpaflow_engine::{
    Dispatcher, EngineConfig, JwtIssuer, MemoizedWorkerLookup, Reconciler, RecurrenceTrigger,
    StoreWorkerLookup, SystemClock, WorkerLookup,
};
use rpaflow_queue::reconnect::ReconnectConfig;
use rpaflow_queue::{QueueClient, Transport};
use rpaflow_store::{EntityStore, QueueEntityStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long background loops get to finish after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        queue_url = %config.queue_url,
        queue_name = %config.queue_name,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        trigger_interval_secs = config.trigger_interval.as_secs(),
        "Loaded engine configuration",
    );

    // --- Broker connection ---
    let transport = Transport::new(config.queue_url.clone(), ReconnectConfig::default());
    let client = QueueClient::new(transport).await;
    client
        .connect()
        .await
        .context("Failed to connect to message broker")?;

    let session = client
        .signin(&config.service_username, &config.service_password)
        .await
        .context("Service sign-in failed")?;

    let queue_name = client
        .register_queue(Some(&config.queue_name), &session)
        .await
        .context("Failed to register engine queue")?;
    let mut inbound = client.subscribe_queue(&queue_name).await;
    let inbound_handle = tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            tracing::debug!(
                queue = %message.queuename,
                correlation_id = ?message.correlation_id,
                "Message on engine queue",
            );
        }
    });
    tracing::info!(queue = %queue_name, "Engine queue registered");

    // --- Engine components ---
    let clock = Arc::new(SystemClock);
    let store: Arc<dyn EntityStore> = Arc::new(QueueEntityStore::new(client.clone()));
    let workers: Arc<dyn WorkerLookup> = Arc::new(MemoizedWorkerLookup::new(StoreWorkerLookup::new(
        Arc::clone(&store),
        session.clone(),
        config.robot_username.clone(),
    )));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        Arc::new(client.clone()),
        workers,
        clock.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        session.clone(),
        clock.clone(),
        config.instance_batch_size,
    ));
    let trigger = Arc::new(RecurrenceTrigger::new(
        Arc::clone(&store),
        session,
        dispatcher,
        Arc::new(JwtIssuer::new(config.jwt.clone(), SystemClock)),
        clock,
        config.default_expiration_ms,
    ));

    // --- Background loops ---
    let cancel = CancellationToken::new();
    let reconcile_handle = tokio::spawn(reconciler.run(config.reconcile_interval, cancel.clone()));
    let trigger_handle = tokio::spawn(trigger.run(config.trigger_interval, cancel.clone()));
    tracing::info!("Engine started (reconciler, recurrence trigger)");

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, reconcile_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, trigger_handle).await;
    tracing::info!("Background loops stopped");

    client.shutdown();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, inbound_handle).await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rpaflow_worker=info,rpaflow_engine=info,rpaflow_queue=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
