// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! StepzSync race engine API server
//!
//! Reconciles health-platform step counts into race progress and keeps
//! race rankings and aggregates up to date.

use std::sync::Arc;
use std::time::Duration;
use stepzsync_races::{
    config::{ChangeEventSource, Config, StoreBackend},
    db::{FirestoreDb, MemoryStore, RaceStore},
    events::EventBus,
    services::{notifications::log_notifications, Notifier},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        store = ?config.store_backend,
        "Starting StepzSync race engine"
    );

    // Store commits publish change events for the triggers unless every
    // write is relayed back through /tasks/document-events
    let (bus, events) = EventBus::channel();
    let bus = match config.change_event_source {
        ChangeEventSource::Store => bus,
        ChangeEventSource::Relay => {
            tracing::info!("Change events delivered by relay only");
            EventBus::detached()
        }
    };

    let store: Arc<dyn RaceStore> = match config.store_backend {
        StoreBackend::Firestore => Arc::new(FirestoreDb::new(&config.gcp_project_id, bus).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory race store, data is not persisted");
            Arc::new(MemoryStore::new(bus))
        }
    };

    let (notifier, notifications) = Notifier::channel();
    tokio::spawn(log_notifications(notifications));

    let state = Arc::new(AppState::new(config.clone(), store, notifier));

    if config.change_event_source == ChangeEventSource::Store {
        tokio::spawn(state.triggers.clone().run(events));
        tracing::info!("Denormalization triggers running");
    }

    if config.deadline_check_interval_secs > 0 {
        let interval = Duration::from_secs(config.deadline_check_interval_secs);
        tokio::spawn(state.scheduler.clone().run(interval));
        tracing::info!(
            interval_secs = config.deadline_check_interval_secs,
            "Deadline sweep scheduled"
        );
    }

    // Build router
    let app = stepzsync_races::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stepzsync_races=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
