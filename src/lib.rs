// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! StepzSync race engine
//!
//! This crate provides the backend that turns health-platform step counts
//! into race progress, ranks participants, and keeps denormalized race
//! aggregates in sync with participant records.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::RaceStore;
use services::{DeadlineScheduler, Notifier, ProgressReconciler, RankEngine, TriggerService};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RaceStore>,
    pub reconciler: ProgressReconciler,
    pub ranks: RankEngine,
    pub scheduler: DeadlineScheduler,
    pub triggers: TriggerService,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RaceStore>, notifier: Notifier) -> Self {
        let policy = config.sync_policy.clone();
        Self {
            reconciler: ProgressReconciler::new(store.clone(), policy.clone()),
            ranks: RankEngine::new(store.clone(), policy.rank_tie_tolerance_km),
            scheduler: DeadlineScheduler::new(store.clone(), notifier.clone(), policy.clone()),
            triggers: TriggerService::new(store.clone(), notifier, policy),
            store,
            config,
        }
    }
}
