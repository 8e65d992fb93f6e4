// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health-data reconciliation (`syncHealthDataToRaces`) and time-based
//! baseline initialization (`initializeRaceBaseline`).
//!
//! One sync call reads every race the user is racing in, buffers the
//! resulting baseline and participant writes in a single `WriteBatch`, ranks
//! the touched races, queues auto-completion, re-checks for concurrent
//! writers, and only then commits.

use crate::config::SyncPolicy;
use crate::db::{RaceStore, WriteBatch};
use crate::error::AppError;
use crate::models::{Baseline, HealthTotals, Participant, Race};
use crate::services::completion::CompletionMonitor;
use crate::services::guard::{RaceConditionGuard, ReadMark};
use crate::services::progress::{
    apply_delta, compute_delta, DeltaDecision, ProgressDelta, Snapshot,
};
use crate::services::ranking::RankEngine;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const RETRY_MESSAGE: &str = "Race progress changed during sync, please retry";

/// Convert client-reported totals, rejecting negative or non-finite values.
pub fn totals_from_client(
    steps: f64,
    distance: f64,
    calories: f64,
) -> Result<HealthTotals, AppError> {
    for (name, value) in [("steps", steps), ("distance", distance), ("calories", calories)] {
        if !value.is_finite() || value < 0.0 {
            return Err(AppError::InvalidArgument(format!(
                "{} must be a non-negative number",
                name
            )));
        }
    }
    Ok(HealthTotals {
        steps: steps.round() as u64,
        distance,
        calories,
    })
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub user_id: String,
    pub snapshot: Snapshot,
    /// Client clock (epoch ms), logged only
    pub client_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub success: bool,
    pub races_updated: usize,
    pub message: String,
}

impl SyncOutcome {
    fn ok(races_updated: usize, message: impl Into<String>) -> Self {
        Self {
            success: true,
            races_updated,
            message: message.into(),
        }
    }

    fn retry() -> Self {
        Self {
            success: false,
            races_updated: 0,
            message: RETRY_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaselineRequest {
    pub user_id: String,
    pub race_id: String,
    pub race_title: Option<String>,
    pub race_start_time: Option<DateTime<Utc>>,
    pub at_start: HealthTotals,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineOutcome {
    pub success: bool,
    pub message: String,
    /// A time-based baseline already existed and was kept
    pub already_initialized: bool,
}

#[derive(Clone)]
pub struct ProgressReconciler {
    store: Arc<dyn RaceStore>,
    policy: SyncPolicy,
    ranks: RankEngine,
    monitor: CompletionMonitor,
    guard: RaceConditionGuard,
}

impl ProgressReconciler {
    pub fn new(store: Arc<dyn RaceStore>, policy: SyncPolicy) -> Self {
        Self {
            ranks: RankEngine::new(store.clone(), policy.rank_tie_tolerance_km),
            monitor: CompletionMonitor::new(store.clone()),
            guard: RaceConditionGuard::new(store.clone()),
            store,
            policy,
        }
    }

    /// Apply a health snapshot to every race the user is actively racing in.
    pub async fn sync_health_data(&self, request: SyncRequest) -> Result<SyncOutcome, AppError> {
        let now = Utc::now();
        let user_id = request.user_id.as_str();

        tracing::info!(
            user_id,
            steps = request.snapshot.totals.steps,
            distance = request.snapshot.totals.distance,
            date = %request.snapshot.date,
            client_timestamp = ?request.client_timestamp,
            "Syncing health data to races"
        );

        let races = self.syncable_races(user_id).await?;
        if races.is_empty() {
            return Ok(SyncOutcome::ok(0, "No active races to sync"));
        }

        let mut batch = WriteBatch::new();
        let mut marks = Vec::new();
        let mut touched: Vec<&Race> = Vec::new();

        for (race, participant) in &races {
            match self
                .reconcile_race(race, participant, &request.snapshot, &mut batch, now)
                .await
            {
                Ok(true) => {
                    marks.push(ReadMark {
                        race_id: race.id.clone(),
                        user_id: participant.user_id.clone(),
                        steps: participant.steps,
                    });
                    touched.push(race);
                }
                Ok(false) => {}
                Err(e @ AppError::FailedPrecondition(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        race_id = %race.id,
                        error = %e,
                        "Skipping race after reconciliation error"
                    );
                }
            }
        }

        for race in &touched {
            if let Err(e) = self.ranks.update_race_ranks_with(&race.id, &mut batch).await {
                tracing::warn!(race_id = %race.id, error = %e, "Failed to update race ranks");
            }
        }

        for race in &touched {
            if let Err(e) = self.monitor.check(race, &mut batch, now).await {
                tracing::warn!(race_id = %race.id, error = %e, "Auto-completion check failed");
            }
        }

        if self.guard.verify(&marks).await?.is_some() {
            return Ok(SyncOutcome::retry());
        }

        if batch.is_empty() {
            return Ok(SyncOutcome::ok(0, "No new progress to sync"));
        }

        match self.store.commit(batch).await {
            Ok(()) => {}
            Err(AppError::Conflict(msg)) => {
                tracing::warn!(user_id, conflict = %msg, "Sync batch rejected by version check");
                return Ok(SyncOutcome::retry());
            }
            Err(e) => return Err(e),
        }

        tracing::info!(user_id, races_updated = touched.len(), "Health data synced");

        let message = if touched.is_empty() {
            "Baselines updated, no new progress".to_string()
        } else {
            format!("Synced progress to {} race(s)", touched.len())
        };
        Ok(SyncOutcome::ok(touched.len(), message))
    }

    /// Races the user participates in (not removed) whose status permits sync.
    async fn syncable_races(&self, user_id: &str) -> Result<Vec<(Race, Participant)>, AppError> {
        let memberships = self.store.participations_for_user(user_id).await?;
        let mut races = Vec::new();

        for participant in memberships.into_iter().filter(|p| !p.is_removed) {
            match self.store.get_race(&participant.race_id).await {
                Ok(Some(race)) if race.status.allows_sync() => races.push((race, participant)),
                Ok(Some(race)) => {
                    tracing::debug!(
                        race_id = %race.id,
                        status = race.status.id(),
                        "Race not accepting progress"
                    );
                }
                Ok(None) => {
                    tracing::warn!(
                        user_id,
                        race_id = %participant.race_id,
                        "Participant references missing race"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        race_id = %participant.race_id,
                        error = %e,
                        "Failed to load race"
                    );
                }
            }
        }
        Ok(races)
    }

    /// Buffer this race's writes. Returns `true` when progress was applied.
    async fn reconcile_race(
        &self,
        race: &Race,
        participant: &Participant,
        snapshot: &Snapshot,
        batch: &mut WriteBatch,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let baseline = self
            .store
            .get_baseline(&participant.user_id, &race.id)
            .await?;

        let Some(baseline) = baseline else {
            if snapshot.totals.is_zero() {
                return Err(AppError::FailedPrecondition(
                    "Health data is all zero; cannot create a race baseline".to_string(),
                ));
            }
            let mut baseline = Baseline::legacy(
                &participant.user_id,
                &race.id,
                snapshot.totals,
                snapshot.date,
                now,
            );
            baseline.race_title = Some(race.title.clone());
            batch.put_baseline(baseline);
            tracing::info!(
                user_id = %participant.user_id,
                race_id = %race.id,
                steps = snapshot.totals.steps,
                "Created race baseline"
            );
            return Ok(false);
        };

        match compute_delta(&baseline, snapshot, participant, &self.policy) {
            DeltaDecision::Rebase(reason) => {
                batch.put_baseline(baseline.rebased(
                    snapshot.totals,
                    snapshot.date,
                    participant.steps,
                    now,
                ));
                tracing::info!(
                    user_id = %participant.user_id,
                    race_id = %race.id,
                    reason = reason.as_str(),
                    "Reset race baseline"
                );
                Ok(false)
            }
            DeltaDecision::Skip(reason) => {
                tracing::debug!(
                    user_id = %participant.user_id,
                    race_id = %race.id,
                    reason = reason.as_str(),
                    "No progress applied"
                );
                Ok(false)
            }
            DeltaDecision::Apply(delta) => {
                credit(race, participant, &baseline, delta, snapshot, batch, now);
                Ok(true)
            }
            DeltaDecision::Capped { applied, discarded } => {
                credit(race, participant, &baseline, applied, snapshot, batch, now);
                if baseline.is_time_based {
                    // The excess is still in the platform totals; exclude it
                    // so a repeat of this snapshot credits nothing more
                    batch.put_baseline(baseline.excluding(discarded.into(), now));
                }
                Ok(true)
            }
        }
    }

    /// Record the health totals captured when `request.user_id` joined a race.
    pub async fn initialize_baseline(
        &self,
        caller_id: &str,
        request: BaselineRequest,
    ) -> Result<BaselineOutcome, AppError> {
        if request.user_id != caller_id {
            return Err(AppError::PermissionDenied(
                "Cannot initialize a baseline for another user".to_string(),
            ));
        }
        if request.at_start.is_zero() {
            return Err(AppError::FailedPrecondition(
                "Health data at race start is all zero".to_string(),
            ));
        }

        let race = self
            .store
            .get_race(&request.race_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Race {} not found", request.race_id)))?;

        if let Some(existing) = self
            .store
            .get_baseline(&request.user_id, &request.race_id)
            .await?
        {
            if existing.is_time_based {
                tracing::info!(
                    user_id = %request.user_id,
                    race_id = %request.race_id,
                    "Time-based baseline already initialized"
                );
                return Ok(BaselineOutcome {
                    success: true,
                    message: "Baseline already initialized".to_string(),
                    already_initialized: true,
                });
            }
        }

        let now = Utc::now();
        let baseline = Baseline::time_based(
            &request.user_id,
            &request.race_id,
            request.race_title.or_else(|| Some(race.title.clone())),
            request.at_start,
            request.race_start_time.or(race.actual_start_time),
            now,
        );

        let mut batch = WriteBatch::new();
        batch.put_baseline(baseline);
        self.store.commit(batch).await?;

        tracing::info!(
            user_id = %request.user_id,
            race_id = %request.race_id,
            steps_at_start = request.at_start.steps,
            "Time-based baseline initialized"
        );

        Ok(BaselineOutcome {
            success: true,
            message: "Baseline initialized".to_string(),
            already_initialized: false,
        })
    }
}

/// Buffer the progress write for an applied delta and rebase a legacy
/// baseline past the snapshot.
fn credit(
    race: &Race,
    participant: &Participant,
    baseline: &Baseline,
    delta: ProgressDelta,
    snapshot: &Snapshot,
    batch: &mut WriteBatch,
    now: DateTime<Utc>,
) {
    let updated = apply_delta(participant, delta, race, now);
    if updated.is_completed && !participant.is_completed {
        tracing::info!(
            user_id = %participant.user_id,
            race_id = %race.id,
            "Participant finished race"
        );
    }
    if !baseline.is_time_based {
        batch.put_baseline(baseline.rebased(
            snapshot.totals,
            snapshot.date,
            updated.steps,
            now,
        ));
    }
    batch.put_progress(updated, participant.version);
}
