// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pure progress arithmetic: turning a health-platform snapshot into a
//! race-scoped delta, and applying that delta to a participant.
//!
//! Nothing here touches the store; the reconciler feeds in what it read and
//! buffers whatever comes out.

use crate::config::SyncPolicy;
use crate::models::{Baseline, HealthTotals, Participant, Race};
use crate::time_utils::elapsed_hours;
use chrono::{DateTime, NaiveDate, Utc};

/// Client-reported cumulative totals for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub totals: HealthTotals,
    pub date: NaiveDate,
}

/// Progress to add to a participant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressDelta {
    pub steps: u64,
    /// Kilometers
    pub distance: f64,
    pub calories: f64,
}

impl From<ProgressDelta> for HealthTotals {
    fn from(delta: ProgressDelta) -> Self {
        HealthTotals {
            steps: delta.steps,
            distance: delta.distance,
            calories: delta.calories,
        }
    }
}

/// Why a race received no progress from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Legacy baseline belongs to another day
    DayRollover,
    /// Platform totals went backwards (legacy baseline)
    PlatformRecalculation,
    NoProgress,
    /// Applying the delta would lower stored progress
    Regression,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::DayRollover => "day_rollover",
            SkipReason::PlatformRecalculation => "platform_recalculation",
            SkipReason::NoProgress => "no_progress",
            SkipReason::Regression => "regression",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaDecision {
    Apply(ProgressDelta),
    /// Apply `applied`; `discarded` is the excess over the per-sync cap and
    /// must never be credited later.
    Capped {
        applied: ProgressDelta,
        discarded: ProgressDelta,
    },
    /// Re-anchor the legacy baseline at the snapshot and apply nothing.
    Rebase(SkipReason),
    Skip(SkipReason),
}

/// Compute the delta a snapshot contributes to one participant.
///
/// Legacy baselines measure the increment since the last sync. Time-based
/// baselines measure cumulative race progress since join, so the delta is
/// whatever part of it the participant has not been credited with yet.
pub fn compute_delta(
    baseline: &Baseline,
    snapshot: &Snapshot,
    participant: &Participant,
    policy: &SyncPolicy,
) -> DeltaDecision {
    let incoming = snapshot.totals;
    let anchor = baseline.anchor();

    let (steps_delta, mut distance_delta, calories_delta) = if baseline.is_time_based {
        let excluded = baseline.capped_excess();
        let race_steps = incoming
            .steps
            .saturating_sub(anchor.steps)
            .saturating_sub(excluded.steps);
        let race_distance = (incoming.distance - anchor.distance - excluded.distance).max(0.0);
        let race_calories = (incoming.calories - anchor.calories - excluded.calories).max(0.0);
        (
            // Never reset: a platform dip only clamps this call to zero.
            race_steps.saturating_sub(participant.steps),
            race_distance - participant.distance,
            race_calories - participant.calories,
        )
    } else {
        if baseline.baseline_date != Some(snapshot.date) {
            return DeltaDecision::Rebase(SkipReason::DayRollover);
        }
        if incoming.steps < anchor.steps {
            return DeltaDecision::Rebase(SkipReason::PlatformRecalculation);
        }
        (
            incoming.steps - anchor.steps,
            incoming.distance - anchor.distance,
            incoming.calories - anchor.calories,
        )
    };

    // Platforms that report steps without distance
    if steps_delta > 0 && distance_delta < policy.distance_epsilon_km {
        distance_delta = steps_delta as f64 * policy.steps_to_km;
    }

    let mut delta = ProgressDelta {
        steps: steps_delta,
        distance: distance_delta.max(0.0),
        calories: calories_delta.max(0.0),
    };

    if delta.steps == 0 && delta.distance <= 0.0 {
        return DeltaDecision::Skip(SkipReason::NoProgress);
    }

    let mut discarded = None;
    if delta.steps > policy.max_steps_per_sync {
        let ratio = policy.max_steps_per_sync as f64 / delta.steps as f64;
        tracing::warn!(
            user_id = %participant.user_id,
            race_id = %participant.race_id,
            steps = delta.steps,
            cap = policy.max_steps_per_sync,
            "Capping oversized sync delta"
        );
        let capped = ProgressDelta {
            steps: policy.max_steps_per_sync,
            distance: delta.distance * ratio,
            calories: delta.calories * ratio,
        };
        discarded = Some(ProgressDelta {
            steps: delta.steps - capped.steps,
            distance: delta.distance - capped.distance,
            calories: delta.calories - capped.calories,
        });
        delta = capped;
    }

    match (participant.steps.checked_add(delta.steps), discarded) {
        (Some(total), _) if total < participant.steps => DeltaDecision::Skip(SkipReason::Regression),
        (None, _) => DeltaDecision::Skip(SkipReason::Regression),
        (Some(_), None) => DeltaDecision::Apply(delta),
        (Some(_), Some(discarded)) => DeltaDecision::Capped {
            applied: delta,
            discarded,
        },
    }
}

/// Apply a delta, returning the participant as it should be written.
///
/// Distance is clamped to `[current, race total]`. Completion is one-way and
/// `completedAt` is stamped once. The version is bumped for the commit-time
/// precondition.
pub fn apply_delta(
    participant: &Participant,
    delta: ProgressDelta,
    race: &Race,
    now: DateTime<Utc>,
) -> Participant {
    let mut next = participant.clone();

    next.steps = participant.steps.saturating_add(delta.steps);
    next.calories = participant.calories + delta.calories;
    next.distance = (participant.distance + delta.distance)
        .min(race.total_distance)
        .max(participant.distance);
    next.remaining_distance = (race.total_distance - next.distance).max(0.0);

    next.avg_speed = race
        .actual_start_time
        .or(participant.joined_at)
        .map(|start| elapsed_hours(start, now))
        .filter(|hours| *hours > 0.0)
        .map(|hours| next.distance / hours)
        .unwrap_or(0.0);

    if !next.is_completed && race.total_distance > 0.0 && next.distance >= race.total_distance {
        next.is_completed = true;
        next.completed_at = Some(now);
    }

    next.last_updated = Some(now);
    next.version = participant.version + 1;
    next
}
