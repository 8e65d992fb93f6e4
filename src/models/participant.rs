// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Race participant model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user's membership and progress within one race.
///
/// Stored in the `race_participants` collection, keyed by `{race_id}_{user_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub race_id: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,

    // ─── Progress (monotonic) ────────────────────────────────────
    #[serde(default)]
    pub steps: u64,
    /// Kilometers, capped at the race total
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub calories: f64,

    // ─── Derived ─────────────────────────────────────────────────
    #[serde(default)]
    pub remaining_distance: f64,
    /// km/h
    #[serde(default)]
    pub avg_speed: f64,
    /// 1 = best, 0 = not ranked yet
    #[serde(default)]
    pub rank: u32,

    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_removed: bool,

    /// Bumped on every progress write; compared at commit time.
    #[serde(default)]
    pub version: u64,
}

impl Participant {
    /// A freshly joined participant with no progress.
    pub fn new(race_id: &str, user_id: &str, display_name: &str, race_distance: f64) -> Self {
        Self {
            race_id: race_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            steps: 0,
            distance: 0.0,
            calories: 0.0,
            remaining_distance: race_distance.max(0.0),
            avg_speed: 0.0,
            rank: 0,
            is_completed: false,
            completed_at: None,
            last_updated: None,
            joined_at: Some(Utc::now()),
            is_removed: false,
            version: 0,
        }
    }

    /// Counted in `activeParticipantCount`: has progress but has not finished.
    pub fn is_active(&self) -> bool {
        self.steps > 0 && !self.is_completed
    }

    /// Share of the course covered, in percent.
    pub fn progress_percent(&self, race_distance: f64) -> f64 {
        if race_distance <= 0.0 {
            return 0.0;
        }
        (self.distance / race_distance * 100.0).clamp(0.0, 100.0)
    }
}
