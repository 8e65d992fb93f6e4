// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health-platform baselines used as the zero point for race deltas.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative totals reported by (or anchored from) the health platform.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HealthTotals {
    pub steps: u64,
    /// Kilometers
    pub distance: f64,
    pub calories: f64,
}

impl HealthTotals {
    pub fn is_zero(&self) -> bool {
        self.steps == 0 && self.distance == 0.0 && self.calories == 0.0
    }
}

/// Per-(user, race) anchor record, stored in `race_baselines`.
///
/// Legacy baselines hold the day's totals at the last sync and are reset on
/// day rollover. Time-based baselines hold the totals captured at race join
/// and are never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub user_id: String,
    pub race_id: String,
    #[serde(default)]
    pub race_title: Option<String>,
    #[serde(default)]
    pub is_time_based: bool,

    // ─── Legacy (day-based) ──────────────────────────────────────
    #[serde(default)]
    pub baseline_steps: u64,
    #[serde(default)]
    pub baseline_distance: f64,
    #[serde(default)]
    pub baseline_calories: f64,
    #[serde(default)]
    pub baseline_date: Option<NaiveDate>,

    // ─── Time-based ──────────────────────────────────────────────
    #[serde(default)]
    pub health_kit_steps_at_start: u64,
    #[serde(default)]
    pub health_kit_distance_at_start: f64,
    #[serde(default)]
    pub health_kit_calories_at_start: f64,
    #[serde(default)]
    pub race_start_time: Option<DateTime<Utc>>,
    /// Progress dropped by the per-sync cap, subtracted from race progress
    #[serde(default)]
    pub capped_steps_excluded: u64,
    #[serde(default)]
    pub capped_distance_excluded: f64,
    #[serde(default)]
    pub capped_calories_excluded: f64,

    /// Highest participant step count seen at sync time (diagnostics)
    #[serde(default)]
    pub max_participant_steps: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Baseline {
    /// Legacy baseline anchored at today's totals.
    pub fn legacy(
        user_id: &str,
        race_id: &str,
        totals: HealthTotals,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            race_id: race_id.to_string(),
            race_title: None,
            is_time_based: false,
            baseline_steps: totals.steps,
            baseline_distance: totals.distance,
            baseline_calories: totals.calories,
            baseline_date: Some(date),
            health_kit_steps_at_start: 0,
            health_kit_distance_at_start: 0.0,
            health_kit_calories_at_start: 0.0,
            race_start_time: None,
            capped_steps_excluded: 0,
            capped_distance_excluded: 0.0,
            capped_calories_excluded: 0.0,
            max_participant_steps: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Time-based baseline anchored at the totals captured when the user joined.
    pub fn time_based(
        user_id: &str,
        race_id: &str,
        race_title: Option<String>,
        at_start: HealthTotals,
        race_start_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            race_id: race_id.to_string(),
            race_title,
            is_time_based: true,
            baseline_steps: 0,
            baseline_distance: 0.0,
            baseline_calories: 0.0,
            baseline_date: None,
            health_kit_steps_at_start: at_start.steps,
            health_kit_distance_at_start: at_start.distance,
            health_kit_calories_at_start: at_start.calories,
            race_start_time,
            capped_steps_excluded: 0,
            capped_distance_excluded: 0.0,
            capped_calories_excluded: 0.0,
            max_participant_steps: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The totals deltas are measured against.
    pub fn anchor(&self) -> HealthTotals {
        if self.is_time_based {
            HealthTotals {
                steps: self.health_kit_steps_at_start,
                distance: self.health_kit_distance_at_start,
                calories: self.health_kit_calories_at_start,
            }
        } else {
            HealthTotals {
                steps: self.baseline_steps,
                distance: self.baseline_distance,
                calories: self.baseline_calories,
            }
        }
    }

    /// Progress a time-based baseline has permanently excluded.
    pub fn capped_excess(&self) -> HealthTotals {
        HealthTotals {
            steps: self.capped_steps_excluded,
            distance: self.capped_distance_excluded,
            calories: self.capped_calories_excluded,
        }
    }

    /// Add capped-away progress to the excluded totals.
    pub fn excluding(&self, discarded: HealthTotals, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.capped_steps_excluded = self.capped_steps_excluded.saturating_add(discarded.steps);
        next.capped_distance_excluded += discarded.distance;
        next.capped_calories_excluded += discarded.calories;
        next.updated_at = now;
        next
    }

    /// Move a legacy baseline to new totals. Time-based baselines are returned unchanged.
    pub fn rebased(
        &self,
        totals: HealthTotals,
        date: NaiveDate,
        participant_steps: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut next = self.clone();
        if self.is_time_based {
            return next;
        }
        next.baseline_steps = totals.steps;
        next.baseline_distance = totals.distance;
        next.baseline_calories = totals.calories;
        next.baseline_date = Some(date);
        next.max_participant_steps = self.max_participant_steps.max(participant_steps);
        next.updated_at = now;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(steps: u64) -> HealthTotals {
        HealthTotals {
            steps,
            distance: steps as f64 * 0.0008,
            calories: steps as f64 * 0.04,
        }
    }

    #[test]
    fn test_time_based_rebase_is_noop() {
        let now = Utc::now();
        let baseline = Baseline::time_based("u", "r", None, totals(1000), None, now);
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let rebased = baseline.rebased(totals(5000), date, 4000, now);
        assert_eq!(rebased, baseline);
        assert_eq!(rebased.anchor().steps, 1000);
    }

    #[test]
    fn test_legacy_rebase_tracks_max_steps() {
        let now = Utc::now();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let baseline = Baseline::legacy("u", "r", totals(1000), date, now);
        let rebased = baseline.rebased(totals(3000), date, 2000, now);
        assert_eq!(rebased.anchor().steps, 3000);
        assert_eq!(rebased.max_participant_steps, 2000);

        let again = rebased.rebased(totals(3500), date, 1500, now);
        assert_eq!(again.max_participant_steps, 2000);
    }

    #[test]
    fn test_date_serializes_as_plain_day() {
        let now = Utc::now();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let json = serde_json::to_value(Baseline::legacy("u", "r", totals(1), date, now)).unwrap();
        assert_eq!(json["baselineDate"], "2025-03-01");
        assert_eq!(json["isTimeBased"], false);
    }
}
