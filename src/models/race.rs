// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Race model, status state machine and denormalized race patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Race lifecycle status, persisted as the integer `statusId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RaceStatus {
    Created,
    Scheduled,
    Active,
    Completed,
    Paused,
    Ending,
    Cancelled,
}

impl RaceStatus {
    /// Integer id used on the wire (`statusId`).
    pub fn id(self) -> u8 {
        match self {
            RaceStatus::Created => 0,
            RaceStatus::Scheduled => 1,
            RaceStatus::Active => 3,
            RaceStatus::Completed => 4,
            RaceStatus::Paused => 5,
            RaceStatus::Ending => 6,
            RaceStatus::Cancelled => 7,
        }
    }

    /// Display string stored alongside the id.
    pub fn label(self) -> &'static str {
        match self {
            RaceStatus::Created => "Created",
            RaceStatus::Scheduled => "Scheduled",
            RaceStatus::Active => "Active",
            RaceStatus::Completed => "Completed",
            RaceStatus::Paused => "Paused",
            RaceStatus::Ending => "Ending",
            RaceStatus::Cancelled => "Cancelled",
        }
    }

    /// Whether health data may be synced into a race with this status.
    pub fn allows_sync(self) -> bool {
        matches!(
            self,
            RaceStatus::Active | RaceStatus::Paused | RaceStatus::Ending
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RaceStatus::Completed | RaceStatus::Cancelled)
    }

    /// Forward-only state machine. `Ending` never returns to `Active`.
    pub fn can_transition_to(self, next: RaceStatus) -> bool {
        use RaceStatus::*;
        matches!(
            (self, next),
            (Created, Scheduled | Active | Cancelled)
                | (Scheduled, Active | Cancelled)
                | (Active, Ending | Paused | Completed | Cancelled)
                | (Paused, Active | Completed | Cancelled)
                | (Ending, Completed | Cancelled)
        )
    }
}

impl TryFrom<u8> for RaceStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RaceStatus::Created),
            1 => Ok(RaceStatus::Scheduled),
            3 => Ok(RaceStatus::Active),
            4 => Ok(RaceStatus::Completed),
            5 => Ok(RaceStatus::Paused),
            6 => Ok(RaceStatus::Ending),
            7 => Ok(RaceStatus::Cancelled),
            other => Err(format!("unknown race statusId {}", other)),
        }
    }
}

impl From<RaceStatus> for u8 {
    fn from(status: RaceStatus) -> Self {
        status.id()
    }
}

/// Snapshot of the current leader kept on the race document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopParticipant {
    pub user_id: String,
    pub display_name: String,
    pub distance: f64,
    pub steps: u64,
    pub updated_at: DateTime<Utc>,
}

/// One row of the final leaderboard frozen at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub distance: f64,
    pub steps: u64,
    pub is_completed: bool,
    pub avg_speed: f64,
}

/// Race document stored in the `races` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    /// Race ID (also used as document ID)
    pub id: String,
    pub title: String,
    /// Organizer user ID
    pub created_by: String,
    /// Course length in kilometers
    pub total_distance: f64,
    #[serde(rename = "statusId")]
    pub status: RaceStatus,
    /// Human readable status
    #[serde(rename = "status", default)]
    pub status_text: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_end_time: Option<DateTime<Utc>>,
    /// Length of the ending window once the first participant finishes
    #[serde(default)]
    pub duration_minutes: Option<u32>,

    // ─── Denormalized counters ───────────────────────────────────
    #[serde(default)]
    pub participant_count: u32,
    #[serde(default)]
    pub active_participant_count: u32,
    #[serde(default)]
    pub completed_participant_count: u32,
    #[serde(default)]
    pub top_participant: Option<TopParticipant>,

    // ─── Completion snapshot ─────────────────────────────────────
    #[serde(default)]
    pub final_leaderboard: Option<Vec<LeaderboardEntry>>,
    #[serde(default)]
    pub podium: Option<Vec<LeaderboardEntry>>,
    #[serde(default)]
    pub completion_rate: Option<f64>,

    // ─── Ending countdown ────────────────────────────────────────
    #[serde(default)]
    pub ending_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_finisher_id: Option<String>,
    #[serde(default)]
    pub countdown_notification_sent: bool,

    #[serde(default)]
    pub race_cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Race {
    /// Create a race in the given status with zeroed counters.
    pub fn new(id: &str, title: &str, created_by: &str, total_distance: f64, status: RaceStatus) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            created_by: created_by.to_string(),
            total_distance,
            status,
            status_text: status.label().to_string(),
            start_time: None,
            actual_start_time: None,
            actual_end_time: None,
            duration_minutes: None,
            participant_count: 0,
            active_participant_count: 0,
            completed_participant_count: 0,
            top_participant: None,
            final_leaderboard: None,
            podium: None,
            completion_rate: None,
            ending_deadline: None,
            first_finisher_id: None,
            countdown_notification_sent: false,
            race_cancelled_at: None,
            cancellation_reason: None,
            updated_at: None,
        }
    }

    /// Apply a patch in place. Returns `false` when the patch was a no-op
    /// (e.g. an illegal status transition or an already-frozen leaderboard).
    pub fn apply(&mut self, patch: &RacePatch, now: DateTime<Utc>) -> bool {
        let changed = match patch {
            RacePatch::AdjustCounters {
                participants,
                active,
                completed,
            } => {
                self.participant_count = offset_counter(self.participant_count, *participants);
                self.active_participant_count =
                    offset_counter(self.active_participant_count, *active);
                self.completed_participant_count =
                    offset_counter(self.completed_participant_count, *completed);
                *participants != 0 || *active != 0 || *completed != 0
            }
            RacePatch::SetTopParticipant(top) => {
                if self.top_participant.as_ref() == Some(top) {
                    false
                } else {
                    self.top_participant = Some(top.clone());
                    true
                }
            }
            RacePatch::Transition(transition) => {
                if !self.status.can_transition_to(transition.to) {
                    tracing::warn!(
                        race_id = %self.id,
                        from = self.status.id(),
                        to = transition.to.id(),
                        "Ignoring illegal race status transition"
                    );
                    return false;
                }
                self.status = transition.to;
                self.status_text = transition.to.label().to_string();
                if let Some(end) = transition.actual_end_time {
                    self.actual_end_time = Some(end);
                }
                if let Some(deadline) = transition.ending_deadline {
                    self.ending_deadline = Some(deadline);
                }
                if let Some(finisher) = &transition.first_finisher_id {
                    self.first_finisher_id = Some(finisher.clone());
                }
                true
            }
            RacePatch::FinalResults {
                leaderboard,
                completion_rate,
            } => {
                if self.final_leaderboard.is_some() {
                    return false;
                }
                self.podium = Some(leaderboard.iter().take(3).cloned().collect());
                self.final_leaderboard = Some(leaderboard.clone());
                self.completion_rate = Some(*completion_rate);
                true
            }
            RacePatch::MarkCancelled => {
                if self.race_cancelled_at.is_some() {
                    return false;
                }
                self.race_cancelled_at = Some(now);
                true
            }
            RacePatch::MarkCountdownSent => {
                let changed = !self.countdown_notification_sent;
                self.countdown_notification_sent = true;
                changed
            }
        };

        if changed {
            self.updated_at = Some(now);
        }
        changed
    }
}

/// A status transition queued against a race.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub to: RaceStatus,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub ending_deadline: Option<DateTime<Utc>>,
    pub first_finisher_id: Option<String>,
}

impl StatusTransition {
    pub fn to(status: RaceStatus) -> Self {
        Self {
            to: status,
            actual_end_time: None,
            ending_deadline: None,
            first_finisher_id: None,
        }
    }

    /// Transition to `Completed`, stamping the end time.
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            actual_end_time: Some(at),
            ..Self::to(RaceStatus::Completed)
        }
    }
}

/// Field-level mutation of a race document. Applied by the store against the
/// latest persisted version so concurrent writers never clobber each other.
#[derive(Debug, Clone, PartialEq)]
pub enum RacePatch {
    AdjustCounters {
        participants: i64,
        active: i64,
        completed: i64,
    },
    SetTopParticipant(TopParticipant),
    Transition(StatusTransition),
    FinalResults {
        leaderboard: Vec<LeaderboardEntry>,
        completion_rate: f64,
    },
    MarkCancelled,
    MarkCountdownSent,
}

fn offset_counter(value: u32, delta: i64) -> u32 {
    (i64::from(value) + delta).clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race(status: RaceStatus) -> Race {
        Race::new("race-1", "Morning Dash", "organizer", 5.0, status)
    }

    #[test]
    fn test_status_id_round_trip_through_json() {
        let json = serde_json::to_value(race(RaceStatus::Ending)).unwrap();
        assert_eq!(json["statusId"], 6);
        assert_eq!(json["status"], "Ending");
        assert_eq!(json["totalDistance"], 5.0);

        let parsed: Race = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.status, RaceStatus::Ending);
    }

    #[test]
    fn test_unknown_status_id_rejected() {
        let mut json = serde_json::to_value(race(RaceStatus::Active)).unwrap();
        json["statusId"] = serde_json::json!(2);
        assert!(serde_json::from_value::<Race>(json).is_err());
    }

    #[test]
    fn test_ending_cannot_return_to_active() {
        assert!(RaceStatus::Active.can_transition_to(RaceStatus::Ending));
        assert!(!RaceStatus::Ending.can_transition_to(RaceStatus::Active));
        assert!(RaceStatus::Ending.can_transition_to(RaceStatus::Completed));
        assert!(!RaceStatus::Completed.can_transition_to(RaceStatus::Cancelled));
    }

    #[test]
    fn test_sync_allowed_statuses() {
        assert!(RaceStatus::Active.allows_sync());
        assert!(RaceStatus::Paused.allows_sync());
        assert!(RaceStatus::Ending.allows_sync());
        assert!(!RaceStatus::Scheduled.allows_sync());
        assert!(!RaceStatus::Completed.allows_sync());
    }

    #[test]
    fn test_illegal_transition_is_noop() {
        let mut r = race(RaceStatus::Completed);
        let now = Utc::now();
        let changed = r.apply(
            &RacePatch::Transition(StatusTransition::to(RaceStatus::Active)),
            now,
        );
        assert!(!changed);
        assert_eq!(r.status, RaceStatus::Completed);
        assert!(r.updated_at.is_none());
    }

    #[test]
    fn test_counters_never_go_negative() {
        let mut r = race(RaceStatus::Active);
        r.apply(
            &RacePatch::AdjustCounters {
                participants: -1,
                active: -1,
                completed: 0,
            },
            Utc::now(),
        );
        assert_eq!(r.participant_count, 0);
        assert_eq!(r.active_participant_count, 0);
    }

    #[test]
    fn test_final_results_set_once_with_podium() {
        let mut r = race(RaceStatus::Completed);
        let entry = |rank: u32| LeaderboardEntry {
            rank,
            user_id: format!("u{}", rank),
            display_name: format!("User {}", rank),
            distance: 5.0,
            steps: 6500,
            is_completed: true,
            avg_speed: 5.0,
        };
        let leaderboard: Vec<_> = (1..=4).map(entry).collect();

        assert!(r.apply(
            &RacePatch::FinalResults {
                leaderboard: leaderboard.clone(),
                completion_rate: 100.0,
            },
            Utc::now(),
        ));
        assert_eq!(r.podium.as_ref().map(Vec::len), Some(3));
        assert_eq!(r.final_leaderboard.as_ref().map(Vec::len), Some(4));

        // Second snapshot is ignored
        assert!(!r.apply(
            &RacePatch::FinalResults {
                leaderboard: vec![entry(9)],
                completion_rate: 0.0,
            },
            Utc::now(),
        ));
        assert_eq!(r.completion_rate, Some(100.0));
    }
}
