// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Denormalization triggers.
//!
//! Each change event is diffed (before vs after) into a set of race patches
//! and notifications. Patches for one event are committed as a single batch.
//! Every effect is derived from an edge in the diff, never from absolute
//! state, so a handler that runs after other writers still moves the
//! counters by the right amount.

use crate::config::SyncPolicy;
use crate::db::{RaceStore, WriteBatch};
use crate::error::AppError;
use crate::events::{ChangeEvent, EventReceiver};
use crate::models::{
    Notification, Participant, Race, RacePatch, RaceRef, RaceStatus, StatusTransition,
    TopParticipant,
};
use crate::services::notifications::Notifier;
use crate::services::ranking::{leaderboard, order_participants};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Progress milestones announced to the participant, in percent.
const MILESTONES: [u8; 3] = [25, 50, 75];
const MAX_ATTEMPTS: u32 = 3;

/// Counter adjustments for a participant create/delete/update.
pub fn counter_patch(before: Option<&Participant>, after: Option<&Participant>) -> Option<RacePatch> {
    let exists = |p: Option<&Participant>| i64::from(p.is_some());
    let is_active = |p: Option<&Participant>| i64::from(p.is_some_and(Participant::is_active));
    let is_done = |p: Option<&Participant>| i64::from(p.is_some_and(|p| p.is_completed));

    let participants = exists(after) - exists(before);
    let active = is_active(after) - is_active(before);
    let completed = match (before, after) {
        // Completion is one-way; only the false -> true edge counts
        (Some(b), Some(a)) => i64::from(a.is_completed && !b.is_completed),
        _ => is_done(after) - is_done(before),
    };

    if participants == 0 && active == 0 && completed == 0 {
        None
    } else {
        Some(RacePatch::AdjustCounters {
            participants,
            active,
            completed,
        })
    }
}

/// Milestones crossed between two progress values.
pub fn crossed_milestones(before: &Participant, after: &Participant, race_distance: f64) -> Vec<u8> {
    let was = before.progress_percent(race_distance);
    let now = after.progress_percent(race_distance);
    MILESTONES
        .iter()
        .copied()
        .filter(|m| was < f64::from(*m) && now >= f64::from(*m))
        .collect()
}

fn top_snapshot(participant: &Participant, now: DateTime<Utc>) -> TopParticipant {
    TopParticipant {
        user_id: participant.user_id.clone(),
        display_name: participant.display_name.clone(),
        distance: participant.distance,
        steps: participant.steps,
        updated_at: now,
    }
}

fn race_ref(race: &Race) -> RaceRef {
    RaceRef {
        race_id: race.id.clone(),
        race_title: race.title.clone(),
    }
}

/// Effects derived from one change event.
#[derive(Debug, Default)]
struct Effects {
    patches: Vec<RacePatch>,
    notifications: Vec<Notification>,
}

/// Consumes store change events and maintains denormalized race fields.
#[derive(Clone)]
pub struct TriggerService {
    store: Arc<dyn RaceStore>,
    notifier: Notifier,
    policy: SyncPolicy,
}

impl TriggerService {
    pub fn new(store: Arc<dyn RaceStore>, notifier: Notifier, policy: SyncPolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// Process events until the bus closes.
    pub async fn run(self, mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            self.handle_with_retry(&event).await;
        }
        tracing::info!("Change event bus closed, trigger loop exiting");
    }

    /// Process every queued event, including ones produced while draining.
    /// Returns the number of events handled.
    pub async fn drain(&self, rx: &mut EventReceiver) -> usize {
        let mut handled = 0;
        while let Ok(event) = rx.try_recv() {
            self.handle_with_retry(&event).await;
            handled += 1;
        }
        handled
    }

    async fn handle_with_retry(&self, event: &ChangeEvent) {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.handle(event).await {
                Ok(()) => return,
                Err(e) => tracing::warn!(
                    race_id = ?event.race_id(),
                    attempt,
                    error = %e,
                    "Trigger failed"
                ),
            }
        }
        tracing::error!(race_id = ?event.race_id(), "Trigger gave up after retries");
    }

    /// Handle one change event.
    pub async fn handle(&self, event: &ChangeEvent) -> Result<(), AppError> {
        let now = Utc::now();
        let (race_id, effects) = match event {
            ChangeEvent::Participant { before, after } => {
                let Some(race_id) = event.race_id() else {
                    return Ok(());
                };
                let Some(race) = self.store.get_race(race_id).await? else {
                    tracing::debug!(race_id, "Participant event for missing race");
                    return Ok(());
                };
                let effects = match (before, after) {
                    (None, Some(created)) => self.participant_created(&race, created),
                    (Some(removed), None) => self.participant_deleted(removed),
                    (Some(b), Some(a)) => self.participant_updated(&race, b, a, now).await?,
                    (None, None) => Effects::default(),
                };
                (race.id, effects)
            }
            ChangeEvent::Race {
                before: Some(before),
                after: Some(after),
            } => (after.id.clone(), self.race_updated(before, after, now).await?),
            ChangeEvent::Race { .. } => return Ok(()),
        };

        if !effects.patches.is_empty() {
            let mut batch = WriteBatch::new();
            for patch in effects.patches {
                batch.patch_race(&race_id, patch);
            }
            self.store.commit(batch).await?;
        }
        // Notify only once the patches are durable
        for notification in effects.notifications {
            self.notifier.send(notification);
        }
        Ok(())
    }

    // ─── Participant Events ──────────────────────────────────────

    fn participant_created(&self, race: &Race, participant: &Participant) -> Effects {
        let mut effects = Effects::default();
        effects
            .patches
            .extend(counter_patch(None, Some(participant)));

        if participant.user_id != race.created_by {
            effects.notifications.push(Notification::ParticipantJoined {
                race: race_ref(race),
                organizer_id: race.created_by.clone(),
                participant_id: participant.user_id.clone(),
                participant_name: participant.display_name.clone(),
            });
        }
        tracing::info!(race_id = %race.id, user_id = %participant.user_id, "Participant joined");
        effects
    }

    fn participant_deleted(&self, participant: &Participant) -> Effects {
        tracing::info!(
            race_id = %participant.race_id,
            user_id = %participant.user_id,
            "Participant left"
        );
        Effects {
            patches: counter_patch(Some(participant), None).into_iter().collect(),
            notifications: Vec::new(),
        }
    }

    async fn participant_updated(
        &self,
        race: &Race,
        before: &Participant,
        after: &Participant,
        now: DateTime<Utc>,
    ) -> Result<Effects, AppError> {
        let mut effects = Effects::default();
        effects
            .patches
            .extend(counter_patch(Some(before), Some(after)));

        let finished = after.is_completed && !before.is_completed;
        let improved = before.rank > 0 && after.rank > 0 && after.rank < before.rank;

        // Only load the field when an edge needs it
        let field = if (finished && race.status == RaceStatus::Active) || improved {
            self.store.race_participants(&race.id).await?
        } else {
            Vec::new()
        };

        if finished && race.status == RaceStatus::Active {
            let others_racing = field
                .iter()
                .any(|p| p.user_id != after.user_id && !p.is_removed && !p.is_completed);
            if others_racing {
                let window = race
                    .duration_minutes
                    .map(i64::from)
                    .unwrap_or(self.policy.ending_window_minutes);
                let deadline = now + Duration::minutes(window);
                tracing::info!(
                    race_id = %race.id,
                    user_id = %after.user_id,
                    deadline = %deadline,
                    "First finisher, race entering ending window"
                );
                effects.patches.push(RacePatch::Transition(StatusTransition {
                    ending_deadline: Some(deadline),
                    first_finisher_id: Some(after.user_id.clone()),
                    ..StatusTransition::to(RaceStatus::Ending)
                }));
            }
        }

        if improved {
            let overtaken = field
                .iter()
                .find(|p| p.user_id != after.user_id && p.rank == after.rank + 1);
            effects.notifications.push(Notification::Overtaking {
                race: race_ref(race),
                user_id: after.user_id.clone(),
                user_name: after.display_name.clone(),
                old_rank: before.rank,
                new_rank: after.rank,
                overtaken_user_id: overtaken.map(|p| p.user_id.clone()),
                overtaken_name: overtaken.map(|p| p.display_name.clone()),
            });
        }

        if after.rank == 1 {
            let new_leader = before.rank != 1;
            let moved = before.steps != after.steps || before.distance != after.distance;
            if new_leader || moved {
                effects
                    .patches
                    .push(RacePatch::SetTopParticipant(top_snapshot(after, now)));
            }
            if new_leader {
                effects.notifications.push(Notification::LeaderChange {
                    race: race_ref(race),
                    leader_id: after.user_id.clone(),
                    leader_name: after.display_name.clone(),
                });
            }
        }

        for milestone in crossed_milestones(before, after, race.total_distance) {
            effects.notifications.push(Notification::Milestone {
                race: race_ref(race),
                user_id: after.user_id.clone(),
                user_name: after.display_name.clone(),
                milestone,
            });
        }

        Ok(effects)
    }

    // ─── Race Events ─────────────────────────────────────────────

    async fn race_updated(
        &self,
        before: &Race,
        after: &Race,
        now: DateTime<Utc>,
    ) -> Result<Effects, AppError> {
        let mut effects = Effects::default();
        if before.status == after.status {
            return Ok(effects);
        }

        tracing::info!(
            race_id = %after.id,
            from = before.status.id(),
            to = after.status.id(),
            "Race status changed"
        );

        match after.status {
            RaceStatus::Completed if after.final_leaderboard.is_none() => {
                let ordered = order_participants(
                    self.store.race_participants(&after.id).await?,
                    self.policy.rank_tie_tolerance_km,
                );
                let rows = leaderboard(&ordered);
                let completed = rows.iter().filter(|r| r.is_completed).count();
                let completion_rate = if rows.is_empty() {
                    0.0
                } else {
                    completed as f64 / rows.len() as f64 * 100.0
                };

                for row in &rows {
                    effects.notifications.push(Notification::RaceCompleted {
                        race: race_ref(after),
                        user_id: row.user_id.clone(),
                        rank: row.rank,
                        distance: row.distance,
                        avg_speed: row.avg_speed,
                    });
                }
                effects.patches.push(RacePatch::FinalResults {
                    leaderboard: rows,
                    completion_rate,
                });
            }
            RaceStatus::Cancelled if after.race_cancelled_at.is_none() => {
                effects.patches.push(RacePatch::MarkCancelled);
                effects.notifications.push(Notification::RaceCancelled {
                    race: race_ref(after),
                    reason: after.cancellation_reason.clone(),
                });
            }
            RaceStatus::Active => {
                effects.notifications.push(Notification::RaceStarted {
                    race: race_ref(after),
                });
            }
            RaceStatus::Ending => {
                let finisher = match &after.first_finisher_id {
                    Some(user_id) => self.store.get_participant(&after.id, user_id).await?,
                    None => None,
                };
                let finisher_name = finisher
                    .as_ref()
                    .map(|p| p.display_name.clone())
                    .unwrap_or_default();

                if let Some(finisher) = &finisher {
                    effects.notifications.push(Notification::FirstFinisher {
                        race: race_ref(after),
                        user_id: finisher.user_id.clone(),
                        user_name: finisher.display_name.clone(),
                    });
                }
                if let Some(deadline) = after.ending_deadline {
                    effects.notifications.push(Notification::DeadlineAlert {
                        race: race_ref(after),
                        first_finisher_name: finisher_name,
                        deadline,
                        deadline_minutes: (deadline - now).num_minutes().max(0),
                    });
                }
            }
            _ => {}
        }

        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(steps: u64, completed: bool) -> Participant {
        let mut p = Participant::new("race-1", "alice", "Alice", 5.0);
        p.steps = steps;
        p.is_completed = completed;
        p
    }

    #[test]
    fn test_counter_patch_on_create_and_delete() {
        let fresh = participant(0, false);
        assert_eq!(
            counter_patch(None, Some(&fresh)),
            Some(RacePatch::AdjustCounters {
                participants: 1,
                active: 0,
                completed: 0
            })
        );

        let finisher = participant(7000, true);
        assert_eq!(
            counter_patch(Some(&finisher), None),
            Some(RacePatch::AdjustCounters {
                participants: -1,
                active: 0,
                completed: -1
            })
        );

        let walker = participant(300, false);
        assert_eq!(
            counter_patch(Some(&walker), None),
            Some(RacePatch::AdjustCounters {
                participants: -1,
                active: -1,
                completed: 0
            })
        );
    }

    #[test]
    fn test_counter_patch_on_update_edges() {
        let idle = participant(0, false);
        let walking = participant(100, false);
        let done = participant(7000, true);

        assert_eq!(
            counter_patch(Some(&idle), Some(&walking)),
            Some(RacePatch::AdjustCounters {
                participants: 0,
                active: 1,
                completed: 0
            })
        );
        assert_eq!(
            counter_patch(Some(&walking), Some(&done)),
            Some(RacePatch::AdjustCounters {
                participants: 0,
                active: -1,
                completed: 1
            })
        );
        // Rank-only or repeated writes move nothing
        assert_eq!(counter_patch(Some(&done), Some(&done)), None);
        assert_eq!(counter_patch(Some(&walking), Some(&walking)), None);
    }

    #[test]
    fn test_milestones_fire_on_crossing_only() {
        let mut before = participant(0, false);
        before.distance = 1.0;
        let mut after = before.clone();
        after.distance = 2.6;

        assert_eq!(crossed_milestones(&before, &after, 5.0), vec![25, 50]);
        assert!(crossed_milestones(&after, &after, 5.0).is_empty());

        let mut finish = after.clone();
        finish.distance = 5.0;
        assert_eq!(crossed_milestones(&after, &finish, 5.0), vec![75]);
    }
}
