// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auto-completion: flip a race to completed once every participant finished.

use crate::db::{RaceStore, WriteBatch};
use crate::error::AppError;
use crate::models::{Participant, Race, RacePatch, RaceStatus, StatusTransition};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Decide whether `race` should complete, given its stored participants with
/// pending progress already overlaid.
pub fn completion_patch(
    race: &Race,
    participants: &[Participant],
    now: DateTime<Utc>,
) -> Option<RacePatch> {
    if race.status.is_terminal() || !race.status.can_transition_to(RaceStatus::Completed) {
        return None;
    }
    let mut live = participants.iter().filter(|p| !p.is_removed).peekable();
    live.peek()?;
    if live.all(|p| p.is_completed) {
        Some(RacePatch::Transition(StatusTransition::completed(now)))
    } else {
        None
    }
}

#[derive(Clone)]
pub struct CompletionMonitor {
    store: Arc<dyn RaceStore>,
}

impl CompletionMonitor {
    pub fn new(store: Arc<dyn RaceStore>) -> Self {
        Self { store }
    }

    /// Queue the completed transition into `pending` when the race is done.
    /// Returns whether it was queued.
    pub async fn check(
        &self,
        race: &Race,
        pending: &mut WriteBatch,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let overlay: HashMap<&str, &Participant> = pending
            .pending_progress(&race.id)
            .map(|p| (p.user_id.as_str(), p))
            .collect();

        let participants: Vec<Participant> = self
            .store
            .race_participants(&race.id)
            .await?
            .into_iter()
            .map(|p| match overlay.get(p.user_id.as_str()) {
                Some(pending) => (*pending).clone(),
                None => p,
            })
            .collect();

        match completion_patch(race, &participants, now) {
            Some(patch) => {
                tracing::info!(
                    race_id = %race.id,
                    participants = participants.len(),
                    "All participants finished, completing race"
                );
                pending.patch_race(&race.id, patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(user: &str, done: bool) -> Participant {
        let mut p = Participant::new("race-1", user, user, 5.0);
        p.is_completed = done;
        p
    }

    #[test]
    fn test_completes_when_everyone_finished() {
        let race = Race::new("race-1", "Dash", "org", 5.0, RaceStatus::Ending);
        let now = Utc::now();
        let patch = completion_patch(&race, &[finished("a", true), finished("b", true)], now);
        assert_eq!(
            patch,
            Some(RacePatch::Transition(StatusTransition::completed(now)))
        );
    }

    #[test]
    fn test_waits_for_stragglers() {
        let race = Race::new("race-1", "Dash", "org", 5.0, RaceStatus::Active);
        let patch = completion_patch(
            &race,
            &[finished("a", true), finished("b", false)],
            Utc::now(),
        );
        assert!(patch.is_none());
    }

    #[test]
    fn test_skips_empty_and_finished_races() {
        let active = Race::new("race-1", "Dash", "org", 5.0, RaceStatus::Active);
        assert!(completion_patch(&active, &[], Utc::now()).is_none());

        let mut removed = finished("a", false);
        removed.is_removed = true;
        assert!(completion_patch(&active, &[removed], Utc::now()).is_none());

        let done = Race::new("race-1", "Dash", "org", 5.0, RaceStatus::Completed);
        assert!(completion_patch(&done, &[finished("a", true)], Utc::now()).is_none());
    }
}
