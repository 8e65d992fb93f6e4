// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Participant ranking.
//!
//! The comparator treats distances within a small tolerance as ties, which
//! makes it non-transitive. Ordering therefore uses a stable insertion pass
//! over participants pre-ordered by their existing rank instead of
//! `sort_by`, so unchanged data always reproduces the same ranks.

use crate::db::{RaceStore, WriteBatch};
use crate::error::AppError;
use crate::models::{LeaderboardEntry, Participant};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Compare two participants for ranking; `Less` means `a` ranks better.
pub fn compare(a: &Participant, b: &Participant, tolerance_km: f64) -> Ordering {
    match (a.is_completed, b.is_completed) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    if (a.distance - b.distance).abs() > tolerance_km {
        return b
            .distance
            .partial_cmp(&a.distance)
            .unwrap_or(Ordering::Equal);
    }

    if a.is_completed {
        // Earlier finish first; a missing timestamp sorts last
        match (a.completed_at, b.completed_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    } else {
        // More recently updated first
        match (a.last_updated, b.last_updated) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Order participants best first. Removed participants are dropped.
pub fn order_participants(participants: Vec<Participant>, tolerance_km: f64) -> Vec<Participant> {
    let mut ordered: Vec<Participant> = participants.into_iter().filter(|p| !p.is_removed).collect();

    // Existing rank first (unranked last), then user ID for a stable start
    ordered.sort_by(|a, b| {
        let rank = |p: &Participant| if p.rank == 0 { u32::MAX } else { p.rank };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    for i in 1..ordered.len() {
        let mut j = i;
        while j > 0 && compare(&ordered[j], &ordered[j - 1], tolerance_km) == Ordering::Less {
            ordered.swap(j, j - 1);
            j -= 1;
        }
    }
    ordered
}

/// Final leaderboard rows for an ordered participant list.
pub fn leaderboard(ordered: &[Participant]) -> Vec<LeaderboardEntry> {
    ordered
        .iter()
        .enumerate()
        .map(|(i, p)| LeaderboardEntry {
            rank: i as u32 + 1,
            user_id: p.user_id.clone(),
            display_name: p.display_name.clone(),
            distance: p.distance,
            steps: p.steps,
            is_completed: p.is_completed,
            avg_speed: p.avg_speed,
        })
        .collect()
}

/// Result of one ranking pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankUpdate {
    /// Participants that received a new rank
    pub changed: usize,
    /// Ranks folded into pending progress writes
    pub pending: usize,
}

/// Recomputes and persists participant ranks (`updateRaceRanks`).
#[derive(Clone)]
pub struct RankEngine {
    store: Arc<dyn RaceStore>,
    tolerance_km: f64,
}

impl RankEngine {
    pub fn new(store: Arc<dyn RaceStore>, tolerance_km: f64) -> Self {
        Self {
            store,
            tolerance_km,
        }
    }

    pub fn tolerance_km(&self) -> f64 {
        self.tolerance_km
    }

    /// Current standings of a race, best first.
    pub async fn standings(&self, race_id: &str) -> Result<Vec<Participant>, AppError> {
        let participants = self.store.race_participants(race_id).await?;
        Ok(order_participants(participants, self.tolerance_km))
    }

    /// Rank a race on its stored participants.
    pub async fn update_race_ranks(&self, race_id: &str) -> Result<RankUpdate, AppError> {
        self.update_race_ranks_with(race_id, &mut WriteBatch::new())
            .await
    }

    /// Rank a race with `pending` progress overlaid on the stored records.
    ///
    /// Participants with a pending progress write get their rank folded into
    /// that write. Everyone else whose rank changed is written in a separate
    /// rank-only batch committed immediately.
    pub async fn update_race_ranks_with(
        &self,
        race_id: &str,
        pending: &mut WriteBatch,
    ) -> Result<RankUpdate, AppError> {
        let overlay: HashMap<String, Participant> = pending
            .pending_progress(race_id)
            .map(|p| (p.user_id.clone(), p.clone()))
            .collect();

        let participants: Vec<Participant> = self
            .store
            .race_participants(race_id)
            .await?
            .into_iter()
            .map(|p| overlay.get(&p.user_id).cloned().unwrap_or(p))
            .collect();

        let ordered = order_participants(participants, self.tolerance_km);

        let mut ranks = WriteBatch::new();
        let mut update = RankUpdate::default();
        for (i, participant) in ordered.iter().enumerate() {
            let rank = i as u32 + 1;
            if overlay.contains_key(&participant.user_id) {
                pending.set_rank(race_id, &participant.user_id, rank);
                update.pending += 1;
                if participant.rank != rank {
                    update.changed += 1;
                }
            } else if participant.rank != rank {
                ranks.set_rank(race_id, &participant.user_id, rank);
                update.changed += 1;
            }
        }

        if !ranks.is_empty() {
            self.store.commit(ranks).await?;
        }

        tracing::debug!(
            race_id,
            participants = ordered.len(),
            changed = update.changed,
            "Race ranks updated"
        );
        Ok(update)
    }
}
