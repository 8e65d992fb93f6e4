// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer: the `RaceStore` abstraction, its batched write type,
//! and the Firestore and in-memory backends.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::events::ChangeEvent;
use crate::models::{Baseline, Participant, Race, RacePatch, RaceStatus};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;

/// Collection names as constants.
pub mod collections {
    pub const RACES: &str = "races";
    /// Keyed by `{race_id}_{user_id}`
    pub const RACE_PARTICIPANTS: &str = "race_participants";
    /// Keyed by `{user_id}_{race_id}`
    pub const RACE_BASELINES: &str = "race_baselines";
}

pub type StoreResult<T> = Result<T, AppError>;

/// Document ID of a participant record.
pub fn participant_doc_id(race_id: &str, user_id: &str) -> String {
    format!(
        "{}_{}",
        urlencoding::encode(race_id),
        urlencoding::encode(user_id)
    )
}

/// Document ID of a baseline record.
pub fn baseline_doc_id(user_id: &str, race_id: &str) -> String {
    format!(
        "{}_{}",
        urlencoding::encode(user_id),
        urlencoding::encode(race_id)
    )
}

/// A buffered write to one participant document.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantWrite {
    /// Full progress write. Rejected at commit unless the stored `version`
    /// still equals `expected_version`.
    Progress {
        participant: Participant,
        expected_version: u64,
    },
    /// Rank-only write. Unconditional and does not bump `version`.
    Rank {
        race_id: String,
        user_id: String,
        rank: u32,
    },
}

/// Multi-document write committed all-or-nothing by `RaceStore::commit`.
///
/// Writes are keyed by document so a later write to the same document
/// replaces (or, for ranks, folds into) an earlier one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub baselines: BTreeMap<String, Baseline>,
    pub participants: BTreeMap<String, ParticipantWrite>,
    pub race_patches: BTreeMap<String, Vec<RacePatch>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_baseline(&mut self, baseline: Baseline) {
        let id = baseline_doc_id(&baseline.user_id, &baseline.race_id);
        self.baselines.insert(id, baseline);
    }

    /// Buffer a progress write for a participant last read at `expected_version`.
    pub fn put_progress(&mut self, participant: Participant, expected_version: u64) {
        let id = participant_doc_id(&participant.race_id, &participant.user_id);
        self.participants.insert(
            id,
            ParticipantWrite::Progress {
                participant,
                expected_version,
            },
        );
    }

    /// Set a rank. A pending progress write for the same participant carries
    /// the rank instead of getting a second write.
    pub fn set_rank(&mut self, race_id: &str, user_id: &str, rank: u32) {
        let id = participant_doc_id(race_id, user_id);
        match self.participants.get_mut(&id) {
            Some(ParticipantWrite::Progress { participant, .. }) => participant.rank = rank,
            Some(ParticipantWrite::Rank { rank: pending, .. }) => *pending = rank,
            None => {
                self.participants.insert(
                    id,
                    ParticipantWrite::Rank {
                        race_id: race_id.to_string(),
                        user_id: user_id.to_string(),
                        rank,
                    },
                );
            }
        }
    }

    pub fn patch_race(&mut self, race_id: &str, patch: RacePatch) {
        self.race_patches
            .entry(race_id.to_string())
            .or_default()
            .push(patch);
    }

    /// Pending progress writes for one race.
    pub fn pending_progress<'a>(
        &'a self,
        race_id: &'a str,
    ) -> impl Iterator<Item = &'a Participant> + 'a {
        self.participants.values().filter_map(move |w| match w {
            ParticipantWrite::Progress { participant, .. } if participant.race_id == race_id => {
                Some(participant)
            }
            _ => None,
        })
    }

    /// Number of document writes in the batch.
    pub fn len(&self) -> usize {
        self.baselines.len() + self.participants.len() + self.race_patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Documents to write after a batch has been checked against current state.
pub(crate) struct ResolvedBatch {
    pub baselines: Vec<(String, Baseline)>,
    pub participants: Vec<(String, Participant)>,
    pub races: Vec<Race>,
    pub events: Vec<ChangeEvent>,
}

/// Check version preconditions and fold the batch into the current documents.
///
/// `participants` and `races` hold the current stored versions of every
/// document the batch touches, keyed by document ID and race ID. Rank writes
/// for missing participants and patches for missing races are dropped.
pub(crate) fn resolve_batch(
    batch: WriteBatch,
    participants: &BTreeMap<String, Participant>,
    races: &BTreeMap<String, Race>,
    now: DateTime<Utc>,
) -> StoreResult<ResolvedBatch> {
    for (id, write) in &batch.participants {
        if let ParticipantWrite::Progress {
            expected_version, ..
        } = write
        {
            match participants.get(id) {
                Some(current) if current.version == *expected_version => {}
                Some(current) => {
                    return Err(AppError::Conflict(format!(
                        "participant {} at version {}, expected {}",
                        id, current.version, expected_version
                    )))
                }
                None => {
                    return Err(AppError::Conflict(format!(
                        "participant {} no longer exists",
                        id
                    )))
                }
            }
        }
    }

    let mut resolved = ResolvedBatch {
        baselines: batch.baselines.into_iter().collect(),
        participants: Vec::new(),
        races: Vec::new(),
        events: Vec::new(),
    };

    for (id, write) in batch.participants {
        let Some(before) = participants.get(&id) else {
            tracing::debug!(doc_id = %id, "Dropping rank write for missing participant");
            continue;
        };
        let after = match write {
            ParticipantWrite::Progress { participant, .. } => participant,
            ParticipantWrite::Rank { rank, .. } => {
                let mut next = before.clone();
                next.rank = rank;
                next
            }
        };
        if &after != before {
            resolved.events.push(ChangeEvent::Participant {
                before: Some(before.clone()),
                after: Some(after.clone()),
            });
            resolved.participants.push((id, after));
        }
    }

    for (race_id, patches) in batch.race_patches {
        let Some(before) = races.get(&race_id) else {
            tracing::warn!(race_id = %race_id, "Dropping patches for missing race");
            continue;
        };
        let mut after = before.clone();
        let mut changed = false;
        for patch in &patches {
            changed |= after.apply(patch, now);
        }
        if changed {
            resolved.events.push(ChangeEvent::Race {
                before: Some(before.clone()),
                after: Some(after.clone()),
            });
            resolved.races.push(after);
        }
    }

    Ok(resolved)
}

/// Abstraction over the persistence layer for races, participants and baselines.
///
/// Every mutating call publishes the resulting `ChangeEvent`s on the store's
/// event bus after the write is durable.
pub trait RaceStore: Send + Sync {
    fn get_race(&self, race_id: &str) -> BoxFuture<'static, StoreResult<Option<Race>>>;
    /// Create or replace a race document.
    fn put_race(&self, race: Race) -> BoxFuture<'static, StoreResult<()>>;
    fn races_with_status(&self, status: RaceStatus) -> BoxFuture<'static, StoreResult<Vec<Race>>>;

    fn get_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Participant>>>;
    /// All participant records of a race, removed ones included.
    fn race_participants(&self, race_id: &str)
        -> BoxFuture<'static, StoreResult<Vec<Participant>>>;
    /// All participant records of a user across races.
    fn participations_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Vec<Participant>>>;
    fn insert_participant(&self, participant: Participant) -> BoxFuture<'static, StoreResult<()>>;
    /// Returns `false` when the participant did not exist.
    fn delete_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<bool>>;

    fn get_baseline(
        &self,
        user_id: &str,
        race_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Baseline>>>;

    /// Commit a batch atomically. Fails with `AppError::Conflict` (and writes
    /// nothing) when any progress write's expected version is stale.
    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StoreResult<()>>;
}
