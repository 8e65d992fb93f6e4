// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Process-local `RaceStore` used for development and tests.
//!
//! A single `RwLock` around all collections gives batch commits the same
//! all-or-nothing behavior as a Firestore transaction.

use crate::db::{
    baseline_doc_id, participant_doc_id, resolve_batch, RaceStore, StoreResult, WriteBatch,
};
use crate::events::{ChangeEvent, EventBus};
use crate::models::{Baseline, Participant, Race, RaceStatus};
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Collections {
    races: HashMap<String, Race>,
    participants: BTreeMap<String, Participant>,
    baselines: HashMap<String, Baseline>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
    bus: EventBus,
}

impl MemoryStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Collections::default())),
            bus,
        }
    }

    async fn put_race(&self, race: Race) {
        let before = {
            let mut inner = self.inner.write().await;
            inner.races.insert(race.id.clone(), race.clone())
        };
        if before.as_ref() != Some(&race) {
            self.bus.publish(vec![ChangeEvent::Race {
                before,
                after: Some(race),
            }]);
        }
    }

    async fn insert_participant(&self, participant: Participant) {
        let id = participant_doc_id(&participant.race_id, &participant.user_id);
        let before = {
            let mut inner = self.inner.write().await;
            inner.participants.insert(id, participant.clone())
        };
        self.bus.publish(vec![ChangeEvent::Participant {
            before,
            after: Some(participant),
        }]);
    }

    async fn delete_participant(&self, race_id: &str, user_id: &str) -> bool {
        let id = participant_doc_id(race_id, user_id);
        let removed = {
            let mut inner = self.inner.write().await;
            inner.participants.remove(&id)
        };
        match removed {
            Some(before) => {
                self.bus.publish(vec![ChangeEvent::Participant {
                    before: Some(before),
                    after: None,
                }]);
                true
            }
            None => false,
        }
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let events = {
            let mut inner = self.inner.write().await;

            let participants: BTreeMap<String, Participant> = batch
                .participants
                .keys()
                .filter_map(|id| inner.participants.get(id).map(|p| (id.clone(), p.clone())))
                .collect();
            let races: BTreeMap<String, Race> = batch
                .race_patches
                .keys()
                .filter_map(|id| inner.races.get(id).map(|r| (id.clone(), r.clone())))
                .collect();

            let resolved = resolve_batch(batch, &participants, &races, chrono::Utc::now())?;

            for (id, baseline) in resolved.baselines {
                inner.baselines.insert(id, baseline);
            }
            for (id, participant) in resolved.participants {
                inner.participants.insert(id, participant);
            }
            for race in resolved.races {
                inner.races.insert(race.id.clone(), race);
            }
            resolved.events
        };

        self.bus.publish(events);
        Ok(())
    }
}

impl RaceStore for MemoryStore {
    fn get_race(&self, race_id: &str) -> BoxFuture<'static, StoreResult<Option<Race>>> {
        let store = self.clone();
        let race_id = race_id.to_string();
        Box::pin(async move { Ok(store.inner.read().await.races.get(&race_id).cloned()) })
    }

    fn put_race(&self, race: Race) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.put_race(race).await;
            Ok(())
        })
    }

    fn races_with_status(&self, status: RaceStatus) -> BoxFuture<'static, StoreResult<Vec<Race>>> {
        let store = self.clone();
        Box::pin(async move {
            let inner = store.inner.read().await;
            let mut races: Vec<Race> = inner
                .races
                .values()
                .filter(|r| r.status == status)
                .cloned()
                .collect();
            races.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(races)
        })
    }

    fn get_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Participant>>> {
        let store = self.clone();
        let id = participant_doc_id(race_id, user_id);
        Box::pin(async move { Ok(store.inner.read().await.participants.get(&id).cloned()) })
    }

    fn race_participants(
        &self,
        race_id: &str,
    ) -> BoxFuture<'static, StoreResult<Vec<Participant>>> {
        let store = self.clone();
        let race_id = race_id.to_string();
        Box::pin(async move {
            let inner = store.inner.read().await;
            Ok(inner
                .participants
                .values()
                .filter(|p| p.race_id == race_id)
                .cloned()
                .collect())
        })
    }

    fn participations_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Vec<Participant>>> {
        let store = self.clone();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let inner = store.inner.read().await;
            Ok(inner
                .participants
                .values()
                .filter(|p| p.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn insert_participant(&self, participant: Participant) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.insert_participant(participant).await;
            Ok(())
        })
    }

    fn delete_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        let (race_id, user_id) = (race_id.to_string(), user_id.to_string());
        Box::pin(async move { Ok(store.delete_participant(&race_id, &user_id).await) })
    }

    fn get_baseline(
        &self,
        user_id: &str,
        race_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Baseline>>> {
        let store = self.clone();
        let id = baseline_doc_id(user_id, race_id);
        Box::pin(async move { Ok(store.inner.read().await.baselines.get(&id).cloned()) })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(batch).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let (bus, mut rx) = EventBus::channel();
        let store = MemoryStore::new(bus);
        store
            .put_race(Race::new("race-1", "Dash", "org", 5.0, RaceStatus::Active))
            .await;
        let alice = Participant::new("race-1", "alice", "Alice", 5.0);
        store.insert_participant(alice.clone()).await;
        while rx.try_recv().is_ok() {}

        let mut batch = WriteBatch::new();
        batch.put_baseline(Baseline::legacy(
            "alice",
            "race-1",
            Default::default(),
            chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            chrono::Utc::now(),
        ));
        let mut next = alice.clone();
        next.steps = 500;
        next.version = 8;
        batch.put_progress(next, 7);

        let err = RaceStore::commit(&store, batch).await.err().unwrap();
        assert!(matches!(err, AppError::Conflict(_)));

        // Nothing written, nothing published
        assert!(RaceStore::get_baseline(&store, "alice", "race-1")
            .await
            .unwrap()
            .is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_commit_publishes_before_and_after() {
        let (bus, mut rx) = EventBus::channel();
        let store = MemoryStore::new(bus);
        let alice = Participant::new("race-1", "alice", "Alice", 5.0);
        store.insert_participant(alice.clone()).await;
        let created = rx.try_recv().unwrap();
        assert!(matches!(
            created,
            ChangeEvent::Participant { before: None, .. }
        ));

        let mut next = alice.clone();
        next.steps = 500;
        next.version = 1;
        let mut batch = WriteBatch::new();
        batch.put_progress(next, 0);
        RaceStore::commit(&store, batch).await.unwrap();

        match rx.try_recv().unwrap() {
            ChangeEvent::Participant {
                before: Some(before),
                after: Some(after),
            } => {
                assert_eq!(before.steps, 0);
                assert_eq!(after.steps, 500);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
