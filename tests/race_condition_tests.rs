// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Concurrent writer tests.
//!
//! `InterleavingStore` lets another writer land between the reconciler's
//! read and its commit, which is exactly the window the pre-commit guard
//! and the version check exist for.

use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stepzsync_races::db::{RaceStore, StoreResult, WriteBatch};
use stepzsync_races::error::AppError;
use stepzsync_races::events::EventBus;
use stepzsync_races::models::{Baseline, Participant, Race, RaceStatus};
use stepzsync_races::services::guard::{RaceConditionGuard, ReadMark};

mod common;
use common::{create_test_app_with, join_with_baseline, seed_race, sync_request, test_race};

/// Store wrapper that bumps the caller's progress right after the first
/// `participations_for_user` read, simulating a second device syncing.
struct InterleavingStore {
    inner: Arc<dyn RaceStore>,
    fired: Arc<AtomicBool>,
    bumped_steps: u64,
}

impl RaceStore for InterleavingStore {
    fn get_race(&self, race_id: &str) -> BoxFuture<'static, StoreResult<Option<Race>>> {
        self.inner.get_race(race_id)
    }

    fn put_race(&self, race: Race) -> BoxFuture<'static, StoreResult<()>> {
        self.inner.put_race(race)
    }

    fn races_with_status(&self, status: RaceStatus) -> BoxFuture<'static, StoreResult<Vec<Race>>> {
        self.inner.races_with_status(status)
    }

    fn get_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Participant>>> {
        self.inner.get_participant(race_id, user_id)
    }

    fn race_participants(
        &self,
        race_id: &str,
    ) -> BoxFuture<'static, StoreResult<Vec<Participant>>> {
        self.inner.race_participants(race_id)
    }

    fn participations_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<Vec<Participant>>> {
        let inner = self.inner.clone();
        let fired = self.fired.clone();
        let bumped_steps = self.bumped_steps;
        let user_id = user_id.to_string();
        Box::pin(async move {
            let read = inner.participations_for_user(&user_id).await?;
            if !fired.swap(true, Ordering::SeqCst) {
                let mut batch = WriteBatch::new();
                for p in &read {
                    let mut next = p.clone();
                    next.steps = bumped_steps;
                    next.version = p.version + 1;
                    batch.put_progress(next, p.version);
                }
                inner.commit(batch).await?;
            }
            Ok(read)
        })
    }

    fn insert_participant(&self, participant: Participant) -> BoxFuture<'static, StoreResult<()>> {
        self.inner.insert_participant(participant)
    }

    fn delete_participant(
        &self,
        race_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StoreResult<bool>> {
        self.inner.delete_participant(race_id, user_id)
    }

    fn get_baseline(
        &self,
        user_id: &str,
        race_id: &str,
    ) -> BoxFuture<'static, StoreResult<Option<Baseline>>> {
        self.inner.get_baseline(user_id, race_id)
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StoreResult<()>> {
        self.inner.commit(batch)
    }
}

fn interleaving_app() -> common::TestApp {
    let (bus, events) = EventBus::channel();
    let inner: Arc<dyn RaceStore> = Arc::new(stepzsync_races::db::MemoryStore::new(bus));
    let store = Arc::new(InterleavingStore {
        inner,
        fired: Arc::new(AtomicBool::new(false)),
        bumped_steps: 150,
    });
    create_test_app_with(store, events)
}

async fn seed_runner(app: &mut common::TestApp, steps: u64) {
    let race = test_race("race-1", 5.0, RaceStatus::Active);
    seed_race(app, race).await;
    let mut alice = Participant::new("race-1", "alice", "Alice", 5.0);
    alice.steps = steps;
    app.store.insert_participant(alice).await.unwrap();
    app.settle().await;
    join_with_baseline(app, "race-1", "alice", 1000, 0.8).await;
}

#[tokio::test]
async fn test_sync_aborts_when_participant_changes_mid_flight() {
    let mut app = interleaving_app();
    seed_runner(&mut app, 100).await;

    let outcome = app
        .state
        .reconciler
        .sync_health_data(sync_request("alice", 1300, 1.0))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.races_updated, 0);
    assert!(outcome.message.contains("retry"));

    // The concurrent write survives untouched
    let alice = app.participant("race-1", "alice").await;
    assert_eq!(alice.steps, 150);
    assert_eq!(alice.version, 1);
}

#[tokio::test]
async fn test_retry_after_abort_applies_remaining_progress() {
    let mut app = interleaving_app();
    seed_runner(&mut app, 100).await;

    let reconciler = &app.state.reconciler;
    let aborted = reconciler
        .sync_health_data(sync_request("alice", 1300, 1.0))
        .await
        .unwrap();
    assert!(!aborted.success);

    let retried = reconciler
        .sync_health_data(sync_request("alice", 1300, 1.0))
        .await
        .unwrap();
    assert!(retried.success);
    assert_eq!(retried.races_updated, 1);

    // 300 race steps in total, 150 of them already credited by the other writer
    let alice = app.participant("race-1", "alice").await;
    assert_eq!(alice.steps, 300);
    assert_eq!(alice.version, 2);
}

#[tokio::test]
async fn test_stale_progress_write_rejected_by_version() {
    let mut app = common::create_test_app();
    seed_runner(&mut app, 100).await;
    let stored = app.participant("race-1", "alice").await;

    // First writer wins
    let mut first = stored.clone();
    first.steps = 200;
    first.version += 1;
    let mut batch = WriteBatch::new();
    batch.put_progress(first, stored.version);
    app.store.commit(batch).await.unwrap();

    // Second writer read the same version and must not clobber the first
    let mut second = stored.clone();
    second.steps = 180;
    second.version += 1;
    let mut batch = WriteBatch::new();
    batch.put_progress(second, stored.version);
    batch.put_baseline(Baseline::legacy(
        "alice",
        "race-1",
        common::totals(5000, 4.0),
        common::test_day(),
        chrono::Utc::now(),
    ));
    let err = app.store.commit(batch).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    assert_eq!(app.participant("race-1", "alice").await.steps, 200);
    // Nothing from the rejected batch was written
    let baseline = app
        .store
        .get_baseline("alice", "race-1")
        .await
        .unwrap()
        .unwrap();
    assert!(baseline.is_time_based);
}

#[tokio::test]
async fn test_guard_reports_first_stale_read() {
    let mut app = common::create_test_app();
    seed_runner(&mut app, 100).await;
    let guard = RaceConditionGuard::new(app.store.clone());

    let fresh = ReadMark {
        race_id: "race-1".to_string(),
        user_id: "alice".to_string(),
        steps: 100,
    };
    assert!(guard.verify(&[fresh.clone()]).await.unwrap().is_none());

    let stale = ReadMark {
        steps: 90,
        ..fresh.clone()
    };
    let gone = ReadMark {
        user_id: "ghost".to_string(),
        ..fresh
    };
    let report = guard.verify(&[stale, gone]).await.unwrap().unwrap();
    assert_eq!(report.user_id, "alice");
    assert_eq!(report.read_steps, 90);
    assert_eq!(report.stored_steps, Some(100));
}
