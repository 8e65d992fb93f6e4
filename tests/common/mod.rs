// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use stepzsync_races::config::Config;
use stepzsync_races::db::{FirestoreDb, MemoryStore, RaceStore};
use stepzsync_races::events::{EventBus, EventReceiver};
use stepzsync_races::middleware::auth::Claims;
use stepzsync_races::models::{HealthTotals, Notification, Participant, Race, RaceStatus};
use stepzsync_races::routes::create_router;
use stepzsync_races::services::notifications::NotificationReceiver;
use stepzsync_races::services::progress::Snapshot;
use stepzsync_races::services::reconciler::{BaselineRequest, SyncRequest};
use stepzsync_races::services::{Notifier, TriggerService};
use stepzsync_races::AppState;

/// Sign a session token for `user_id` the way the identity service does.
#[allow(dead_code)]
pub fn create_jwt(user_id: &str, signing_key: &[u8]) -> String {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + 24 * 60 * 60, // 1 day
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .unwrap()
}

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> (Arc<dyn RaceStore>, EventReceiver) {
    let (bus, events) = EventBus::channel();
    let db = FirestoreDb::new("test-project", bus)
        .await
        .expect("Failed to connect to Firestore emulator");
    (Arc::new(db), events)
}

/// Everything a test needs to drive the engine without a server.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<dyn RaceStore>,
    pub events: EventReceiver,
    pub notifications: NotificationReceiver,
    pub triggers: TriggerService,
}

#[allow(dead_code)]
impl TestApp {
    /// Run triggers until no change events are left.
    pub async fn settle(&mut self) -> usize {
        self.triggers.drain(&mut self.events).await
    }

    /// Notifications queued since the last call.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }

    /// Session token for `user_id`, signed with the test key.
    pub fn token(&self, user_id: &str) -> String {
        create_jwt(user_id, &self.state.config.jwt_signing_key)
    }

    pub async fn race(&self, race_id: &str) -> Race {
        self.store.get_race(race_id).await.unwrap().unwrap()
    }

    pub async fn participant(&self, race_id: &str, user_id: &str) -> Participant {
        self.store
            .get_participant(race_id, user_id)
            .await
            .unwrap()
            .unwrap()
    }
}

/// Create a test app on the in-memory store.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    let (bus, events) = EventBus::channel();
    let store: Arc<dyn RaceStore> = Arc::new(MemoryStore::new(bus));
    create_test_app_with(store, events)
}

/// Create a test app on top of an existing store and its event stream.
#[allow(dead_code)]
pub fn create_test_app_with(store: Arc<dyn RaceStore>, events: EventReceiver) -> TestApp {
    let config = Config::test_default();
    let (notifier, notifications) = Notifier::channel();
    let state = Arc::new(AppState::new(config, store.clone(), notifier));
    let triggers = state.triggers.clone();

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        events,
        notifications,
        triggers,
    }
}

/// Race in `status` that started an hour ago.
#[allow(dead_code)]
pub fn test_race(id: &str, total_distance: f64, status: RaceStatus) -> Race {
    let mut race = Race::new(id, "Morning Dash", "organizer", total_distance, status);
    race.actual_start_time = Some(Utc::now() - Duration::hours(1));
    race
}

#[allow(dead_code)]
pub async fn seed_race(app: &mut TestApp, race: Race) {
    app.store.put_race(race).await.unwrap();
    app.settle().await;
}

/// Insert participants and let the counter triggers run.
#[allow(dead_code)]
pub async fn seed_participants(app: &mut TestApp, race: &Race, users: &[&str]) {
    for user in users {
        let mut p = Participant::new(&race.id, user, &display_name(user), race.total_distance);
        p.joined_at = race.actual_start_time;
        app.store.insert_participant(p).await.unwrap();
    }
    app.settle().await;
}

#[allow(dead_code)]
pub fn display_name(user_id: &str) -> String {
    let mut chars = user_id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[allow(dead_code)]
pub fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

#[allow(dead_code)]
pub fn totals(steps: u64, distance: f64) -> HealthTotals {
    HealthTotals {
        steps,
        distance,
        calories: steps as f64 * 0.04,
    }
}

#[allow(dead_code)]
pub fn sync_request(user_id: &str, steps: u64, distance: f64) -> SyncRequest {
    SyncRequest {
        user_id: user_id.to_string(),
        snapshot: Snapshot {
            totals: totals(steps, distance),
            date: test_day(),
        },
        client_timestamp: None,
    }
}

/// Anchor a time-based baseline for `user_id` at the given totals.
#[allow(dead_code)]
pub async fn join_with_baseline(app: &TestApp, race_id: &str, user_id: &str, steps: u64, distance: f64) {
    app.state
        .reconciler
        .initialize_baseline(
            user_id,
            BaselineRequest {
                user_id: user_id.to_string(),
                race_id: race_id.to_string(),
                race_title: None,
                race_start_time: None,
                at_start: totals(steps, distance),
            },
        )
        .await
        .unwrap();
}
