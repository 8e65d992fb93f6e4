// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment (Cloud Run
//! secret bindings), so everything is read once at startup.

use std::env;
use std::str::FromStr;

/// Queue name the internal scheduler endpoint accepts (`x-cloudtasks-queuename`).
pub const SCHEDULER_QUEUE_NAME: &str = "race-deadlines";
/// Queue name the document-event relay endpoint accepts.
pub const DOCUMENT_EVENTS_QUEUE_NAME: &str = "race-document-events";

/// Which persistence backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    /// Process-local store for development and tests
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StoreBackend::Firestore),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::Invalid("RACE_STORE")),
        }
    }
}

/// Where the triggers get their change events from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEventSource {
    /// The store publishes its own writes; only external writes are relayed
    Store,
    /// Every document write, including this service's, arrives via the relay
    Relay,
}

impl FromStr for ChangeEventSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Ok(ChangeEventSource::Store),
            "relay" => Ok(ChangeEventSource::Relay),
            _ => Err(ConfigError::Invalid("CHANGE_EVENT_SOURCE")),
        }
    }
}

/// Tunables for health-data reconciliation and race timing.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPolicy {
    /// Kilometers per step when the platform reports steps without distance
    pub steps_to_km: f64,
    /// Upper bound on steps credited by a single sync
    pub max_steps_per_sync: u64,
    /// Distance deltas below this are treated as "no distance reported" (km)
    pub distance_epsilon_km: f64,
    /// Distances closer than this are tied for ranking (km)
    pub rank_tie_tolerance_km: f64,
    /// Ending window when the race has no explicit duration
    pub ending_window_minutes: i64,
    /// How long before the deadline the countdown notification goes out
    pub countdown_warning_minutes: i64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            steps_to_km: 0.000762,
            max_steps_per_sync: 20_000,
            distance_epsilon_km: 0.001,
            rank_tie_tolerance_km: 0.01,
            ending_window_minutes: 60,
            countdown_warning_minutes: 5,
        }
    }
}

impl SyncPolicy {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            steps_to_km: parse_env("STEPS_TO_KM_FACTOR", defaults.steps_to_km)?,
            max_steps_per_sync: parse_env("MAX_STEPS_PER_SYNC", defaults.max_steps_per_sync)?,
            distance_epsilon_km: defaults.distance_epsilon_km,
            rank_tie_tolerance_km: defaults.rank_tie_tolerance_km,
            ending_window_minutes: parse_env(
                "ENDING_WINDOW_MINUTES",
                defaults.ending_window_minutes,
            )?,
            countdown_warning_minutes: parse_env(
                "COUNTDOWN_WARNING_MINUTES",
                defaults.countdown_warning_minutes,
            )?,
        })
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Persistence backend
    pub store_backend: StoreBackend,
    /// Source of trigger change events
    pub change_event_source: ChangeEventSource,
    /// Interval of the in-process deadline sweep (0 disables it)
    pub deadline_check_interval_secs: u64,
    /// Reconciliation tunables
    pub sync_policy: SyncPolicy,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            store_backend: env::var("RACE_STORE")
                .unwrap_or_else(|_| "firestore".to_string())
                .parse()?,
            change_event_source: env::var("CHANGE_EVENT_SOURCE")
                .unwrap_or_else(|_| "store".to_string())
                .parse()?,
            deadline_check_interval_secs: parse_env("DEADLINE_CHECK_INTERVAL_SECS", 60)?,
            sync_policy: SyncPolicy::from_env()?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
        })
    }

    /// Config for tests: in-memory store, no background sweep.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            change_event_source: ChangeEventSource::Store,
            deadline_check_interval_secs: 0,
            sync_policy: SyncPolicy::default(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }
}

fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
