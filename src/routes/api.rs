// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::LeaderboardEntry;
use crate::services::progress::Snapshot;
use crate::services::ranking::leaderboard;
use crate::services::reconciler::{totals_from_client, BaselineRequest, SyncRequest};
use crate::time_utils::{parse_health_date, parse_utc_rfc3339};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::{Validate, ValidationError};

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/races/sync", post(sync_health_data))
        .route("/api/races/baseline", post(initialize_baseline))
        .route("/api/races/{race_id}/leaderboard", get(get_leaderboard))
}

fn validate_health_date(date: &str) -> std::result::Result<(), ValidationError> {
    if parse_health_date(date).is_some() {
        return Ok(());
    }
    let mut err = ValidationError::new("health_date_format");
    err.message = Some("date must be formatted as YYYY-MM-DD".into());
    Err(err)
}

// ─── Health Data Sync ────────────────────────────────────────

/// Cumulative totals for the day as reported by the device's health platform.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SyncHealthDataRequest {
    #[validate(range(min = 0.0))]
    pub total_steps: f64,
    /// Kilometers
    #[validate(range(min = 0.0))]
    pub total_distance: f64,
    #[validate(range(min = 0.0))]
    pub total_calories: f64,
    /// Client clock, epoch milliseconds
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[validate(custom(function = "validate_health_date"))]
    pub date: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct SyncHealthDataResponse {
    pub success: bool,
    pub races_updated: usize,
    pub message: String,
}

/// Apply a health snapshot to every race the caller is racing in.
async fn sync_health_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<SyncHealthDataRequest>, JsonRejection>,
) -> Result<Json<SyncHealthDataResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let totals = totals_from_client(
        request.total_steps,
        request.total_distance,
        request.total_calories,
    )?;
    let date = parse_health_date(&request.date)
        .ok_or_else(|| AppError::InvalidArgument("date must be YYYY-MM-DD".to_string()))?;

    let outcome = state
        .reconciler
        .sync_health_data(SyncRequest {
            user_id: user.user_id,
            snapshot: Snapshot { totals, date },
            client_timestamp: request.timestamp.map(|t| t as i64),
        })
        .await?;

    Ok(Json(SyncHealthDataResponse {
        success: outcome.success,
        races_updated: outcome.races_updated,
        message: outcome.message,
    }))
}

// ─── Baseline Initialization ─────────────────────────────────

/// Health totals captured on the device at the moment the user joined.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitializeBaselineRequest {
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub race_id: String,
    #[serde(default)]
    pub race_title: Option<String>,
    /// ISO-8601
    #[serde(default)]
    pub race_start_time: Option<String>,
    #[validate(range(min = 0.0))]
    pub health_kit_steps_at_start: f64,
    #[validate(range(min = 0.0))]
    pub health_kit_distance_at_start: f64,
    #[validate(range(min = 0.0))]
    pub health_kit_calories_at_start: f64,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct InitializeBaselineResponse {
    pub success: bool,
    pub message: String,
}

async fn initialize_baseline(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<InitializeBaselineRequest>, JsonRejection>,
) -> Result<Json<InitializeBaselineResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let at_start = totals_from_client(
        request.health_kit_steps_at_start,
        request.health_kit_distance_at_start,
        request.health_kit_calories_at_start,
    )?;
    let race_start_time = match request.race_start_time.as_deref() {
        Some(raw) => Some(parse_utc_rfc3339(raw).ok_or_else(|| {
            AppError::InvalidArgument("raceStartTime must be an ISO-8601 timestamp".to_string())
        })?),
        None => None,
    };

    let outcome = state
        .reconciler
        .initialize_baseline(
            &user.user_id,
            BaselineRequest {
                user_id: request.user_id,
                race_id: request.race_id,
                race_title: request.race_title,
                race_start_time,
                at_start,
            },
        )
        .await?;

    Ok(Json(InitializeBaselineResponse {
        success: outcome.success,
        message: outcome.message,
    }))
}

// ─── Leaderboard ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub race_id: String,
    pub status_id: u8,
    /// True once the race completed and the standings are frozen
    pub is_final: bool,
    pub entries: Vec<LeaderboardEntry>,
}

/// Current (or final) standings of a race. Visible to the organizer and to
/// anyone with a (non-removed) participant record.
async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(race_id): Path<String>,
) -> Result<Json<LeaderboardResponse>> {
    let race = state
        .store
        .get_race(&race_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Race {} not found", race_id)))?;

    if race.created_by != user.user_id {
        let member = state
            .store
            .get_participant(&race.id, &user.user_id)
            .await?
            .is_some_and(|p| !p.is_removed);
        if !member {
            return Err(AppError::PermissionDenied(
                "Only race participants can view the leaderboard".to_string(),
            ));
        }
    }

    tracing::debug!(user_id = %user.user_id, race_id = %race.id, "Leaderboard requested");

    let (is_final, entries) = match race.final_leaderboard {
        Some(frozen) => (true, frozen),
        None => (false, leaderboard(&state.ranks.standings(&race.id).await?)),
    };

    Ok(Json(LeaderboardResponse {
        race_id: race.id,
        status_id: race.status.id(),
        is_final,
        entries,
    }))
}
