// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task handler routes for Cloud Tasks / Cloud Scheduler callbacks.
//!
//! These endpoints are called by our queues, not directly by users.

use crate::config::{DOCUMENT_EVENTS_QUEUE_NAME, SCHEDULER_QUEUE_NAME};
use crate::error::AppError;
use crate::events::{ChangeEvent, DocumentEvent};
use crate::services::scheduler::SweepReport;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;

/// Task handler routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/race-deadlines", post(race_deadlines))
        .route("/tasks/document-events", post(document_event))
}

/// Whether the request was delivered by the named queue.
///
/// Cloud Run strips `x-cloudtasks-*` headers from external requests, so the
/// header's presence means the call originated inside the project.
fn from_queue(headers: &HeaderMap, queue: &str) -> bool {
    headers
        .get("x-cloudtasks-queuename")
        .and_then(|h| h.to_str().ok())
        .map(|name| name == queue)
        .unwrap_or(false)
}

/// Sweep ending races: countdown warnings and expired deadlines.
async fn race_deadlines(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !from_queue(&headers, SCHEDULER_QUEUE_NAME) {
        tracing::warn!(
            header = ?headers.get("x-cloudtasks-queuename"),
            "Security Alert: Blocked unauthorized access to race_deadlines"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.scheduler.sweep(chrono::Utc::now()).await {
        Ok(report) => (StatusCode::OK, Json::<SweepReport>(report)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Deadline sweep failed");
            // Non-2xx so the queue retries
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run the denormalization triggers for one relayed document write.
///
/// Participant joins and removals, account deletion and race start/cancel
/// are written by other services; their Firestore document events are
/// forwarded here. A failed handler returns 500 so the queue redelivers.
async fn document_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<DocumentEvent>, JsonRejection>,
) -> Response {
    if !from_queue(&headers, DOCUMENT_EVENTS_QUEUE_NAME) {
        tracing::warn!(
            header = ?headers.get("x-cloudtasks-queuename"),
            "Security Alert: Blocked unauthorized access to document_event"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    let Json(event) = match payload {
        Ok(payload) => payload,
        // Malformed events are not retried
        Err(rejection) => return AppError::from(rejection).into_response(),
    };

    let collection = event.collection();
    let event = ChangeEvent::from(event);
    tracing::debug!(collection, race_id = ?event.race_id(), "Relayed document event");

    match state.triggers.handle(&event).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(collection, error = %e, "Relayed document event failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
