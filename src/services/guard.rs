// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pre-commit staleness check for buffered progress writes.

use crate::db::RaceStore;
use crate::error::AppError;
use std::sync::Arc;

/// A participant as it was when the reconciler read it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadMark {
    pub race_id: String,
    pub user_id: String,
    pub steps: u64,
}

/// First participant found to have changed since it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRead {
    pub race_id: String,
    pub user_id: String,
    pub read_steps: u64,
    /// `None` when the participant disappeared
    pub stored_steps: Option<u64>,
}

#[derive(Clone)]
pub struct RaceConditionGuard {
    store: Arc<dyn RaceStore>,
}

impl RaceConditionGuard {
    pub fn new(store: Arc<dyn RaceStore>) -> Self {
        Self { store }
    }

    /// Re-read every marked participant. Returns the first stale one, if any.
    pub async fn verify(&self, marks: &[ReadMark]) -> Result<Option<StaleRead>, AppError> {
        for mark in marks {
            let stored = self
                .store
                .get_participant(&mark.race_id, &mark.user_id)
                .await?
                .map(|p| p.steps);

            if stored != Some(mark.steps) {
                tracing::warn!(
                    race_id = %mark.race_id,
                    user_id = %mark.user_id,
                    read_steps = mark.steps,
                    stored_steps = ?stored,
                    "Participant changed during sync, aborting batch"
                );
                return Ok(Some(StaleRead {
                    race_id: mark.race_id.clone(),
                    user_id: mark.user_id.clone(),
                    read_steps: mark.steps,
                    stored_steps: stored,
                }));
            }
        }
        Ok(None)
    }
}
