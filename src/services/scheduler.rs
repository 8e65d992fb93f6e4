// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ending-window sweep: countdown warnings and deadline expiry.

use crate::config::SyncPolicy;
use crate::db::{RaceStore, WriteBatch};
use crate::error::AppError;
use crate::models::{Notification, RacePatch, RaceRef, RaceStatus, StatusTransition};
use crate::services::notifications::Notifier;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub races_checked: usize,
    pub countdowns_sent: usize,
    pub races_completed: usize,
}

#[derive(Clone)]
pub struct DeadlineScheduler {
    store: Arc<dyn RaceStore>,
    notifier: Notifier,
    policy: SyncPolicy,
}

impl DeadlineScheduler {
    pub fn new(store: Arc<dyn RaceStore>, notifier: Notifier, policy: SyncPolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// Sweep every race in its ending window.
    ///
    /// A race past its deadline is completed (the race trigger freezes the
    /// leaderboard). A race within the warning window gets one countdown
    /// notification to everyone still racing.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let races = self.store.races_with_status(RaceStatus::Ending).await?;
        let warning = Duration::minutes(self.policy.countdown_warning_minutes);
        let mut report = SweepReport {
            races_checked: races.len(),
            ..SweepReport::default()
        };

        for race in races {
            let Some(deadline) = race.ending_deadline else {
                tracing::warn!(race_id = %race.id, "Ending race has no deadline");
                continue;
            };

            if deadline <= now {
                let mut batch = WriteBatch::new();
                batch.patch_race(
                    &race.id,
                    RacePatch::Transition(StatusTransition::completed(now)),
                );
                self.store.commit(batch).await?;
                tracing::info!(race_id = %race.id, deadline = %deadline, "Ending window expired");
                report.races_completed += 1;
                continue;
            }

            if !race.countdown_notification_sent && deadline - now <= warning {
                let recipients: Vec<String> = self
                    .store
                    .race_participants(&race.id)
                    .await?
                    .into_iter()
                    .filter(|p| !p.is_removed && !p.is_completed)
                    .map(|p| p.user_id)
                    .collect();

                let mut batch = WriteBatch::new();
                batch.patch_race(&race.id, RacePatch::MarkCountdownSent);
                self.store.commit(batch).await?;

                if !recipients.is_empty() {
                    self.notifier.send(Notification::Countdown {
                        race: RaceRef {
                            race_id: race.id.clone(),
                            race_title: race.title.clone(),
                        },
                        // Round up so "4m30s left" reads as 5 minutes
                        minutes_left: ((deadline - now).num_seconds() + 59) / 60,
                        recipients,
                    });
                }
                report.countdowns_sent += 1;
            }
        }

        if report.races_completed > 0 || report.countdowns_sent > 0 {
            tracing::info!(
                checked = report.races_checked,
                countdowns = report.countdowns_sent,
                completed = report.races_completed,
                "Deadline sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep on a fixed interval until the task is dropped.
    pub async fn run(self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                tracing::error!(error = %e, "Deadline sweep failed");
            }
        }
    }
}
