// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound notification events handed to the push delivery service.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Race context shared by every notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceRef {
    pub race_id: String,
    pub race_title: String,
}

/// A notification to be rendered and delivered by an external service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// Sent to the organizer when someone else joins their race.
    #[serde(rename_all = "camelCase")]
    ParticipantJoined {
        race: RaceRef,
        organizer_id: String,
        participant_id: String,
        participant_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Overtaking {
        race: RaceRef,
        user_id: String,
        user_name: String,
        old_rank: u32,
        new_rank: u32,
        overtaken_user_id: Option<String>,
        overtaken_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LeaderChange {
        race: RaceRef,
        leader_id: String,
        leader_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Milestone {
        race: RaceRef,
        user_id: String,
        user_name: String,
        milestone: u8,
    },
    #[serde(rename_all = "camelCase")]
    RaceStarted { race: RaceRef },
    #[serde(rename_all = "camelCase")]
    FirstFinisher {
        race: RaceRef,
        user_id: String,
        user_name: String,
    },
    /// Broadcast to everyone still racing once the ending window opens.
    #[serde(rename_all = "camelCase")]
    DeadlineAlert {
        race: RaceRef,
        first_finisher_name: String,
        deadline: DateTime<Utc>,
        deadline_minutes: i64,
    },
    #[serde(rename_all = "camelCase")]
    Countdown {
        race: RaceRef,
        minutes_left: i64,
        recipients: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    RaceCompleted {
        race: RaceRef,
        user_id: String,
        rank: u32,
        distance: f64,
        avg_speed: f64,
    },
    #[serde(rename_all = "camelCase")]
    RaceCancelled {
        race: RaceRef,
        reason: Option<String>,
    },
}

impl Notification {
    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ParticipantJoined { .. } => "participant_joined",
            Notification::Overtaking { .. } => "overtaking",
            Notification::LeaderChange { .. } => "leader_change",
            Notification::Milestone { .. } => "milestone",
            Notification::RaceStarted { .. } => "race_started",
            Notification::FirstFinisher { .. } => "first_finisher",
            Notification::DeadlineAlert { .. } => "deadline_alert",
            Notification::Countdown { .. } => "countdown",
            Notification::RaceCompleted { .. } => "race_completed",
            Notification::RaceCancelled { .. } => "race_cancelled",
        }
    }

    pub fn race_id(&self) -> &str {
        match self {
            Notification::ParticipantJoined { race, .. }
            | Notification::Overtaking { race, .. }
            | Notification::LeaderChange { race, .. }
            | Notification::Milestone { race, .. }
            | Notification::RaceStarted { race }
            | Notification::FirstFinisher { race, .. }
            | Notification::DeadlineAlert { race, .. }
            | Notification::Countdown { race, .. }
            | Notification::RaceCompleted { race, .. }
            | Notification::RaceCancelled { race, .. } => &race.race_id,
        }
    }
}
