// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod baseline;
pub mod notification;
pub mod participant;
pub mod race;

pub use baseline::{Baseline, HealthTotals};
pub use notification::{Notification, RaceRef};
pub use participant::Participant;
pub use race::{LeaderboardEntry, Race, RacePatch, RaceStatus, StatusTransition, TopParticipant};
