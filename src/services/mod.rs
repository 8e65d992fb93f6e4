// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod completion;
pub mod guard;
pub mod notifications;
pub mod progress;
pub mod ranking;
pub mod reconciler;
pub mod scheduler;
pub mod triggers;

pub use completion::CompletionMonitor;
pub use guard::RaceConditionGuard;
pub use notifications::Notifier;
pub use ranking::RankEngine;
pub use reconciler::ProgressReconciler;
pub use scheduler::DeadlineScheduler;
pub use triggers::TriggerService;
