// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound notification channel.
//!
//! Push delivery lives in a separate service; this process only hands
//! notifications off. The default consumer logs them.

use crate::models::Notification;
use tokio::sync::mpsc;

pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, notification: Notification) {
        tracing::debug!(
            kind = notification.kind(),
            race_id = notification.race_id(),
            "Queueing notification"
        );
        if self.tx.send(notification).is_err() {
            tracing::warn!("Notification dropped, no consumer");
        }
    }
}

/// Log every notification until the channel closes.
pub async fn log_notifications(mut rx: NotificationReceiver) {
    while let Some(notification) = rx.recv().await {
        match serde_json::to_string(&notification) {
            Ok(payload) => tracing::info!(
                kind = notification.kind(),
                race_id = notification.race_id(),
                payload = %payload,
                "Notification ready for delivery"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to serialize notification"),
        }
    }
}
