// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Document change events published by the store after every commit.
//!
//! The trigger service consumes these to keep denormalized race fields in
//! sync. Each event carries the full document before and after the write;
//! `None` on one side means the document was created or deleted.
//!
//! Writes made outside this process (joins, account deletion, race start and
//! cancel) arrive as `DocumentEvent`s relayed by the document-event task
//! endpoint.

use crate::db::collections;
use crate::models::{Participant, Race};
use serde::Deserialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Participant {
        before: Option<Participant>,
        after: Option<Participant>,
    },
    Race {
        before: Option<Race>,
        after: Option<Race>,
    },
}

impl ChangeEvent {
    /// Race the changed document belongs to.
    pub fn race_id(&self) -> Option<&str> {
        match self {
            ChangeEvent::Participant { before, after } => after
                .as_ref()
                .or(before.as_ref())
                .map(|p| p.race_id.as_str()),
            ChangeEvent::Race { before, after } => {
                after.as_ref().or(before.as_ref()).map(|r| r.id.as_str())
            }
        }
    }
}

/// A Firestore document write as delivered by the event relay.
///
/// The `collection` tag selects the document type; `before`/`after` are the
/// document bodies, `null` for a create or delete.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "collection")]
pub enum DocumentEvent {
    #[serde(rename = "race_participants")]
    Participant {
        #[serde(default)]
        before: Option<Participant>,
        #[serde(default)]
        after: Option<Participant>,
    },
    #[serde(rename = "races")]
    Race {
        #[serde(default)]
        before: Option<Race>,
        #[serde(default)]
        after: Option<Race>,
    },
}

impl DocumentEvent {
    pub fn collection(&self) -> &'static str {
        match self {
            DocumentEvent::Participant { .. } => collections::RACE_PARTICIPANTS,
            DocumentEvent::Race { .. } => collections::RACES,
        }
    }
}

impl From<DocumentEvent> for ChangeEvent {
    fn from(event: DocumentEvent) -> Self {
        match event {
            DocumentEvent::Participant { before, after } => ChangeEvent::Participant { before, after },
            DocumentEvent::Race { before, after } => ChangeEvent::Race { before, after },
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<ChangeEvent>;

/// Sending half of the change-event channel. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: Option<mpsc::UnboundedSender<ChangeEvent>>,
}

impl EventBus {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Bus that publishes nothing. Used when every document write, ours
    /// included, is delivered through the relay instead.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, events: Vec<ChangeEvent>) {
        let Some(tx) = &self.tx else {
            return;
        };
        for event in events {
            if tx.send(event).is_err() {
                // Receiver dropped: triggers are not running in this process.
                tracing::debug!("Change event dropped, no trigger consumer");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_event_from_relay_json() {
        let after = Participant::new("race-1", "dave", "Dave", 5.0);
        let raw = json!({
            "collection": "race_participants",
            "before": null,
            "after": serde_json::to_value(&after).unwrap(),
        });

        let event: DocumentEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.collection(), collections::RACE_PARTICIPANTS);

        let change = ChangeEvent::from(event);
        assert_eq!(change.race_id(), Some("race-1"));
        assert!(matches!(
            change,
            ChangeEvent::Participant { before: None, after: Some(ref p) } if p.user_id == "dave"
        ));
    }

    #[test]
    fn test_document_event_unknown_collection_rejected() {
        let raw = json!({ "collection": "users", "before": null, "after": null });
        assert!(serde_json::from_value::<DocumentEvent>(raw).is_err());
    }

    #[tokio::test]
    async fn test_detached_bus_publishes_nothing() {
        let bus = EventBus::detached();
        bus.publish(vec![ChangeEvent::Race {
            before: None,
            after: None,
        }]);

        let (bus, mut rx) = EventBus::channel();
        bus.publish(vec![ChangeEvent::Race {
            before: None,
            after: None,
        }]);
        assert!(rx.try_recv().is_ok());
    }
}
