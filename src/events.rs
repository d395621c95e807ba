//! Asynchronous lifecycle and error notifications for the caller.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Event payload delivered to the subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum CameraEvent {
    Error {
        #[serde(rename = "errorDescription")]
        description: String,
    },
    CameraClosing,
}

impl CameraEvent {
    pub fn error(description: impl Into<String>) -> Self {
        CameraEvent::Error {
            description: description.into(),
        }
    }
}

/// Sink with at most one subscriber. Nothing is buffered for absent subscribers.
#[derive(Debug, Default)]
pub struct EventSink {
    subscriber: Option<mpsc::UnboundedSender<CameraEvent>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any current subscriber
    pub fn subscribe(&mut self, subscriber: mpsc::UnboundedSender<CameraEvent>) {
        if self.subscriber.replace(subscriber).is_some() {
            debug!("Replacing camera event subscriber");
        }
    }

    pub fn unsubscribe(&mut self) {
        self.subscriber = None;
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.is_some()
    }

    pub fn send(&mut self, event: CameraEvent) {
        let Some(subscriber) = &self.subscriber else {
            debug!("No event subscriber, dropping {event:?}");
            return;
        };
        if subscriber.send(event).is_err() {
            debug!("Event subscriber went away");
            self.subscriber = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payloads() {
        let error = serde_json::to_string(&CameraEvent::error("Max cameras in use"))
            .expect("serialize failed");
        assert_eq!(
            error,
            r#"{"eventType":"error","errorDescription":"Max cameras in use"}"#
        );

        let closing = serde_json::to_string(&CameraEvent::CameraClosing).expect("serialize failed");
        assert_eq!(closing, r#"{"eventType":"camera_closing"}"#);
    }

    #[test]
    fn test_send_without_subscriber_is_noop() {
        let mut sink = EventSink::new();
        sink.send(CameraEvent::CameraClosing);
        assert!(!sink.has_subscriber());
    }

    #[test]
    fn test_subscribe_replaces_previous() {
        let mut sink = EventSink::new();
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();

        sink.subscribe(first_tx);
        sink.subscribe(second_tx);
        sink.send(CameraEvent::CameraClosing);

        assert!(first_rx.try_recv().is_err());
        assert_eq!(
            second_rx.try_recv().expect("event expected"),
            CameraEvent::CameraClosing
        );
    }

    #[test]
    fn test_unsubscribe_drops_events() {
        let mut sink = EventSink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.subscribe(tx);
        sink.unsubscribe();
        sink.send(CameraEvent::error("lost"));
        // Sender was dropped by unsubscribe, so the channel is closed and empty
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dead_subscriber_is_cleared() {
        let mut sink = EventSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sink.subscribe(tx);
        drop(rx);
        sink.send(CameraEvent::CameraClosing);
        assert!(!sink.has_subscriber());
    }
}
