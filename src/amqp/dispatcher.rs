//! Background event dispatch
//!
//! Committed state changes are queued on a bounded channel and handed to the
//! [`EventPublisher`] in order by a single task, so broker latency and publish
//! retries never reach the RSVP caller. A full queue drops the event.

use crate::amqp::publisher::EventPublisher;
use crate::metrics::MetricsCollector;
use crate::types::AttendanceMessage;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Messages that may wait for the publisher before new ones are dropped
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Publish(AttendanceMessage),
    Flush(oneshot::Sender<()>),
}

/// Handle to the publishing task
#[derive(Clone)]
pub struct EventDispatcher {
    sender: mpsc::Sender<Command>,
    metrics: Arc<MetricsCollector>,
}

impl EventDispatcher {
    /// Spawn the publishing task on the current Tokio runtime
    ///
    /// The task exits once every handle has been dropped.
    pub fn spawn(
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(run(publisher, metrics.clone(), receiver));
        Self { sender, metrics }
    }

    /// Queue a message without waiting for the broker
    pub fn dispatch(&self, message: AttendanceMessage) {
        let event_type = event_type(&message);
        let reason = match self.sender.try_send(Command::Publish(message)) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "event queue full",
            Err(TrySendError::Closed(_)) => "dispatcher stopped",
        };

        self.metrics.record_event_published(event_type, false);
        warn!("Dropping {} event: {}", event_type, reason);
    }

    /// Wait until every message queued so far has been handed to the publisher
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Command::Flush(ack)).await.is_ok() {
            // A closed ack means the task is gone and nothing is pending
            let _ = done.await;
        }
    }
}

fn event_type(message: &AttendanceMessage) -> &'static str {
    match message {
        AttendanceMessage::ParticipantStateChanged(_) => "participant_state_changed",
        AttendanceMessage::WaitlistPromoted(_) => "waitlist_promoted",
    }
}

async fn run(
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    mut receiver: mpsc::Receiver<Command>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Publish(message) => publish(publisher.as_ref(), &metrics, message).await,
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Event dispatcher stopped");
}

async fn publish(
    publisher: &dyn EventPublisher,
    metrics: &MetricsCollector,
    message: AttendanceMessage,
) {
    let event_type = event_type(&message);
    let (match_id, result) = match message {
        AttendanceMessage::ParticipantStateChanged(event) => (
            event.match_id.clone(),
            publisher.publish_participant_state_changed(event).await,
        ),
        AttendanceMessage::WaitlistPromoted(event) => (
            event.match_id.clone(),
            publisher.publish_waitlist_promoted(event).await,
        ),
    };

    metrics.record_event_published(event_type, result.is_ok());
    if let Err(e) = result {
        warn!(
            "Failed to publish {} event for match {}: {}",
            event_type, match_id, e
        );
    }
}
