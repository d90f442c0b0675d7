//! Per-task event pub/sub: one `broadcast::Sender` per task id in a
//! `HashMap` guarded by a single lock, created lazily on first subscribe
//! and torn down on deletion. Subscribers that fall behind are never
//! silently dropped — `recv` turns a lag into a typed event instead of
//! swallowing it.

use std::collections::HashMap;

use engine_domain::model::{Interaction, TaskStatus};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

/// Ring buffer depth per task. A subscriber more than this many events
/// behind the publisher sees a `SubscriberLagged` event on its next recv
/// rather than blocking the executor.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    Interaction(Interaction),
    StatusChanged { status: TaskStatus },
    SubscriberLagged { skipped: u64 },
    TaskDeleted,
}

pub struct FanOut {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<TaskEvent>>>,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

impl FanOut {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the channel for `task_id` and return a fresh
    /// subscription. No back-fill: the subscriber only sees events
    /// published after this call returns.
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskEvent> {
        let mut channels = self.channels.write();
        let capacity = self.capacity;
        let tx = channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0);
        tx.subscribe()
    }

    /// Broadcast `event` to every live subscriber of `task_id`. A no-op
    /// if nobody has ever subscribed — publishing must never block or
    /// fail the caller (the executor loop).
    pub fn publish(&self, task_id: &str, event: TaskEvent) {
        let channels = self.channels.read();
        match channels.get(task_id) {
            Some(tx) => {
                // Err here just means zero receivers are currently attached.
                let _ = tx.send(event);
            }
            None => tracing::trace!(task_id, "publish with no channel yet, dropping"),
        }
    }

    /// Send a terminal event to every subscriber, then drop the channel.
    /// Called once a task row is actually removed from storage.
    pub fn delete(&self, task_id: &str) {
        {
            let channels = self.channels.read();
            if let Some(tx) = channels.get(task_id) {
                let _ = tx.send(TaskEvent::TaskDeleted);
            }
        }
        self.channels.write().remove(task_id);
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.channels
            .read()
            .get(task_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// Receive the next event from a subscription, surfacing a lag as a
/// typed `SubscriberLagged` event rather than silently skipping it.
/// Returns `None` once the task's channel has been torn down and no
/// further events will ever arrive.
pub async fn recv(rx: &mut broadcast::Receiver<TaskEvent>) -> Option<TaskEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                return Some(TaskEvent::SubscriberLagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_domain::model::{InteractionKind, Usage};

    fn sample_interaction() -> Interaction {
        Interaction {
            id: "i1".into(),
            task_id: "t1".into(),
            kind: InteractionKind::AssistantResponse,
            content: "hello".into(),
            timestamp: chrono::Utc::now(),
            usage: Usage::default(),
            duration_ms: None,
            attachments: vec![],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers_the_event() {
        let fanout = FanOut::new(CHANNEL_CAPACITY);
        let mut rx = fanout.subscribe("t1");

        fanout.publish("t1", TaskEvent::Interaction(sample_interaction()));

        match recv(&mut rx).await {
            Some(TaskEvent::Interaction(i)) => assert_eq!(i.content, "hello"),
            other => panic!("expected an Interaction event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_late_subscriber_never_sees_earlier_events() {
        let fanout = FanOut::new(CHANNEL_CAPACITY);
        fanout.publish("t1", TaskEvent::StatusChanged { status: TaskStatus::Running });

        let mut rx = fanout.subscribe("t1");
        fanout.publish("t1", TaskEvent::StatusChanged { status: TaskStatus::Finished });

        match recv(&mut rx).await {
            Some(TaskEvent::StatusChanged { status: TaskStatus::Finished }) => {}
            other => panic!("expected only the post-subscribe event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_a_task_sends_a_terminal_event_then_closes_the_channel() {
        let fanout = FanOut::new(CHANNEL_CAPACITY);
        let mut rx = fanout.subscribe("t1");

        fanout.delete("t1");
        assert!(matches!(recv(&mut rx).await, Some(TaskEvent::TaskDeleted)));
        assert!(recv(&mut rx).await.is_none());

        // The channel is gone; a fresh subscribe gets a brand new one.
        assert_eq!(fanout.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn publishing_to_a_task_nobody_subscribed_to_is_a_silent_no_op() {
        let fanout = FanOut::new(CHANNEL_CAPACITY);
        fanout.publish("never-subscribed", TaskEvent::TaskDeleted);
    }

    #[tokio::test]
    async fn a_lagging_subscriber_gets_a_typed_lag_event_instead_of_silent_drops() {
        let fanout = FanOut::new(CHANNEL_CAPACITY);
        let mut rx = fanout.subscribe("t1");

        for _ in 0..(CHANNEL_CAPACITY + 5) {
            fanout.publish("t1", TaskEvent::StatusChanged { status: TaskStatus::Running });
        }

        match recv(&mut rx).await {
            Some(TaskEvent::SubscriberLagged { skipped }) => assert!(skipped > 0),
            other => panic!("expected a SubscriberLagged event, got {other:?}"),
        }
    }
}
