//! Job dispatch queue.
//!
//! Delivery is at-least-once: a received message stays invisible for the
//! visibility timeout and reappears unless it is acknowledged. A message
//! received more than `max_receive_count` times moves to the dead-letter list.

use crate::error::ServiceError;
use async_trait::async_trait;
use paddock_core::JobName;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Body of a dispatch message, published when a job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_name: JobName,
    pub model_id: String,
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaderboard_id: Option<String>,
}

/// A delivered message. `receipt` identifies this delivery for [`JobQueue::ack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
    pub receive_count: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, body: String) -> Result<(), ServiceError>;

    /// Returns the next visible message, if any.
    async fn receive(&self) -> Result<Option<QueueMessage>, ServiceError>;

    /// Deletes the delivered message. Fails with `NotFound` once the receipt
    /// is stale, i.e. the message became visible again or was already acked.
    async fn ack(&self, receipt: &str) -> Result<(), ServiceError>;
}

#[derive(Debug)]
struct Entry {
    body: String,
    receive_count: u32,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    dead_letters: Vec<String>,
}

/// In-process queue with visibility timeout and a dead-letter list.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    visibility_timeout: Duration,
    max_receive_count: u32,
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    /// Creates a queue.
    ///
    /// # Arguments
    /// * `visibility_timeout` - How long a received message stays hidden
    /// * `max_receive_count` - Deliveries allowed before dead-lettering
    #[must_use]
    pub fn new(visibility_timeout: Duration, max_receive_count: u32) -> Self {
        Self { visibility_timeout, max_receive_count, state: Mutex::new(QueueState::default()) }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn dead_letters(&self) -> Vec<String> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn send(&self, body: String) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        state.entries.push_back(Entry { body, receive_count: 0, receipt: None, invisible_until: None });
        debug!(depth = state.entries.len(), "Enqueued message");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueueMessage>, ServiceError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        loop {
            let Some(index) = state.entries.iter().position(|entry| entry.is_visible(now)) else {
                return Ok(None);
            };

            if state.entries[index].receive_count >= self.max_receive_count {
                if let Some(entry) = state.entries.remove(index) {
                    warn!(receive_count = entry.receive_count, "Message exceeded max receive count, moving to dead letters");
                    state.dead_letters.push(entry.body);
                }
                continue;
            }

            let entry = &mut state.entries[index];
            let receipt = uuid::Uuid::new_v4().to_string();
            entry.receive_count += 1;
            entry.receipt = Some(receipt.clone());
            entry.invisible_until = Some(now + self.visibility_timeout);
            return Ok(Some(QueueMessage { receipt, body: entry.body.clone(), receive_count: entry.receive_count }));
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), ServiceError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let index = state
            .entries
            .iter()
            .position(|entry| entry.receipt.as_deref() == Some(receipt) && !entry.is_visible(now))
            .ok_or_else(|| ServiceError::NotFound(format!("receipt {receipt}")))?;
        state.entries.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_body(id: &str) -> String {
        serde_json::to_string(&JobMessage {
            job_name: JobName::parse(&format!("paddock-training-{id}")).unwrap(),
            model_id: "model-1".to_string(),
            profile_id: "profile-1".to_string(),
            leaderboard_id: None,
        })
        .unwrap()
    }

    #[test]
    fn test_job_message_wire_format() {
        let message: JobMessage = serde_json::from_str(
            r#"{"jobName":"paddock-submission-s1","modelId":"m","profileId":"p","leaderboardId":"lb"}"#,
        )
        .unwrap();
        assert_eq!(message.job_name.to_string(), "paddock-submission-s1");
        assert_eq!(message.leaderboard_id.as_deref(), Some("lb"));

        let bad = serde_json::from_str::<JobMessage>(r#"{"jobName":"other-1","modelId":"m","profileId":"p"}"#);
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_acked_message_is_removed() {
        let queue = InMemoryJobQueue::new(Duration::from_secs(30), 3);
        queue.send(message_body("a")).await.unwrap();

        let message = queue.receive().await.unwrap().unwrap();
        assert_eq!(message.receive_count, 1);
        assert!(queue.receive().await.unwrap().is_none());

        queue.ack(&message.receipt).await.unwrap();
        assert!(queue.is_empty().await);
        assert!(queue.ack(&message.receipt).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered_then_dead_lettered() {
        let queue = InMemoryJobQueue::new(Duration::from_secs(30), 2);
        queue.send(message_body("b")).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let second = queue.receive().await.unwrap().unwrap();
        assert_eq!(second.receive_count, 2);
        assert_ne!(first.receipt, second.receipt);
        assert!(queue.ack(&first.receipt).await.is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(queue.receive().await.unwrap().is_none());
        assert_eq!(queue.dead_letters().await, vec![message_body("b")]);
        assert!(queue.is_empty().await);
    }
}
