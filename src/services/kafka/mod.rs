use crate::config::KafkaConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{FeedbackLabel, ItemId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Emitted by the library sync pipeline once a user's owned items changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibrarySyncedEvent {
    pub user_id: UserId,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Submitted,
    Deleted,
    Reset,
}

/// Audit record of a feedback change, published for downstream analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub user_id: UserId,
    pub item_id: Option<ItemId>,
    pub label: Option<FeedbackLabel>,
    pub action: FeedbackAction,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait FeedbackPublisher: Send + Sync {
    async fn publish(&self, message: &FeedbackMessage) -> EngineResult<()>;
}

pub struct KafkaProducer {
    producer: FutureProducer,
    feedback_topic: String,
    sync_topic: String,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> EngineResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .create()
            .map_err(|e| EngineError::Messaging(format!("failed to create producer: {e}")))?;

        Ok(Self {
            producer,
            feedback_topic: config.feedback_topic.clone(),
            sync_topic: config.sync_topic.clone(),
        })
    }

    async fn send_json<T: Serialize>(&self, topic: &str, key: &str, value: &T) -> EngineResult<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| EngineError::Messaging(format!("failed to encode message: {e}")))?;
        let record = FutureRecord::to(topic).payload(&payload).key(key);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => Ok(()),
            Err((e, _)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(EngineError::Messaging(format!("kafka send error: {e}")))
            }
        }
    }

    /// Used by the rebuild CLI to request an asynchronous rebuild.
    pub async fn send_library_synced(&self, event: &LibrarySyncedEvent) -> EngineResult<()> {
        self.send_json(&self.sync_topic, &event.user_id.to_string(), event).await?;
        info!("Library sync event sent for user {}", event.user_id);
        Ok(())
    }
}

#[async_trait]
impl FeedbackPublisher for KafkaProducer {
    async fn publish(&self, message: &FeedbackMessage) -> EngineResult<()> {
        self.send_json(&self.feedback_topic, &message.user_id.to_string(), message).await
    }
}

pub struct KafkaConsumer {
    consumer: StreamConsumer,
    sync_topic: String,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> EngineResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .create()
            .map_err(|e| EngineError::Messaging(format!("failed to create consumer: {e}")))?;

        Ok(Self {
            consumer,
            sync_topic: config.sync_topic.clone(),
        })
    }

    /// Forwards decoded sync events into `tx` until the receiver is dropped.
    /// Undecodable payloads are logged and skipped.
    pub async fn consume_library_synced(&self, tx: mpsc::Sender<LibrarySyncedEvent>) -> EngineResult<()> {
        self.consumer
            .subscribe(&[&self.sync_topic])
            .map_err(|e| EngineError::Messaging(format!("failed to subscribe to {}: {e}", self.sync_topic)))?;
        info!("Subscribed to {}", self.sync_topic);

        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    let Some(payload) = message.payload() else {
                        continue;
                    };
                    match serde_json::from_slice::<LibrarySyncedEvent>(payload) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                warn!("Sync event receiver closed, stopping consumer");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to deserialize library sync event: {}", e);
                        }
                    }
                }
                Err(e) => {
                    error!("Kafka consumer error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_event_accepts_numeric_user_ids() {
        let event: LibrarySyncedEvent =
            serde_json::from_str(r#"{"user_id": 76561198000000000, "synced_at": "2024-05-01T12:00:00Z"}"#).unwrap();
        assert_eq!(event.user_id.get(), 76_561_198_000_000_000);
    }

    #[test]
    fn feedback_message_shape() {
        let message = FeedbackMessage {
            user_id: UserId::new(1).unwrap(),
            item_id: None,
            label: None,
            action: FeedbackAction::Reset,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["action"], "reset");
        assert_eq!(json["user_id"], "1");
    }
}
