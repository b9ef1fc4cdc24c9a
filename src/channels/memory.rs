//! In-process channel: a broadcast hub shared by several pools in one process.
//!
//! Every pool connected to the same `MemoryChannel` behaves like a separate
//! agent on a shared log, which is how tests and the demo simulate a cluster.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::channels::{Channel, PayloadStream, TopicStream};
use crate::error::ChannelError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    topic: String,
    payload: Value,
}

/// In-memory broadcast channel.
pub struct MemoryChannel {
    name: String,
    tx: broadcast::Sender<Envelope>,
}

impl MemoryChannel {
    /// Create a new hub.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_capacity(name, DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a hub whose subscribers buffer at most `capacity` payloads.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            name: name.into(),
            tx,
        })
    }

    /// Payloads on any of `topics`, in publish order.
    fn tail(&self, topics: Vec<String>) -> impl Stream<Item = (String, Value)> + Send + use<> {
        let name = self.name.clone();
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| {
            let delivered = match item {
                Ok(envelope) if topics.contains(&envelope.topic) => {
                    Some((envelope.topic, envelope.payload))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        channel = %name,
                        topics = ?topics,
                        skipped,
                        "Subscriber lagged, payloads lost"
                    );
                    None
                }
            };
            futures::future::ready(delivered)
        })
    }

    /// Number of live subscriptions across all pools.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, ChannelError> {
        let stream = self.tail(vec![topic.to_string()]).map(|(_, payload)| payload);
        Ok(Box::pin(stream))
    }

    /// One receiver for every topic, so payloads arrive in publish order.
    async fn subscribe_all(&self, topics: &[&str]) -> Result<TopicStream, ChannelError> {
        let topics = topics.iter().map(|t| t.to_string()).collect();
        Ok(Box::pin(self.tail(topics)))
    }

    async fn publish(&self, topic: &str, payload: Value) -> Result<(), ChannelError> {
        // No receivers is fine: nobody is listening on this hub yet.
        let _ = self.tx.send(Envelope {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_only_subscribed_topic() {
        let channel = MemoryChannel::new("test");
        let mut ran = channel.subscribe("ran").await.unwrap();

        channel.publish("done", json!({"key": "a"})).await.unwrap();
        channel.publish("ran", json!({"key": "b"})).await.unwrap();

        let payload = ran.next().await.unwrap();
        assert_eq!(payload["key"], "b");
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_payload() {
        let channel = MemoryChannel::new("test");
        let mut first = channel.subscribe("claimKey").await.unwrap();
        let mut second = channel.subscribe("claimKey").await.unwrap();
        assert_eq!(channel.subscriber_count(), 2);

        channel
            .publish("claimKey", json!({"key": "k", "agent": "a"}))
            .await
            .unwrap();

        assert_eq!(first.next().await.unwrap()["agent"], "a");
        assert_eq!(second.next().await.unwrap()["agent"], "a");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_acknowledged() {
        let channel = MemoryChannel::new("test");
        assert!(channel.publish("ran", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn preserves_publish_order_per_topic() {
        let channel = MemoryChannel::new("test");
        let mut ran = channel.subscribe("ran").await.unwrap();
        for i in 0..5 {
            channel.publish("ran", json!({"i": i})).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(ran.next().await.unwrap()["i"], i);
        }
    }

    #[tokio::test]
    async fn subscribe_all_keeps_publish_order_across_topics() {
        let channel = MemoryChannel::new("test");
        let mut all = channel.subscribe_all(&["claimKey", "done"]).await.unwrap();

        channel.publish("claimKey", json!({"key": "a"})).await.unwrap();
        channel.publish("ran", json!({"key": "skipped"})).await.unwrap();
        channel.publish("done", json!({"key": "a"})).await.unwrap();

        let (topic, payload) = all.next().await.unwrap();
        assert_eq!((topic.as_str(), payload["key"].as_str()), ("claimKey", Some("a")));
        let (topic, _) = all.next().await.unwrap();
        assert_eq!(topic, "done");
    }
}
