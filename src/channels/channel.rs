//! The `Channel` trait: durable named publish/subscribe used to coordinate agents.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::ChannelError;

/// Stream of raw payloads delivered on one topic.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Stream of `(topic, payload)` pairs across several topics.
pub type TopicStream = Pin<Box<dyn Stream<Item = (String, Value)> + Send>>;

/// A broadcast channel shared by every agent in a pool.
///
/// Implementations deliver each published payload to every subscriber of the
/// topic, including subscribers owned by the publishing process. Delivery is
/// at least once and ordered per topic.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name for logs and errors.
    fn name(&self) -> &str;

    /// Start receiving payloads published on `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, ChannelError>;

    /// Receive payloads from several topics on one stream.
    ///
    /// The default merges per-topic subscriptions, which keeps order within a
    /// topic only. Transports backed by a single log override this to deliver
    /// in publish order across topics.
    async fn subscribe_all(&self, topics: &[&str]) -> Result<TopicStream, ChannelError> {
        let mut streams = Vec::with_capacity(topics.len());
        for topic in topics {
            let name = topic.to_string();
            let stream = self.subscribe(topic).await?;
            streams.push(stream.map(move |payload| (name.clone(), payload)).boxed());
        }
        Ok(Box::pin(futures::stream::select_all(streams)))
    }

    /// Publish a payload. Returning `Ok` is the publish acknowledgment.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), ChannelError>;

    /// Release transport resources.
    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
