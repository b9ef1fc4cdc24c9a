//! Log file channel: a shared append-only JSON-lines file used as a broadcast log.
//!
//! Every publish appends one line `{"collection", "topic", "payload"}`.
//! Subscribers tail the file from its end at subscription time, so agents on
//! the same host (or sharing a filesystem) see each other's broadcasts in
//! file order. Lines belonging to another collection are skipped.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::channels::{Channel, PayloadStream, TopicStream};
use crate::error::ChannelError;

/// One line of the log.
#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    collection: String,
    topic: String,
    payload: Value,
}

/// Broadcast channel backed by an append-only file.
pub struct LogFileChannel {
    name: String,
    path: PathBuf,
    collection: String,
    tail_interval: Duration,
    /// Serializes appends from this process.
    append_lock: Mutex<()>,
    closed: AtomicBool,
}

impl LogFileChannel {
    pub fn new(path: impl Into<PathBuf>, collection: impl Into<String>, tail_interval: Duration) -> Self {
        let path = path.into();
        Self {
            name: format!("file://{}", path.display()),
            path,
            collection: collection.into(),
            tail_interval,
            append_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Start a tailer for `topics` at the current end of the file.
    async fn tail(
        &self,
        topics: Vec<String>,
    ) -> Result<UnboundedReceiverStream<(String, Value)>, ChannelError> {
        self.ensure_open()?;
        let offset = self
            .current_len()
            .await
            .map_err(|e| ChannelError::SubscribeFailed {
                name: self.name.clone(),
                topic: topics.join(","),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let tailer = Tailer {
            path: self.path.clone(),
            collection: self.collection.clone(),
            topics,
            interval: self.tail_interval,
            offset,
        };
        tokio::spawn(tailer.run(tx));
        Ok(UnboundedReceiverStream::new(rx))
    }

    async fn current_len(&self) -> Result<u64, ChannelError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }
}

#[async_trait]
impl Channel for LogFileChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, ChannelError> {
        let stream = self.tail(vec![topic.to_string()]).await?;
        Ok(Box::pin(stream.map(|(_, payload)| payload)))
    }

    /// One tailer for every topic, so payloads arrive in file order.
    async fn subscribe_all(&self, topics: &[&str]) -> Result<TopicStream, ChannelError> {
        let topics = topics.iter().map(|t| t.to_string()).collect();
        Ok(Box::pin(self.tail(topics).await?))
    }

    async fn publish(&self, topic: &str, payload: Value) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let record = LogRecord {
            collection: self.collection.clone(),
            topic: topic.to_string(),
            payload,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            // One write per record keeps concurrent appenders from interleaving lines.
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        result.map_err(|e| ChannelError::PublishFailed {
            name: self.name.clone(),
            topic: topic.to_string(),
            reason: e.to_string(),
        })
    }

    /// Refuse further use. Tailers stop once their streams are dropped.
    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Background reader for one subscription.
struct Tailer {
    path: PathBuf,
    collection: String,
    topics: Vec<String>,
    interval: Duration,
    offset: u64,
}

impl Tailer {
    async fn run(mut self, tx: mpsc::UnboundedSender<(String, Value)>) {
        let mut tick = tokio::time::interval(self.interval);
        let mut pending = Vec::new();

        loop {
            tick.tick().await;
            if tx.is_closed() {
                debug!(topics = ?self.topics, "Log subscription dropped, stopping tailer");
                return;
            }

            if let Err(e) = self.read_new(&mut pending).await {
                warn!(path = %self.path.display(), error = %e, "Failed to read channel log");
                continue;
            }

            // Only complete lines are consumed; a partial trailing line waits for the next tick.
            while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                if let Some(delivery) = self.parse_line(&line[..end]) {
                    if tx.send(delivery).is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn read_new(&mut self, pending: &mut Vec<u8>) -> std::io::Result<()> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            warn!(path = %self.path.display(), "Channel log was truncated, reading from start");
            self.offset = 0;
            pending.clear();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let read = file.read_to_end(pending).await?;
        self.offset += read as u64;
        Ok(())
    }

    fn parse_line(&self, line: &[u8]) -> Option<(String, Value)> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match serde_json::from_slice::<LogRecord>(line) {
            Ok(record)
                if record.collection == self.collection && self.topics.contains(&record.topic) =>
            {
                Some((record.topic, record.payload))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Skipping malformed channel log line");
                None
            }
        }
    }
}
