//! `PollPool` is the coordinator one agent uses to share polling jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::Channel;
use crate::config::PoolConfig;
use crate::error::{ChannelError, InvocationError, PollError, Result};
use crate::pool::executor::PollRun;
use crate::pool::model::{ChannelMessage, PollEvent, Topic};
use crate::pool::notifier;
use crate::pool::options::{PollContext, PollHandle, PollOptions};
use crate::pool::registry::{JobRegistry, LocalWaiter};

/// State shared by the coordinator, its listener task, and its poll loops.
pub(crate) struct Shared {
    agent: String,
    channel: Arc<dyn Channel>,
    registry: RwLock<JobRegistry>,
    subscribed: AtomicBool,
}

impl Shared {
    pub(crate) async fn publish(
        &self,
        message: &ChannelMessage,
    ) -> std::result::Result<(), ChannelError> {
        let payload = message.to_payload()?;
        self.channel.publish(message.topic().as_str(), payload).await
    }

    /// Remove a key and resolve its local waiters without waiting for a broadcast.
    pub(crate) async fn finish_locally(
        &self,
        key: &str,
        outcome: std::result::Result<PollEvent, PollError>,
    ) {
        let finished = self.registry.write().await.finish(key);
        if let Some(info) = finished {
            notifier::complete_all(info, outcome);
        }
    }
}

/// Coordinates polling jobs for one agent.
///
/// Dropping the pool stops its listener and any poll loops it runs; waiters
/// still pending then resolve with [`PollError::Abandoned`].
pub struct PollPool {
    shared: Arc<Shared>,
    collection: String,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Running poll loops by key.
    loops: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PollPool {
    /// Resolve the transport and subscribe to the pool topics.
    ///
    /// Configuration errors are returned before any channel I/O. The pool is
    /// ready once this returns.
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        let channel = config.channel()?;
        let agent = config.resolved_agent_name();

        let topics = Topic::ALL.map(|topic| topic.as_str());
        let mut inbound = channel.subscribe_all(&topics).await?;

        let shared = Arc::new(Shared {
            agent: agent.clone(),
            channel,
            registry: RwLock::new(JobRegistry::new(agent.clone())),
            subscribed: AtomicBool::new(true),
        });

        let listener = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                // One stream for all topics keeps each publisher's claim, ran and done in order.
                while let Some((topic, payload)) = inbound.next().await {
                    let parsed = topic
                        .parse::<Topic>()
                        .map_err(ChannelError::InvalidMessage)
                        .and_then(|topic| ChannelMessage::from_payload(topic, payload));
                    match parsed {
                        Ok(message) => notifier::dispatch(&shared.registry, message).await,
                        Err(e) => warn!(topic = %topic, error = %e, "Dropping malformed broadcast"),
                    }
                }
                shared.subscribed.store(false, Ordering::Release);
                debug!(agent = %shared.agent, "Channel subscriptions closed");
            })
        };

        info!(
            agent = %agent,
            channel = %shared.channel.name(),
            collection = %config.collection,
            "Poll pool connected"
        );

        Ok(Self {
            shared,
            collection: config.collection,
            listener: Mutex::new(Some(listener)),
            loops: Mutex::new(HashMap::new()),
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.shared.agent
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether topic subscriptions are live.
    pub fn is_subscribed(&self) -> bool {
        self.shared.subscribed.load(Ordering::Acquire)
    }

    /// The agent this pool believes is polling `key`, if the key is known here.
    pub async fn active_poller(&self, key: &str) -> Option<String> {
        self.shared
            .registry
            .read()
            .await
            .active_poller(key)
            .map(str::to_string)
    }

    /// Number of keys known to this agent.
    pub async fn job_count(&self) -> usize {
        self.shared.registry.read().await.len()
    }

    /// Register interest in `options.key`, starting the poll loop when this
    /// agent is the first to claim it.
    ///
    /// Missing key or poller fails before anything is registered or published.
    pub async fn start_polling(&self, options: PollOptions) -> Result<PollHandle> {
        let PollOptions {
            key,
            poller,
            duration,
            on_progress,
            on_claimed,
        } = options;

        let key = key
            .filter(|k| !k.trim().is_empty())
            .ok_or(InvocationError::MissingKey)?;
        let poller = poller.ok_or(InvocationError::MissingPoller)?;

        let (tx, rx) = oneshot::channel();
        let waiter = LocalWaiter::new(on_progress.clone(), tx);
        let registration = self.shared.registry.write().await.register_local(&key, waiter);

        if registration.created {
            let run = PollRun {
                shared: Arc::clone(&self.shared),
                ctx: PollContext {
                    key: key.clone(),
                    agent: self.shared.agent.clone(),
                    duration,
                },
                poller,
                on_progress,
            };
            let handle = tokio::spawn(run.run(on_claimed));

            let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
            loops.retain(|_, h| !h.is_finished());
            loops.insert(key.clone(), handle);
            debug!(key = %key, agent = %self.shared.agent, "Claimed key, polling locally");
        } else {
            let active = self
                .shared
                .registry
                .read()
                .await
                .active_poller(&key)
                .map(str::to_string);
            debug!(
                key = %key,
                active = ?active,
                local_is_active = registration.active,
                "Using results from active poller"
            );
        }

        Ok(PollHandle::new(key, rx))
    }

    /// Stop listening and abort every poll loop. Pending waiters resolve
    /// with [`PollError::Abandoned`].
    pub async fn shutdown(&self) {
        self.abort_tasks();

        let abandoned = self.shared.registry.write().await.drain();
        for info in abandoned {
            let key = info.key.clone();
            notifier::complete_all(info, Err(PollError::Abandoned { key }));
        }

        if let Err(e) = self.shared.channel.shutdown().await {
            warn!(error = %e, "Channel shutdown failed");
        }
        info!(agent = %self.shared.agent, "Poll pool shut down");
    }

    fn abort_tasks(&self) {
        self.shared.subscribed.store(false, Ordering::Release);
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            listener.abort();
        }
        for (_, handle) in self.loops.lock().unwrap_or_else(|e| e.into_inner()).drain() {
            handle.abort();
        }
    }
}

impl Drop for PollPool {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
