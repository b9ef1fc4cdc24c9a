//! Per-call polling options, the poller trait, and the completion handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{ChannelError, PollError};
use crate::pool::model::{PollEvent, PollResult};

/// Progress listener. Receives every observed `ran` event for the key, or the
/// publish error when this agent failed to broadcast its own `ran`.
pub type ProgressCallback = Arc<dyn Fn(Result<PollEvent, ChannelError>) + Send + Sync>;

/// Invoked once the claim for a newly registered key has been published.
pub type ClaimedCallback = Box<dyn FnOnce(Result<(), ChannelError>) + Send>;

/// What a poller is told about the job it runs.
#[derive(Debug, Clone)]
pub struct PollContext {
    pub key: String,
    /// Agent running the poller.
    pub agent: String,
    /// Advisory upper bound supplied by the caller. Never enforced by the pool.
    pub duration: Option<Duration>,
}

/// One unit of recurring work.
///
/// Return a result with `next` to run again after that many milliseconds,
/// a result without it to finish, or an error to fail the job.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self, ctx: &PollContext, run_index: u32) -> anyhow::Result<PollResult>;
}

struct FnPoller<F>(F);

#[async_trait]
impl<F, Fut> Poller for FnPoller<F>
where
    F: Fn(PollContext, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<PollResult>> + Send + 'static,
{
    async fn poll(&self, ctx: &PollContext, run_index: u32) -> anyhow::Result<PollResult> {
        (self.0)(ctx.clone(), run_index).await
    }
}

/// Wrap an async closure as a poller.
pub fn poller_fn<F, Fut>(f: F) -> Arc<dyn Poller>
where
    F: Fn(PollContext, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<PollResult>> + Send + 'static,
{
    Arc::new(FnPoller(f))
}

/// Options for one `start_polling` call.
#[derive(Default)]
pub struct PollOptions {
    pub(crate) key: Option<String>,
    pub(crate) poller: Option<Arc<dyn Poller>>,
    pub(crate) duration: Option<Duration>,
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) on_claimed: Option<ClaimedCallback>,
}

impl PollOptions {
    /// Options for `key` and `poller`, the two required parts.
    pub fn new(key: impl Into<String>, poller: Arc<dyn Poller>) -> Self {
        Self::default().key(key).poller(poller)
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn poller(mut self, poller: Arc<dyn Poller>) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Advisory duration passed through to the poller.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(Result<PollEvent, ChannelError>) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_claimed<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        self.on_claimed = Some(Box::new(f));
        self
    }
}

/// Completion handle returned by `start_polling`.
#[derive(Debug)]
pub struct PollHandle {
    key: String,
    rx: oneshot::Receiver<Result<PollEvent, PollError>>,
}

impl PollHandle {
    pub(crate) fn new(key: String, rx: oneshot::Receiver<Result<PollEvent, PollError>>) -> Self {
        Self { key, rx }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the job's terminal event as observed by this agent.
    pub async fn wait(self) -> Result<PollEvent, PollError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(PollError::Abandoned { key: self.key }),
        }
    }
}
