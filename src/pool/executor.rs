//! Execution loop: runs the poller on the agent that believes it is active.
//!
//! The loop claims the key, then alternates poll runs with timer sleeps until
//! a run produces a final result or an error. It talks to other agents only
//! through `ran` and `done` publishes; local waiters are reached through the
//! same broadcasts once they echo back, except on failure paths where the
//! job is finalized here so local waiters are never stranded.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::error::PollError;
use crate::pool::coordinator::Shared;
use crate::pool::model::{ChannelMessage, Claim, PollEvent};
use crate::pool::options::{ClaimedCallback, PollContext, Poller, ProgressCallback};
use crate::pool::state::PollState;

/// Everything one execution loop needs.
pub(crate) struct PollRun {
    pub(crate) shared: Arc<Shared>,
    pub(crate) ctx: PollContext,
    pub(crate) poller: Arc<dyn Poller>,
    pub(crate) on_progress: Option<ProgressCallback>,
}

impl PollRun {
    /// Publish the claim, then drive the loop to a terminal state.
    pub(crate) async fn run(self, on_claimed: Option<ClaimedCallback>) {
        self.announce_claim(on_claimed).await;

        let key = self.ctx.key.clone();
        let mut state = PollState::Idle;
        self.transition(&mut state, PollState::Scheduled);
        let mut run_index: u32 = 1;

        loop {
            self.transition(&mut state, PollState::Running);
            debug!(key = %key, run_index, "Poll execution starting");

            let outcome = AssertUnwindSafe(self.poller.poll(&self.ctx, run_index))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    self.transition(&mut state, PollState::Failed);
                    self.fail(format!("{e:#}")).await;
                    return;
                }
                Err(panic) => {
                    let reason = format!("poller panicked: {}", panic_message(panic.as_ref()));
                    self.transition(&mut state, PollState::Failed);
                    self.fail(reason).await;
                    return;
                }
            };
            debug!(key = %key, run_index, result = ?result, "Poll execution result");

            let Some(delay) = result.next_delay() else {
                self.transition(&mut state, PollState::Completed);
                self.complete(PollEvent::now(&key, result)).await;
                return;
            };

            self.transition(&mut state, PollState::Rescheduled);
            let event = PollEvent::now(&key, result);
            if let Err(e) = self.shared.publish(&ChannelMessage::Ran(event)).await {
                warn!(key = %key, error = %e, "Failed to publish ran, polling continues");
                if let Some(on_progress) = &self.on_progress {
                    on_progress(Err(e));
                }
            }

            tokio::time::sleep(delay).await;
            self.transition(&mut state, PollState::Scheduled);
            run_index += 1;
        }
    }

    async fn announce_claim(&self, on_claimed: Option<ClaimedCallback>) {
        let claim = ChannelMessage::ClaimKey(Claim {
            key: self.ctx.key.clone(),
            agent: self.ctx.agent.clone(),
        });
        let published = self.shared.publish(&claim).await;
        if let Err(e) = &published {
            warn!(key = %self.ctx.key, error = %e, "Failed to publish claim");
        }
        if let Some(on_claimed) = on_claimed {
            on_claimed(published);
        }
    }

    /// Publish the final result. Listeners here are completed when it echoes
    /// back; if it cannot be published they are completed directly.
    async fn complete(&self, event: PollEvent) {
        let key = event.key.clone();
        if let Err(e) = self.shared.publish(&ChannelMessage::Done(event.clone())).await {
            warn!(key = %key, error = %e, "Failed to publish done, completing local waiters only");
            self.shared.finish_locally(&key, Ok(event)).await;
        }
    }

    /// Fail local waiters, then tell other agents.
    async fn fail(&self, reason: String) {
        let key = self.ctx.key.clone();
        warn!(key = %key, reason = %reason, "Poller failed");

        self.shared
            .finish_locally(
                &key,
                Err(PollError::Poller {
                    key: key.clone(),
                    reason: reason.clone(),
                }),
            )
            .await;

        let event = PollEvent::failed(&key, reason);
        if let Err(e) = self.shared.publish(&ChannelMessage::Done(event)).await {
            warn!(key = %key, error = %e, "Failed to publish poller failure");
        }
    }

    fn transition(&self, state: &mut PollState, target: PollState) {
        if let Err(e) = state.advance(target) {
            // The loop only makes legal moves; this is a bug if it ever fires.
            warn!(key = %self.ctx.key, error = %e, "Unexpected poll state transition");
            *state = target;
        }
    }
}

fn panic_message<'a>(panic: &'a (dyn Any + Send + 'static)) -> &'a str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
