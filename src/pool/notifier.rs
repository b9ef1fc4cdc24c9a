//! Fan-out of observed broadcasts to the registry and local waiters.

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::PollError;
use crate::pool::model::{ChannelMessage, PollEvent};
use crate::pool::registry::{JobInfo, JobRegistry};

/// Apply one observed broadcast.
///
/// The registry lock is released before any callback runs.
pub(crate) async fn dispatch(registry: &RwLock<JobRegistry>, message: ChannelMessage) {
    match message {
        ChannelMessage::ClaimKey(claim) => {
            let created = registry.write().await.observe_claim(&claim.key, &claim.agent);
            if created {
                debug!(key = %claim.key, agent = %claim.agent, "Aware of claim");
            }
        }
        ChannelMessage::Ran(event) => {
            let listeners = registry.read().await.progress_listeners(&event.key);
            for listener in listeners {
                listener(Ok(event.clone()));
            }
        }
        ChannelMessage::Done(event) => {
            let finished = registry.write().await.finish(&event.key);
            match finished {
                Some(info) => {
                    info!(key = %event.key, waiters = info.local_count(), "Job is done");
                    let outcome = outcome_of(event);
                    complete_all(info, outcome);
                }
                None => debug!(key = %event.key, "Ignoring done for unknown key"),
            }
        }
    }
}

/// Resolve every waiter of a finished job, in registration order.
pub(crate) fn complete_all(info: JobInfo, outcome: Result<PollEvent, PollError>) {
    for waiter in info.locals {
        waiter.complete(outcome.clone());
    }
}

/// A `done` carrying an error fails the job for its listeners.
fn outcome_of(event: PollEvent) -> Result<PollEvent, PollError> {
    match event.error {
        Some(reason) => Err(PollError::Poller {
            key: event.key,
            reason,
        }),
        None => Ok(event),
    }
}
