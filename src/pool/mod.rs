//! Shared polling jobs across agents.
//!
//! ## How a job flows
//! 1. **Claim**: the first local `start_polling` for a key creates its
//!    `JobInfo` with this agent as poller and broadcasts `claimKey`.
//!    Agents that observe the claim first record the claimant instead and
//!    stay passive for that key.
//! 2. **Execution**: only the agent heading `pollers` runs the poller. Each
//!    run either reschedules (`ran` broadcast, sleep `next` ms) or finishes
//!    (`done` broadcast).
//! 3. **Fan-out**: every agent routes observed `ran` events to its local
//!    progress listeners and resolves local completion handles on `done`,
//!    after which the key may be claimed afresh.
//!
//! Ownership is best effort. Claims are ordered by local observation, so two
//! agents registering at the same moment can both believe they are active.
//!
//! ## Submodules
//! - **`coordinator`**: the public `PollPool`.
//! - **`registry`**: key → `JobInfo` map and claim protocol.
//! - **`executor`**: the poll loop on the active agent.
//! - **`notifier`**: applies observed broadcasts.
//! - **`state`**: poll loop state machine.
//! - **`model`**: results, events, and wire messages.
//! - **`options`**: per-call options, the `Poller` trait, and completion handles.

pub mod coordinator;
pub(crate) mod executor;
pub mod model;
pub(crate) mod notifier;
pub mod options;
pub mod registry;
pub mod state;

pub use coordinator::PollPool;
pub use model::{ChannelMessage, Claim, PollEvent, PollResult, Topic};
pub use options::{
    ClaimedCallback, PollContext, PollHandle, PollOptions, Poller, ProgressCallback, poller_fn,
};
pub use registry::{JobInfo, JobRegistry, Registration};
pub use state::PollState;
