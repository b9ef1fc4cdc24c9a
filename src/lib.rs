//! Poll Pool: share a recurring polling job across agents.
//!
//! Agents connected to the same channel and collection collaborate on every
//! key they have in common: one of them polls, all of them hear about it.

pub mod channels;
pub mod config;
pub mod error;
pub mod pool;

pub use config::PoolConfig;
pub use error::{ChannelError, ConfigError, Error, InvocationError, PollError, Result};
pub use pool::{PollEvent, PollHandle, PollOptions, PollPool, PollResult, Poller, poller_fn};
