//! Channel abstraction for agent-to-agent broadcast.

pub mod channel;
pub mod log_file;
pub mod memory;

pub use channel::*;
pub use log_file::LogFileChannel;
pub use memory::MemoryChannel;
