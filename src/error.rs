//! Error types for the poll pool.

/// Top-level error type returned by pool construction and `start_polling`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid start_polling call: {0}")]
    Invocation(#[from] InvocationError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors. Raised before any channel I/O happens.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("client or url must be specified in the poll-pool configuration")]
    MissingTransport,

    #[error("only one of client or url may be specified in the poll-pool configuration")]
    ConflictingTransport,

    #[error("Unsupported channel url scheme: {url}")]
    UnsupportedScheme { url: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised synchronously by `start_polling` before anything is registered.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("start_polling requires a 'key' to identify this job for potential sharing")]
    MissingKey,

    #[error("start_polling requires a polling function")]
    MissingPoller,
}

/// Channel transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Subscription to {topic} on channel {name} failed: {reason}")]
    SubscribeFailed {
        name: String,
        topic: String,
        reason: String,
    },

    #[error("Publish to {topic} on channel {name} failed: {reason}")]
    PublishFailed {
        name: String,
        topic: String,
        reason: String,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Channel {name} is closed")]
    Closed { name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal failure delivered to a job's completion handle.
///
/// Cloned once per local waiter, so it carries only owned strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("Poller for {key} failed: {reason}")]
    Poller { key: String, reason: String },

    #[error("Job {key} was abandoned before completing")]
    Abandoned { key: String },
}

/// Result type alias for the pool.
pub type Result<T> = std::result::Result<T, Error>;
