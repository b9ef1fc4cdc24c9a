//! Configuration types.

use std::sync::Arc;
use std::time::Duration;

use crate::channels::{Channel, LogFileChannel};
use crate::error::ConfigError;

/// Default collection (topic namespace) name.
pub const DEFAULT_COLLECTION: &str = "poll-pool";

/// Default interval at which log-backed subscriptions look for new lines.
const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_millis(100);

/// Pool configuration.
///
/// Exactly one of `url` or `client` selects the channel transport.
#[derive(Clone)]
pub struct PoolConfig {
    /// Transport URL. Only `file://<path>` is understood.
    pub url: Option<String>,
    /// An already-constructed channel, used as-is.
    pub client: Option<Arc<dyn Channel>>,
    /// Topic namespace shared by collaborating agents.
    pub collection: String,
    /// Identity of this agent. Defaults to `<hostname>:<pid>`.
    pub agent_name: Option<String>,
    /// How often log-backed subscriptions poll for new lines.
    pub tail_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: None,
            client: None,
            collection: DEFAULT_COLLECTION.to_string(),
            agent_name: None,
            tail_interval: DEFAULT_TAIL_INTERVAL,
        }
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &self.url)
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .field("collection", &self.collection)
            .field("agent_name", &self.agent_name)
            .field("tail_interval", &self.tail_interval)
            .finish()
    }
}

impl PoolConfig {
    /// Configuration using a transport URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Configuration using an existing channel.
    pub fn with_client(client: Arc<dyn Channel>) -> Self {
        Self {
            client: Some(client),
            ..Self::default()
        }
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn agent_name(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn tail_interval(mut self, interval: Duration) -> Self {
        self.tail_interval = interval;
        self
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - POLL_POOL_URL (required)
    /// - POLL_POOL_COLLECTION (optional, default: poll-pool)
    /// - POLL_POOL_AGENT (optional, default: hostname:pid)
    /// - POLL_POOL_TAIL_INTERVAL_MS (optional, default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PoolConfig::from_env`], but uses `client` when no
    /// `POLL_POOL_URL` is set. Every other configuration error is returned.
    pub fn from_env_or_client(client: Arc<dyn Channel>) -> Result<Self, ConfigError> {
        Self::from_lookup_or_client(|key| std::env::var(key).ok(), client)
    }

    fn from_lookup_or_client(
        lookup: impl Fn(&str) -> Option<String>,
        client: Arc<dyn Channel>,
    ) -> Result<Self, ConfigError> {
        match Self::from_lookup(&lookup) {
            Err(ConfigError::MissingTransport) if lookup("POLL_POOL_URL").is_none() => {
                let mut config = Self::with_client(client);
                config.apply_overrides(&lookup)?;
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("POLL_POOL_URL").ok_or(ConfigError::MissingTransport)?;
        let mut config = Self::with_url(url);
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(collection) = lookup("POLL_POOL_COLLECTION") {
            self.collection = collection;
        }
        if let Some(agent) = lookup("POLL_POOL_AGENT") {
            self.agent_name = Some(agent);
        }
        if let Some(raw) = lookup("POLL_POOL_TAIL_INTERVAL_MS") {
            let millis = raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "POLL_POOL_TAIL_INTERVAL_MS".to_string(),
                message: e.to_string(),
            })?;
            self.tail_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.url, &self.client) {
            (None, None) => return Err(ConfigError::MissingTransport),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingTransport),
            _ => {}
        }

        if self.collection.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "collection".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        if matches!(&self.agent_name, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "agent_name".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        if self.tail_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "tail_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// The configured agent name, or the host/process default.
    pub fn resolved_agent_name(&self) -> String {
        self.agent_name.clone().unwrap_or_else(default_agent_name)
    }

    /// Resolve the channel transport. Performs no I/O.
    pub fn channel(&self) -> Result<Arc<dyn Channel>, ConfigError> {
        self.validate()?;

        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }

        let url = self.url.as_deref().ok_or(ConfigError::MissingTransport)?;
        match url.strip_prefix("file://") {
            Some(path) if !path.is_empty() => Ok(Arc::new(LogFileChannel::new(
                path,
                self.collection.clone(),
                self.tail_interval,
            ))),
            _ => Err(ConfigError::UnsupportedScheme {
                url: url.to_string(),
            }),
        }
    }
}

/// `<hostname>:<pid>`.
pub fn default_agent_name() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}:{}", host, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryChannel;

    #[test]
    fn missing_transport_is_rejected() {
        let err = PoolConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingTransport));
    }

    #[test]
    fn both_transports_are_rejected() {
        let mut config = PoolConfig::with_url("file:///tmp/poll-pool.log");
        config.client = Some(MemoryChannel::new("mem"));
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ConflictingTransport
        ));
    }

    #[test]
    fn defaults() {
        let config = PoolConfig::with_client(MemoryChannel::new("mem"));
        assert_eq!(config.collection, "poll-pool");
        assert_eq!(config.tail_interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_agent_name_has_pid() {
        let name = default_agent_name();
        let pid = std::process::id().to_string();
        assert!(name.ends_with(&format!(":{pid}")), "got {name}");
    }

    #[test]
    fn explicit_agent_name_wins() {
        let config = PoolConfig::with_client(MemoryChannel::new("mem")).agent_name("agent-a");
        assert_eq!(config.resolved_agent_name(), "agent-a");
    }

    #[test]
    fn file_url_resolves_to_log_channel() {
        let config = PoolConfig::with_url("file:///tmp/poll-pool.log");
        let channel = config.channel().unwrap();
        assert_eq!(channel.name(), "file:///tmp/poll-pool.log");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let config = PoolConfig::with_url("mongodb://localhost:27017/poll-pool");
        assert!(matches!(
            config.channel().err().unwrap(),
            ConfigError::UnsupportedScheme { .. }
        ));
    }

    #[test]
    fn empty_collection_is_rejected() {
        let config = PoolConfig::with_client(MemoryChannel::new("mem")).collection(" ");
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn lookup_reads_url_and_overrides() {
        let config = PoolConfig::from_lookup(vars(&[
            ("POLL_POOL_URL", "file:///tmp/pool.log"),
            ("POLL_POOL_COLLECTION", "jobs"),
            ("POLL_POOL_AGENT", "worker-1"),
            ("POLL_POOL_TAIL_INTERVAL_MS", "25"),
        ]))
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("file:///tmp/pool.log"));
        assert_eq!(config.collection, "jobs");
        assert_eq!(config.agent_name.as_deref(), Some("worker-1"));
        assert_eq!(config.tail_interval, Duration::from_millis(25));
    }

    #[test]
    fn client_fallback_only_without_url() {
        let client: Arc<dyn Channel> = MemoryChannel::new("fallback");
        let config =
            PoolConfig::from_lookup_or_client(vars(&[("POLL_POOL_AGENT", "a")]), client.clone())
                .unwrap();
        assert!(config.client.is_some());
        assert_eq!(config.agent_name.as_deref(), Some("a"));
    }

    #[test]
    fn client_fallback_keeps_other_errors() {
        let client: Arc<dyn Channel> = MemoryChannel::new("fallback");

        let err = PoolConfig::from_lookup_or_client(
            vars(&[("POLL_POOL_TAIL_INTERVAL_MS", "soon")]),
            client.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = PoolConfig::from_lookup_or_client(vars(&[("POLL_POOL_AGENT", " ")]), client)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = PoolConfig::from_lookup_or_client(
            vars(&[("POLL_POOL_URL", "file:///tmp/x"), ("POLL_POOL_TAIL_INTERVAL_MS", "0")]),
            MemoryChannel::new("fallback"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
