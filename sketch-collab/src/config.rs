//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use sketch_core::PRESENCE_TTL;

/// Bounded polling window for one watch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Sleep between polls of a watched room
    pub poll_interval: Duration,
    /// Polls per watch window before the client must reconnect
    pub iterations: u32,
    /// Reconnect hint sent to clients, in milliseconds
    pub retry_hint_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            iterations: 6,
            retry_hint_ms: 500,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    pub stream: StreamConfig,
    /// Silence after which a watcher stops being counted
    pub presence_ttl: Duration,
    /// Maximum rooms returned by a listing
    pub list_limit: usize,
    /// Age after which a token is rejected
    pub token_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: None,
            stream: StreamConfig::default(),
            presence_ttl: PRESENCE_TTL,
            list_limit: 100,
            token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `SKETCH_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; unparsable values are logged and ignored.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup("SKETCH_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(path) = lookup("SKETCH_STORAGE_PATH") {
            self.storage_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SKETCH_POLL_INTERVAL_MS") {
            self.stream.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "SKETCH_STREAM_ITERATIONS") {
            self.stream.iterations = n;
        }
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid {key}={raw:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert!(config.storage_path.is_none());
        assert_eq!(config.stream.poll_interval, Duration::from_millis(500));
        assert_eq!(config.stream.iterations, 6);
        assert_eq!(config.stream.retry_hint_ms, 500);
        assert_eq!(config.presence_ttl, Duration::from_secs(3));
        assert_eq!(config.list_limit, 100);
        assert_eq!(config.token_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_overlay_applies_values() {
        let config = ServerConfig::default().overlay(lookup(&[
            ("SKETCH_BIND_ADDR", "0.0.0.0:8000"),
            ("SKETCH_STORAGE_PATH", "/var/lib/sketch"),
            ("SKETCH_POLL_INTERVAL_MS", "250"),
            ("SKETCH_STREAM_ITERATIONS", "12"),
        ]));
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/sketch")));
        assert_eq!(config.stream.poll_interval, Duration::from_millis(250));
        assert_eq!(config.stream.iterations, 12);
    }

    #[test]
    fn test_overlay_keeps_defaults_on_garbage() {
        let config = ServerConfig::default().overlay(lookup(&[
            ("SKETCH_POLL_INTERVAL_MS", "soon"),
            ("SKETCH_STREAM_ITERATIONS", "-1"),
            ("SKETCH_STORAGE_PATH", ""),
        ]));
        assert_eq!(config.stream, StreamConfig::default());
        assert!(config.storage_path.is_none());
    }
}
