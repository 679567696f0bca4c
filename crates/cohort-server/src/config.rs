//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cohort_shared::constants::{DEFAULT_HTTP_PORT, PRESENCE_WINDOW_SECS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket listener.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./cohort.db`
    pub database_path: PathBuf,

    /// Number of SQLite connections kept open.
    /// Env: `DB_POOL_SIZE`
    /// Default: `4`
    pub db_pool_size: usize,

    /// Upper bound on a single store call, including the wait for a free
    /// connection.
    /// Env: `STORE_TIMEOUT_MS`
    /// Default: `5000`
    pub store_timeout: Duration,

    /// Base URL of the mastery-estimation service.
    /// Env: `MASTERY_BASE_URL`
    /// Default: `http://127.0.0.1:8000`
    pub mastery_base_url: String,

    /// Env: `MASTERY_TIMEOUT_MS`
    /// Default: `5000`
    pub mastery_timeout: Duration,

    /// Outbound frames buffered per connection before new ones are dropped.
    /// Env: `CONNECTION_BUFFER`
    /// Default: `256`
    pub connection_buffer: usize,

    /// Trailing window in which a member counts as present.
    /// Env: `PRESENCE_WINDOW_SECS`
    /// Default: `300`
    pub presence_window: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./cohort.db"),
            db_pool_size: 4,
            store_timeout: Duration::from_millis(5000),
            mastery_base_url: "http://127.0.0.1:8000".to_string(),
            mastery_timeout: Duration::from_millis(5000),
            connection_buffer: 256,
            presence_window: Duration::from_secs(PRESENCE_WINDOW_SECS as u64),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Some(parsed) = parse_or_warn::<SocketAddr>("HTTP_ADDR", &addr) {
                config.http_addr = parsed;
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("DB_POOL_SIZE") {
            if let Some(n) = parse_or_warn::<usize>("DB_POOL_SIZE", &val).filter(|n| *n > 0) {
                config.db_pool_size = n;
            }
        }

        if let Some(val) = lookup("STORE_TIMEOUT_MS") {
            if let Some(ms) = parse_or_warn::<u64>("STORE_TIMEOUT_MS", &val).filter(|ms| *ms > 0) {
                config.store_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(url) = lookup("MASTERY_BASE_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.mastery_base_url = url.to_string();
            } else {
                tracing::warn!(value = %url, "Invalid MASTERY_BASE_URL, using default");
            }
        }

        if let Some(val) = lookup("MASTERY_TIMEOUT_MS") {
            if let Some(ms) = parse_or_warn::<u64>("MASTERY_TIMEOUT_MS", &val).filter(|ms| *ms > 0) {
                config.mastery_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(val) = lookup("CONNECTION_BUFFER") {
            if let Some(n) = parse_or_warn::<usize>("CONNECTION_BUFFER", &val).filter(|n| *n > 0) {
                config.connection_buffer = n;
            }
        }

        if let Some(val) = lookup("PRESENCE_WINDOW_SECS") {
            if let Some(secs) = parse_or_warn::<u64>("PRESENCE_WINDOW_SECS", &val) {
                config.presence_window = Duration::from_secs(secs);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "Invalid configuration value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.db_pool_size, 4);
        assert_eq!(config.presence_window, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/var/lib/cohort/db.sqlite"),
            ("DB_POOL_SIZE", "8"),
            ("MASTERY_BASE_URL", "http://bkt:8000/"),
            ("MASTERY_TIMEOUT_MS", "250"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, PathBuf::from("/var/lib/cohort/db.sqlite"));
        assert_eq!(config.db_pool_size, 8);
        assert_eq!(config.mastery_base_url, "http://bkt:8000");
        assert_eq!(config.mastery_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("DB_POOL_SIZE", "0"),
            ("STORE_TIMEOUT_MS", "soon"),
            ("MASTERY_BASE_URL", "ftp://bkt"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.db_pool_size, defaults.db_pool_size);
        assert_eq!(config.store_timeout, defaults.store_timeout);
        assert_eq!(config.mastery_base_url, defaults.mastery_base_url);
    }
}
