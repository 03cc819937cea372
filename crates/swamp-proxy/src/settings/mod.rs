//! Application configuration.
//!
//! Every section deserializes with defaults so a partial TOML file (or none at
//! all) still yields a usable configuration.

mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::AuthConfig;

pub use loader::{
    APP_NAME, AppPaths, env_prefix, expand_str_path, load_config, load_or_init_config,
    write_default_config,
};

/// Browser identity presented to viewer VMs.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/37.0.2062.120 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub collector: CollectorConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data dir>/swamp-proxy.db`.
    pub path: Option<String>,
}

/// HTCondor collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// `condor_status` binary, resolved through `PATH` when not absolute.
    pub binary: String,
    /// Collector host passed as `-pool`.
    pub pool_host: String,
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            binary: "condor_status".to_string(),
            pool_host: "localhost".to_string(),
            timeout_secs: 10,
        }
    }
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Polling behaviour while a viewer VM is starting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub poll_interval_ms: u64,
    /// Polls after the first one before giving up.
    pub max_polls: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            max_polls: 1000,
        }
    }
}

impl ResolverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Period of the background expiry sweep. 0 disables the sweep.
    pub sweep_interval_secs: u64,
    /// Exact `Content-Type` values whose GET responses may be cached.
    pub cacheable_content_types: Vec<String>,
    /// Request URIs containing any of these substrings are never cached.
    pub excluded_paths: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 600,
            sweep_interval_secs: 60,
            cacheable_content_types: vec![
                "text/javascript;charset=utf-8".to_string(),
                "image/png".to_string(),
                "image/x-icon".to_string(),
                "font/woff2".to_string(),
            ],
            excluded_paths: vec!["lift/comet".to_string()],
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Outbound requests to viewer VMs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `https` in production; `http` is accepted for local backends.
    pub scheme: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Redirect locations are cut down to the part starting at this marker.
    pub location_marker: String,
    /// Viewer session cookie forwarded on its own when present.
    pub session_cookie: String,
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            location_marker: "/proxy-".to_string(),
            session_cookie: "JSESSIONID".to_string(),
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
