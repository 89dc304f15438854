/// Config schema types (server, streaming, channel adapters, bundled plugins).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
    /// Bot Framework account settings. Kept as raw JSON and parsed by the
    /// adapter crate, which owns the account schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msteams: Option<serde_json::Value>,
    pub activity_log: ActivityLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on. Defaults to 3978, the Bot Framework convention.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3978,
        }
    }
}

/// Stream session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Fragments merged into one interim update.
    pub batch_size: usize,
    /// Debounce before the first flush and between flushes.
    pub flush_interval_ms: u64,
    /// Attempts per interim update, including the first.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_ms: 500,
            retry_attempts: 5,
            retry_delay_ms: 500,
        }
    }
}

impl StreamingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// `activity-log` bundled plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityLogConfig {
    pub enabled: bool,
    /// Overrides `<data dir>/logs/activity.jsonl`.
    pub path: Option<PathBuf>,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}
