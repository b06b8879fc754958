use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.revu/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevuSettings {
    pub server: ServerSettings,
    pub runtime: RuntimeSettings,
    pub broadcast: BroadcastSettings,
    pub logging: LoggingSettings,
}

impl RevuSettings {
    /// Reject combinations the broadcaster cannot run with.
    pub fn validate(&self) -> Result<()> {
        let b = &self.broadcast;
        if b.idle_teardown_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "broadcast.idleTeardownMs must be positive".into(),
            ));
        }
        if b.retry_base_delay_ms > b.retry_max_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "broadcast.retryBaseDelayMs ({}) exceeds retryMaxDelayMs ({})",
                b.retry_base_delay_ms, b.retry_max_delay_ms
            )));
        }
        if self.runtime.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("runtime.baseUrl is empty".into()));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4680,
        }
    }
}

/// Where the agent runtime's event feed lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    pub base_url: String,
    pub event_path: String,
    pub connect_timeout_ms: u64,
    /// Drop the feed if no bytes arrive for this long. Unset means never.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
            event_path: "/event".to_string(),
            connect_timeout_ms: 10_000,
            idle_timeout_ms: None,
        }
    }
}

impl RuntimeSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Fan-out, teardown and reconnect tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Grace period with zero subscribers before the upstream is closed.
    pub idle_teardown_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Unset retries forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry_attempts: Option<u32>,
    pub keep_alive_secs: u64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            idle_teardown_ms: 5000,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            max_retry_attempts: None,
            keep_alive_secs: 15,
        }
    }
}

impl BroadcastSettings {
    pub fn idle_teardown(&self) -> Duration {
        Duration::from_millis(self.idle_teardown_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level name (`trace` .. `error`).
    pub level: String,
    pub json: bool,
    /// Per-module level overrides, e.g. `{"revu_runtime": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            modules: BTreeMap::new(),
        }
    }
}
