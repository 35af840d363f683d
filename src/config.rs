use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

pub const DEFAULT_CONFIG_PATH: &str = "config/session.json";
pub const DEFAULT_TOPIC: &str = "collaborative-session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Gossipsub topic shared by every peer of the session.
    pub topic: String,
    pub listen_addr: String,
    /// Extra peers to dial besides the ones found by mDNS (`/ip4/.../tcp/...`).
    pub peers: Vec<String>,
    pub timings: SessionTimings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            peers: Vec::new(),
            timings: SessionTimings::default(),
        }
    }
}

/// Timer settings of the session runner, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    /// Quiet period after which our own typing indicator is withdrawn.
    pub typing_timeout_ms: u64,
    /// Age after which another peer's typing indicator is dropped locally.
    pub typing_expiry_ms: u64,
    pub user_sweep_interval_ms: u64,
    pub user_inactive_threshold_ms: u64,
    pub message_sweep_interval_ms: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            typing_timeout_ms: 1_000,
            typing_expiry_ms: 3_000,
            user_sweep_interval_ms: 5_000,
            user_inactive_threshold_ms: 10_000,
            message_sweep_interval_ms: 1_000,
        }
    }
}

impl SessionTimings {
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn user_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.user_sweep_interval_ms.max(1))
    }

    pub fn message_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.message_sweep_interval_ms.max(1))
    }
}

pub fn read_config(path: &str) -> SessionResult<AppConfig> {
    let content = fs::read_to_string(path).map_err(|source| SessionError::ConfigRead {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SessionError::ConfigParse {
        path: path.to_string(),
        source,
    })
}

/// Loads the config file, falling back to defaults when it is missing or broken.
pub fn load_config(path: &str) -> AppConfig {
    match read_config(path) {
        Ok(config) => config,
        Err(SessionError::ConfigRead { source, .. }) if source.kind() == ErrorKind::NotFound => {
            log::info!(
                "Config file {} not found; using defaults",
                Path::new(path).display()
            );
            AppConfig::default()
        }
        Err(err) => {
            log::warn!("{err}; using defaults");
            AppConfig::default()
        }
    }
}
