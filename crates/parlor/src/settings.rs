//! Shard settings loading.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io::ErrorKind};

use parlor_protocol::{GameType, ShardId};
use parlor_room::ManagerSettings;
use parlor_session::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default location on disk where the shard looks for its JSON settings.
pub const DEFAULT_CONFIG_PATH: &str = "config/parlor.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "PARLOR_CONFIG_PATH";

/// Settings for one shard process.
///
/// Every field is optional in the file; missing ones keep the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardSettings {
    pub shard: u32,
    pub game_type: u32,
    /// Snapshot table override. Defaults to `rooms:{game}:{shard}`.
    pub table: Option<String>,
    pub max_rooms: usize,
    pub sweep_interval_secs: u64,
    pub fallback_wake_secs: u64,
    pub channel_size: usize,
    pub drive_budget_ms: u64,
    pub restart_jitter_ms: u64,
    /// How long a dropped player may reconnect with their token.
    pub reconnect_grace_secs: u64,
    /// Used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self {
            shard: 0,
            game_type: 1,
            table: None,
            max_rooms: 1000,
            sweep_interval_secs: 60,
            fallback_wake_secs: 5,
            channel_size: 64,
            drive_budget_ms: 50,
            restart_jitter_ms: 500,
            reconnect_grace_secs: 30,
            log_filter: "info".to_string(),
        }
    }
}

impl ShardSettings {
    /// Loads the settings from [`CONFIG_PATH_ENV`] or the default path,
    /// falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Loads the settings from `path`. A missing, unreadable or malformed
    /// file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(settings) => {
                    info!(
                        path = %path.display(),
                        shard = settings.shard,
                        game_type = settings.game_type,
                        "loaded shard settings"
                    );
                    settings
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse shard settings; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "shard settings not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read shard settings; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    pub fn game_type(&self) -> GameType {
        GameType(self.game_type)
    }

    pub fn shard_id(&self) -> ShardId {
        ShardId(self.shard)
    }

    /// The room manager settings these shard settings describe.
    ///
    /// Zero intervals and sizes are raised to the smallest usable value.
    pub fn to_manager_settings(&self) -> ManagerSettings {
        let mut settings = ManagerSettings::new(self.game_type(), self.shard_id());
        if let Some(table) = &self.table {
            settings.table = table.clone();
        }
        settings.max_rooms = self.max_rooms;
        settings.sweep_interval = Duration::from_secs(self.sweep_interval_secs.max(1));
        settings.fallback_wake = Duration::from_secs(self.fallback_wake_secs.max(1));
        settings.channel_size = self.channel_size.max(1);
        settings.drive_budget = Duration::from_millis(self.drive_budget_ms);
        settings.restart_jitter = Duration::from_millis(self.restart_jitter_ms);
        settings
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reconnect_grace: Duration::from_secs(self.reconnect_grace_secs),
        }
    }
}

fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
