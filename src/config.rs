//! Bot configuration
//!
//! Loaded from `config.yaml`; every field has a default. Credentials can also
//! come from the environment (or a `.env` file), which wins over the file.

use crate::moderation::{DEFAULT_WARNING_THRESHOLD, PolicySettings};
use crate::moderation::notice::DEFAULT_REDACTION_REASON;
use crate::protocol::{MODERATOR_LEVEL, RoomId, UserId};
use crate::ratelimit::{RATE_LIMIT_DEADZONE, RateLimitRetrier};
use crate::rooms::DEFAULT_DM_ROOM_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

pub const ENV_ACCESS_TOKEN: &str = "MATRIX_ACCESS_TOKEN";
pub const ENV_HOMESERVER: &str = "MATRIX_HOMESERVER";
pub const ENV_USER_ID: &str = "MATRIX_USER_ID";

/// Errors from loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub warning_threshold: u32,
    pub moderator_level: i64,
    /// Name given to direct rooms the bot creates
    pub dm_room_name: String,
    pub redaction_reason: String,
    /// Image sent after every warning
    pub help_image: Option<PathBuf>,
    /// Rooms to moderate; empty means every joined group room
    pub moderated_rooms: Vec<RoomId>,
    /// Accept room invites automatically
    pub auto_join: bool,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            moderator_level: MODERATOR_LEVEL,
            dm_room_name: DEFAULT_DM_ROOM_NAME.to_string(),
            redaction_reason: DEFAULT_REDACTION_REASON.to_string(),
            help_image: Some(PathBuf::from("media/info_threads.gif")),
            moderated_rooms: Vec::new(),
            auto_join: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Long-poll timeout of each sync request
    pub timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub deadzone_ms: u64,
    /// Unbounded when unset
    pub max_retries: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            deadzone_ms: u64::try_from(RATE_LIMIT_DEADZONE.as_millis()).unwrap_or(50),
            max_retries: None,
        }
    }
}

/// Top level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub homeserver: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Where violation records and the upload cache are kept
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub moderation: ModerationConfig,
    pub sync: SyncConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            homeserver: String::new(),
            user_id: String::new(),
            access_token: String::new(),
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            moderation: ModerationConfig::default(),
            sync: SyncConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from YAML
    ///
    /// # Errors
    /// Returns an error if the YAML does not match the configuration shape.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load the configuration file, using defaults if it does not exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(yaml) => Self::from_yaml(&yaml),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Override credentials with values from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.access_token = token;
        }
        if let Some(homeserver) = non_empty(ENV_HOMESERVER) {
            self.homeserver = homeserver;
        }
        if let Some(user_id) = non_empty(ENV_USER_ID) {
            self.user_id = user_id;
        }
    }

    /// Override credentials from the process environment and `.env`
    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| dotenv::var(key).ok());
    }

    /// Check that everything needed to connect is present
    ///
    /// # Errors
    /// Returns the first missing or invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.homeserver.is_empty() {
            return Err(ConfigError::Missing("homeserver"));
        }
        if self.user_id.is_empty() {
            return Err(ConfigError::Missing("user_id"));
        }
        if !self.user_id.starts_with('@') || !self.user_id.contains(':') {
            return Err(ConfigError::Invalid {
                field: "user_id",
                reason: format!("{} is not a full user id", self.user_id),
            });
        }
        if self.access_token.is_empty() {
            return Err(ConfigError::Missing("access_token"));
        }
        if self.moderation.warning_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "moderation.warning_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The bot's user id
    #[must_use]
    pub fn bot_user_id(&self) -> UserId {
        UserId::new(self.user_id.clone())
    }

    /// Whether messages in `room_id` should be moderated
    #[must_use]
    pub fn is_moderated(&self, room_id: &RoomId) -> bool {
        self.moderation.moderated_rooms.is_empty() || self.moderation.moderated_rooms.contains(room_id)
    }

    /// Settings for the moderation policy
    #[must_use]
    pub fn policy_settings(&self) -> PolicySettings {
        PolicySettings {
            warning_threshold: self.moderation.warning_threshold,
            moderator_level: self.moderation.moderator_level,
            redaction_reason: self.moderation.redaction_reason.clone(),
            help_image: self.moderation.help_image.clone(),
        }
    }

    /// Retrier configured from the `rate_limit` section
    #[must_use]
    pub fn retrier(&self) -> RateLimitRetrier {
        RateLimitRetrier::new(
            Duration::from_millis(self.rate_limit.deadzone_ms),
            self.rate_limit.max_retries,
        )
    }
}
