use crate::humanize::{display_duration, parse_duration};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TELEGRAM_BASE_URL: &str = "https://api.telegram.org";
const DEFAULT_STATE_DIR: &str = "/var/tmp/unit-watch";
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(600);
const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration problems. All of them stop the run before any work.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing unit (provide --unit=... or UNIT env var)")]
    MissingUnit,
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {field} duration {value:?}: {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, Serialize)]
pub struct WatchConfig {
    /// systemd unit name, e.g. `nginx.service`.
    pub unit: String,
    /// State file path.
    pub state: PathBuf,
    /// Deadline for the `systemctl` call.
    #[serde(serialize_with = "serialize_duration")]
    pub timeout: Duration,
    /// Minimum time between two alerts.
    #[serde(serialize_with = "serialize_duration")]
    pub cooldown: Duration,
    /// Print alerts instead of sending them.
    pub dry_run: bool,
    /// Request timeout for the notification API.
    #[serde(serialize_with = "serialize_duration")]
    pub notify_timeout: Duration,
    pub telegram: TelegramConfig,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TelegramConfig {
    pub base_url: String,
    #[serde(serialize_with = "serialize_secret")]
    pub bot_token: String,
    pub chat_id: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TELEGRAM_BASE_URL.to_string(),
            bot_token: String::new(),
            chat_id: String::new(),
        }
    }
}

/// One source of partial settings: the TOML file, or CLI flags and env vars.
///
/// Durations stay as strings until resolution so every layer accepts the
/// same `30s` / `10m` syntax.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub unit: Option<String>,
    pub state: Option<PathBuf>,
    pub timeout: Option<String>,
    pub cooldown: Option<String>,
    pub dry_run: Option<bool>,
    pub notify_timeout: Option<String>,
    pub telegram: TelegramLayer,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TelegramLayer {
    pub base_url: Option<String>,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl ConfigLayer {
    /// Read a layer from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Fill every unset field of `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            unit: self.unit.or(lower.unit),
            state: self.state.or(lower.state),
            timeout: self.timeout.or(lower.timeout),
            cooldown: self.cooldown.or(lower.cooldown),
            dry_run: self.dry_run.or(lower.dry_run),
            notify_timeout: self.notify_timeout.or(lower.notify_timeout),
            telegram: TelegramLayer {
                base_url: self.telegram.base_url.or(lower.telegram.base_url),
                bot_token: self.telegram.bot_token.or(lower.telegram.bot_token),
                chat_id: self.telegram.chat_id.or(lower.telegram.chat_id),
            },
        }
    }
}

impl WatchConfig {
    /// Apply built-in defaults to whatever the layers left unset.
    pub fn resolve(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let unit = layer.unit.map(|u| u.trim().to_string()).unwrap_or_default();
        let state = layer.state.unwrap_or_else(|| default_state_path(&unit));
        let defaults = TelegramConfig::default();

        Ok(Self {
            timeout: duration_field("timeout", layer.timeout, DEFAULT_PROBE_TIMEOUT)?,
            cooldown: duration_field("cooldown", layer.cooldown, DEFAULT_COOLDOWN)?,
            notify_timeout: duration_field(
                "notify_timeout",
                layer.notify_timeout,
                DEFAULT_NOTIFY_TIMEOUT,
            )?,
            dry_run: layer.dry_run.unwrap_or(false),
            telegram: TelegramConfig {
                base_url: layer.telegram.base_url.unwrap_or(defaults.base_url),
                bot_token: layer.telegram.bot_token.unwrap_or_default(),
                chat_id: layer.telegram.chat_id.unwrap_or_default(),
            },
            unit,
            state,
        })
    }

    /// The unit to watch, or [`ConfigError::MissingUnit`] when blank.
    pub fn require_unit(&self) -> Result<&str, ConfigError> {
        if self.unit.is_empty() {
            Err(ConfigError::MissingUnit)
        } else {
            Ok(&self.unit)
        }
    }

    /// Indented JSON for `--show-config`, with the bot token masked.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Load the optional config file and put `overrides` (CLI/env) on top.
pub fn load(config_file: Option<&Path>, overrides: ConfigLayer) -> Result<WatchConfig, ConfigError> {
    let file_layer = match config_file {
        Some(path) => ConfigLayer::from_file(path)?,
        None => ConfigLayer::default(),
    };
    WatchConfig::resolve(overrides.or(file_layer))
}

/// Per-unit default so watchers of different units never share a state file.
fn default_state_path(unit: &str) -> PathBuf {
    let name = if unit.is_empty() { "unit-watch" } else { unit };
    Path::new(DEFAULT_STATE_DIR).join(format!("{name}.json"))
}

fn duration_field(
    field: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => parse_duration(&value).map_err(|reason| ConfigError::InvalidDuration {
            field,
            value,
            reason,
        }),
    }
}

fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&display_duration(*d))
}

fn serialize_secret<S: Serializer>(secret: &str, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if secret.is_empty() { "" } else { "***" })
}
