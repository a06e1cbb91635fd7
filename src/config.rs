use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;

pub const DEFAULT_IDLE_DISCONNECT: Duration = Duration::from_secs(10);
pub const DEFAULT_WEB_PORT: u16 = 3000;
pub const DEFAULT_SOUNDS_DIR: &str = "sounds";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("{0} is required in environment variables")]
  Missing(&'static str),

  #[error("WEB_API_KEY is required when WEB_ENABLED=true")]
  MissingApiKey,

  #[error("WEB_PORT must be a valid port number, got {0:?}")]
  InvalidPort(String),

  #[error("VOICE_IDLE_TIMEOUT_SECONDS must be a positive integer, got {0:?}")]
  InvalidIdleTimeout(String),
}

#[derive(Clone)]
pub struct Config {
  pub token: String,
  pub sounds_dir: PathBuf,
  pub web: WebConfig,
  pub logging: LoggingConfig,
  pub voice: VoiceConfig,
}

#[derive(Clone)]
pub struct WebConfig {
  pub enabled: bool,
  pub port: u16,
  pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
  pub level: String,
  /// Human-readable lines instead of JSON.
  pub pretty: bool,
  /// Append logs to this file instead of stdout.
  pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConfig {
  /// `None` keeps voice connections open until someone disconnects them.
  pub idle_disconnect_timeout: Option<Duration>,
}

impl Config {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let token = lookup("DISCORD_TOKEN")
      .filter(|token| !token.is_empty())
      .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

    let enabled = lookup("WEB_ENABLED").is_some_and(|value| value == "true");
    let port = match lookup("WEB_PORT") {
      Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
      None => DEFAULT_WEB_PORT,
    };
    let api_key = lookup("WEB_API_KEY").unwrap_or_default();
    if enabled && api_key.is_empty() {
      return Err(ConfigError::MissingApiKey);
    }

    let logging = LoggingConfig {
      level: lookup("LOG_LEVEL")
        .map(|level| level.to_lowercase())
        .unwrap_or_else(|| "info".to_string()),
      pretty: lookup("LOG_PRETTY").map_or(true, |pretty| pretty == "true"),
      destination: lookup("LOG_DESTINATION")
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from),
    };

    let idle_disconnect_timeout =
      parse_idle_timeout(lookup("VOICE_IDLE_TIMEOUT_SECONDS").as_deref())?;

    Ok(Self {
      token,
      sounds_dir: sounds_dir(&lookup),
      web: WebConfig {
        enabled,
        port,
        api_key,
      },
      logging,
      voice: VoiceConfig {
        idle_disconnect_timeout,
      },
    })
  }
}

/// `SOUNDS_DIR`, or `sounds` when unset or blank.
pub fn sounds_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
  lookup("SOUNDS_DIR")
    .filter(|dir| !dir.trim().is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_SOUNDS_DIR))
}

/// Unset falls back to the default, blank disables idle disconnects, anything
/// else must be a positive number of seconds.
pub fn parse_idle_timeout(raw: Option<&str>) -> Result<Option<Duration>, ConfigError> {
  let Some(raw) = raw else {
    return Ok(Some(DEFAULT_IDLE_DISCONNECT));
  };
  if raw.is_empty() {
    return Ok(None);
  }
  if !raw.bytes().all(|byte| byte.is_ascii_digit()) {
    return Err(ConfigError::InvalidIdleTimeout(raw.to_string()));
  }

  match raw.parse::<u64>() {
    Ok(seconds) if seconds > 0 => Ok(Some(Duration::from_secs(seconds))),
    _ => Err(ConfigError::InvalidIdleTimeout(raw.to_string())),
  }
}

impl fmt::Debug for Config {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Config")
      .field("token", &"[REDACTED]")
      .field("sounds_dir", &self.sounds_dir)
      .field("web", &self.web)
      .field("logging", &self.logging)
      .field("voice", &self.voice)
      .finish()
  }
}

impl fmt::Debug for WebConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WebConfig")
      .field("enabled", &self.enabled)
      .field("port", &self.port)
      .field("api_key", &"[REDACTED]")
      .finish()
  }
}
