//! Configuration and settings management
//!
//! Loads settings from `.env`, optional config files and environment variables,
//! and defines the poll loop timing constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Instagram account the bot logs in as
    pub instagram_username: String,
    /// Instagram account password
    pub instagram_password: String,
    /// Where the Instagram session is persisted between runs
    #[serde(default = "default_session_file")]
    pub instagram_session_file: String,

    /// Spotify application client ID
    pub spotify_client_id: String,
    /// Spotify application client secret
    pub spotify_client_secret: String,
    /// Redirect URI registered for the Spotify application
    pub spotify_redirect_uri: String,
    /// Long-lived refresh token obtained via `spotify_authorize`
    pub spotify_refresh_token: Option<String>,

    /// Group thread the bot watches
    #[serde(default)]
    pub group_thread_id: String,
    /// Username allowed to run admin commands
    #[serde(default)]
    pub admin_username: String,

    /// Cooldown window applied after startup, in minutes
    #[serde(default = "default_cooldown_minutes")]
    pub default_cooldown_minutes: u32,
    /// SQLite file holding cooldowns and the processing cursor
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Host that shared track links point at
    #[serde(default = "default_track_host")]
    pub track_host: String,
    /// React with a like to messages whose track was queued
    #[serde(default)]
    pub like_accepted_tracks: bool,
}

fn default_session_file() -> String {
    "session.json".to_string()
}

const fn default_cooldown_minutes() -> u32 {
    DEFAULT_COOLDOWN_MINUTES
}

fn default_database_path() -> String {
    "cooldown.sqlite3".to_string()
}

fn default_track_host() -> String {
    crate::links::DEFAULT_TRACK_HOST.to_string()
}

/// Build the layered configuration source shared by the bot and the utilities.
///
/// # Errors
///
/// Returns a `ConfigError` if a configuration file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // This file shouldn't be checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE to snake_case; empty vars count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use song_requester::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or a required key is missing.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Check the keys the polling bot needs but the utilities do not.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the first missing key.
    pub fn validate_for_bot(&self) -> Result<(), ConfigError> {
        let required = [
            ("GROUP_THREAD_ID", self.group_thread_id.as_str()),
            ("ADMIN_USERNAME", self.admin_username.as_str()),
            (
                "SPOTIFY_REFRESH_TOKEN",
                self.spotify_refresh_token.as_deref().unwrap_or_default(),
            ),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("{key} is not set")));
            }
        }
        Ok(())
    }

    /// Cooldown window applied on startup
    #[must_use]
    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.default_cooldown_minutes) * 60)
    }
}

/// Default cooldown between accepted tracks per user, in minutes.
pub const DEFAULT_COOLDOWN_MINUTES: u32 = 20;

/// Pause between poll iterations (seconds).
pub const POLL_INTERVAL_SECS: u64 = 2;
/// Back-off after a 5xx from the chat API (seconds).
pub const SERVER_ERROR_BACKOFF_SECS: u64 = 60;
/// Back-off after any other chat API error (seconds).
pub const API_ERROR_BACKOFF_SECS: u64 = 60;
/// Back-off after a non-API error (seconds).
pub const GENERIC_ERROR_BACKOFF_SECS: u64 = 10;
/// Re-login when no fetch has succeeded for this long (seconds).
/// Default: 1 hour.
pub const SESSION_STALE_SECS: u64 = 3600;

/// Login attempts at startup before giving up.
pub const LOGIN_MAX_ATTEMPTS: usize = 3;
/// Base delay of the linear login back-off (milliseconds).
pub const LOGIN_BACKOFF_BASE_MS: u64 = 10_000;

/// Timeout applied to every chat and playback HTTP request (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Get poll interval from env or default.
///
/// Environment variable: `POLL_INTERVAL_SECS`.
#[must_use]
pub fn get_poll_interval_secs() -> u64 {
    env_secs("POLL_INTERVAL_SECS", POLL_INTERVAL_SECS)
}

/// Get server error back-off from env or default.
///
/// Environment variable: `SERVER_ERROR_BACKOFF_SECS`.
#[must_use]
pub fn get_server_error_backoff_secs() -> u64 {
    env_secs("SERVER_ERROR_BACKOFF_SECS", SERVER_ERROR_BACKOFF_SECS)
}

/// Get API error back-off from env or default.
///
/// Environment variable: `API_ERROR_BACKOFF_SECS`.
#[must_use]
pub fn get_api_error_backoff_secs() -> u64 {
    env_secs("API_ERROR_BACKOFF_SECS", API_ERROR_BACKOFF_SECS)
}

/// Get generic error back-off from env or default.
///
/// Environment variable: `GENERIC_ERROR_BACKOFF_SECS`.
#[must_use]
pub fn get_generic_error_backoff_secs() -> u64 {
    env_secs("GENERIC_ERROR_BACKOFF_SECS", GENERIC_ERROR_BACKOFF_SECS)
}

/// Get session staleness threshold from env or default.
///
/// Environment variable: `SESSION_STALE_SECS`.
#[must_use]
pub fn get_session_stale_secs() -> u64 {
    env_secs("SESSION_STALE_SECS", SESSION_STALE_SECS)
}

/// Get HTTP request timeout from env or default.
///
/// Environment variable: `HTTP_TIMEOUT_SECS`.
#[must_use]
pub fn get_http_timeout_secs() -> u64 {
    env_secs("HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS)
}

/// Sleep durations used by the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimings {
    /// Fixed pause at the end of every iteration
    pub poll_interval: Duration,
    /// Pause after the chat API answered with a 5xx
    pub server_error_backoff: Duration,
    /// Pause after any other chat API error
    pub api_error_backoff: Duration,
    /// Pause after a non-API error
    pub generic_error_backoff: Duration,
    /// Age of the last successful fetch that triggers a re-login
    pub session_stale_after: Duration,
}

impl PollTimings {
    /// Timings from the environment, falling back to the constants above
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(get_poll_interval_secs()),
            server_error_backoff: Duration::from_secs(get_server_error_backoff_secs()),
            api_error_backoff: Duration::from_secs(get_api_error_backoff_secs()),
            generic_error_backoff: Duration::from_secs(get_generic_error_backoff_secs()),
            session_stale_after: Duration::from_secs(get_session_stale_secs()),
        }
    }
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            server_error_backoff: Duration::from_secs(SERVER_ERROR_BACKOFF_SECS),
            api_error_backoff: Duration::from_secs(API_ERROR_BACKOFF_SECS),
            generic_error_backoff: Duration::from_secs(GENERIC_ERROR_BACKOFF_SECS),
            session_stale_after: Duration::from_secs(SESSION_STALE_SECS),
        }
    }
}
