use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Runtime settings, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub x_username: String,
    pub x_password: String,
    pub anthropic_api_key: String,
    pub generation_api_key: String,
    pub generation_api_url: String,

    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub headless: bool,

    pub post_interval: Duration,
    pub scheduler_tick: Duration,
    pub tweet_interval: Duration,
    pub step_delay: Duration,
    pub cycle_delay: Duration,
    pub error_delay: Duration,

    pub login_retry_attempts: u32,
    pub login_retry_max_delay: Duration,

    /// Mentions posted before this instant are ignored.
    pub mention_cutoff: Option<DateTime<Utc>>,
}

fn required(key: &str) -> Result<String> {
    env::var(key)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} not set", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    match optional(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring malformed {}={:?}, using default", key, raw);
            default
        }),
    }
}

fn secs(key: &str, default: i64) -> Duration {
    Duration::seconds(parsed_or(key, default))
}

fn parse_cutoff(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!("Ignoring malformed MENTION_CUTOFF={:?}: {}", raw, e);
            None
        }
    }
}

/// Log destination, readable before the rest of the config so startup warnings are captured.
pub fn log_file() -> PathBuf {
    optional("LOG_FILE").unwrap_or_else(|| "app.log".to_string()).into()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            x_username: required("X_USERNAME")?,
            x_password: required("X_PASSWORD")?,
            anthropic_api_key: required("ANTHROPIC_API_KEY")?,
            generation_api_key: required("GENERATION_API_KEY")?,
            generation_api_url: optional("GENERATION_API_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),

            data_dir: optional("DATA_DIR").unwrap_or_else(|| "data".to_string()).into(),
            temp_dir: optional("TEMP_DIR").unwrap_or_else(|| "temp".to_string()).into(),
            headless: parsed_or("HEADLESS", false),

            post_interval: secs("POST_INTERVAL_SECS", 3600),
            scheduler_tick: secs("SCHEDULER_TICK_SECS", 60),
            tweet_interval: Duration::minutes(parsed_or("TWEET_INTERVAL_MINUTES", 20)),
            step_delay: secs("STEP_DELAY_SECS", 2),
            cycle_delay: secs("CYCLE_DELAY_SECS", 8),
            error_delay: secs("ERROR_DELAY_SECS", 30),

            login_retry_attempts: parsed_or("LOGIN_RETRY_ATTEMPTS", 3),
            login_retry_max_delay: secs("LOGIN_RETRY_MAX_DELAY_SECS", 30),

            mention_cutoff: parse_cutoff(optional("MENTION_CUTOFF")),
        })
    }
}

/// Converts a config duration into a sleepable one; negative values become zero.
pub fn to_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or_default()
}
