//! Environment-backed configuration.
//!
//! Every key is optional. `.env` files are honoured when `main` calls
//! `dotenvy::dotenv()` before [`NotifierConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;

use crate::notification::DigestSchedule;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:farm-notify.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_SLACKBOT_URL: &str = "http://localhost:8081";
pub const DEFAULT_SERVICE: &str = "cue";
pub const DEFAULT_RENDER_ROOT: &str = "/jobs/";
pub const DEFAULT_VRI_MARKER: &str = "vri.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    pub database_url: String,
    pub log_dir: String,
    /// Interval between event-processing ticks.
    pub poll_interval: Duration,
    /// Interval between outbox drains.
    pub delivery_interval: Duration,
    pub slackbot_url: String,
    /// `service` tag sent with every message.
    pub service: String,
    pub digest: DigestSchedule,
    /// Output paths outside this prefix have no render metadata.
    pub render_root: String,
    pub vri_marker: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            poll_interval: Duration::from_secs(10),
            delivery_interval: Duration::from_secs(20),
            slackbot_url: DEFAULT_SLACKBOT_URL.to_string(),
            service: DEFAULT_SERVICE.to_string(),
            digest: DigestSchedule::default(),
            render_root: DEFAULT_RENDER_ROOT.to_string(),
            vri_marker: DEFAULT_VRI_MARKER.to_string(),
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = get("LOG_DIR") {
            config.log_dir = v;
        }
        if let Some(v) = get("FARM_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(parse("FARM_POLL_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("DELIVERY_INTERVAL_SECS") {
            config.delivery_interval = Duration::from_secs(parse("DELIVERY_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("SLACKBOT_URL") {
            config.slackbot_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("NOTIFY_SERVICE") {
            config.service = v;
        }
        if let Some(v) = get("DIGEST_TIME") {
            config.digest.time = NaiveTime::parse_from_str(v.trim(), "%H:%M")
                .map_err(|e| Error::config(format!("DIGEST_TIME must be HH:MM, got {:?}: {}", v, e)))?;
        }
        if let Some(v) = get("DIGEST_LOOKBACK_DAYS") {
            config.digest.lookback_days = parse("DIGEST_LOOKBACK_DAYS", &v)?;
        }
        if let Some(v) = get("RENDER_ROOT") {
            config.render_root = v;
        }
        if let Some(v) = get("VRI_MARKER") {
            config.vri_marker = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::config("FARM_POLL_INTERVAL_SECS must be greater than zero"));
        }
        if self.delivery_interval.is_zero() {
            return Err(Error::config("DELIVERY_INTERVAL_SECS must be greater than zero"));
        }
        if !self.slackbot_url.starts_with("http://") && !self.slackbot_url.starts_with("https://") {
            return Err(Error::config(format!(
                "SLACKBOT_URL must be an http(s) URL, got {:?}",
                self.slackbot_url
            )));
        }
        if self.vri_marker.contains('/') {
            return Err(Error::config("VRI_MARKER must be a file name, not a path"));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{} has invalid value {:?}: {}", key, value, e)))
}
