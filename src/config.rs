use crate::default_struct;
use std::{str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

default_struct! {
#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub data_dir: String = "data".to_string(),
    pub reconcile_interval_secs: u64 = 600,
    pub api_retries: u32 = 2,
    pub api_backoff_ms: u64 = 500,
    pub api_timeout_secs: u64 = 5,
}
}

impl Config {
    /// Reads the bot configuration from the process environment.
    /// `.env` is expected to have been loaded already.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        config.discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        if let Some(dir) = lookup("ASTRA_DATA_DIR") {
            config.data_dir = dir;
        }
        if let Some(v) = parse(&lookup, "ASTRA_RECONCILE_INTERVAL_SECS")? {
            config.reconcile_interval_secs = v;
        }
        if let Some(v) = parse(&lookup, "ASTRA_API_RETRIES")? {
            config.api_retries = v;
        }
        if let Some(v) = parse(&lookup, "ASTRA_API_BACKOFF_MS")? {
            config.api_backoff_ms = v;
        }
        if let Some(v) = parse(&lookup, "ASTRA_API_TIMEOUT_SECS")? {
            config.api_timeout_secs = v;
        }

        Ok(config)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(30))
    }

    pub fn database_path(&self, name: &str) -> String {
        format!("{}/{}.db", self.data_dir.trim_end_matches('/'), name)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}
