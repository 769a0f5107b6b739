//! Runtime configuration read from the environment.
//!
//! A `.env` file in the working directory is loaded first, if present. The bot
//! token itself (`TELOXIDE_TOKEN`) is read by teloxide and is not part of this
//! struct.

use std::{env, path::PathBuf};

use chrono::FixedOffset;

use crate::error::ConfigError;

const DEFAULT_DB_PATH: &str = "restaurants.db";
const DEFAULT_LOG_DIR: &str = "log";
const DEFAULT_UTC_OFFSET_HOURS: i32 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    /// Offset of the local time used by the group, both when reading dates
    /// from users and when showing them.
    pub utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        // A missing .env file is fine, the variables may come from the environment.
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("DB_PATH")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let log_dir = lookup("LOG_DIR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
        let utc_offset = match lookup("UTC_OFFSET_HOURS") {
            Some(value) => parse_utc_offset(&value)?,
            None => hours_to_offset(DEFAULT_UTC_OFFSET_HOURS)
                .ok_or_else(|| invalid("UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS))?,
        };

        Ok(Config {
            db_path: PathBuf::from(db_path),
            log_dir: PathBuf::from(log_dir),
            utc_offset,
        })
    }
}

fn parse_utc_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let hours: i32 = value
        .trim()
        .parse()
        .map_err(|_| invalid("UTC_OFFSET_HOURS", value))?;
    if !(-12..=14).contains(&hours) {
        return Err(invalid("UTC_OFFSET_HOURS", value));
    }
    hours_to_offset(hours).ok_or_else(|| invalid("UTC_OFFSET_HOURS", value))
}

fn hours_to_offset(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
}

fn invalid<T: ToString>(name: &'static str, value: T) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    }
}
