use chrono::FixedOffset;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DanError, Result};
use crate::reconcile::ReconcileSettings;
use crate::types::{Tier, Width};
use crate::utils::reference_offset;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub default_width: Width,
    pub utc_offset_hours: i32,
    pub reconcile_tiers: Vec<Tier>,
    pub fetch_timeout_secs: u64,
    pub reconcile_concurrency: usize,
    pub draw_api_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "data/dan.db".to_string(),
            default_width: Width::TWO,
            utc_offset_hours: 7,
            reconcile_tiers: vec![Tier::Special],
            fetch_timeout_secs: 10,
            reconcile_concurrency: 4,
            draw_api_url: None,
        }
    }
}

impl Config {
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            tiers: self.reconcile_tiers.clone(),
            fetch_timeout: self.fetch_timeout(),
            max_concurrent_days: self.reconcile_concurrency,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn reference_offset(&self) -> Result<FixedOffset> {
        reference_offset(self.utc_offset_hours)
    }
}

/// Reads the `DAN_*` environment variables.
pub fn load() -> Result<Config> {
    from_lookup(|key| env::var(key).ok())
}

/// Builds a config from any key lookup; unset keys take their defaults.
pub fn from_lookup<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let database_url = var("DAN_DB_PATH").unwrap_or(defaults.database_url);

    let default_width = match var("DAN_DEFAULT_WIDTH") {
        Some(raw) => Width::new(parse_number("DAN_DEFAULT_WIDTH", &raw)?)?,
        None => defaults.default_width,
    };

    let utc_offset_hours = match var("DAN_UTC_OFFSET_HOURS") {
        Some(raw) => parse_number("DAN_UTC_OFFSET_HOURS", &raw)?,
        None => defaults.utc_offset_hours,
    };
    reference_offset(utc_offset_hours)?;

    let reconcile_tiers = match var("DAN_RECONCILE_TIERS") {
        Some(raw) => parse_tiers(&raw)?,
        None => defaults.reconcile_tiers,
    };

    let fetch_timeout_secs = match var("DAN_FETCH_TIMEOUT_SECS") {
        Some(raw) => parse_number("DAN_FETCH_TIMEOUT_SECS", &raw)?,
        None => defaults.fetch_timeout_secs,
    };
    if fetch_timeout_secs == 0 {
        return Err(DanError::InvalidRequest(
            "DAN_FETCH_TIMEOUT_SECS must be positive".to_string(),
        ));
    }

    let reconcile_concurrency = match var("DAN_RECONCILE_CONCURRENCY") {
        Some(raw) => parse_number("DAN_RECONCILE_CONCURRENCY", &raw)?,
        None => defaults.reconcile_concurrency,
    };
    if reconcile_concurrency == 0 {
        return Err(DanError::InvalidRequest(
            "DAN_RECONCILE_CONCURRENCY must be positive".to_string(),
        ));
    }

    Ok(Config {
        database_url,
        default_width,
        utc_offset_hours,
        reconcile_tiers,
        fetch_timeout_secs,
        reconcile_concurrency,
        draw_api_url: var("DAN_DRAW_API_URL"),
    })
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| DanError::InvalidRequest(format!("{} has invalid value '{}'", key, raw)))
}

fn parse_tiers(raw: &str) -> Result<Vec<Tier>> {
    let mut tiers = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let tier: Tier = part.parse()?;
        if !tiers.contains(&tier) {
            tiers.push(tier);
        }
    }
    if tiers.is_empty() {
        return Err(DanError::InvalidRequest(
            "DAN_RECONCILE_TIERS names no tier".to_string(),
        ));
    }
    Ok(tiers)
}
