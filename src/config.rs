use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::protocol::{DeliverySettings, DEFAULT_API_BASE_URL};

pub const APP_DIR_NAME: &str = "Discord Broadcaster";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub rate_limit_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub worker_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            rate_limit_delay_ms: 1000,
            request_timeout_secs: 30,
            worker_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            api_base_url: self.api_base_url.trim_end_matches('/').to_string(),
            rate_limit_delay_ms: self.rate_limit_delay_ms,
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

pub fn get_config_directory() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

fn get_config_path() -> AppResult<PathBuf> {
    Ok(get_config_directory()?.join("config.json"))
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config)?;

        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(config_path, &default_config)?;
        Ok(default_config)
    }
}

fn save_config_to(config_path: &Path, config: &Config) -> AppResult<()> {
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::debug!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    let base = config.api_base_url.trim();
    if !(base.starts_with("https://") || base.starts_with("http://")) {
        return Err(AppError::validation(
            "api_base_url",
            "Must be an http(s) URL",
        ));
    }

    if config.rate_limit_delay_ms < 100 {
        return Err(AppError::validation(
            "rate_limit_delay_ms",
            "Must be at least 100ms",
        ));
    }

    if config.request_timeout_secs == 0 || config.request_timeout_secs > 600 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be between 1 and 600",
        ));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}
