//! Application Configuration Module
//!
//! Loads the companion's settings from environment variables (and a `.env`
//! file when present) into one struct handed to the rest of the service.

use std::env;
use std::time::Duration;

use companion_core::RetryPolicy;
use companion_core::lifecycle::DEFAULT_LIVE_MODEL;
use companion_core::personality::{DEFAULT_CREATOR, DEFAULT_VOICE};
use gemini_live_types::generate::LatLng;
use secrecy::SecretString;
use tracing::Level;

// --- Application Constants ---

pub const DEFAULT_TOOL_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
/// Frames requested per cpal callback on both streams.
pub const DEVICE_BUFFER_FRAMES: u32 = 1024;

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub live_model: String,
    pub tool_model: String,
    pub image_model: String,
    pub voice: String,
    pub creator_name: String,
    pub location: Option<LatLng>,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Required.
    // *   `LIVE_MODEL`, `TOOL_MODEL`, `IMAGE_MODEL`: (Optional) model overrides.
    // *   `COMPANION_VOICE`, `COMPANION_CREATOR`: (Optional) starting persona.
    // *   `COMPANION_LATITUDE` / `COMPANION_LONGITUDE`: (Optional) both or neither.
    // *   `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY_MS`: (Optional) tool retry policy.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = var("GEMINI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model = var("LIVE_MODEL").unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string());
        let tool_model = var("TOOL_MODEL").unwrap_or_else(|| DEFAULT_TOOL_MODEL.to_string());
        let image_model = var("IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        let voice = var("COMPANION_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string());
        let creator_name =
            var("COMPANION_CREATOR").unwrap_or_else(|| DEFAULT_CREATOR.to_string());

        let location = match (var("COMPANION_LATITUDE"), var("COMPANION_LONGITUDE")) {
            (None, None) => None,
            (Some(lat), Some(lng)) => Some(LatLng {
                latitude: parse_number("COMPANION_LATITUDE", &lat)?,
                longitude: parse_number("COMPANION_LONGITUDE", &lng)?,
            }),
            (None, Some(_)) => {
                return Err(ConfigError::MissingVar("COMPANION_LATITUDE".to_string()));
            }
            (Some(_), None) => {
                return Err(ConfigError::MissingVar("COMPANION_LONGITUDE".to_string()));
            }
        };

        let retry_max_attempts = match var("RETRY_MAX_ATTEMPTS") {
            Some(v) => parse_number::<u32>("RETRY_MAX_ATTEMPTS", &v)?.max(1),
            None => RetryPolicy::default().max_attempts,
        };
        let retry_base_delay = match var("RETRY_BASE_DELAY_MS") {
            Some(v) => Duration::from_millis(parse_number("RETRY_BASE_DELAY_MS", &v)?),
            None => RetryPolicy::default().base_delay,
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_key,
            live_model,
            tool_model,
            image_model,
            voice,
            creator_name,
            location,
            retry_max_attempts,
            retry_base_delay,
            log_level,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry_max_attempts)
            .with_base_delay(self.retry_base_delay)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_only_need_the_key() {
        let config = load(&[("GEMINI_API_KEY", "k")]).unwrap();
        assert_eq!(config.api_key.expose_secret(), "k");
        assert_eq!(config.live_model, DEFAULT_LIVE_MODEL);
        assert_eq!(config.tool_model, DEFAULT_TOOL_MODEL);
        assert_eq!(config.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.voice, "Kore");
        assert_eq!(config.creator_name, "Shervin");
        assert_eq!(config.location, None);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn missing_or_blank_key_is_an_error() {
        assert_eq!(
            load(&[]).unwrap_err(),
            ConfigError::MissingVar("GEMINI_API_KEY".to_string())
        );
        assert!(load(&[("GEMINI_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("GEMINI_API_KEY", "k"),
            ("TOOL_MODEL", "gemini-pro"),
            ("COMPANION_VOICE", "Puck"),
            ("COMPANION_LATITUDE", "35.7"),
            ("COMPANION_LONGITUDE", "51.4"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("RETRY_BASE_DELAY_MS", "250"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();
        assert_eq!(config.tool_model, "gemini-pro");
        assert_eq!(config.voice, "Puck");
        assert_eq!(
            config.location,
            Some(LatLng {
                latitude: 35.7,
                longitude: 51.4
            })
        );
        assert_eq!(config.log_level, Level::DEBUG);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert_eq!(
            load(&[("GEMINI_API_KEY", "k"), ("RUST_LOG", "loud")]).unwrap_err(),
            ConfigError::InvalidLogLevel("loud".to_string())
        );
        assert!(matches!(
            load(&[("GEMINI_API_KEY", "k"), ("RETRY_MAX_ATTEMPTS", "many")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            load(&[("GEMINI_API_KEY", "k"), ("COMPANION_LATITUDE", "1.0")]).unwrap_err(),
            ConfigError::MissingVar("COMPANION_LONGITUDE".to_string())
        );
    }
}
