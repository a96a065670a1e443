//! Configuration management using the prefer crate.
//!
//! Precedence, lowest first: built-in defaults, the `girder` config file,
//! `GIRDER_*` environment variables, then command-line flags (applied by the
//! binary).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collection::DEFAULT_PAGE_LIMIT;
use crate::upload::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_USER_AGENT: &str = concat!("girder-client/", env!("CARGO_PKG_VERSION"));

/// Prefix of the environment variables that override the config file.
pub const ENV_PREFIX: &str = "GIRDER_";

/// Effective client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// API root, e.g. `https://data.kitware.com/api/v1`.
    pub api_url: String,
    /// Value of the `Girder-Token` header, if authenticated.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    pub user_agent: String,
    /// Records per page for listings.
    pub page_limit: usize,
    /// Bytes per chunk for server-mediated uploads.
    pub upload_chunk_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            request_timeout: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Configuration file structure. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub page_limit: Option<usize>,
    #[serde(default)]
    pub upload_chunk_size: Option<u64>,
}

impl Config {
    /// Load configuration using the prefer crate.
    /// Discovers `girder` config files in the standard locations.
    pub async fn load() -> Self {
        match prefer::load("girder").await {
            Ok(pref_config) => {
                let config = Self::from_prefer(&pref_config);
                debug!("Loaded config file: {:?}", config.redacted());
                config
            }
            Err(_) => Self::default(),
        }
    }

    /// Pick the known keys out of a loaded config file.
    /// Missing or mistyped keys are left unset.
    pub fn from_prefer(pref_config: &prefer::Config) -> Self {
        Config {
            api_url: pref_config.get("api_url").ok(),
            token: pref_config.get("token").ok(),
            request_timeout: pref_config.get("request_timeout").ok(),
            user_agent: pref_config.get("user_agent").ok(),
            page_limit: pref_config.get("page_limit").ok(),
            upload_chunk_size: pref_config.get("upload_chunk_size").ok(),
        }
    }

    /// Read `GIRDER_*` overrides through `lookup`.
    ///
    /// Numeric values that fail to parse are ignored with a warning.
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };
        let number = |name: &str| {
            let raw = var(name)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring {}{}={:?}: not a number", ENV_PREFIX, name, raw);
                    None
                }
            }
        };

        Config {
            api_url: var("API_URL"),
            token: var("TOKEN"),
            request_timeout: number("REQUEST_TIMEOUT"),
            user_agent: var("USER_AGENT"),
            page_limit: number("PAGE_LIMIT").map(|n: u64| n as usize),
            upload_chunk_size: number("UPLOAD_CHUNK_SIZE"),
        }
    }

    /// Overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Apply configuration to settings. Unset fields leave settings untouched.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref api_url) = self.api_url {
            settings.api_url = api_url.clone();
        }
        if let Some(ref token) = self.token {
            settings.token = Some(token.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(limit) = self.page_limit {
            settings.page_limit = limit;
        }
        if let Some(chunk_size) = self.upload_chunk_size.filter(|n| *n > 0) {
            settings.upload_chunk_size = chunk_size;
        }
    }

    fn redacted(&self) -> Self {
        Self {
            token: self.token.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }
}

/// Load settings from the config file and environment.
pub async fn load_settings() -> Settings {
    let mut settings = Settings::default();
    Config::load().await.apply_to_settings(&mut settings);
    Config::from_env().apply_to_settings(&mut settings);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefer::ConfigValue;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_prefer_reads_known_keys() {
        let data: HashMap<String, ConfigValue> = [
            ("api_url", ConfigValue::from("https://data.example/api/v1")),
            ("page_limit", ConfigValue::Integer(25)),
            ("upload_chunk_size", ConfigValue::Integer(1024)),
            ("request_timeout", ConfigValue::from("soon")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let config = Config::from_prefer(&prefer::Config::new(ConfigValue::Object(data)));

        assert_eq!(config.api_url.as_deref(), Some("https://data.example/api/v1"));
        assert_eq!(config.page_limit, Some(25));
        assert_eq!(config.upload_chunk_size, Some(1024));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.token, None);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.api_url, "http://localhost:8080/api/v1");
        assert_eq!(settings.request_timeout, 30);
        assert_eq!(settings.page_limit, 50);
        assert_eq!(settings.upload_chunk_size, 64 * 1024 * 1024);
        assert!(settings.token.is_none());
        assert!(settings.user_agent.starts_with("girder-client/"));
    }

    #[test]
    fn test_apply_only_overrides_set_fields() {
        let mut settings = Settings::default();
        let config = Config {
            api_url: Some("https://girder.example/api/v1".into()),
            page_limit: Some(10),
            ..Default::default()
        };
        config.apply_to_settings(&mut settings);

        assert_eq!(settings.api_url, "https://girder.example/api/v1");
        assert_eq!(settings.page_limit, 10);
        assert_eq!(settings.request_timeout, 30);
    }

    #[test]
    fn test_zero_chunk_size_is_ignored() {
        let mut settings = Settings::default();
        Config {
            upload_chunk_size: Some(0),
            ..Default::default()
        }
        .apply_to_settings(&mut settings);
        assert_eq!(settings.upload_chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_env_with(env(&[
            ("GIRDER_API_URL", "https://girder.example/api/v1"),
            ("GIRDER_TOKEN", "abc123"),
            ("GIRDER_REQUEST_TIMEOUT", "5"),
            ("GIRDER_UPLOAD_CHUNK_SIZE", "1048576"),
            ("GIRDER_PAGE_LIMIT", "not-a-number"),
            ("GIRDER_USER_AGENT", "  "),
        ]));

        assert_eq!(config.api_url.as_deref(), Some("https://girder.example/api/v1"));
        assert_eq!(config.token.as_deref(), Some("abc123"));
        assert_eq!(config.request_timeout, Some(5));
        assert_eq!(config.upload_chunk_size, Some(1_048_576));
        assert_eq!(config.page_limit, None);
        assert_eq!(config.user_agent, None);
    }

    #[test]
    fn test_env_wins_over_file() {
        let mut settings = Settings::default();
        Config {
            token: Some("from-file".into()),
            request_timeout: Some(60),
            ..Default::default()
        }
        .apply_to_settings(&mut settings);
        Config::from_env_with(env(&[("GIRDER_TOKEN", "from-env")])).apply_to_settings(&mut settings);

        assert_eq!(settings.token.as_deref(), Some("from-env"));
        assert_eq!(settings.request_timeout, 60);
    }

    #[test]
    fn test_redacted_hides_token() {
        let config = Config {
            token: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(config.redacted().token.as_deref(), Some("***"));
    }
}
