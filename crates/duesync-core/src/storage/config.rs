//! TOML-based application configuration.
//!
//! Stores the Google OAuth client registration and the optional vault key.
//! Configuration lives at `~/.config/duesync/config.toml`; the
//! `DUESYNC_VAULT_KEY` environment variable overrides the key on load.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

use super::data_dir;

/// Google OAuth client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

fn default_redirect_uri() -> String {
    "http://localhost:8080/oauth/callback".to_string()
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub google: GoogleConfig,
    /// 64 hex chars (256 bits). When absent the vault generates one at
    /// startup and logs it loudly.
    #[serde(default)]
    pub vault_key: Option<String>,
}

impl AppConfig {
    /// Load configuration, creating defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = data_dir()?.join("config.toml");
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::LoadFailed {
                path: path.clone(),
                message: e.to_string(),
            })?;
            toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        } else {
            AppConfig::default()
        };

        if let Ok(key) = std::env::var("DUESYNC_VAULT_KEY") {
            if !key.is_empty() {
                config.vault_key = Some(key);
            }
        }
        Ok(config)
    }

    /// Write configuration back to disk.
    pub fn save(&self) -> Result<()> {
        let path = data_dir()?.join("config.toml");
        let raw = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        std::fs::write(&path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.vault_key.is_none());
        assert_eq!(config.google.redirect_uri, "http://localhost:8080/oauth/callback");
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig {
            google: GoogleConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                redirect_uri: "http://localhost:9999/cb".into(),
            },
            vault_key: Some("ab".repeat(32)),
        };
        let raw = toml::to_string_pretty(&config).unwrap();
        let back: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.google.client_id, "id");
        assert_eq!(back.vault_key.as_deref(), Some("abababababababababababababababababababababababababababababababab"));
    }
}
