//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! A handful of plain environment variables are also honored because they are
//! the deployment surface the service has always had:
//! `DEEPGRAM_API_KEY` (required), `GOOGLE_TRANSLATE_API_KEY`,
//! `DEEPL_API_KEY`, `WS_AUTH_TOKEN`, `HOST` and `PORT`.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Plain environment variables listed above
//! 2. Environment variables with APP_ prefix (APP_SERVER_HOST, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speech: SpeechConfig,
    pub translation: TranslationConfig,
    pub limits: LimitsConfig,
}

/// HTTP server settings.
///
/// ## Fields:
/// - `host`: address to bind to ("127.0.0.1" for development, "0.0.0.0" in production)
/// - `port`: TCP port to listen on
/// - `allowed_origins`: origin allow-list for browser connections; an empty
///   list means any origin is accepted
/// - `auth_token`: optional shared secret checked against the `token` query
///   parameter on WebSocket upgrade; empty means no authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub auth_token: String,
}

/// Upstream speech-to-text settings.
///
/// The API key is the only required piece of configuration in the whole
/// application; startup fails without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub api_key: String,
    pub model: String,
}

/// Translation backend credentials and relay behavior.
///
/// A backend with an empty key is simply not registered. `forward_interim`
/// selects the interim-result emission policy: `false` (default) suppresses
/// interim transcripts and only emits once a result is finalized, `true`
/// forwards every interim transcript to the client immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub google_api_key: String,
    pub deepl_api_key: String,
    pub forward_interim: bool,
}

/// Connection and session limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum simultaneous WebSocket sessions per source address.
    pub max_connections_per_ip: usize,
    /// Seconds of client inactivity after which a session is terminated.
    pub read_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                allowed_origins: Vec::new(),
                auth_token: String::new(),
            },
            speech: SpeechConfig {
                api_key: String::new(),
                model: "nova-2".to_string(),
            },
            translation: TranslationConfig {
                google_api_key: String::new(),
                deepl_api_key: String::new(),
                forward_interim: false,
            },
            limits: LimitsConfig {
                max_connections_per_ip: 3,
                read_timeout_secs: 30,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Plain variables used by the original deployment and common hosts.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(key) = env::var("DEEPGRAM_API_KEY") {
            settings = settings.set_override("speech.api_key", key)?;
        }
        if let Ok(key) = env::var("GOOGLE_TRANSLATE_API_KEY") {
            settings = settings.set_override("translation.google_api_key", key)?;
        }
        if let Ok(key) = env::var("DEEPL_API_KEY") {
            settings = settings.set_override("translation.deepl_api_key", key)?;
        }
        if let Ok(token) = env::var("WS_AUTH_TOKEN") {
            settings = settings.set_override("server.auth_token", token)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration can actually run the service.
    ///
    /// A missing speech API key is a fatal startup error: the relay cannot do
    /// anything without its upstream.
    pub fn validate(&self) -> Result<()> {
        if self.speech.api_key.is_empty() {
            return Err(anyhow::anyhow!(
                "Missing required configuration: DEEPGRAM_API_KEY (speech.api_key)"
            ));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.limits.max_connections_per_ip == 0 {
            return Err(anyhow::anyhow!(
                "Max connections per IP must be greater than 0"
            ));
        }

        if self.limits.read_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Read timeout must be greater than 0"));
        }

        Ok(())
    }

    /// True when at least one translation backend credential is configured.
    pub fn has_translation_backend(&self) -> bool {
        !self.translation.google_api_key.is_empty() || !self.translation.deepl_api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_connections_per_ip, 3);
        assert_eq!(config.limits.read_timeout_secs, 30);
        assert!(!config.translation.forward_interim);
        // The default config has no API key, so it must not validate.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_speech_key() {
        let mut config = AppConfig::default();
        config.speech.api_key = "dg-key".to_string();
        assert!(config.validate().is_ok());

        config.speech.api_key.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("DEEPGRAM_API_KEY"));
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = AppConfig::default();
        config.speech.api_key = "dg-key".to_string();

        config.server.port = 0;
        assert!(config.validate().is_err());
        config.server.port = 8080;

        config.limits.max_connections_per_ip = 0;
        assert!(config.validate().is_err());
        config.limits.max_connections_per_ip = 3;

        config.limits.read_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_has_translation_backend() {
        let mut config = AppConfig::default();
        assert!(!config.has_translation_backend());

        config.translation.deepl_api_key = "dl-key".to_string();
        assert!(config.has_translation_backend());
    }
}
