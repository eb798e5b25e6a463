//! # kl-config
//!
//! Layered runtime settings: built-in defaults, then an optional
//! `config/klutch.toml`, then `KLUTCH__SECTION__KEY` environment variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File};
use config::builder::DefaultState;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "config/klutch";
const ENV_PREFIX: &str = "KLUTCH";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub media: MediaSettings,
    pub geo: GeoSettings,
    pub auth: AuthSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSettings {
    /// Directory the local store writes into.
    pub root: PathBuf,
    /// URL prefix the files are served under.
    pub url_prefix: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize)]
pub struct GeoSettings {
    /// Without a token, reverse geocoding is disabled and addresses stay empty.
    pub mapbox_token: Option<SecretString>,
    pub mapbox_base_url: String,
    pub timeout_secs: u64,
    /// Server-side fixed position; both or neither.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fixed_position(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthSettings {
    /// HMAC key for bearer tokens.
    pub secret: SecretString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub format: LogFormat,
}

fn with_defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, SettingsError> {
    Ok(builder
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.cors_origins", Vec::<String>::new())?
        .set_default("database.url", "sqlite://klutch.db")?
        .set_default("database.max_connections", 5)?
        .set_default("media.root", "./data/media")?
        .set_default("media.url_prefix", "/media")?
        .set_default("media.max_upload_bytes", 10 * 1024 * 1024)?
        .set_default("geo.mapbox_base_url", "https://api.mapbox.com")?
        .set_default("geo.timeout_secs", 5)?
        .set_default("log.filter", "info")?
        .set_default("log.format", "pretty")?)
}

impl Settings {
    /// Loads `.env`, then the default config file and environment.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::build(DEFAULT_CONFIG_FILE, None)
    }

    /// `file` may omit its extension; a missing file is not an error.
    /// `env` replaces the process environment when given.
    pub fn build(file: &str, env: Option<HashMap<String, String>>) -> Result<Self, SettingsError> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("server.cors_origins")
            .try_parsing(true)
            .source(env);

        let settings: Settings = with_defaults(Config::builder())?
            .add_source(File::with_name(file).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server.port == 0 {
            return Err(SettingsError::Invalid("server.port must be non-zero".into()));
        }
        if self.database.max_connections == 0 {
            return Err(SettingsError::Invalid("database.max_connections must be at least 1".into()));
        }
        if self.media.max_upload_bytes == 0 {
            return Err(SettingsError::Invalid("media.max_upload_bytes must be non-zero".into()));
        }
        if self.geo.latitude.is_some() != self.geo.longitude.is_some() {
            return Err(SettingsError::Invalid(
                "geo.latitude and geo.longitude must be set together".into(),
            ));
        }
        if let Some((latitude, longitude)) = self.geo.fixed_position() {
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                return Err(SettingsError::Invalid(format!(
                    "geo position ({latitude}, {longitude}) is outside [-90, 90] x [-180, 180]"
                )));
            }
        }
        if self.geo.timeout_secs == 0 {
            return Err(SettingsError::Invalid("geo.timeout_secs must be at least 1".into()));
        }
        if self.auth.secret.expose_secret().trim().is_empty() {
            return Err(SettingsError::Invalid("auth.secret must not be empty".into()));
        }
        Ok(())
    }

}
