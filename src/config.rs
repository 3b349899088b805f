// src/config.rs
use std::time::Duration;

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub base_url: String,
    pub socket_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSettings {
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl ConnectionSettings {
    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSettings {
    pub search_timeout_ms: u64,
    pub rul_optimization_timeout_ms: u64,
}

impl RequestSettings {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn rul_optimization_timeout(&self) -> Duration {
        Duration::from_millis(self.rul_optimization_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingSettings {
    pub interval_ms: u64,
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub connection: ConnectionSettings,
    pub requests: RequestSettings,
    pub polling: PollingSettings,
}

impl Settings {
    /// Load the config from an optional `Settings.toml` plus environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?
            .add_source(File::new("Settings", FileFormat::Toml).required(false))
            .add_source(config::Environment::default().separator("__"));

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults only, no file or environment lookup.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::with_defaults(Config::builder())?.build()?.try_deserialize()
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Message(
                "polling.interval_ms must be greater than zero".into(),
            ));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "connection.connect_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("server.base_url", "http://localhost:8001")?
            .set_default("server.socket_path", "/ws")?
            .set_default("connection.reconnection_attempts", 10)?
            .set_default("connection.reconnection_delay_ms", 2000)?
            .set_default("connection.connect_timeout_ms", 10_000)?
            .set_default("requests.search_timeout_ms", 10_000)?
            .set_default("requests.rul_optimization_timeout_ms", 5000)?
            .set_default("polling.interval_ms", 3000)
    }
}
