//! Configuration management.
//!
//! Settings are loaded from `config/{name}.toml` (default `config/default.toml`)
//! via the `config` crate. Every field has a default so the daemon starts
//! without a config file present.

use crate::error::GatewayError;
use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Log filter passed to the tracing subscriber (e.g. "info",
    /// "lab_gateway=debug").
    pub log_level: String,
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub acquisition: AcquisitionSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the gRPC server binds to.
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionSettings {
    /// Per-session command queue depth. Overflow is rejected, never queued
    /// unbounded.
    pub command_queue_depth: usize,
    /// Deadline for a single instrument response.
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,
    /// Default poll interval for convergence waits.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Default miss budget for convergence waits.
    pub max_convergence_misses: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Capacity of the per-subscriber frame buffer. A subscriber that falls
    /// further behind than this loses its oldest frames.
    pub frame_queue_depth: usize,
    /// Pacing delay between capture cycles of the simulated scope.
    #[serde(with = "humantime_serde")]
    pub capture_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerSettings::default(),
            session: SessionSettings::default(),
            acquisition: AcquisitionSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 50052,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_queue_depth: 32,
            response_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            max_convergence_misses: 20,
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            frame_queue_depth: 64,
            capture_interval: Duration::from_millis(100),
        }
    }
}

impl Settings {
    /// Load settings from `config/{name}.toml`, falling back to defaults for
    /// any missing section.
    pub fn new(config_name: Option<&str>) -> Result<Self, GatewayError> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .build()
            .map_err(GatewayError::Config)?;

        s.try_deserialize().map_err(GatewayError::Config)
    }
}
