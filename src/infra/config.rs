//! Configuration loading from TOML files
//!
//! The daemon takes the path from `--config` (default `config/dev.toml`) and
//! falls back to built-in defaults when the file is missing or invalid.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound on the slot pool, shared with the admin slot-count command
pub const MAX_SLOTS: u32 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Fixed delay between connection attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// The controller resets when the port opens; wait this long before querying sensors
    #[serde(default = "default_boot_delay_ms")]
    pub boot_delay_ms: u64,
}

fn default_baud() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_boot_delay_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParkingConfig {
    #[serde(default = "default_total_slots")]
    pub total_slots: u32,
    /// Session lifetime reported to clients on entry
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
}

impl Default for ParkingConfig {
    fn default() -> Self {
        Self {
            total_slots: default_total_slots(),
            session_ttl_secs: default_session_ttl_secs(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
        }
    }
}

fn default_total_slots() -> u32 {
    4
}

fn default_session_ttl_secs() -> u64 {
    12 * 3600
}

fn default_snapshot_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    #[serde(default = "default_token_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Base URL embedded in QR codes
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_token_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    90
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Bounded queue between the serial reader and the event router
    #[serde(default = "default_frame_queue_size")]
    pub frame_queue_size: usize,
    /// Per-observer message buffer; a full buffer drops messages for that observer
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { frame_queue_size: default_frame_queue_size(), observer_buffer: default_observer_buffer() }
    }
}

fn default_frame_queue_size() -> usize {
    256
}

fn default_observer_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub serial: SerialConfig,
    #[serde(default)]
    pub parking: ParkingConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    serial_device: String,
    serial_baud: u32,
    serial_read_timeout_ms: u64,
    serial_write_timeout_ms: u64,
    serial_reconnect_delay_ms: u64,
    serial_boot_delay_ms: u64,
    total_slots: u32,
    session_ttl_secs: u64,
    snapshot_timeout_ms: u64,
    token_ttl_secs: u64,
    token_sweep_interval_secs: u64,
    public_base_url: String,
    frame_queue_size: usize,
    observer_buffer: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_device: "/dev/ttyACM0".to_string(),
            serial_baud: default_baud(),
            serial_read_timeout_ms: default_read_timeout_ms(),
            serial_write_timeout_ms: default_write_timeout_ms(),
            serial_reconnect_delay_ms: default_reconnect_delay_ms(),
            serial_boot_delay_ms: default_boot_delay_ms(),
            total_slots: default_total_slots(),
            session_ttl_secs: default_session_ttl_secs(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            token_ttl_secs: default_token_ttl_secs(),
            token_sweep_interval_secs: default_sweep_interval_secs(),
            public_base_url: default_public_base_url(),
            frame_queue_size: default_frame_queue_size(),
            observer_buffer: default_observer_buffer(),
            metrics_interval_secs: default_metrics_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.parking.total_slots == 0 {
            anyhow::bail!("parking.total_slots must be at least 1 in {}", path.display());
        }
        if toml_config.parking.total_slots > MAX_SLOTS {
            anyhow::bail!("parking.total_slots must be at most {} in {}", MAX_SLOTS, path.display());
        }
        if toml_config.events.frame_queue_size == 0 {
            anyhow::bail!("events.frame_queue_size must be at least 1 in {}", path.display());
        }

        Ok(Self {
            serial_device: toml_config.serial.device,
            serial_baud: toml_config.serial.baud,
            serial_read_timeout_ms: toml_config.serial.read_timeout_ms,
            serial_write_timeout_ms: toml_config.serial.write_timeout_ms,
            serial_reconnect_delay_ms: toml_config.serial.reconnect_delay_ms,
            serial_boot_delay_ms: toml_config.serial.boot_delay_ms,
            total_slots: toml_config.parking.total_slots,
            session_ttl_secs: toml_config.parking.session_ttl_secs,
            snapshot_timeout_ms: toml_config.parking.snapshot_timeout_ms,
            token_ttl_secs: toml_config.tokens.ttl_secs,
            token_sweep_interval_secs: toml_config.tokens.sweep_interval_secs,
            public_base_url: toml_config.tokens.public_base_url,
            frame_queue_size: toml_config.events.frame_queue_size,
            observer_buffer: toml_config.events.observer_buffer,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn serial_device(&self) -> &str {
        &self.serial_device
    }

    pub fn serial_baud(&self) -> u32 {
        self.serial_baud
    }

    pub fn serial_read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_read_timeout_ms)
    }

    pub fn serial_write_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_write_timeout_ms)
    }

    pub fn serial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.serial_reconnect_delay_ms)
    }

    pub fn serial_boot_delay(&self) -> Duration {
        Duration::from_millis(self.serial_boot_delay_ms)
    }

    pub fn total_slots(&self) -> u32 {
        self.total_slots
    }

    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl_secs
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn token_ttl_secs(&self) -> u64 {
        self.token_ttl_secs
    }

    pub fn token_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.token_sweep_interval_secs)
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub fn frame_queue_size(&self) -> usize {
        self.frame_queue_size
    }

    pub fn observer_buffer(&self) -> usize {
        self.observer_buffer
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the slot count
    #[cfg(test)]
    pub fn with_total_slots(mut self, total_slots: u32) -> Self {
        self.total_slots = total_slots;
        self
    }
}
