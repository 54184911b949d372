//! Application settings, loaded from TOML
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{ChipFamily, DriverProfile, DriverRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "AppSettings::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            session: SessionSettings::default(),
            monitor: MonitorSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

impl AppSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: AppSettings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_toml_str(&text)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("session.read_buffer_size must be > 0".into()));
        }
        if self.session.write_timeout_ms == 0 || self.session.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("session timeouts must be > 0".into()));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("monitor.poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Timing of the read and write loops. Line parameters are fixed and not
/// part of the settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Period of the write tick; 1 ms means "as fast as the scheduler allows"
    pub write_interval_ms: u64,
    pub write_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub read_buffer_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_interval_ms: 1,
            write_timeout_ms: 2500,
            read_timeout_ms: 2500,
            read_buffer_size: 4096,
        }
    }
}

impl SessionSettings {
    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Register the stock FTDI/CP210x/PL2303/CH34x pairs
    pub include_known_chips: bool,
    /// Additional profiles, registered after the built-in tables
    pub extra: Vec<ExtraProfile>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            include_known_chips: true,
            extra: Vec::new(),
        }
    }
}

/// A driver profile declared in the settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraProfile {
    pub vid: u16,
    pub pid: u16,
    pub family: ChipFamily,
    #[serde(default)]
    pub ports: Option<usize>,
}

impl RegistrySettings {
    pub fn build_registry(&self) -> DriverRegistry {
        let mut registry = if self.include_known_chips {
            DriverRegistry::default_table()
        } else {
            DriverRegistry::custom()
        };

        for extra in &self.extra {
            let mut profile = DriverProfile::new(extra.vid, extra.pid, extra.family);
            if let Some(ports) = extra.ports {
                profile = profile.with_ports(ports);
            }
            registry.register(extra.vid, extra.pid, profile);
        }

        registry
    }
}
