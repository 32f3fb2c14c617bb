//! Daemon configuration
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! its default. Identity overrides use the `bus:VVVV:PPPP` form, e.g.
//!
//! ```toml
//! [delivery]
//! min_report_id = 0x10
//!
//! [[identity]]
//! driver = "mx5500-keyboard"
//! id = "bluetooth:046D:B30C"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use lgx_transport::DeviceId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::lifecycle::ControllerConfig;
use crate::queue::QueueConfig;

/// Inbound delivery settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Inbound reports with a lower report id are not queued; 0 disables
    pub min_report_id: u8,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            min_report_id: 0x10,
        }
    }
}

/// Hot-plug polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub poll_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

/// Device-index bytes the receiver routes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub keyboard_index: u8,
    pub mouse_index: u8,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            keyboard_index: 1,
            mouse_index: 2,
        }
    }
}

/// Re-target a built-in driver at another identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOverride {
    /// Built-in driver name
    pub driver: String,
    #[serde(serialize_with = "serialize_id", deserialize_with = "deserialize_id")]
    pub id: DeviceId,
}

fn serialize_id<S: Serializer>(id: &DeviceId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&id.to_string())
}

fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<DeviceId, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// Complete daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default, rename = "identity", skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<IdentityOverride>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lgx-driver")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.queue.validate()?;
        if self.receiver.keyboard_index == self.receiver.mouse_index {
            bail!(
                "receiver keyboard_index and mouse_index must differ (both {})",
                self.receiver.keyboard_index
            );
        }
        if self.discovery.poll_interval_ms == 0 {
            bail!("discovery poll_interval_ms must be non-zero");
        }
        Ok(())
    }

    /// Identity configured for driver `name`, if overridden
    pub fn identity_for(&self, name: &str) -> Option<DeviceId> {
        self.identities
            .iter()
            .rev()
            .find(|o| o.driver == name)
            .map(|o| o.id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.poll_interval_ms)
    }

    /// Settings for the connection controller
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            queue: self.queue,
            min_report_id: self.delivery.min_report_id,
        }
    }
}
