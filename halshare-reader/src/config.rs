use std::path::{Path, PathBuf};
use std::time::Duration;

use halshare_core::protocol;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub session: SessionConfig,
    pub protocol: ProtocolConfig,
    pub output: OutputConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// How the sensor to read is chosen
    pub selection: SelectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SelectionConfig {
    /// Scan and pick among advertising sensors
    Scan {
        /// Advertised name prefix a sensor must carry
        name_prefix: String,
        /// Scan duration in seconds
        scan_secs: u64,
    },
    /// Always read the same sensor
    Fixed { address: String },
}

pub const DEFAULT_SCAN_SECS: u64 = 10;

impl SelectionConfig {
    /// Advertised name prefix to filter scans by.
    pub fn name_prefix(&self) -> &str {
        match self {
            Self::Scan { name_prefix, .. } => name_prefix,
            Self::Fixed { .. } => protocol::DEVICE_NAME_PREFIX,
        }
    }

    pub fn scan_duration(&self) -> Duration {
        match self {
            Self::Scan { scan_secs, .. } => Duration::from_secs(*scan_secs),
            Self::Fixed { .. } => Duration::from_secs(DEFAULT_SCAN_SECS),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::Scan {
            name_prefix: protocol::DEVICE_NAME_PREFIX.to_string(),
            scan_secs: DEFAULT_SCAN_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds to wait for the end-of-data marker
    pub timeout_secs: u64,
    /// Pause between connecting and enabling notifications
    pub settle_millis: u64,
    /// Capacity of the notification frame channel
    pub channel_capacity: usize,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            settle_millis: 1000,
            channel_capacity: 64,
        }
    }
}

/// GATT layout and command set of the sensor firmware.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub service: Uuid,
    pub command_characteristic: Uuid,
    pub notify_characteristic: Uuid,
    /// Command text, sent with a trailing line feed
    pub command: String,
}

impl ProtocolConfig {
    pub fn command_payload(&self) -> Vec<u8> {
        protocol::command_payload(&self.command)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            service: Uuid::from_u128(0x61830845_385d_41e8_9ee5_a30b150b49e9),
            command_characteristic: Uuid::from_u128(0x804cdb50_bac9_448b_8ae2_41e9750ef93a),
            notify_characteristic: Uuid::from_u128(0x169bb1bb_ae80_4650_bf4b_afb79f38422a),
            command: protocol::GET_DATA_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Name written into every exported row
    pub wearer_name: String,
    /// Directory CSV exports are written to
    pub directory: PathBuf,
    /// Rows shown in the console preview
    pub preview_rows: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            wearer_name: "test".to_string(),
            directory: PathBuf::from("."),
            preview_rows: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Ble,
    Mock {
        /// Number of stored samples the simulated sensor dumps
        sample_count: usize,
        /// Minutes between simulated samples
        interval_minutes: u8,
        /// Samples packed into each notification frame
        samples_per_frame: usize,
        /// Delay between notification frames
        frame_delay_millis: u64,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Ble
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
