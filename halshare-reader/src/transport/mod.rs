#[cfg(feature = "ble")]
pub mod ble;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use halshare_core::DeviceAddress;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Payload of one notification, exactly as delivered by the BLE stack.
pub type RawFrame = Vec<u8>;

/// A sensor seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm, if reported.
    pub rssi: Option<i16>,
}

/// The link to a sensor could not be established or was lost.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Device {0} not found")]
    DeviceNotFound(DeviceAddress),

    #[error("Failed to connect to {device}: {reason}")]
    Connect {
        device: DeviceAddress,
        reason: String,
    },

    #[error("Failed to disconnect: {0}")]
    Disconnect(String),

    #[error("Scan failed: {0}")]
    Scan(String),
}

/// A single GATT operation failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Subscribe to {characteristic} rejected: {reason}")]
    Subscribe { characteristic: Uuid, reason: String },

    #[error("Unsubscribe from {characteristic} failed: {reason}")]
    Unsubscribe { characteristic: Uuid, reason: String },

    #[error("Write to {characteristic} failed: {reason}")]
    Write { characteristic: Uuid, reason: String },
}

/// Entry point to a BLE stack.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection type handed out by `connect`.
    type Connection: Connection;

    /// Listen for advertisements for `duration` and report every device seen.
    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>, ConnectionError>;

    /// Connect to a sensor and discover its services.
    async fn connect(&self, device: &DeviceAddress) -> Result<Self::Connection, ConnectionError>;
}

/// An established link to one sensor.
///
/// Notifications are delivered through the channel returned by `subscribe`,
/// in the order the stack received them. The sending half is dropped when the
/// link goes down, so a closed channel means the connection was lost.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Enable notifications on a characteristic.
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<RawFrame>, TransportError>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Write a payload to a characteristic, with response.
    async fn write(&mut self, characteristic: Uuid, payload: &[u8]) -> Result<(), TransportError>;

    /// Tear down the link.
    async fn disconnect(&mut self) -> Result<(), ConnectionError>;
}
