//! btleplug-backed transport.
//!
//! Uses the first adapter the platform reports. Notifications for every
//! characteristic arrive on one peripheral-wide stream; a forwarding task
//! filters it down to the subscribed characteristic and feeds the session
//! channel. The stream ends when the peripheral disconnects, which closes the
//! channel and surfaces as a lost connection.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use halshare_core::DeviceAddress;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{Connection, ConnectionError, DiscoveredDevice, RawFrame, Transport, TransportError};

const DISCOVERY_POLL: Duration = Duration::from_millis(250);

pub struct BleTransport {
    adapter: Adapter,
    /// How long `connect` scans for a device that is not yet known.
    discovery_timeout: Duration,
    channel_capacity: usize,
}

impl BleTransport {
    pub async fn new(
        discovery_timeout: Duration,
        channel_capacity: usize,
    ) -> Result<Self, ConnectionError> {
        let manager = Manager::new()
            .await
            .map_err(|_| ConnectionError::NoAdapter)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|_| ConnectionError::NoAdapter)?
            .into_iter()
            .next()
            .ok_or(ConnectionError::NoAdapter)?;

        if let Ok(info) = adapter.adapter_info().await {
            info!(adapter = %info, "Using Bluetooth adapter");
        }

        Ok(Self {
            adapter,
            discovery_timeout,
            channel_capacity: channel_capacity.max(1),
        })
    }

    async fn find_peripheral(
        &self,
        device: &DeviceAddress,
    ) -> Result<Option<Peripheral>, ConnectionError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| ConnectionError::Scan(e.to_string()))?;

        Ok(peripherals.into_iter().find(|p| matches_address(p, device)))
    }
}

fn matches_address(peripheral: &Peripheral, device: &DeviceAddress) -> bool {
    // CoreBluetooth hides MAC addresses and identifies peripherals by UUID.
    device.matches(&peripheral.address().to_string())
        || device.matches(&peripheral.id().to_string())
}

#[async_trait]
impl Transport for BleTransport {
    type Connection = BleConnection;

    #[instrument(skip(self))]
    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>, ConnectionError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ConnectionError::Scan(e.to_string()))?;

        tokio::time::sleep(duration).await;

        let peripherals = self.adapter.peripherals().await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }
        let peripherals = peripherals.map_err(|e| ConnectionError::Scan(e.to_string()))?;

        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(properties) => properties,
                Err(e) => {
                    debug!(error = %e, "Skipping peripheral without properties");
                    continue;
                }
            };
            let (name, rssi) = properties
                .map(|p| (p.local_name, p.rssi))
                .unwrap_or_default();

            devices.push(DiscoveredDevice {
                address: DeviceAddress::new(peripheral.address().to_string()),
                name,
                rssi,
            });
        }

        info!(count = devices.len(), "Scan complete");
        Ok(devices)
    }

    #[instrument(skip_all, fields(%device))]
    async fn connect(&self, device: &DeviceAddress) -> Result<Self::Connection, ConnectionError> {
        let connect_err = |e: btleplug::Error| ConnectionError::Connect {
            device: device.clone(),
            reason: e.to_string(),
        };

        let mut peripheral = self.find_peripheral(device).await?;

        if peripheral.is_none() {
            debug!("Device not cached, scanning");
            self.adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(|e| ConnectionError::Scan(e.to_string()))?;

            let deadline = tokio::time::Instant::now() + self.discovery_timeout;
            while peripheral.is_none() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(DISCOVERY_POLL).await;
                peripheral = self.find_peripheral(device).await?;
            }

            if let Err(e) = self.adapter.stop_scan().await {
                warn!(error = %e, "Failed to stop scan");
            }
        }

        let peripheral =
            peripheral.ok_or_else(|| ConnectionError::DeviceNotFound(device.clone()))?;

        peripheral.connect().await.map_err(connect_err)?;
        peripheral.discover_services().await.map_err(connect_err)?;
        info!("Connected");

        Ok(BleConnection {
            peripheral,
            capacity: self.channel_capacity,
            forwarder: None,
        })
    }
}

pub struct BleConnection {
    peripheral: Peripheral,
    capacity: usize,
    forwarder: Option<JoinHandle<()>>,
}

impl BleConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn stop_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[async_trait]
impl Connection for BleConnection {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<RawFrame>, TransportError> {
        let subscribe_err = |e: btleplug::Error| TransportError::Subscribe {
            characteristic,
            reason: e.to_string(),
        };

        let target = self.characteristic(characteristic)?;

        // Open the stream before enabling indications so nothing is missed.
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(subscribe_err)?;
        self.peripheral
            .subscribe(&target)
            .await
            .map_err(subscribe_err)?;

        let (tx, rx) = mpsc::channel(self.capacity);
        self.stop_forwarder();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
            debug!(%characteristic, "Notification stream ended");
        }));

        Ok(rx)
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        self.stop_forwarder();

        let target = self.characteristic(characteristic)?;
        self.peripheral
            .unsubscribe(&target)
            .await
            .map_err(|e| TransportError::Unsubscribe {
                characteristic,
                reason: e.to_string(),
            })
    }

    async fn write(&mut self, characteristic: Uuid, payload: &[u8]) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .write(&target, payload, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::Write {
                characteristic,
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.stop_forwarder();

        let connected = self.peripheral.is_connected().await.unwrap_or(true);
        if !connected {
            return Ok(());
        }

        self.peripheral
            .disconnect()
            .await
            .map_err(|e| ConnectionError::Disconnect(e.to_string()))?;
        info!("Disconnected");
        Ok(())
    }
}

impl Drop for BleConnection {
    fn drop(&mut self) {
        self.stop_forwarder();
    }
}
