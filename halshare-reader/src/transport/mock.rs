use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use halshare_core::DeviceAddress;
use halshare_core::protocol::{self, COMPLETION_MARKER, DEVICE_NAME_PREFIX};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Connection, ConnectionError, DiscoveredDevice, RawFrame, Transport, TransportError};
use crate::config::TransportConfig;

/// Operations performed against a [`MockTransport`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Scan,
    Connect(DeviceAddress),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Write(Uuid, Vec<u8>),
    Disconnect,
}

/// How the simulated sensor behaves once connected.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Frames sent in reply to the data dump command.
    pub frames: Vec<RawFrame>,
    /// Delay before each frame.
    pub frame_delay: Duration,
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    pub fail_write: bool,
    /// Close the notification channel after the last frame, as if the link
    /// had dropped.
    pub drop_link: bool,
}

impl MockScript {
    pub fn new(frames: Vec<RawFrame>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// A sensor holding `sample_count` random skin temperatures recorded every
    /// `interval_minutes`, dumped `samples_per_frame` samples at a time and
    /// terminated by the completion marker.
    pub fn synthetic(sample_count: usize, interval_minutes: u8, samples_per_frame: usize) -> Self {
        let mut rng = rand::rng();
        // Random walk around 32-34 °C.
        let mut raw: u8 = rng.random_range(0x70..=0x90);

        let mut bytes = Vec::with_capacity(sample_count * protocol::SAMPLE_SIZE);
        for _ in 0..sample_count {
            let step: i16 = rng.random_range(-2..=2);
            raw = (i16::from(raw) + step).clamp(0x50, 0xC0) as u8;
            bytes.extend_from_slice(&[interval_minutes, raw]);
        }

        let frame_len = samples_per_frame.max(1) * protocol::SAMPLE_SIZE;
        let mut frames: Vec<RawFrame> = bytes.chunks(frame_len).map(<[u8]>::to_vec).collect();
        frames.push(COMPLETION_MARKER.to_vec());

        Self::new(frames)
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }
}

/// In-process stand-in for a BLE stack, driven by a [`MockScript`].
#[derive(Clone)]
pub struct MockTransport {
    devices: Arc<Vec<DiscoveredDevice>>,
    script: Arc<MockScript>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    channel_capacity: usize,
}

impl MockTransport {
    pub fn new(devices: Vec<DiscoveredDevice>, script: MockScript) -> Self {
        Self {
            devices: Arc::new(devices),
            script: Arc::new(script),
            calls: Arc::default(),
            channel_capacity: 64,
        }
    }

    /// A single advertising sensor that replies with `script`.
    pub fn single(address: &str, script: MockScript) -> Self {
        let device = DiscoveredDevice {
            address: DeviceAddress::new(address),
            name: Some(format!("{DEVICE_NAME_PREFIX} mock")),
            rssi: Some(-55),
        };
        Self::new(vec![device], script)
    }

    /// Build a synthetic sensor from `[transport] type = "mock"` settings.
    pub fn from_config(config: &TransportConfig, channel_capacity: usize) -> Option<Self> {
        let TransportConfig::Mock {
            sample_count,
            interval_minutes,
            samples_per_frame,
            frame_delay_millis,
        } = *config
        else {
            return None;
        };

        let script = MockScript::synthetic(sample_count, interval_minutes, samples_per_frame)
            .with_frame_delay(Duration::from_millis(frame_delay_millis));

        Some(Self::single("ED:8D:55:08:F0:95", script).with_channel_capacity(channel_capacity))
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Every call made so far through this transport and its connections.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: MockCall) {
        record(&self.calls, call);
    }
}

fn record(calls: &Mutex<Vec<MockCall>>, call: MockCall) {
    calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(call);
}

#[async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>, ConnectionError> {
        self.record(MockCall::Scan);
        debug!(scan_secs = duration.as_secs(), "Mock scan");
        Ok(self.devices.to_vec())
    }

    async fn connect(&self, device: &DeviceAddress) -> Result<Self::Connection, ConnectionError> {
        self.record(MockCall::Connect(device.clone()));

        if !self.devices.iter().any(|d| &d.address == device) {
            return Err(ConnectionError::DeviceNotFound(device.clone()));
        }

        if self.script.fail_connect {
            return Err(ConnectionError::Connect {
                device: device.clone(),
                reason: "simulated connection failure".to_string(),
            });
        }

        info!(%device, "Mock sensor connected");

        Ok(MockConnection {
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
            capacity: self.channel_capacity,
            notify: None,
            feeder: None,
        })
    }
}

pub struct MockConnection {
    script: Arc<MockScript>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    capacity: usize,
    notify: Option<(Uuid, mpsc::Sender<RawFrame>)>,
    feeder: Option<JoinHandle<()>>,
}

impl MockConnection {
    fn stop_feeder(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }

    fn start_feeder(&mut self) {
        // With `drop_link` the feeder holds the only sender, so the channel
        // closes once the script runs out.
        let tx = if self.script.drop_link {
            self.notify.take().map(|(_, tx)| tx)
        } else {
            self.notify.as_ref().map(|(_, tx)| tx.clone())
        };
        let Some(tx) = tx else {
            return;
        };

        let script = Arc::clone(&self.script);
        self.feeder = Some(tokio::spawn(async move {
            for frame in script.frames.iter() {
                if !script.frame_delay.is_zero() {
                    tokio::time::sleep(script.frame_delay).await;
                }
                if tx.send(frame.clone()).await.is_err() {
                    debug!("Notification channel closed, mock feeder stopping");
                    return;
                }
            }
        }));
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<RawFrame>, TransportError> {
        record(&self.calls, MockCall::Subscribe(characteristic));

        if self.script.fail_subscribe {
            return Err(TransportError::Subscribe {
                characteristic,
                reason: "simulated rejection".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        self.notify = Some((characteristic, tx));
        Ok(rx)
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        record(&self.calls, MockCall::Unsubscribe(characteristic));

        if matches!(self.notify, Some((uuid, _)) if uuid == characteristic) {
            self.notify = None;
        }
        self.stop_feeder();
        Ok(())
    }

    async fn write(&mut self, characteristic: Uuid, payload: &[u8]) -> Result<(), TransportError> {
        record(&self.calls, MockCall::Write(characteristic, payload.to_vec()));

        if self.script.fail_write {
            return Err(TransportError::Write {
                characteristic,
                reason: "simulated write failure".to_string(),
            });
        }

        // The firmware only answers the data dump command.
        if payload == protocol::command_payload(protocol::GET_DATA_COMMAND) && self.feeder.is_none()
        {
            self.start_feeder();
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        record(&self.calls, MockCall::Disconnect);
        self.notify = None;
        self.stop_feeder();
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.stop_feeder();
    }
}
