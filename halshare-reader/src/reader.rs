use std::sync::Arc;
use std::time::Duration;

use halshare_core::{
    DeviceAddress, RecordSource, SessionId, TimelineError, TimestampedRecord, reconstruct,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::config::{Config, ProtocolConfig};
use crate::selector::{DeviceSelector, SelectError, rank_devices};
use crate::session::{Acquisition, Session, SessionError};
use crate::transport::{Connection, ConnectionError, DiscoveredDevice, Transport};

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Device selection failed: {0}")]
    Select(#[from] SelectError),

    #[error("Cancelled before the session started")]
    Cancelled,
}

/// Result of one connect, acquire and reconstruct cycle.
#[derive(Debug)]
pub struct ReadReport {
    pub device: DeviceAddress,
    pub acquisition: Acquisition,
    /// Empty unless the completion marker arrived and the timeline could be
    /// rebuilt.
    pub records: Vec<TimestampedRecord>,
    /// Why `records` is empty despite a completed acquisition.
    pub timeline_error: Option<TimelineError>,
}

impl ReadReport {
    /// The session was interrupted by cancellation.
    pub fn was_cancelled(&self) -> bool {
        matches!(self.acquisition.error, Some(SessionError::Cancelled))
    }
}

/// Reads the stored log of one sensor per call.
pub struct Reader<T: Transport> {
    transport: T,
    protocol: ProtocolConfig,
    clock: Arc<dyn Clock>,
    settle: Duration,
    timeout: Duration,
    wearer_name: String,
}

impl<T: Transport> Reader<T> {
    pub fn new(transport: T, config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            protocol: config.protocol.clone(),
            clock,
            settle: config.session.settle_delay(),
            timeout: config.session.timeout(),
            wearer_name: config.output.wearer_name.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_wearer_name(mut self, wearer_name: impl Into<String>) -> Self {
        self.wearer_name = wearer_name.into();
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Scan and keep sensors advertising `name_prefix`, strongest first.
    pub async fn scan(
        &self,
        duration: Duration,
        name_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>, ReaderError> {
        let devices = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(ReaderError::Cancelled),
            devices = self.transport.scan(duration) => devices?,
        };
        Ok(rank_devices(devices, name_prefix))
    }

    pub async fn select<S: DeviceSelector>(
        &self,
        selector: &S,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceAddress>, ReaderError> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(ReaderError::Cancelled),
            device = selector.select(&self.transport) => Ok(device?),
        }
    }

    #[instrument(skip_all, fields(%device))]
    pub async fn read(
        &self,
        device: &DeviceAddress,
        cancel: &CancellationToken,
    ) -> Result<ReadReport, ReaderError> {
        let mut connection = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(ReaderError::Cancelled),
            connection = self.transport.connect(device) => connection?,
        };

        // The sensor drops early writes if they follow the connect too closely.
        if !self.settle.is_zero() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if let Err(e) = connection.disconnect().await {
                        warn!(error = %e, "Failed to disconnect");
                    }
                    return Err(ReaderError::Cancelled);
                }
                _ = tokio::time::sleep(self.settle) => {}
            }
        }

        let session_id = SessionId::new();
        info!(%session_id, "Starting session");

        let session = Session::new(
            session_id,
            connection,
            self.protocol.clone(),
            Arc::clone(&self.clock),
        );
        let acquisition = session.acquire(self.timeout, cancel).await;

        let source = RecordSource {
            wearer_name: self.wearer_name.as_str().into(),
            device_id: device.clone(),
        };
        let (records, timeline_error) = match reconstruct(
            &acquisition.samples,
            acquisition.completed_at.as_ref(),
            &source,
        ) {
            Ok(records) => (records, None),
            Err(e) => {
                warn!(error = %e, samples = acquisition.samples.len(), "Timeline rebuild failed");
                (Vec::new(), Some(e))
            }
        };

        Ok(ReadReport {
            device: device.clone(),
            acquisition,
            records,
            timeline_error,
        })
    }
}
