pub mod csv;
pub mod memory;

use async_trait::async_trait;
use halshare_core::TimestampedRecord;

/// Destination for reconstructed records.
#[async_trait]
pub trait RecordSink: Send + Sync + 'static {
    /// Error type specific to this sink implementation
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store records in the given order. Returns the number stored.
    async fn store_records(&self, records: &[TimestampedRecord]) -> Result<usize, Self::Error>;
}
