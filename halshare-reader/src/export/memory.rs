use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use halshare_core::TimestampedRecord;

use super::RecordSink;

/// In-memory sink.
/// Used for dry runs and as a reference implementation of the RecordSink trait.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TimestampedRecord>>>,
}

impl MemorySink {
    /// Everything stored so far, in store order.
    pub fn records(&self) -> Result<Vec<TimestampedRecord>, MemorySinkError> {
        Ok(self.records.lock()?.clone())
    }
}

/// Error type for MemorySink
#[derive(Debug)]
pub enum MemorySinkError {
    MutexPoisoned(String),
}

impl std::error::Error for MemorySinkError {}

impl fmt::Display for MemorySinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySinkError::MutexPoisoned(msg) => write!(f, "Mutex poisoned: {}", msg),
        }
    }
}

impl<T> From<PoisonError<T>> for MemorySinkError {
    fn from(err: PoisonError<T>) -> Self {
        MemorySinkError::MutexPoisoned(err.to_string())
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    type Error = MemorySinkError;

    async fn store_records(&self, records: &[TimestampedRecord]) -> Result<usize, Self::Error> {
        let mut stored = self.records.lock()?;
        stored.extend_from_slice(records);
        Ok(records.len())
    }
}
