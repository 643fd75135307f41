use std::fmt::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use halshare_core::TimestampedRecord;
use jiff::Zoned;
use tracing::info;

use super::RecordSink;

/// Column names, in export order.
pub const HEADER: [&str; 4] = ["halshareWearerName", "halshareId", "datetime", "temperature"];

#[derive(Debug, thiserror::Error)]
pub enum CsvSinkError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes records to a CSV file, replacing any existing file.
///
/// Text columns are quoted; the temperature column is a bare number.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `halshare_data_YYYYMMDD_HHMMSS.csv` inside `directory`.
    pub fn timestamped(directory: &Path, now: &Zoned) -> Self {
        let name = format!("halshare_data_{}.csv", now.strftime("%Y%m%d_%H%M%S"));
        Self::new(directory.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    type Error = CsvSinkError;

    async fn store_records(&self, records: &[TimestampedRecord]) -> Result<usize, Self::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        tokio::fs::write(&self.path, render(records))
            .await
            .map_err(|source| CsvSinkError::Io {
                path: self.path.clone(),
                source,
            })?;

        info!(path = %self.path.display(), rows = records.len(), "CSV written");
        Ok(records.len())
    }
}

/// Render a header row plus one row per record, CRLF-terminated.
pub fn render(records: &[TimestampedRecord]) -> String {
    let mut out = String::new();

    let header: Vec<String> = HEADER.iter().map(|h| quote(h)).collect();
    let _ = write!(out, "{}\r\n", header.join(","));

    for record in records {
        let _ = write!(
            out,
            "{},{},{},{:?}\r\n",
            quote(&record.wearer_name),
            quote(record.device_id.as_str()),
            quote(&record.formatted_timestamp()),
            record.temperature_celsius
        );
    }

    out
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
