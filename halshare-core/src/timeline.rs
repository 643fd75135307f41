use jiff::{SignedDuration, Zoned};
use thiserror::Error;

use crate::{RecordSource, Sample, TimestampedRecord};

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("reconstructed timestamp out of range: {0}")]
    OutOfRange(#[from] jiff::Error),
}

/// Place buffered samples on the absolute timeline.
///
/// Samples arrive oldest first and the newest one is taken to have been
/// recorded at `completed_at`. Each sample's interval is the number of
/// minutes since the sample before it, so timestamps are assigned walking
/// backwards from the completion time. The result is in chronological order.
///
/// An empty buffer or a missing completion time yields no records.
pub fn reconstruct(
    samples: &[Sample],
    completed_at: Option<&Zoned>,
    source: &RecordSource,
) -> Result<Vec<TimestampedRecord>, TimelineError> {
    let Some(completed_at) = completed_at else {
        return Ok(Vec::new());
    };

    let mut records = Vec::with_capacity(samples.len());
    let mut current = completed_at.clone();

    for (index, sample) in samples.iter().enumerate().rev() {
        records.push(TimestampedRecord {
            wearer_name: source.wearer_name.clone(),
            device_id: source.device_id.clone(),
            timestamp: current.clone(),
            temperature_celsius: sample.temperature_celsius,
        });

        // The oldest sample has nothing before it to offset.
        if index > 0 {
            let interval = SignedDuration::from_mins(i64::from(sample.interval_minutes));
            current = current.checked_sub(interval)?;
        }
    }

    records.reverse();
    Ok(records)
}
