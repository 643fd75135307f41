pub mod protocol;
pub mod timeline;

use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

pub use protocol::{FrameResult, decode_frame, decode_temperature};
pub use timeline::{TimelineError, reconstruct};

type BoxStr = Box<str>;

/// Rendering used for record timestamps in exports and previews.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Platform identifier of a wearable sensor.
///
/// A MAC address on Linux and Windows, a CoreBluetooth UUID on macOS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress(pub BoxStr);

impl DeviceAddress {
    pub fn new(address: impl Into<BoxStr>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DeviceAddress {
    /// Exact, case-insensitive comparison against an identifier reported by
    /// the platform. An empty identifier never matches.
    pub fn matches(&self, candidate: &str) -> bool {
        !candidate.is_empty() && self.0.eq_ignore_ascii_case(candidate)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("device address is empty")]
    Empty,
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self::new(trimmed))
    }
}

/// Unique identifier for a single data acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A single stored measurement as streamed by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Minutes elapsed since the previous sample.
    pub interval_minutes: u8,
    /// Decoded skin temperature.
    pub temperature_celsius: f64,
    /// Encoded temperature byte as received.
    pub raw_temperature_byte: u8,
}

impl Sample {
    /// Build a sample from one `(interval, temperature)` byte pair.
    pub fn from_pair(interval_byte: u8, temperature_byte: u8) -> Self {
        Self {
            interval_minutes: interval_byte,
            temperature_celsius: decode_temperature(temperature_byte),
            raw_temperature_byte: temperature_byte,
        }
    }
}

/// Labels stamped on every reconstructed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSource {
    /// Name of the person wearing the sensor.
    pub wearer_name: BoxStr,
    /// Sensor the samples were read from.
    pub device_id: DeviceAddress,
}

/// A sample placed on the absolute timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedRecord {
    pub wearer_name: BoxStr,
    pub device_id: DeviceAddress,
    pub timestamp: jiff::Zoned,
    pub temperature_celsius: f64,
}

impl TimestampedRecord {
    /// Timestamp as `YYYY/MM/DD HH:MM:SS` in the record's own time zone.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.strftime(TIMESTAMP_FORMAT).to_string()
    }
}

/// Summary statistics over decoded temperatures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
    pub min: f64,
}

impl SampleStats {
    /// Returns `None` for an empty sample list.
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        let temperatures = || samples.iter().map(|s| OrderedFloat(s.temperature_celsius));

        let max = temperatures().max()?;
        let min = temperatures().min()?;
        let sum: f64 = samples.iter().map(|s| s.temperature_celsius).sum();

        Some(Self {
            count: samples.len(),
            mean: sum / samples.len() as f64,
            max: max.into_inner(),
            min: min.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_from_pair_decodes_temperature() {
        let sample = Sample::from_pair(5, 0x28);

        assert_eq!(sample.interval_minutes, 5);
        assert_eq!(sample.raw_temperature_byte, 0x28);
        assert_eq!(sample.temperature_celsius, 27.5);
    }

    #[test]
    fn stats_of_empty_list_is_none() {
        assert_eq!(SampleStats::from_samples(&[]), None);
    }

    #[test]
    fn stats_cover_mean_max_min() {
        let samples = [
            Sample::from_pair(1, 0x28), // 27.5
            Sample::from_pair(1, 0x30), // 28.0
            Sample::from_pair(1, 0x20), // 27.0
        ];

        let stats = SampleStats::from_samples(&samples).unwrap();

        assert_eq!(stats.count, 3);
        assert_eq!(stats.max, 28.0);
        assert_eq!(stats.min, 27.0);
        assert_eq!(stats.mean, 27.5);
    }

    #[test]
    fn parsed_address_is_trimmed_and_non_empty() {
        let addr: DeviceAddress = " ED:8D:55:08:F0:95\n".parse().unwrap();
        assert_eq!(addr.as_str(), "ED:8D:55:08:F0:95");

        assert_eq!("".parse::<DeviceAddress>(), Err(AddressError::Empty));
        assert_eq!("   ".parse::<DeviceAddress>(), Err(AddressError::Empty));
    }

    #[test]
    fn address_match_is_exact_and_case_insensitive() {
        let addr = DeviceAddress::new("ed:8d:55:08:f0:95");

        assert!(addr.matches("ED:8D:55:08:F0:95"));
        assert!(!addr.matches("ED:8D:55:08:F0"));
        assert!(!addr.matches("ED:8D:55:08:F0:95:00"));
        assert!(!addr.matches(""));
        assert!(!DeviceAddress::new("").matches(""));
    }

    #[test]
    fn device_address_displays_verbatim() {
        let addr = DeviceAddress::new("ED:8D:55:08:F0:95");
        assert_eq!(addr.to_string(), "ED:8D:55:08:F0:95");
        assert_eq!(addr.as_str(), "ED:8D:55:08:F0:95");
    }
}
