//! Console rendering for scan results and acquisitions.

use std::fmt::Write;

use halshare_core::{Sample, SampleStats, TimestampedRecord};

use crate::transport::DiscoveredDevice;

const RULE_WIDTH: usize = 70;

fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

/// Numbered list of scanned sensors.
pub fn render_devices(devices: &[DiscoveredDevice]) -> String {
    let mut out = String::new();
    for (i, device) in devices.iter().enumerate() {
        let name = device.name.as_deref().unwrap_or("(unknown)");
        let _ = writeln!(out, "[{}] Name: {name}", i + 1);
        let _ = writeln!(out, "    Address: {}", device.address);
        match device.rssi {
            Some(rssi) => {
                let _ = writeln!(out, "    RSSI: {rssi} dBm");
            }
            None => {
                let _ = writeln!(out, "    RSSI: n/a");
            }
        }
        let _ = writeln!(out, "{}", rule());
    }
    out
}

/// One line per decoded sample, in arrival order.
pub fn render_samples(samples: &[Sample]) -> String {
    let mut out = String::new();
    for (i, sample) in samples.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:3}. Temperature: {:6.2}°C (interval: {:3} min, raw: 0x{:02x})",
            i + 1,
            sample.temperature_celsius,
            sample.interval_minutes,
            sample.raw_temperature_byte
        );
    }
    out
}

pub fn render_stats(stats: &SampleStats) -> String {
    format!(
        "{}\nMean: {:.2}°C\nMax:  {:.2}°C\nMin:  {:.2}°C\n",
        rule(),
        stats.mean,
        stats.max,
        stats.min
    )
}

/// First `rows` records as they will appear in the export.
pub fn render_preview(records: &[TimestampedRecord], rows: usize) -> String {
    let mut out = String::new();
    for record in records.iter().take(rows) {
        let _ = writeln!(
            out,
            "{}, {}, {}, {:?}",
            record.wearer_name,
            record.device_id,
            record.formatted_timestamp(),
            record.temperature_celsius
        );
    }
    if records.len() > rows {
        let _ = writeln!(out, "... ({} more)", records.len() - rows);
    }
    out
}
