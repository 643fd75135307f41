mod codec;
mod frame;

pub use codec::decode_temperature;
pub use frame::{FrameResult, decode_frame};

// Values below must match the TM2101-SR firmware exactly.

/// GATT service exposed by the sensor.
pub const SERVICE_UUID: &str = "61830845-385d-41e8-9ee5-a30b150b49e9";
/// Characteristic commands are written to.
pub const COMMAND_CHARACTERISTIC_UUID: &str = "804cdb50-bac9-448b-8ae2-41e9750ef93a";
/// Characteristic the sample stream is indicated on.
pub const NOTIFY_CHARACTERISTIC_UUID: &str = "169bb1bb-ae80-4650-bf4b-afb79f38422a";

/// Advertised local name prefix of supported sensors.
pub const DEVICE_NAME_PREFIX: &str = "TM2101-SR";

/// Command requesting a dump of all stored samples.
pub const GET_DATA_COMMAND: &str = "GETDATA";
/// Every command is terminated by a single line feed.
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// Prefix of the frame that ends a data dump.
pub const COMPLETION_MARKER: [u8; 2] = *b"EN";

/// Bytes per sample: interval followed by temperature.
pub const SAMPLE_SIZE: usize = 2;

pub const BASE_TEMPERATURE_CELSIUS: f64 = 25.0;
pub const CELSIUS_PER_LSB: f64 = 0.0625;

/// Encode a command as written to the command characteristic.
pub fn command_payload(command: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(command.len() + 1);
    payload.extend_from_slice(command.as_bytes());
    payload.push(COMMAND_TERMINATOR);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_data_payload_is_line_terminated() {
        assert_eq!(command_payload(GET_DATA_COMMAND), b"GETDATA\n");
    }
}
