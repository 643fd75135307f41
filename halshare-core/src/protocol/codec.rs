use super::{BASE_TEMPERATURE_CELSIUS, CELSIUS_PER_LSB};

/// Decode one temperature byte into degrees Celsius.
///
/// The byte is an unsigned count of 1/16 °C steps above 25 °C, so the full
/// domain maps onto 25.0..=40.9375.
pub fn decode_temperature(raw: u8) -> f64 {
    f64::from(raw) * CELSIUS_PER_LSB + BASE_TEMPERATURE_CELSIUS
}
