use super::{COMPLETION_MARKER, SAMPLE_SIZE};
use crate::Sample;

/// Classification of a single notification frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameResult {
    /// End of the data dump. Remaining bytes are not interpreted.
    Completion,
    /// One sample per `(interval, temperature)` byte pair, in frame order.
    Samples(Vec<Sample>),
    /// Neither the marker nor a whole number of samples.
    Ignored,
}

/// Split a notification frame into samples or recognize the end marker.
///
/// The marker check runs first: an `EN` frame of even length would otherwise
/// decode as a bogus sample.
pub fn decode_frame(frame: &[u8]) -> FrameResult {
    if frame.starts_with(&COMPLETION_MARKER) {
        return FrameResult::Completion;
    }

    if frame.is_empty() || frame.len() % SAMPLE_SIZE != 0 {
        return FrameResult::Ignored;
    }

    let samples = frame
        .chunks_exact(SAMPLE_SIZE)
        .map(|pair| Sample::from_pair(pair[0], pair[1]))
        .collect();

    FrameResult::Samples(samples)
}
