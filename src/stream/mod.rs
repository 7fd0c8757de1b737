//! Streaming side of the decoder: the per-request session state machine, the
//! liveness monitor, and the async [`StreamDecoder`] that ties them to a
//! timer and an ordered fragment channel.

pub mod decoder;
pub mod liveness;
pub mod session;

pub use decoder::{FragmentStream, RequestMeta, StreamDecoder};
pub use liveness::{LivenessMonitor, StallStage, StallVerdict};
pub use session::{DecodeEvent, DecodeSession, FinishReason, Outcome, SessionState};

/// Carries an incomplete trailing UTF-8 sequence from one delivery to the next.
#[derive(Debug, Default)]
pub(crate) struct Utf8Carry {
    remainder: Vec<u8>,
}

impl Utf8Carry {
    /// Append the decodable prefix of `remainder + bytes` to `out`; keep a
    /// trailing partial character for the next call. Invalid sequences are
    /// replaced with U+FFFD.
    pub(crate) fn decode_into(&mut self, bytes: &[u8], out: &mut String) {
        if self.remainder.is_empty() {
            self.decode_slice(bytes, out);
        } else {
            let mut joined = std::mem::take(&mut self.remainder);
            joined.extend_from_slice(bytes);
            self.decode_slice(&joined, out);
        }
    }

    /// End of input: whatever is still carried is decoded lossily.
    pub(crate) fn flush_into(&mut self, out: &mut String) {
        if !self.remainder.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.remainder));
            self.remainder.clear();
        }
    }

    fn decode_slice(&mut self, mut bytes: &[u8], out: &mut String) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[invalid..];
                        }
                        None => {
                            self.remainder.extend_from_slice(rest);
                            return;
                        }
                    }
                }
            }
        }
    }
}
