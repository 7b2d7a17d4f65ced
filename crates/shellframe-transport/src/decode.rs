//! Incremental UTF-8 decoding of pipe output

use bytes::{Buf, BytesMut};

/// Turns raw pipe reads into text without splitting multi-byte characters.
///
/// An incomplete trailing sequence is held until the next read. Invalid bytes
/// are replaced.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: BytesMut,
}

impl Utf8Decoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next read
    pub fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);

        let mut text = String::new();
        loop {
            let checked = std::str::from_utf8(&self.pending)
                .map(str::len)
                .map_err(|e| (e.valid_up_to(), e.error_len()));
            let (valid, invalid) = match checked {
                Ok(len) => (len, None),
                Err((valid_up_to, error_len)) => (valid_up_to, error_len),
            };

            let head = self.pending.split_to(valid);
            text.push_str(&String::from_utf8_lossy(&head));

            // Anything left without an invalid sequence is an incomplete tail
            match invalid {
                Some(len) => {
                    self.pending.advance(len);
                    text.push(char::REPLACEMENT_CHARACTER);
                }
                None => return text,
            }
        }
    }

    /// Decode whatever is held, replacing an incomplete sequence
    pub fn flush(&mut self) -> String {
        let rest = self.pending.split();
        String::from_utf8_lossy(&rest).into_owned()
    }

    /// Whether bytes are being held back
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
