//! Streaming CRC32C Verification
//!
//! Objects are verified end-to-end against the server-advertised CRC32C
//! (Castagnoli) tag while they are streamed to disk. The server encodes the
//! checksum as base64 over the big-endian byte order of the 32-bit value;
//! some encoders append NUL padding, which is trimmed before comparison.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Incremental CRC32C accumulator over streamed chunks
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32cAccumulator {
    state: u32,
}

impl Crc32cAccumulator {
    pub fn new() -> Self {
        Crc32cAccumulator { state: 0 }
    }

    /// Fold another chunk into the running checksum
    pub fn update(&mut self, chunk: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, chunk);
    }

    /// The checksum over everything fed so far
    pub fn value(&self) -> u32 {
        self.state
    }

    /// Check the accumulated value against a server-supplied tag
    pub fn matches(&self, server_tag: &str) -> bool {
        matches_server_tag(self.state, server_tag)
    }
}

/// Decode a server checksum tag to its 4 raw bytes.
///
/// Trailing NUL bytes are trimmed before the length check; anything that
/// does not decode to exactly 4 non-padding bytes is rejected.
pub fn decode_server_tag(tag: &str) -> Option<[u8; 4]> {
    let mut decoded = BASE64.decode(tag).ok()?;
    while decoded.last() == Some(&0) {
        decoded.pop();
    }
    if decoded.len() != 4 {
        return None;
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&decoded);
    Some(bytes)
}

/// True iff `tag` matches `crc`. The decoded tag carries the checksum
/// big-endian; the comparison is bit-exact with the upstream producer.
pub fn matches_server_tag(crc: u32, tag: &str) -> bool {
    decode_server_tag(tag) == Some(crc.to_be_bytes())
}

/// Encode a checksum the way the server advertises it
pub fn encode_server_tag(crc: u32) -> String {
    BASE64.encode(crc.to_be_bytes())
}
