// Payload Compression
// Threshold-driven gzip for serialized cache values

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

use crate::utils::error::{CacheError, Result};

/// Size-aware gzip codec for cached payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    /// Compression enabled
    pub enabled: bool,
    /// Payloads at or above this many bytes are compressed
    pub threshold: usize,
    /// Gzip level (0-9)
    pub level: u32,
}

/// Encoded payload ready for the envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    pub original_size: usize,
}

impl PayloadCodec {
    pub fn new(enabled: bool, threshold: usize) -> Self {
        Self {
            enabled,
            threshold,
            level: 6,
        }
    }

    /// Whether a payload of `size` bytes should be compressed
    pub fn should_compress(&self, size: usize, requested: Option<bool>) -> bool {
        self.enabled && requested != Some(false) && size >= self.threshold
    }

    /// Compress `raw` when it qualifies. Falls back to the raw bytes if gzip fails.
    pub fn encode(&self, raw: Vec<u8>, requested: Option<bool>) -> EncodedPayload {
        let original_size = raw.len();
        if !self.should_compress(original_size, requested) {
            return EncodedPayload {
                bytes: raw,
                compressed: false,
                original_size,
            };
        }

        match gzip(&raw, self.level) {
            Ok(bytes) => EncodedPayload {
                bytes,
                compressed: true,
                original_size,
            },
            Err(e) => {
                tracing::warn!("Compression failed, storing uncompressed: {}", e);
                EncodedPayload {
                    bytes: raw,
                    compressed: false,
                    original_size,
                }
            }
        }
    }

    /// Inverse of [`encode`](Self::encode), dispatching on the envelope flag
    pub fn decode(&self, bytes: &[u8], compressed: bool) -> Result<Vec<u8>> {
        if compressed {
            gunzip(bytes)
        } else {
            Ok(bytes.to_vec())
        }
    }
}

fn gzip(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| CacheError::compression(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CacheError::compression(format!("Compression finalization failed: {}", e)))
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| CacheError::compression(format!("Decompression failed: {}", e)))?;
    Ok(decompressed)
}
