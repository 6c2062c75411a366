//! On-disk encoding for patch artifacts
//!
//! Signatures (`.sig`) and deltas (`.delta`) are serialised with bincode and
//! framed so that a file found in a slot identifies itself.
//!
//! ## Format
//!
//! ```text
//! +-------+------+-----------------------------+
//! | magic | flag | payload                     |
//! | 4 B   | 1 B  | bincode, LZ4 or raw         |
//! +-------+------+-----------------------------+
//! ```
//!
//! - magic `CVS1`: a [`Signature`] follows
//! - magic `CVD1`: a [`Delta`] follows
//! - flag `0`: payload is raw bincode
//! - flag `1`: payload is LZ4 (size-prepended) compressed bincode
//!
//! ## Examples
//!
//! ```rust
//! use chronovault::compression::{ArtifactCodec, CompressionStrategy};
//! use chronovault::delta::build_signature;
//! use std::path::Path;
//!
//! let codec = ArtifactCodec::new(CompressionStrategy::Fast);
//! let signature = build_signature(&b"hello world".repeat(500));
//!
//! let bytes = codec.encode_signature(&signature).unwrap();
//! assert!(bytes.starts_with(b"CVS1"));
//!
//! let decoded = codec.decode_signature(&bytes, Path::new("notes.txt.sig")).unwrap();
//! assert_eq!(decoded, signature);
//! ```

use crate::delta::{Delta, Signature};
use crate::error::{ChronoError, Result};
use crate::utils;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::trace;

/// Magic bytes identifying a signature artifact
pub const SIGNATURE_MAGIC: &[u8; 4] = b"CVS1";
/// Magic bytes identifying a delta artifact
pub const DELTA_MAGIC: &[u8; 4] = b"CVD1";

const FLAG_RAW: u8 = 0;
const FLAG_LZ4: u8 = 1;
const HEADER_LEN: usize = 5;

/// When artifact payloads get compressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Always store raw bincode
    None,
    /// LZ4 when the payload is large enough and compression actually helps
    #[default]
    Fast,
}

/// Encoder/decoder for `.sig` and `.delta` files
///
/// The codec is stateless and `Copy`, so worker threads each hold their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactCodec {
    strategy: CompressionStrategy,
}

impl ArtifactCodec {
    /// Payloads below this size are never compressed
    pub const MIN_COMPRESS_LEN: usize = 64;

    /// Create a codec with the given strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self { strategy }
    }

    /// Strategy in use
    pub fn strategy(&self) -> CompressionStrategy {
        self.strategy
    }

    /// Encode a signature
    pub fn encode_signature(&self, signature: &Signature) -> Result<Vec<u8>> {
        self.encode(SIGNATURE_MAGIC, signature)
    }

    /// Decode a signature; `path` is used for error reporting only
    pub fn decode_signature(&self, bytes: &[u8], path: &Path) -> Result<Signature> {
        self.decode(SIGNATURE_MAGIC, bytes, path)
    }

    /// Encode a delta
    pub fn encode_delta(&self, delta: &Delta) -> Result<Vec<u8>> {
        self.encode(DELTA_MAGIC, delta)
    }

    /// Decode a delta; `path` is used for error reporting only
    pub fn decode_delta(&self, bytes: &[u8], path: &Path) -> Result<Delta> {
        self.decode(DELTA_MAGIC, bytes, path)
    }

    /// Atomically write a signature file, returning the bytes written
    pub fn write_signature(&self, path: &Path, signature: &Signature) -> Result<u64> {
        let bytes = self.encode_signature(signature)?;
        utils::atomic_write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Read and decode a signature file
    pub fn read_signature(&self, path: &Path) -> Result<Signature> {
        let bytes = fs::read(path)?;
        self.decode_signature(&bytes, path)
    }

    /// Atomically write a delta file, returning the bytes written
    pub fn write_delta(&self, path: &Path, delta: &Delta) -> Result<u64> {
        let bytes = self.encode_delta(delta)?;
        utils::atomic_write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Read and decode a delta file
    pub fn read_delta(&self, path: &Path) -> Result<Delta> {
        let bytes = fs::read(path)?;
        self.decode_delta(&bytes, path)
    }

    fn encode<T: Serialize>(&self, magic: &[u8; 4], value: &T) -> Result<Vec<u8>> {
        let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())?;

        let (flag, body) = match self.strategy {
            CompressionStrategy::Fast if payload.len() >= Self::MIN_COMPRESS_LEN => {
                let compressed = compress_prepend_size(&payload);
                if compressed.len() < payload.len() {
                    trace!(
                        "Compressed artifact payload: {} -> {} bytes",
                        payload.len(),
                        compressed.len()
                    );
                    (FLAG_LZ4, compressed)
                } else {
                    (FLAG_RAW, payload)
                }
            }
            _ => (FLAG_RAW, payload),
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(magic);
        out.push(flag);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode<T: DeserializeOwned>(&self, magic: &[u8; 4], bytes: &[u8], path: &Path) -> Result<T> {
        if bytes.len() < HEADER_LEN {
            return Err(ChronoError::corrupt(path, "artifact too short"));
        }
        if &bytes[..4] != magic {
            return Err(ChronoError::corrupt(
                path,
                format!(
                    "unexpected magic {:?}, expected {:?}",
                    String::from_utf8_lossy(&bytes[..4]),
                    String::from_utf8_lossy(magic)
                ),
            ));
        }

        let body = &bytes[HEADER_LEN..];
        let payload = match bytes[4] {
            FLAG_RAW => body.to_vec(),
            FLAG_LZ4 => {
                // LZ4 cannot expand a block by more than 255x
                let declared = body
                    .get(..4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
                    .unwrap_or(0);
                if declared > body.len().saturating_mul(255) {
                    return Err(ChronoError::corrupt(
                        path,
                        format!("implausible decompressed size {}", declared),
                    ));
                }
                decompress_size_prepended(body).map_err(|e| {
                    ChronoError::corrupt(path, format!("LZ4 decompression failed: {}", e))
                })?
            }
            other => {
                return Err(ChronoError::corrupt(
                    path,
                    format!("unknown payload flag {}", other),
                ))
            }
        };

        let (value, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())
            .map_err(|e| ChronoError::corrupt(path, format!("undecodable payload: {}", e)))?;
        Ok(value)
    }
}
