//! Payload compression selected by an envelope's `compressor_id`.
//!
//! Only the argument/result payload is compressed; envelope headers and the
//! service/method names always travel as-is.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Result, RpcError};

/// Wire id of [`Compression::None`].
pub const NO_COMPRESSION_ID: u8 = 0;

/// Wire id of [`Compression::Gzip`].
pub const GZIP_COMPRESSION_ID: u8 = 1;

/// Compressor applied to envelope payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Payload is sent verbatim.
    #[default]
    None,
    /// Gzip via `flate2`.
    Gzip,
}

impl Compression {
    /// Resolve a compressor from its wire id.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            NO_COMPRESSION_ID => Ok(Compression::None),
            GZIP_COMPRESSION_ID => Ok(Compression::Gzip),
            other => Err(RpcError::UnknownCompressor(other)),
        }
    }

    /// Wire id stamped into envelopes.
    #[inline]
    pub fn id(self) -> u8 {
        match self {
            Compression::None => NO_COMPRESSION_ID,
            Compression::Gzip => GZIP_COMPRESSION_ID,
        }
    }

    /// Compress a payload. Empty payloads stay empty.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| RpcError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| RpcError::Compression(e.to_string()))
            }
        }
    }

    /// Decompress a payload produced by [`Compression::compress`].
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| RpcError::Compression(e.to_string()))?;
                Ok(out)
            }
        }
    }
}
