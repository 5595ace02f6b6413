//! Per-record compression for file contents
//!
//! Each record stamps the mode it was written with, so reads dispatch on the
//! stored value rather than on whatever mode happens to be active.

use crate::error::{CapsuleError, Result};
use std::io::{Read, Write};

/// Compression mode for record contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    /// No compression
    #[default]
    None = 0,
    /// gzip
    Gzip = 1,
    /// bzip2
    Bzip2 = 2,
}

impl Compression {
    /// Convert from the stored byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Bzip2),
            _ => None,
        }
    }
}

/// Compress contents using the specified mode
pub fn compress(data: &[u8], mode: Compression) -> Result<Vec<u8>> {
    match mode {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Decompress contents using the specified mode
pub fn decompress(data: &[u8], mode: Compression) -> Result<Vec<u8>> {
    match mode {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut contents = Vec::new();
            decoder.read_to_end(&mut contents).map_err(|error| {
                CapsuleError::Validation(format!("the contents could not be decompressed: {error}"))
            })?;
            Ok(contents)
        }
        Compression::Bzip2 => {
            let mut decoder = bzip2::read::BzDecoder::new(data);
            let mut contents = Vec::new();
            decoder.read_to_end(&mut contents).map_err(|error| {
                CapsuleError::Validation(format!("the contents could not be decompressed: {error}"))
            })?;
            Ok(contents)
        }
    }
}
