//! Container integrity signature
//!
//! A streaming SHA-1 digest over the stub and store segments. Verifying an
//! already-signed container digests everything except its own trailing
//! signature bytes.

use crate::container::SIGNATURE_LEN;
use crate::error::Result;
use sha1::{Digest, Sha1};
use std::io::{Read, Seek, SeekFrom};

const CHUNK: usize = 64 * 1024;

/// Compute the 20-byte signature for a container stream.
///
/// With `exclude_trailing` set, only `[0, len - 20)` is digested so an
/// existing signature does not feed back into its own recomputation.
pub fn digest<F: Read + Seek>(file: &mut F, exclude_trailing: bool) -> Result<[u8; 20]> {
    let len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    let mut remaining = if exclude_trailing {
        len.saturating_sub(SIGNATURE_LEN)
    } else {
        len
    };

    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; CHUNK];

    while remaining > 0 {
        let want = remaining.min(CHUNK as u64) as usize;
        let read = file.read(&mut buffer[..want])?;

        if read == 0 {
            break;
        }

        hasher.update(&buffer[..read]);
        remaining -= read as u64;
    }

    let mut signature = [0u8; 20];
    signature.copy_from_slice(&hasher.finalize());

    Ok(signature)
}
