//! Splits an assembled container back into its segments

use crate::bootstrap::SENTINEL;
use crate::container::SIGNATURE_LEN;
use crate::error::{CapsuleError, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

const CHUNK: usize = 64 * 1024;

/// Reads the segments of an existing container
pub struct Reader {
    file: File,
    len: u64,
    // Located by sentinel scan on first use, cached for the Reader's lifetime.
    stub_len: Option<u64>,
}

impl Reader {
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();

        Ok(Reader {
            file,
            len,
            stub_len: None,
        })
    }

    /// The stub segment as text
    pub fn stub(&mut self) -> Result<String> {
        let stub_len = self.stub_len()?;

        self.file.seek(SeekFrom::Start(0))?;

        let mut bytes = vec![0u8; stub_len as usize];
        self.file.read_exact(&mut bytes)?;

        String::from_utf8(bytes)
            .map_err(|_| CapsuleError::Validation("the stub is not valid UTF-8".to_string()))
    }

    /// Copy the store segment into `out`
    pub fn store_into<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let stub_len = self.stub_len()?;
        let store_len = self
            .len
            .saturating_sub(SIGNATURE_LEN)
            .saturating_sub(stub_len);

        self.file.seek(SeekFrom::Start(stub_len))?;
        io::copy(&mut (&mut self.file).take(store_len), out)?;

        Ok(())
    }

    /// The trailing 20-byte signature
    pub fn signature(&mut self) -> Result<[u8; 20]> {
        if self.len < SIGNATURE_LEN {
            return Err(CapsuleError::Validation(
                "the container is too short to carry a signature".to_string(),
            ));
        }

        self.file.seek(SeekFrom::End(-(SIGNATURE_LEN as i64)))?;

        let mut signature = [0u8; 20];
        self.file.read_exact(&mut signature)?;

        Ok(signature)
    }

    /// Size of the stub segment, located by scanning for the sentinel
    /// terminator. The stub carries no length header, so the boundary is the
    /// end of the first sentinel occurrence. Scanned once, then cached.
    pub fn stub_len(&mut self) -> Result<u64> {
        if let Some(len) = self.stub_len {
            return Ok(len);
        }

        let sentinel = SENTINEL.as_bytes();
        self.file.seek(SeekFrom::Start(0))?;

        let mut consumed: u64 = 0;
        let mut carry: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; CHUNK];

        loop {
            let read = self.file.read(&mut chunk)?;

            if read == 0 {
                return Err(CapsuleError::Validation(format!(
                    "\"{SENTINEL}\" is missing from the bootstrap stub"
                )));
            }

            let mut window = carry.clone();
            window.extend_from_slice(&chunk[..read]);

            if let Some(at) = find(&window, sentinel) {
                let end = consumed - carry.len() as u64 + (at + sentinel.len()) as u64;
                self.stub_len = Some(end);

                return Ok(end);
            }

            consumed += read as u64;
            let keep = window.len().min(sentinel.len() - 1);
            carry = window[window.len() - keep..].to_vec();
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn container(stub: &str, store: &[u8], signature: &[u8; 20]) -> File {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(stub.as_bytes()).unwrap();
        file.write_all(store).unwrap();
        file.write_all(signature).unwrap();
        file.as_file_mut().sync_all().unwrap();

        file.reopen().unwrap()
    }

    #[test]
    fn splits_the_segments() {
        let stub = format!("#!/bin/sh\nstub body\n{SENTINEL}");
        let file = container(&stub, b"store bytes", &[7u8; 20]);
        let mut reader = Reader::new(file).unwrap();

        assert_eq!(reader.stub().unwrap(), stub);

        let mut store = Vec::new();
        reader.store_into(&mut store).unwrap();
        assert_eq!(store, b"store bytes");

        assert_eq!(reader.signature().unwrap(), [7u8; 20]);
    }

    #[test]
    fn stub_len_is_cached() {
        let stub = format!("x{SENTINEL}");
        let file = container(&stub, b"", &[0u8; 20]);
        let mut reader = Reader::new(file).unwrap();

        assert_eq!(reader.stub_len().unwrap(), stub.len() as u64);
        assert_eq!(reader.stub_len().unwrap(), stub.len() as u64);
    }

    #[test]
    fn sentinel_across_chunk_boundaries() {
        // Pad the stub so the sentinel straddles the 64 KiB read boundary.
        let mut stub = "#".repeat(CHUNK - 5);
        stub.push_str(SENTINEL);

        let file = container(&stub, b"store", &[1u8; 20]);
        let mut reader = Reader::new(file).unwrap();

        assert_eq!(reader.stub_len().unwrap(), stub.len() as u64);
    }

    #[test]
    fn missing_sentinel_is_a_format_error() {
        let file = container("no terminator here", b"", &[0u8; 20]);
        let mut reader = Reader::new(file).unwrap();

        assert!(matches!(
            reader.stub_len(),
            Err(CapsuleError::Validation(_))
        ));
    }
}
