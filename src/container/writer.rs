//! Assembles a container from its segments

use crate::container::signature;
use crate::error::Result;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Write a container: stub, then store, then the signature over both.
///
/// The destination is written in place with no recovery on failure; the
/// archive manager commits through a temporary file and renames, so a failed
/// write never reaches the real destination.
pub fn write<F, S, D>(out: &mut F, stub: &mut S, store: &mut D) -> Result<()>
where
    F: Read + Write + Seek,
    S: Read,
    D: Read,
{
    io::copy(stub, out)?;
    io::copy(store, out)?;

    let signature = signature::digest(out, false)?;

    out.seek(SeekFrom::End(0))?;
    out.write_all(&signature)?;
    out.flush()?;

    Ok(())
}
