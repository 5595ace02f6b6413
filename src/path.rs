//! Path managers and container path rules
//!
//! A [`PathManager`] is the capability a record is written from: something
//! that can report a kind, timestamps, permissions, and contents. The store
//! returns owned [`Memory`] views on read, so no variant shares state with
//! another.

use crate::error::Result;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of a stored path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PathKind {
    /// Regular file
    File = 0,
    /// Directory
    Directory = 1,
}

impl PathKind {
    /// Convert from the stored byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PathKind::File),
            1 => Some(PathKind::Directory),
            _ => None,
        }
    }
}

/// Capability over a file or directory that can be stored as a record
pub trait PathManager {
    /// Kind of the path
    fn kind(&self) -> PathKind;

    /// Last modified time, unix seconds
    fn modified(&self) -> u64;

    /// Unix mode bits
    fn permissions(&self) -> u32;

    /// File contents; `None` for directories
    fn contents(&self) -> Result<Option<Vec<u8>>>;
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Path manager holding its data in memory
#[derive(Debug, Clone)]
pub struct Memory {
    contents: Option<Vec<u8>>,
    kind: PathKind,
    modified: u64,
    permissions: u32,
}

impl Memory {
    pub fn new(contents: Option<Vec<u8>>, kind: PathKind, modified: u64, permissions: u32) -> Self {
        Memory {
            contents,
            kind,
            modified,
            permissions,
        }
    }

    /// In-memory file with the current time and `0o644` permissions
    pub fn file(contents: impl Into<Vec<u8>>) -> Self {
        Memory::new(Some(contents.into()), PathKind::File, unix_now(), 0o644)
    }

    /// In-memory directory with the current time and `0o755` permissions
    pub fn directory() -> Self {
        Memory::new(None, PathKind::Directory, unix_now(), 0o755)
    }

    pub fn with_modified(mut self, modified: u64) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }
}

impl PathManager for Memory {
    fn kind(&self) -> PathKind {
        self.kind
    }

    fn modified(&self) -> u64 {
        self.modified
    }

    fn permissions(&self) -> u32 {
        self.permissions
    }

    fn contents(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.contents.clone())
    }
}

/// Path manager backed by a file or directory on disk
///
/// Metadata is captured when the manager is opened; contents are read on
/// demand so large trees can be walked without holding every file in memory.
#[derive(Debug, Clone)]
pub struct Local {
    path: PathBuf,
    kind: PathKind,
    modified: u64,
    permissions: u32,
}

impl Local {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path)?;

        let kind = if metadata.is_dir() {
            PathKind::Directory
        } else {
            PathKind::File
        };

        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };
        #[cfg(not(unix))]
        let permissions = match kind {
            PathKind::File => 0o644,
            PathKind::Directory => 0o755,
        };

        Ok(Local {
            path,
            kind,
            modified,
            permissions,
        })
    }
}

impl PathManager for Local {
    fn kind(&self) -> PathKind {
        self.kind
    }

    fn modified(&self) -> u64 {
        self.modified
    }

    fn permissions(&self) -> u32 {
        self.permissions
    }

    fn contents(&self) -> Result<Option<Vec<u8>>> {
        match self.kind {
            PathKind::Directory => Ok(None),
            PathKind::File => Ok(Some(fs::read(&self.path)?)),
        }
    }
}

/// Write a path manager's view out to `target`: directories are created
/// recursively, files get their parent directories plus decompressed
/// contents, and both receive the stored permissions and modified time.
pub(crate) fn materialize(target: &std::path::Path, manager: &dyn PathManager) -> Result<()> {
    match manager.kind() {
        PathKind::Directory => {
            fs::create_dir_all(target)?;
        }
        PathKind::File => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(target, manager.contents()?.unwrap_or_default())?;
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, fs::Permissions::from_mode(manager.permissions()))?;
    }

    filetime::set_file_mtime(
        target,
        filetime::FileTime::from_unix_time(manager.modified() as i64, 0),
    )?;

    Ok(())
}

/// Normalize a path for storage inside a container.
///
/// Backslashes become forward slashes, the leading slash is stripped, `.`
/// segments are removed, and a `..` removes itself along with the segment at
/// the immediately preceding position when one is still present. Segments
/// can never escape above the root.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches('/');

    let mut segments: Vec<Option<&str>> = path.split('/').map(Some).collect();

    for i in 0..segments.len() {
        match segments[i] {
            Some("..") => {
                segments[i] = None;

                if i > 0 {
                    segments[i - 1] = None;
                }
            }
            Some(".") => segments[i] = None,
            _ => {}
        }
    }

    segments.into_iter().flatten().collect::<Vec<_>>().join("/")
}
