//! Bootstrap stub contract and run-time self-extraction protocol
//!
//! The stub is the executable text at the head of a container. Its contract:
//! begin with the marker token (optionally after a single shebang line) and
//! end with the sentinel terminator literal that delimits the stub from the
//! store segment. The default stub hands off to `capsule run`, which drives
//! [`Bootstrap`]: verify the trailing signature, extract the store into a
//! signature-keyed cache directory, and report the primary path if the
//! extracted tree has one.

use crate::container::{signature, PathStore, Reader, SIGNATURE_LEN};
use crate::error::{CapsuleError, Result};
use crate::path;
use regex::Regex;
use std::env;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Marker token the stub must begin with
pub const MARKER: &str = "# capsule-bootstrap";

/// Sentinel terminator literal the stub must end with
pub const SENTINEL: &str = "__CAPSULE_HALT__";

/// Well-known entry-point path inside the extracted tree
pub const PRIMARY: &str = ".capsule/primary";

/// Environment variable selecting the cache root directory
pub const TEMP_ENV: &str = "CAPSULE_TEMP";

/// Name of the store database inside a cache directory
pub const CACHE_DB: &str = "capsule.db";

const DEFAULT_STUB_BODY: &str = "\
# capsule-bootstrap
exec capsule run \"$0\" \"$@\"
__CAPSULE_HALT__";

/// Build a bootstrap stub, with `#!/bin/sh` or the given shebang line
pub fn create_stub(shebang: Option<&str>) -> String {
    let shebang = shebang.unwrap_or("#!/bin/sh");

    format!("{}\n{DEFAULT_STUB_BODY}", shebang.trim())
}

/// Validate the stub text contract
pub fn validate_stub(script: &str) -> Result<()> {
    static MARKER_PATTERN: OnceLock<Regex> = OnceLock::new();

    let pattern = MARKER_PATTERN.get_or_init(|| {
        Regex::new(&format!(r"^(?:#![^\n\r]+[\n\r]+)?{MARKER}")).expect("marker pattern")
    });

    if !pattern.is_match(script) {
        return Err(CapsuleError::Validation(format!(
            "the bootstrap stub does not begin with \"{MARKER}\""
        )));
    }

    if !script.ends_with(SENTINEL) {
        return Err(CapsuleError::Validation(format!(
            "the bootstrap stub does not end with \"{SENTINEL}\""
        )));
    }

    Ok(())
}

/// Run-time side of the self-extraction protocol
pub struct Bootstrap {
    container: PathBuf,
    cache_root: PathBuf,
}

impl Bootstrap {
    /// Bootstrap for a container, caching under `$CAPSULE_TEMP` or the
    /// platform temp directory
    pub fn new(container: impl Into<PathBuf>) -> Self {
        let cache_root = env::var_os(TEMP_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        Bootstrap {
            container: container.into(),
            cache_root,
        }
    }

    /// Override the cache root directory
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    /// The cache directory this container extracts into, derived from the
    /// hex-encoded trailing signature
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let signature = self.stored_signature()?;

        Ok(self.cache_root.join(hex::encode(signature)))
    }

    /// Verify the container, populate the cache if it is not already
    /// present, and return the primary path when the extracted tree has one.
    ///
    /// Re-running against an unchanged container reuses the existing cache
    /// without extracting again.
    pub fn run(&self) -> Result<Option<PathBuf>> {
        let stored = self.stored_signature()?;

        let mut file = File::open(&self.container)?;
        let computed = signature::digest(&mut file, true)?;

        if stored != computed {
            return Err(CapsuleError::Integrity);
        }

        let cache = self.cache_root.join(hex::encode(stored));
        let files_root = cache.join("files");

        if cache.is_dir() {
            debug!(cache = %cache.display(), "reusing existing cache");
        } else {
            self.extract(&cache, &files_root)?;
        }

        let primary = files_root.join(PRIMARY);

        Ok(primary.is_file().then_some(primary))
    }

    fn extract(&self, cache: &Path, files_root: &Path) -> Result<()> {
        fs::create_dir_all(cache)?;

        let database = cache.join(CACHE_DB);
        let mut reader = Reader::new(File::open(&self.container)?)?;

        let mut out = File::create(&database)?;
        reader.store_into(&mut out)?;
        out.sync_all()?;
        drop(out);

        let store = PathStore::open(&database)?;

        for item in store.paths() {
            let (record_path, manager) = item?;
            path::materialize(&files_root.join(&record_path), &manager)?;
        }

        info!(
            container = %self.container.display(),
            cache = %cache.display(),
            "extracted container cache"
        );

        Ok(())
    }

    fn stored_signature(&self) -> Result<[u8; 20]> {
        let mut file = File::open(&self.container)?;
        let len = file.metadata()?.len();

        if len < SIGNATURE_LEN {
            return Err(CapsuleError::Integrity);
        }

        file.seek(SeekFrom::End(-(SIGNATURE_LEN as i64)))?;

        let mut signature = [0u8; 20];
        file.read_exact(&mut signature)?;

        Ok(signature)
    }
}
