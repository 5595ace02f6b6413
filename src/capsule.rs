//! Archive manager for a single container
//!
//! A [`Capsule`] owns a private temporary [`PathStore`] for its whole
//! lifetime and binds it to one destination file. Changes accumulate in the
//! store and only reach the destination at [`Capsule::commit`]. Every
//! mutating operation runs through the before/after event pipeline.

use crate::bootstrap;
use crate::compression::Compression;
use crate::container::{signature, writer, PathStore, Paths, Reader, SIGNATURE_LEN};
use crate::error::{CapsuleError, Result};
use crate::event::{BatchEntry, Commit, Events, Extract, SetBatch, SetBootstrap, SetPath};
use crate::path::{self, Memory, PathManager};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Manages an individual container
pub struct Capsule {
    dest: PathBuf,
    stub: String,
    compression: Compression,
    events: Events,
    // The connection must close before the temporary file is removed.
    store: PathStore,
    store_file: NamedTempFile,
}

impl Capsule {
    /// Create a manager for a new container with the default stub.
    ///
    /// Nothing is written to `dest` until [`Capsule::commit`]; an existing
    /// file at `dest` is replaced on commit.
    pub fn create(dest: impl Into<PathBuf>) -> Result<Self> {
        Self::create_with_stub(dest, bootstrap::create_stub(None))
    }

    /// Create a manager for a new container with the given stub text
    pub fn create_with_stub(dest: impl Into<PathBuf>, stub: impl Into<String>) -> Result<Self> {
        let dest = dest.into();
        let stub = stub.into();

        bootstrap::validate_stub(&stub)?;

        let store_file = NamedTempFile::new()?;
        let store = PathStore::open(store_file.path())?;
        store.create_schema()?;

        info!(dest = %dest.display(), "created container manager");

        Ok(Capsule {
            dest,
            stub,
            compression: Compression::None,
            events: Events::default(),
            store,
            store_file,
        })
    }

    /// Open an existing container.
    ///
    /// The signature is verified before anything is read out; a mismatch
    /// fails with [`CapsuleError::Integrity`].
    pub fn open(dest: impl Into<PathBuf>) -> Result<Self> {
        let dest = dest.into();

        if !Self::is_valid(&dest)? {
            return Err(CapsuleError::Integrity);
        }

        let mut reader = Reader::new(File::open(&dest)?)?;

        let mut store_file = NamedTempFile::new()?;
        reader.store_into(store_file.as_file_mut())?;
        store_file.as_file_mut().sync_all()?;

        let stub = reader.stub()?;
        bootstrap::validate_stub(&stub)?;

        let store = PathStore::open(store_file.path())?;

        info!(dest = %dest.display(), "opened container");

        Ok(Capsule {
            dest,
            stub,
            compression: Compression::None,
            events: Events::default(),
            store,
            store_file,
        })
    }

    /// Check a container's signature without opening it.
    ///
    /// Mismatches and truncated files report `false`; only filesystem
    /// failures surface as errors.
    pub fn is_valid(dest: impl AsRef<Path>) -> Result<bool> {
        let mut file = File::open(dest)?;
        let len = file.metadata()?.len();

        if len < SIGNATURE_LEN {
            return Ok(false);
        }

        let computed = signature::digest(&mut file, true)?;

        file.seek(SeekFrom::End(-(SIGNATURE_LEN as i64)))?;
        let mut stored = [0u8; 20];
        file.read_exact(&mut stored)?;

        Ok(stored == computed)
    }

    /// Hook registration for the interception pipeline
    pub fn events(&mut self) -> &mut Events {
        &mut self.events
    }

    /// Write stub, store, and signature to the destination.
    ///
    /// The container is assembled in a temporary file next to the
    /// destination and renamed over it, so a failed commit leaves any
    /// previous container untouched.
    pub fn commit(&mut self) -> Result<()> {
        let _ = self
            .events
            .commit
            .dispatch_before(Commit {
                dest: self.dest.clone(),
            });

        let dir = match self.dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut out = NamedTempFile::new_in(dir)?;
        let mut store_in = File::open(self.store_file.path())?;

        writer::write(out.as_file_mut(), &mut self.stub.as_bytes(), &mut store_in)?;

        out.persist(&self.dest)
            .map_err(|error| CapsuleError::Io(error.error))?;

        info!(
            dest = %self.dest.display(),
            paths = self.store.count_paths()?,
            "committed container"
        );

        self.events.commit.dispatch_after(&Commit {
            dest: self.dest.clone(),
        });

        Ok(())
    }

    /// Replace the bootstrap stub.
    ///
    /// A before-hook may rewrite the script; the result must still honor the
    /// stub contract (marker first, sentinel last).
    pub fn set_bootstrap(&mut self, script: impl Into<String>) -> Result<()> {
        let (payload, _) = self.events.set_bootstrap.dispatch_before(SetBootstrap {
            script: script.into(),
        });

        bootstrap::validate_stub(&payload.script)?;
        self.stub = payload.script.clone();

        debug!("replaced bootstrap stub");

        self.events.set_bootstrap.dispatch_after(&payload);

        Ok(())
    }

    /// The current bootstrap stub text
    pub fn stub(&self) -> &str {
        &self.stub
    }

    /// Store a path from a manager.
    ///
    /// The path is normalized to container form. A before-hook may rewrite
    /// the path or manager, or skip the write entirely; a skipped write is
    /// still a successful call, but nothing persists and the after phase
    /// never fires.
    pub fn set_path(
        &mut self,
        path: impl Into<String>,
        manager: impl PathManager + 'static,
    ) -> Result<()> {
        self.set_path_boxed(path.into(), Box::new(manager))
    }

    fn set_path_boxed(&mut self, path: String, manager: Box<dyn PathManager>) -> Result<()> {
        let (payload, skipped) = self
            .events
            .set_path
            .dispatch_before(SetPath { path, manager });

        if skipped {
            debug!(path = %payload.path, "path write skipped by hook");
            return Ok(());
        }

        let canonical = path::normalize(&payload.path);

        if canonical.is_empty() {
            return Err(CapsuleError::Validation(format!(
                "\"{}\" does not normalize to a storable path",
                payload.path
            )));
        }

        self.store
            .set_path(&canonical, payload.manager.as_ref(), self.compression)?;

        self.events.set_path.dispatch_after(&payload);

        Ok(())
    }

    /// Store a batch of paths inside a single transaction.
    ///
    /// Entries are drawn lazily and validated uniformly, including when a
    /// before-hook substitutes a different source. Any failure rolls the
    /// whole batch back and surfaces the original error; nothing from the
    /// batch persists.
    pub fn set_paths_from_iter<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<BatchEntry>>,
        I::IntoIter: 'static,
    {
        let (mut payload, _) = self.events.set_batch.dispatch_before(SetBatch {
            entries: Some(Box::new(entries.into_iter())),
        });

        let entries = payload.entries.take().ok_or_else(|| {
            CapsuleError::Validation("the batch source was consumed by a hook".to_string())
        })?;

        self.store.begin()?;

        for entry in entries {
            let result = entry.and_then(|(path, manager)| self.set_path_boxed(path, manager));

            if let Err(error) = result {
                if let Err(rollback_error) = self.store.rollback() {
                    warn!(%rollback_error, "rollback failed after batch error");
                }

                return Err(error);
            }
        }

        if let Err(error) = self.store.commit() {
            if let Err(rollback_error) = self.store.rollback() {
                warn!(%rollback_error, "rollback failed after commit error");
            }

            return Err(error);
        }

        self.events.set_batch.dispatch_after(&payload);

        Ok(())
    }

    /// Remove a stored path
    pub fn remove_path(&mut self, path: &str) -> Result<()> {
        self.store.remove_path(path)
    }

    /// Check if a path is stored
    pub fn has_path(&self, path: &str) -> Result<bool> {
        self.store.has_path(path)
    }

    /// The decompressed information for a stored path
    pub fn get_path(&self, path: &str) -> Result<Memory> {
        self.store.get_path(path)
    }

    /// Lazily iterate every stored path
    pub fn paths(&self) -> Paths<'_> {
        self.store.paths()
    }

    /// Number of stored paths
    pub fn count(&self) -> Result<u64> {
        self.store.count_paths()
    }

    /// Extract stored paths under `dir`.
    ///
    /// A non-empty `subset` restricts extraction to those container paths.
    /// With `overwrite` off, paths that already exist on disk are left
    /// alone. Both are control flow, not errors.
    pub fn extract_to(&self, dir: impl Into<PathBuf>, subset: &[String], overwrite: bool) -> Result<()> {
        let (payload, _) = self.events.extract.dispatch_before(Extract {
            dir: dir.into(),
            subset: subset.to_vec(),
            overwrite,
        });

        for item in self.store.paths() {
            let (record_path, manager) = item?;

            if !payload.subset.is_empty() && !payload.subset.contains(&record_path) {
                continue;
            }

            let target = payload.dir.join(&record_path);

            if !payload.overwrite && target.exists() {
                continue;
            }

            path::materialize(&target, &manager)?;
        }

        info!(dir = %payload.dir.display(), "extracted container paths");

        self.events.extract.dispatch_after(&payload);

        Ok(())
    }

    /// Set the compression mode for subsequent [`Capsule::set_path`] calls.
    ///
    /// The mode is passed explicitly into each store write and stamped into
    /// the record; already-stored records are never touched.
    pub fn set_compression(&mut self, mode: Compression) {
        self.compression = mode;
    }

    /// The destination path this manager is bound to
    pub fn path_to_container(&self) -> &Path {
        &self.dest
    }

    /// The well-known entry-point path used by the bootstrap protocol
    pub const PRIMARY: &'static str = bootstrap::PRIMARY;
}
