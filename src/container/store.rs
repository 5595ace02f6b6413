//! Embedded transactional path-record store
//!
//! Records live in a single SQLite table keyed by canonical path. Contents
//! are compressed at write time with the mode passed by the caller, and the
//! mode is stamped into the record so every read is self-describing.

use crate::compression::{self, Compression};
use crate::error::{CapsuleError, Result};
use crate::path::{Memory, PathKind, PathManager};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "\
CREATE TABLE paths (
    path        TEXT NOT NULL,
    kind        INTEGER NOT NULL,
    compression INTEGER NOT NULL,
    modified    INTEGER NOT NULL,
    permissions INTEGER NOT NULL,
    contents    BLOB,

    PRIMARY KEY (path)
);";

/// One stored path record, contents still compressed per its stamped mode
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: PathKind,
    pub compression: Compression,
    pub modified: u64,
    pub permissions: u32,
    pub contents: Option<Vec<u8>>,
}

impl Record {
    /// Decompress into an owned in-memory path manager
    pub fn into_memory(self) -> Result<Memory> {
        let contents = match self.contents {
            Some(bytes) => Some(compression::decompress(&bytes, self.compression)?),
            None => None,
        };

        Ok(Memory::new(
            contents,
            self.kind,
            self.modified,
            self.permissions,
        ))
    }
}

/// Store for path records, bound to one SQLite database file
pub struct PathStore {
    conn: Connection,
    in_transaction: bool,
}

impl PathStore {
    /// Open the store database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        Ok(PathStore {
            conn,
            in_transaction: false,
        })
    }

    /// Create the schema for a fresh store
    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;

        Ok(())
    }

    /// Check if a path exists
    pub fn has_path(&self, path: &str) -> Result<bool> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM paths WHERE path = ?1")?;
        let count: i64 = statement.query_row(params![path], |row| row.get(0))?;

        Ok(count > 0)
    }

    /// Number of stored paths
    pub fn count_paths(&self) -> Result<u64> {
        let mut statement = self.conn.prepare_cached("SELECT COUNT(*) FROM paths")?;
        let count: i64 = statement.query_row([], |row| row.get(0))?;

        Ok(count as u64)
    }

    /// The raw record for a path, contents left compressed
    pub fn record(&self, path: &str) -> Result<Record> {
        let mut statement = self.conn.prepare_cached(
            "SELECT kind, compression, modified, permissions, contents \
             FROM paths WHERE path = ?1",
        )?;

        let row = statement
            .query_row(params![path], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<Vec<u8>>>(4)?,
                ))
            })
            .optional()?;

        let (kind, mode, modified, permissions, contents) = match row {
            Some(row) => row,
            None => return Err(CapsuleError::NotFound(path.to_string())),
        };

        decode_record(path, kind, mode, modified, permissions, contents)
    }

    /// The decompressed path information
    pub fn get_path(&self, path: &str) -> Result<Memory> {
        self.record(path)?.into_memory()
    }

    /// Upsert a path record.
    ///
    /// File contents are compressed with `mode`, and `mode` is stamped into
    /// the record. Directories never carry contents.
    pub fn set_path(
        &self,
        path: &str,
        manager: &dyn PathManager,
        mode: Compression,
    ) -> Result<()> {
        let contents = match manager.kind() {
            PathKind::Directory => None,
            PathKind::File => manager.contents()?,
        };

        let contents = match contents {
            Some(bytes) => Some(compression::compress(&bytes, mode)?),
            None => None,
        };

        debug!(path, kind = ?manager.kind(), ?mode, "set path");

        let mut statement = self.conn.prepare_cached(
            "REPLACE INTO paths (path, kind, compression, modified, permissions, contents) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        statement.execute(params![
            path,
            manager.kind() as u8,
            mode as u8,
            manager.modified() as i64,
            manager.permissions() as i64,
            contents,
        ])?;

        Ok(())
    }

    /// Remove a path record
    pub fn remove_path(&self, path: &str) -> Result<()> {
        let mut statement = self
            .conn
            .prepare_cached("DELETE FROM paths WHERE path = ?1")?;
        statement.execute(params![path])?;

        Ok(())
    }

    /// Start the single-level transaction
    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(CapsuleError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }

        self.conn.execute_batch("BEGIN TRANSACTION")?;
        self.in_transaction = true;

        Ok(())
    }

    /// Commit the active transaction
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(CapsuleError::Transaction(
                "no transaction is active".to_string(),
            ));
        }

        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;

        Ok(())
    }

    /// Roll back the active transaction
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(CapsuleError::Transaction(
                "no transaction is active".to_string(),
            ));
        }

        self.conn.execute_batch("ROLLBACK")?;
        self.in_transaction = false;

        Ok(())
    }

    /// Lazily iterate every stored path in rowid order.
    ///
    /// The cursor is single-pass and pulls one record per step through the
    /// connection's statement cache, so dropping it mid-iteration releases
    /// everything it holds.
    pub fn paths(&self) -> Paths<'_> {
        Paths {
            store: self,
            last_rowid: 0,
            done: false,
        }
    }
}

fn decode_record(
    path: &str,
    kind: i64,
    mode: i64,
    modified: i64,
    permissions: i64,
    contents: Option<Vec<u8>>,
) -> Result<Record> {
    let compression = u8::try_from(mode)
        .ok()
        .and_then(Compression::from_u8)
        .ok_or_else(|| {
            CapsuleError::Validation(format!(
                "the compression mode \"{mode}\" for \"{path}\" is not recognized"
            ))
        })?;

    let kind = u8::try_from(kind)
        .ok()
        .and_then(PathKind::from_u8)
        .ok_or_else(|| {
            CapsuleError::Validation(format!(
                "the path kind \"{kind}\" for \"{path}\" is not recognized"
            ))
        })?;

    Ok(Record {
        kind,
        compression,
        modified: modified as u64,
        permissions: permissions as u32,
        contents,
    })
}

/// Pull-based cursor over all stored paths
pub struct Paths<'a> {
    store: &'a PathStore,
    last_rowid: i64,
    done: bool,
}

impl Paths<'_> {
    fn step(&mut self) -> Result<Option<(String, Memory)>> {
        let mut statement = self.store.conn.prepare_cached(
            "SELECT rowid, path, kind, compression, modified, permissions, contents \
             FROM paths WHERE rowid > ?1 ORDER BY rowid LIMIT 1",
        )?;

        let row = statement
            .query_row(params![self.last_rowid], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<Vec<u8>>>(6)?,
                ))
            })
            .optional()?;

        let (rowid, path, kind, mode, modified, permissions, contents) = match row {
            Some(row) => row,
            None => {
                self.done = true;
                return Ok(None);
            }
        };

        self.last_rowid = rowid;

        let record = decode_record(&path, kind, mode, modified, permissions, contents)?;
        let memory = record.into_memory()?;

        Ok(Some((path, memory)))
    }
}

impl Iterator for Paths<'_> {
    type Item = Result<(String, Memory)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
