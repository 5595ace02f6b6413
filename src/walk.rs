//! Directory sources for batch insertion
//!
//! Walks a directory tree and yields `(container path, manager)` entries
//! ready for [`Capsule::set_paths_from_iter`](crate::Capsule::set_paths_from_iter).
//! Directories are yielded before their contents.

use crate::error::Result;
use crate::event::BatchEntry;
use crate::path::{Local, PathManager};
use std::io;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Walk `root` recursively, keying each entry by its path relative to `root`
pub fn walk(root: impl Into<PathBuf>) -> impl Iterator<Item = Result<BatchEntry>> {
    let root = root.into();
    let base = root.clone();

    walk_with_base(root, base, "")
}

/// Walk `root`, keying each entry by its path with the `base` prefix
/// replaced by `alternative`
pub fn walk_with_base(
    root: impl Into<PathBuf>,
    base: impl Into<PathBuf>,
    alternative: &str,
) -> impl Iterator<Item = Result<BatchEntry>> {
    let base = base.into();
    let alternative = alternative.to_string();

    WalkDir::new(root.into())
        .min_depth(1)
        .into_iter()
        .map(move |entry| {
            let entry = entry.map_err(io::Error::from)?;
            let full = entry.path();

            let relative = full.strip_prefix(&base).unwrap_or(full);
            let key = format!("{}{}", alternative, relative.to_string_lossy());

            let manager: Box<dyn PathManager> = Box::new(Local::open(full)?);

            Ok((key, manager))
        })
}
