//! Stock hooks built on the public interception pipeline
//!
//! None of these are required by the archive manager; they are packaged
//! policies a caller can register on [`Events`](crate::event::Events):
//! path filtering and content replacement before a path write, and a
//! permission override on the committed container.
//!
//! Suggested priorities when combining them on the same operation: filters
//! at `200`, replacements at `100`, so a filtered path is never rewritten.

use crate::event::{Action, Commit, SetPath};
use crate::path::{Memory, PathKind, PathManager};
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use tracing::warn;

/// Rules deciding which paths may be stored.
///
/// An exclusion always wins; inclusions act as a whitelist once any are
/// present. Names match the final path segment, patterns match the whole
/// path.
#[derive(Debug, Default)]
pub struct FilterRules {
    exclude_names: Vec<String>,
    exclude_patterns: Vec<Regex>,
    include_names: Vec<String>,
    include_patterns: Vec<Regex>,
}

impl FilterRules {
    pub fn new() -> Self {
        FilterRules::default()
    }

    pub fn exclude_name(mut self, name: impl Into<String>) -> Self {
        self.exclude_names.push(name.into());
        self
    }

    pub fn exclude_pattern(mut self, pattern: Regex) -> Self {
        self.exclude_patterns.push(pattern);
        self
    }

    pub fn include_name(mut self, name: impl Into<String>) -> Self {
        self.include_names.push(name.into());
        self
    }

    pub fn include_pattern(mut self, pattern: Regex) -> Self {
        self.include_patterns.push(pattern);
        self
    }

    fn is_allowed(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);

        if self.exclude_names.iter().any(|excluded| excluded == name) {
            return false;
        }

        if self.exclude_patterns.iter().any(|pattern| pattern.is_match(path)) {
            return false;
        }

        if self.include_names.is_empty() && self.include_patterns.is_empty() {
            return true;
        }

        self.include_names.iter().any(|included| included == name)
            || self.include_patterns.iter().any(|pattern| pattern.is_match(path))
    }
}

/// Before-set-path hook that skips any path the rules disallow
pub fn filter(rules: FilterRules) -> impl Fn(SetPath) -> Action<SetPath> {
    move |payload| {
        if rules.is_allowed(&payload.path) {
            Action::Continue(payload)
        } else {
            Action::Skip(payload)
        }
    }
}

/// Content replacements applied to file paths before they are stored.
///
/// Patterns can apply to every file, to one exact container path, or to any
/// path matching a pattern.
#[derive(Debug, Default)]
pub struct Replacements {
    global: Vec<(BytesRegex, Vec<u8>)>,
    by_path: Vec<(String, BytesRegex, Vec<u8>)>,
    by_pattern: Vec<(Regex, BytesRegex, Vec<u8>)>,
}

impl Replacements {
    pub fn new() -> Self {
        Replacements::default()
    }

    /// Replace `pattern` in every file
    pub fn replace_all(mut self, pattern: BytesRegex, replacement: impl Into<Vec<u8>>) -> Self {
        self.global.push((pattern, replacement.into()));
        self
    }

    /// Replace `pattern` in the file stored at exactly `path`
    pub fn replace_by_path(
        mut self,
        path: impl Into<String>,
        pattern: BytesRegex,
        replacement: impl Into<Vec<u8>>,
    ) -> Self {
        self.by_path.push((path.into(), pattern, replacement.into()));
        self
    }

    /// Replace `pattern` in any file whose path matches `path_pattern`
    pub fn replace_by_pattern(
        mut self,
        path_pattern: Regex,
        pattern: BytesRegex,
        replacement: impl Into<Vec<u8>>,
    ) -> Self {
        self.by_pattern.push((path_pattern, pattern, replacement.into()));
        self
    }

    fn applies_to(&self, path: &str) -> bool {
        !self.global.is_empty()
            || self.by_path.iter().any(|(exact, _, _)| exact == path)
            || self.by_pattern.iter().any(|(pattern, _, _)| pattern.is_match(path))
    }

    fn apply(&self, path: &str, mut contents: Vec<u8>) -> Vec<u8> {
        for (pattern, replacement) in &self.global {
            contents = pattern.replace_all(&contents, replacement.as_slice()).into_owned();
        }

        for (exact, pattern, replacement) in &self.by_path {
            if exact == path {
                contents = pattern.replace_all(&contents, replacement.as_slice()).into_owned();
            }
        }

        for (path_pattern, pattern, replacement) in &self.by_pattern {
            if path_pattern.is_match(path) {
                contents = pattern.replace_all(&contents, replacement.as_slice()).into_owned();
            }
        }

        contents
    }
}

/// Before-set-path hook that rewrites matching file contents.
///
/// Directories pass through untouched. A manager whose contents cannot be
/// read also passes through; the store write that follows will surface the
/// same failure.
pub fn replace(replacements: Replacements) -> impl Fn(SetPath) -> Action<SetPath> {
    move |payload| {
        if payload.manager.kind() == PathKind::Directory || !replacements.applies_to(&payload.path)
        {
            return Action::Continue(payload);
        }

        let contents = match payload.manager.contents() {
            Ok(Some(contents)) => contents,
            Ok(None) => return Action::Continue(payload),
            Err(_) => return Action::Continue(payload),
        };

        let rewritten = replacements.apply(&payload.path, contents);

        let manager = Memory::new(
            Some(rewritten),
            payload.manager.kind(),
            payload.manager.modified(),
            payload.manager.permissions(),
        );

        Action::Continue(SetPath {
            path: payload.path,
            manager: Box::new(manager),
        })
    }
}

/// After-commit hook that sets the committed container's permissions,
/// typically to make it executable
pub fn chmod(mode: u32) -> impl Fn(&Commit) {
    move |commit| {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Err(error) = std::fs::set_permissions(
                &commit.dest,
                std::fs::Permissions::from_mode(mode),
            ) {
                warn!(
                    dest = %commit.dest.display(),
                    %error,
                    "failed to change container permissions"
                );
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (mode, commit);
        }
    }
}
