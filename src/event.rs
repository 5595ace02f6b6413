//! Before/after interception around mutating archive operations
//!
//! Hooks are plain functions over an owned payload, folded in priority
//! order. A before-hook either passes the (possibly rewritten) payload on or
//! skips, which stops the chain; the guarded operation re-reads the payload
//! after dispatch. After-hooks observe the final payload and never fire for
//! a skipped operation. With nothing registered, dispatch is a no-op.
//!
//! Everything is synchronous and single-threaded; hooks never span threads.

use crate::error::Result;
use crate::path::PathManager;
use std::path::PathBuf;

/// Outcome of a before-hook
pub enum Action<T> {
    /// Continue with the (possibly rewritten) payload
    Continue(T),
    /// Cancel the guarded operation; the after phase never fires
    Skip(T),
}

type BeforeFn<T> = Box<dyn Fn(T) -> Action<T>>;
type AfterFn<T> = Box<dyn Fn(&T)>;

/// Ordered hook chains for one operation
pub struct Hooks<T> {
    before: Vec<(i32, BeforeFn<T>)>,
    after: Vec<(i32, AfterFn<T>)>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Hooks {
            before: Vec::new(),
            after: Vec::new(),
        }
    }
}

impl<T> Hooks<T> {
    /// Register a before-hook. Higher priorities run first; equal priorities
    /// run in registration order.
    pub fn before(&mut self, priority: i32, hook: impl Fn(T) -> Action<T> + 'static) {
        let at = self
            .before
            .partition_point(|(existing, _)| *existing >= priority);
        self.before.insert(at, (priority, Box::new(hook)));
    }

    /// Register an after-hook
    pub fn after(&mut self, priority: i32, hook: impl Fn(&T) + 'static) {
        let at = self
            .after
            .partition_point(|(existing, _)| *existing >= priority);
        self.after.insert(at, (priority, Box::new(hook)));
    }

    pub(crate) fn dispatch_before(&self, mut payload: T) -> (T, bool) {
        for (_, hook) in &self.before {
            match hook(payload) {
                Action::Continue(next) => payload = next,
                Action::Skip(next) => return (next, true),
            }
        }

        (payload, false)
    }

    pub(crate) fn dispatch_after(&self, payload: &T) {
        for (_, hook) in &self.after {
            hook(payload);
        }
    }
}

/// Payload for the commit operation
pub struct Commit {
    /// Destination the container was, or is about to be, written to
    pub dest: PathBuf,
}

/// Payload for replacing the bootstrap stub
pub struct SetBootstrap {
    pub script: String,
}

/// Payload for storing a single path
pub struct SetPath {
    pub path: String,
    pub manager: Box<dyn PathManager>,
}

/// One batch entry: a container path and the manager to store it from
pub type BatchEntry = (String, Box<dyn PathManager>);

/// Batch entry source; entries are validated as they are drawn
pub type BatchIter = Box<dyn Iterator<Item = Result<BatchEntry>>>;

/// Payload for the batch path operation.
///
/// A before-hook may substitute a different source entirely. The entries are
/// drained by the operation, so the after phase observes `None`.
pub struct SetBatch {
    pub entries: Option<BatchIter>,
}

/// Payload for extraction
pub struct Extract {
    pub dir: PathBuf,
    pub subset: Vec<String>,
    pub overwrite: bool,
}

/// Hook chains for every interceptable operation
#[derive(Default)]
pub struct Events {
    pub commit: Hooks<Commit>,
    pub set_bootstrap: Hooks<SetBootstrap>,
    pub set_path: Hooks<SetPath>,
    pub set_batch: Hooks<SetBatch>,
    pub extract: Hooks<Extract>,
}
