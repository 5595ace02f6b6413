//! # Capsule - Self-Extracting Single-File Containers
//!
//! `capsule-rs` packages an executable bootstrap stub and an arbitrary file
//! tree into one self-verifying container file:
//!
//! - **Single file**: `[stub][record store][20-byte signature]`
//! - **Self-verifying**: the trailing SHA-1 signature covers everything
//!   before it and is checked on open and at run time
//! - **Self-extracting**: the embedded stub hands off to a bootstrap
//!   protocol that extracts into a signature-keyed cache and runs the
//!   container's primary path
//! - **Mutable until commit**: paths accumulate in a private temporary
//!   store; `commit()` atomically replaces the destination
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capsule::{Capsule, Memory, Result};
//!
//! # fn main() -> Result<()> {
//! // Stage a new container
//! let mut capsule = Capsule::create("app.capsule")?;
//! capsule.set_path("docs/hello.txt", Memory::file("Hello, World!"))?;
//! capsule.commit()?;
//!
//! // Read it back
//! let capsule = Capsule::open("app.capsule")?;
//! let hello = capsule.get_path("docs/hello.txt")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Interception
//!
//! Every mutating operation dispatches before/after hooks. A before-hook can
//! rewrite the operation's payload or skip a path write entirely:
//!
//! ```rust,no_run
//! use capsule::event::Action;
//! use capsule::{Capsule, Memory, Result};
//!
//! # fn main() -> Result<()> {
//! let mut capsule = Capsule::create("app.capsule")?;
//!
//! capsule.events().set_path.before(0, |mut payload| {
//!     payload.path = payload.path.to_lowercase();
//!     Action::Continue(payload)
//! });
//!
//! capsule.set_path("README.TXT", Memory::file("stored as readme.txt"))?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod capsule;
pub mod compression;
pub mod container;
pub mod error;
pub mod event;
pub mod hooks;
pub mod path;
pub mod walk;

pub use capsule::Capsule;
pub use compression::Compression;
pub use error::{CapsuleError, Result};
pub use path::{Local, Memory, PathKind, PathManager};
