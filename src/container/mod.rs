//! Container byte format
//!
//! A container is three ordered segments: the executable stub, the embedded
//! record store, and a trailing 20-byte signature over everything before it.

pub mod reader;
pub mod signature;
pub mod store;
pub mod writer;

pub use reader::Reader;
pub use store::{PathStore, Paths, Record};

/// Size of the trailing signature segment in bytes
pub const SIGNATURE_LEN: u64 = 20;
