use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the mapped log writer and the primitive formatter.
///
/// The variants mirror the three failure classes of the engine: argument
/// errors (`EmptyPath`), capacity errors (`CapacityExceeded`,
/// `FormatBuffer`), and fatal I/O failures from mapping creation or
/// truncation (`Io`). Capacity errors on the write path are sized out of
/// existence by the slack margin and are therefore treated by callers as
/// unrecoverable rather than retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The log file path was empty.
    #[error("log file path must not be empty")]
    EmptyPath,

    /// A write would run past the end of the current mapping.
    ///
    /// Position and unflushed counters are left untouched for the failing
    /// call.
    #[error("write of {requested} bytes at position {position} exceeds mapped capacity {capacity}")]
    CapacityExceeded {
        requested: usize,
        position: usize,
        capacity: usize,
    },

    /// A formatting buffer was too small for one of its sub-fields.
    #[error("{field} needs {needed} bytes but only {available} are available")]
    FormatBuffer {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// The writer has already been closed.
    #[error("mapped log writer is closed")]
    Closed,

    /// Mapping creation, sync, or truncation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
