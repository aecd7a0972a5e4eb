//! # Mmap Logger
//!
//! A zero-allocation, append-only logging engine that writes straight into a
//! memory-mapped file:
//!
//! * **No heap on the hot path**: primitives render into stack buffers and
//!   are copied once into the mapped region
//! * **No system calls per write**: the OS flushes dirty pages; the engine
//!   syncs explicitly only when a byte threshold is crossed
//! * **Append across sessions**: reopening a closed log resumes at its prior
//!   length, and closing truncates away the pre-allocated slack
//!
//! ## Main Components
//!
//! * `MappedLogWriter`: the memory-mapped append buffer with its flush and
//!   remap protocol
//! * `formatter`: allocation-free primitive-to-text rendering (integers,
//!   floats, booleans, date/time fields, network endpoints)
//! * `WriteGate`: scoped mutual exclusion for multi-write atomic records
//! * `shutdown`: explicit best-effort flush/truncate hooks for process exit
//!
//! ## Thread Safety
//!
//! Independent single writes may run unsynchronized from any number of
//! threads: each reserves a disjoint destination range atomically. Writes
//! that must stay contiguous as one logical record are bracketed with the
//! gate, which `log_line!` does automatically.
//!
//! ## Quick Start
//!
//! ```
//! use mmap_logger::{log_line, MappedLogWriter};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("app.log");
//!
//! let writer = MappedLogWriter::open(&path).unwrap();
//! log_line!(writer, "worker ", 3u32, " connected: ", true).unwrap();
//! writer.close().unwrap();
//!
//! let content = std::fs::read_to_string(&path).unwrap();
//! assert!(content.trim_end().ends_with("worker 3 connected: True"));
//! ```

pub mod error;
pub mod formatter;
pub mod mapped_writer;
pub mod shutdown;
pub mod writable;
pub mod write_gate;

pub use error::{Error, Result};
pub use formatter::Endpoint;
pub use mapped_writer::{
    MappedLogWriter, FLUSH_THRESHOLD_BYTES, NEWLINE, REMAP_INTERVAL_BYTES, REMAP_SAFETY_MULTIPLE,
};
pub use writable::Writable;
pub use write_gate::{GateToken, WriteGate};

/// Writes one timestamped line as a single atomic record.
///
/// Acquires the writer's gate, writes a bracketed UTC timestamp, renders each
/// value through its typed allocation-free path, and ends the line with the
/// platform newline. Concurrent `log_line!` calls never interleave their
/// bytes.
///
/// # Examples
///
/// ```
/// # use mmap_logger::{log_line, MappedLogWriter};
/// # let dir = tempfile::tempdir().unwrap();
/// # let writer = MappedLogWriter::open(dir.path().join("app.log")).unwrap();
/// log_line!(writer, "request took ", 42u32, "ms").unwrap();
/// log_line!(writer, "cache hit rate ", 0.97f64).unwrap();
/// ```
#[macro_export]
macro_rules! log_line {
    ($writer:expr $(, $value:expr)* $(,)?) => {{
        let writer: &$crate::MappedLogWriter = &$writer;
        let _token = writer.gate().acquire();
        (|| -> $crate::Result<()> {
            writer.write_timestamp_now()?;
            $( $crate::Writable::write_to(&$value, writer)?; )*
            writer.write_newline()
        })()
    }};
}
