//! Best-effort cleanup for writers that are still open when the process is
//! told to terminate. The application wires this up explicitly: register
//! each writer after opening it, and either call [`flush_registered`] from
//! its own shutdown path or let [`install_signal_hooks`] do so on
//! SIGINT/SIGTERM.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, warn};

use crate::mapped_writer::MappedLogWriter;

lazy_static! {
    static ref REGISTRY: Mutex<Vec<Weak<MappedLogWriter>>> = Mutex::new(Vec::new());
}

static HOOKS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Registers a writer for best-effort flush and truncate at shutdown.
///
/// Only a weak reference is held, so registration does not keep a writer
/// alive past its last owner.
pub fn register(writer: &Arc<MappedLogWriter>) {
    REGISTRY.lock().push(Arc::downgrade(writer));
}

/// Closes every registered writer that is still alive, flushing its mapped
/// pages and truncating its file to the logical length.
///
/// Failures are logged and do not stop the remaining writers from being
/// closed.
pub fn flush_registered() {
    let registrants = std::mem::take(&mut *REGISTRY.lock());
    for weak in registrants {
        let Some(writer) = weak.upgrade() else {
            continue;
        };
        match writer.close() {
            Ok(()) => debug!(path = %writer.path().display(), "flushed log at shutdown"),
            Err(err) => {
                warn!(path = %writer.path().display(), error = %err, "shutdown flush failed")
            }
        }
    }
}

/// Installs SIGINT/SIGTERM handlers that run [`flush_registered`] and then
/// exit with the conventional `128 + signal` status.
///
/// Idempotent; only the first call installs anything.
pub fn install_signal_hooks() -> io::Result<()> {
    if HOOKS_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            flush_registered();
            signal_hook::low_level::exit(128 + signal);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_registered_closes_live_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown.log");
        let writer = Arc::new(MappedLogWriter::open(&path).unwrap());
        writer.write_str("interrupted\n").unwrap();
        register(&writer);

        flush_registered();

        assert!(!writer.is_open());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "interrupted\n");
    }

    #[test]
    fn dropped_writers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(MappedLogWriter::open(dir.path().join("gone.log")).unwrap());
        register(&writer);
        drop(writer);

        // Must not panic on the dead weak reference.
        flush_registered();
    }
}
