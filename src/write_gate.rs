use parking_lot::{Mutex, MutexGuard};

/// Mutual-exclusion gate that serializes multi-write records.
///
/// Independent single writes reserve disjoint byte ranges atomically and do
/// not need the gate; call sites that must keep several writes contiguous in
/// the file (for example "timestamp + message + newline" as one logical line)
/// bracket them with [`WriteGate::acquire`]. The writer never takes the gate
/// internally — its flush and remap bookkeeping run on atomics and the
/// mapping lock — so writes made while holding a token may freely cross the
/// flush threshold.
///
/// # Examples
///
/// ```
/// # use mmap_logger::MappedLogWriter;
/// # let dir = tempfile::tempdir().unwrap();
/// # let writer = MappedLogWriter::open(dir.path().join("app.log")).unwrap();
/// let token = writer.gate().acquire();
/// writer.write_str("worker 3: ").unwrap();
/// writer.write_u32(1042).unwrap();
/// writer.write_newline().unwrap();
/// drop(token);
/// ```
pub struct WriteGate {
    inner: Mutex<()>,
}

impl WriteGate {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Blocks until the gate is free, then returns the scoped token.
    ///
    /// The token is the only way to release the gate: it unlocks exactly once
    /// when it goes out of scope, regardless of the exit path. There is no
    /// explicit unlock.
    pub fn acquire(&self) -> GateToken<'_> {
        GateToken {
            _guard: self.inner.lock(),
        }
    }
}

/// Proof that the gate is held by the current thread.
///
/// Dropping the token releases the gate.
pub struct GateToken<'a> {
    _guard: MutexGuard<'a, ()>,
}
