use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::MmapMut;
use parking_lot::RwLock;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::formatter::{self, Endpoint};
use crate::write_gate::WriteGate;

/// Bytes written since the last flush before a flush is scheduled.
pub const FLUSH_THRESHOLD_BYTES: usize = 64 * 1024;

/// Bytes of logical growth between one remap and the next.
pub const REMAP_INTERVAL_BYTES: usize = 4 * 1024 * 1024;

/// Extra slack beyond the remap trigger, as a multiple of the flush
/// threshold. Writes that land between two flush-threshold checks can
/// therefore never outrun the remap trigger and hit the capacity wall.
pub const REMAP_SAFETY_MULTIPLE: usize = 4;

/// Slack granted ahead of the logical length whenever a mapping is
/// established.
const SLACK_BYTES: usize = REMAP_INTERVAL_BYTES + REMAP_SAFETY_MULTIPLE * FLUSH_THRESHOLD_BYTES;

/// Platform newline sequence written by [`MappedLogWriter::write_newline`].
pub const NEWLINE: &[u8] = if cfg!(windows) { b"\r\n" } else { b"\n" };

/// An append-only log writer backed by a memory-mapped file.
///
/// Bytes are copied straight into the mapped region through a cached base
/// pointer, so the hot write path performs no heap allocation, no system
/// call, and no per-write pointer resolution. The physical file is kept
/// larger than the logical content by a slack margin; on [`close`] the file
/// is truncated back to exactly the bytes written.
///
/// # Thread Safety
///
/// Independent writes from multiple threads are safe: each write reserves its
/// destination byte range with an atomic compare-and-swap, so two concurrent
/// writes always land in disjoint ranges. Their *order* relative to each
/// other is unspecified; call sites that need several writes to form one
/// contiguous record must hold the [`WriteGate`] across them (the
/// [`log_line!`](crate::log_line) macro does this).
///
/// Fast-path writes hold the mapping's read lock while copying; remap and
/// close take the write lock, so a write can never observe a stale base
/// pointer mid-remap.
///
/// # Examples
///
/// ```
/// # use mmap_logger::MappedLogWriter;
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("app.log");
///
/// let writer = MappedLogWriter::open(&path).unwrap();
/// writer.write_str("request handled in ").unwrap();
/// writer.write_u32(42).unwrap();
/// writer.write_str("ms").unwrap();
/// writer.write_newline().unwrap();
/// writer.close().unwrap();
///
/// let content = std::fs::read_to_string(&path).unwrap();
/// assert_eq!(content.trim_end(), "request handled in 42ms");
/// ```
///
/// [`close`]: MappedLogWriter::close
pub struct MappedLogWriter {
    path: PathBuf,
    mapping: RwLock<Option<Mapping>>,
    position: AtomicUsize,
    unflushed: AtomicUsize,
    gate: WriteGate,
}

// The raw base pointer is only dereferenced while the mapping read lock is
// held and only replaced while the write lock is held, so the writer can be
// shared across threads.
unsafe impl Send for MappedLogWriter {}
unsafe impl Sync for MappedLogWriter {}

struct Mapping {
    file: std::fs::File,
    map: MmapMut,
    base: *mut u8,
    capacity: usize,
    remap_at: usize,
}

impl Mapping {
    /// Maps `file` with slack beyond `logical` bytes of existing content.
    ///
    /// On failure the file is truncated back to its logical length so a
    /// half-grown file is never left behind.
    fn establish(file: std::fs::File, logical: usize) -> Result<Self> {
        let capacity = logical + SLACK_BYTES;
        file.set_len(capacity as u64)?;
        let mut map = match unsafe { MmapMut::map_mut(&file) } {
            Ok(map) => map,
            Err(err) => {
                let _ = file.set_len(logical as u64);
                return Err(err.into());
            }
        };
        let base = map.as_mut_ptr();
        Ok(Self {
            file,
            map,
            base,
            capacity,
            remap_at: logical + REMAP_INTERVAL_BYTES,
        })
    }

    /// Flushes and re-establishes the mapping with fresh slack beyond
    /// `logical`. Consumes the old mapping; the caller must hold exclusive
    /// access.
    fn grow(self, logical: usize) -> Result<Self> {
        self.map.flush()?;
        let Mapping { file, map, .. } = self;
        // The old view must be gone before the file is resized under it.
        drop(map);
        Mapping::establish(file, logical)
    }
}

impl MappedLogWriter {
    /// Opens (or creates) the log file at `path` and maps it for appending.
    ///
    /// The write position starts at the file's current length, so reopening a
    /// previously closed log appends rather than overwrites. The mapping is
    /// sized to the existing content plus a slack margin large enough to
    /// absorb write bursts between flush checks.
    ///
    /// Other processes may read the file while it is open; opening the same
    /// file for writing twice in one process is not supported.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::EmptyPath`] for an empty path, or [`Error::Io`] if
    /// the file cannot be opened, resized, or mapped. No partially acquired
    /// resource is left behind on failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let logical = file.metadata()?.len() as usize;
        let mapping = Mapping::establish(file, logical)?;
        debug!(
            path = %path.display(),
            position = logical,
            capacity = mapping.capacity,
            "opened mapped log"
        );
        Ok(Self {
            path: path.to_path_buf(),
            mapping: RwLock::new(Some(mapping)),
            position: AtomicUsize::new(logical),
            unflushed: AtomicUsize::new(0),
            gate: WriteGate::new(),
        })
    }

    /// Appends raw bytes at the current write position.
    ///
    /// Empty input is a no-op. The destination range is reserved atomically,
    /// so unsynchronized concurrent calls write to disjoint ranges; once the
    /// unflushed count crosses [`FLUSH_THRESHOLD_BYTES`] the dirty pages are
    /// synced, and once the position crosses the remap trigger the mapping is
    /// re-established at a larger size.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after [`close`](Self::close);
    /// [`Error::CapacityExceeded`] if the write would run past the mapping —
    /// unreachable in normal operation because the slack margin outpaces the
    /// remap trigger, and therefore not advanced past or retried.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let needs_maintenance = {
            let guard = self.mapping.read();
            let mapping = guard.as_ref().ok_or(Error::Closed)?;
            let len = bytes.len();
            let start = self.reserve(len, mapping.capacity)?;
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), mapping.base.add(start), len);
            }
            let unflushed = self.unflushed.fetch_add(len, Ordering::AcqRel) + len;
            unflushed >= FLUSH_THRESHOLD_BYTES || start + len >= mapping.remap_at
        };
        if needs_maintenance {
            self.maintain()?;
        }
        Ok(())
    }

    /// Syncs dirty pages to the backing file and resets the unflushed count.
    ///
    /// Idempotent; a no-op once closed.
    pub fn flush(&self) -> Result<()> {
        let guard = self.mapping.read();
        if let Some(mapping) = guard.as_ref() {
            mapping.map.flush()?;
            self.unflushed.store(0, Ordering::Release);
        }
        Ok(())
    }

    /// Flushes, releases the mapping, and truncates the file to the logical
    /// length so on-disk size reflects only written content, not slack.
    ///
    /// Idempotent; subsequent writes fail with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut guard = self.mapping.write();
        let Some(mapping) = guard.take() else {
            return Ok(());
        };
        let position = self.position.load(Ordering::Acquire);
        let flushed = mapping.map.flush();
        let Mapping { file, map, .. } = mapping;
        // Unmap before truncating below the mapped length.
        drop(map);
        let truncated = file.set_len(position as u64);
        self.unflushed.store(0, Ordering::Release);
        debug!(path = %self.path.display(), position, "closed mapped log");
        flushed?;
        truncated?;
        Ok(())
    }

    /// Diagnostic/testing accessor: flushes, then returns the logical byte
    /// range `[0, position)` decoded as text (lossily for non-UTF-8 bytes).
    ///
    /// Returns an empty string when nothing has been written or the writer is
    /// closed.
    pub fn read_current(&self) -> Result<String> {
        self.flush()?;
        let guard = self.mapping.read();
        let Some(mapping) = guard.as_ref() else {
            return Ok(String::new());
        };
        let position = self.position.load(Ordering::Acquire);
        let bytes = unsafe { slice::from_raw_parts(mapping.base as *const u8, position) };
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// The gate call sites hold across multi-write records.
    pub fn gate(&self) -> &WriteGate {
        &self.gate
    }

    /// Logical write position: the number of bytes committed so far.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Bytes written since the last flush.
    pub fn unflushed_bytes(&self) -> usize {
        self.unflushed.load(Ordering::Acquire)
    }

    /// Byte length of the current mapping, or `None` once closed.
    pub fn capacity(&self) -> Option<usize> {
        self.mapping.read().as_ref().map(|mapping| mapping.capacity)
    }

    /// Whether a mapping is currently open.
    pub fn is_open(&self) -> bool {
        self.mapping.read().is_some()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserves `[start, start + len)` for the calling thread.
    ///
    /// Retries on a lost race. A reservation that would overflow capacity
    /// fails without advancing the cursor.
    fn reserve(&self, len: usize, capacity: usize) -> Result<usize> {
        let mut current = self.position.load(Ordering::Relaxed);
        loop {
            let end = current.checked_add(len).ok_or(Error::CapacityExceeded {
                requested: len,
                position: current,
                capacity,
            })?;
            if end > capacity {
                return Err(Error::CapacityExceeded {
                    requested: len,
                    position: current,
                    capacity,
                });
            }
            match self.position.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(current),
                Err(observed) => current = observed,
            }
        }
    }

    /// Flush and remap checks, run after a write crosses a threshold.
    ///
    /// The flush is claimed by swapping `unflushed` back to zero with a
    /// compare-and-swap, so a burst of writers produces one sync, not one per
    /// writer, and no lock is taken on the flush path — a caller already
    /// holding the record gate across its writes must not block here. The
    /// remap re-checks under the mapping write lock because another thread
    /// may have grown the mapping while this one waited.
    fn maintain(&self) -> Result<()> {
        let mut unflushed = self.unflushed.load(Ordering::Acquire);
        while unflushed >= FLUSH_THRESHOLD_BYTES {
            match self.unflushed.compare_exchange(
                unflushed,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let guard = self.mapping.read();
                    if let Some(mapping) = guard.as_ref() {
                        mapping.map.flush()?;
                    }
                    break;
                }
                // Lost the claim; re-check in case more bytes piled up.
                Err(observed) => unflushed = observed,
            }
        }

        let needs_remap = {
            let guard = self.mapping.read();
            match guard.as_ref() {
                Some(mapping) => self.position.load(Ordering::Acquire) >= mapping.remap_at,
                None => false,
            }
        };
        if needs_remap {
            let mut guard = self.mapping.write();
            if let Some(mapping) = guard.take() {
                // Writers are drained, so the position is stable here.
                let position = self.position.load(Ordering::Acquire);
                if position >= mapping.remap_at {
                    let grown = mapping.grow(position)?;
                    debug!(
                        path = %self.path.display(),
                        position,
                        capacity = grown.capacity,
                        "remapped log file"
                    );
                    *guard = Some(grown);
                } else {
                    *guard = Some(mapping);
                }
            }
        }
        Ok(())
    }
}

impl Drop for MappedLogWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(path = %self.path.display(), error = %err, "failed to close mapped log on drop");
        }
    }
}

/// Typed write operations.
///
/// Each renders its value into a stack buffer sized from the formatter's
/// worst-case constants and appends the rendered bytes, so none of these
/// touch the heap.
impl MappedLogWriter {
    /// Appends a UTF-8 string, zero-copy. This is the fast text path.
    pub fn write_str(&self, text: &str) -> Result<()> {
        self.write(text.as_bytes())
    }

    /// Appends the platform newline sequence.
    pub fn write_newline(&self) -> Result<()> {
        self.write(NEWLINE)
    }

    /// Appends a `u8` as decimal text.
    pub fn write_u8(&self, value: u8) -> Result<()> {
        let mut buf = [0u8; formatter::U8_TEXT_MAX];
        let len = formatter::format_u8(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends a `u16` as decimal text.
    pub fn write_u16(&self, value: u16) -> Result<()> {
        let mut buf = [0u8; formatter::U16_TEXT_MAX];
        let len = formatter::format_u16(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends a `u32` as decimal text.
    pub fn write_u32(&self, value: u32) -> Result<()> {
        let mut buf = [0u8; formatter::U32_TEXT_MAX];
        let len = formatter::format_u32(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends a `u64` as decimal text.
    pub fn write_u64(&self, value: u64) -> Result<()> {
        let mut buf = [0u8; formatter::U64_TEXT_MAX];
        let len = formatter::format_u64(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends an `i8` as decimal text.
    pub fn write_i8(&self, value: i8) -> Result<()> {
        let mut buf = [0u8; formatter::I8_TEXT_MAX];
        let len = formatter::format_i8(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends an `i16` as decimal text.
    pub fn write_i16(&self, value: i16) -> Result<()> {
        let mut buf = [0u8; formatter::I16_TEXT_MAX];
        let len = formatter::format_i16(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends an `i32` as decimal text.
    pub fn write_i32(&self, value: i32) -> Result<()> {
        let mut buf = [0u8; formatter::I32_TEXT_MAX];
        let len = formatter::format_i32(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends an `i64` as decimal text.
    pub fn write_i64(&self, value: i64) -> Result<()> {
        let mut buf = [0u8; formatter::I64_TEXT_MAX];
        let len = formatter::format_i64(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends an `f32` in shortest round-trippable decimal form.
    pub fn write_f32(&self, value: f32) -> Result<()> {
        let mut buf = [0u8; formatter::FLOAT_TEXT_MAX];
        let len = formatter::format_f32(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends an `f64` in shortest round-trippable decimal form.
    pub fn write_f64(&self, value: f64) -> Result<()> {
        let mut buf = [0u8; formatter::FLOAT_TEXT_MAX];
        let len = formatter::format_f64(value, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends `True` or `False`.
    pub fn write_bool(&self, value: bool) -> Result<()> {
        self.write(if value {
            formatter::BOOL_TRUE
        } else {
            formatter::BOOL_FALSE
        })
    }

    /// Appends a calendar date as `YYYY-MM-DD`.
    pub fn write_date(&self, date: Date) -> Result<()> {
        let mut buf = [0u8; formatter::DATE_TEXT_LEN];
        let len = formatter::format_date(date, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends a wall-clock time as `HH:MM:SS`.
    pub fn write_time(&self, time: Time) -> Result<()> {
        let mut buf = [0u8; formatter::TIME_TEXT_LEN];
        let len = formatter::format_time(time, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends a wall-clock time as `HH:MM:SS.mmm`.
    pub fn write_time_ms(&self, time: Time) -> Result<()> {
        let mut buf = [0u8; formatter::TIME_MS_TEXT_LEN];
        let len = formatter::format_time_ms(time, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends a bracketed line-prefix timestamp, `[YYYY-MM-DD HH:MM:SS] `.
    pub fn write_timestamp(&self, stamp: PrimitiveDateTime) -> Result<()> {
        let mut buf = [0u8; formatter::TIMESTAMP_TEXT_LEN];
        let len = formatter::format_timestamp(stamp, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends a bracketed timestamp for the current UTC wall clock.
    pub fn write_timestamp_now(&self) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        self.write_timestamp(PrimitiveDateTime::new(now.date(), now.time()))
    }

    /// Appends a network endpoint.
    pub fn write_endpoint(&self, endpoint: &Endpoint<'_>) -> Result<()> {
        let mut buf = [0u8; formatter::ENDPOINT_TEXT_MAX];
        let len = formatter::format_endpoint(endpoint, &mut buf)?;
        self.write(&buf[..len])
    }

    /// Appends UTF-16 text, transcoding it to UTF-8. **Opt-in slow path.**
    ///
    /// Unlike every other write operation, this one may touch memory beyond
    /// the stack: inputs whose worst-case expansion exceeds
    /// [`formatter::TEXT_STACK_LIMIT`] borrow a pooled transcode buffer.
    /// Prefer [`write_str`](Self::write_str) wherever the text already exists
    /// as UTF-8.
    pub fn write_utf16(&self, units: &[u16]) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let worst_case = units.len() * 3;
        if worst_case <= formatter::TEXT_STACK_LIMIT {
            let mut buf = [0u8; formatter::TEXT_STACK_LIMIT];
            let len = formatter::transcode_utf16(units, &mut buf)?;
            return self.write(&buf[..len]);
        }
        let mut buf = formatter::take_transcode_buffer();
        buf.resize(worst_case, 0);
        let result = formatter::transcode_utf16(units, &mut buf)
            .and_then(|len| self.write(&buf[..len]));
        formatter::return_transcode_buffer(buf);
        result
    }
}
