//! Allocation-free rendering of primitive values into caller-supplied
//! buffers.
//!
//! Every function in this module follows the same contract: render `value`
//! into the front of `buf` and return the number of bytes written, or fail
//! with a capacity error naming the sub-field that did not fit. Callers are
//! expected to size their buffers statically from the `*_TEXT_MAX` constants
//! below, which makes the capacity error unreachable in practice.

use std::fmt::{self, Write as _};
use std::net::SocketAddr;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use time::{Date, PrimitiveDateTime, Time};

use crate::error::{Error, Result};

/// Worst-case rendered width of a `u8` (`"255"`).
pub const U8_TEXT_MAX: usize = 3;
/// Worst-case rendered width of an `i8` (`"-128"`).
pub const I8_TEXT_MAX: usize = 4;
/// Worst-case rendered width of a `u16` (`"65535"`).
pub const U16_TEXT_MAX: usize = 5;
/// Worst-case rendered width of an `i16` (`"-32768"`).
pub const I16_TEXT_MAX: usize = 6;
/// Worst-case rendered width of a `u32` (`"4294967295"`).
pub const U32_TEXT_MAX: usize = 10;
/// Worst-case rendered width of an `i32` (`"-2147483648"`).
pub const I32_TEXT_MAX: usize = 11;
/// Worst-case rendered width of a `u64` (`"18446744073709551615"`).
pub const U64_TEXT_MAX: usize = 20;
/// Worst-case rendered width of an `i64` (`"-9223372036854775808"`).
pub const I64_TEXT_MAX: usize = 20;
/// Worst-case rendered width of an `f32`/`f64` in shortest round-trippable
/// decimal form.
pub const FLOAT_TEXT_MAX: usize = 32;
/// Rendered width of a calendar date, `YYYY-MM-DD`.
pub const DATE_TEXT_LEN: usize = 10;
/// Rendered width of a wall-clock time, `HH:MM:SS`.
pub const TIME_TEXT_LEN: usize = 8;
/// Rendered width of a wall-clock time with milliseconds, `HH:MM:SS.mmm`.
pub const TIME_MS_TEXT_LEN: usize = 12;
/// Rendered width of a bracketed line-prefix timestamp,
/// `[YYYY-MM-DD HH:MM:SS] ` (note the trailing space).
pub const TIMESTAMP_TEXT_LEN: usize = 22;
/// Worst-case rendered width of an [`Endpoint`].
pub const ENDPOINT_TEXT_MAX: usize = 64;

/// Pre-rendered boolean literals.
pub const BOOL_TRUE: &[u8] = b"True";
pub const BOOL_FALSE: &[u8] = b"False";

/// UTF-16 inputs whose worst-case UTF-8 expansion fits this many bytes are
/// transcoded on the stack; larger inputs borrow a pooled buffer.
pub const TEXT_STACK_LIMIT: usize = 1024;

/// Idle transcode buffers kept around between large-text writes.
const POOL_MAX_IDLE: usize = 4;

lazy_static! {
    /// Shared pool of transcode buffers for the oversized-text path, so that
    /// repeated large writes do not allocate fresh memory each call.
    static ref TRANSCODE_POOL: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());
}

/// A network endpoint the formatter knows how to render.
///
/// IPv4 sockets render as `a.b.c.d:port`, IPv6 sockets as `[addr]:port`
/// (RFC 5952 compressed form), and hostname pairs as `host:port`. Hostnames
/// are copied byte-for-byte; non-ASCII hostnames produce garbled output and
/// are out of scope rather than detected.
#[derive(Clone, Copy, Debug)]
pub enum Endpoint<'a> {
    /// A resolved IPv4 or IPv6 socket address.
    Socket(SocketAddr),
    /// An unresolved hostname and port.
    Host { host: &'a str, port: u16 },
}

/// Renders an unsigned 64-bit value as canonical decimal text.
///
/// No leading zeros are produced except for the value `0` itself.
///
/// # Examples
///
/// ```
/// # use mmap_logger::formatter::{format_u64, U64_TEXT_MAX};
/// let mut buf = [0u8; U64_TEXT_MAX];
/// let len = format_u64(1234, &mut buf).unwrap();
/// assert_eq!(&buf[..len], b"1234");
/// ```
pub fn format_u64(value: u64, buf: &mut [u8]) -> Result<usize> {
    encode_unsigned(value, buf)
}

/// Renders a signed 64-bit value as canonical decimal text with sign.
///
/// # Examples
///
/// ```
/// # use mmap_logger::formatter::{format_i64, I64_TEXT_MAX};
/// let mut buf = [0u8; I64_TEXT_MAX];
/// let len = format_i64(-42, &mut buf).unwrap();
/// assert_eq!(&buf[..len], b"-42");
/// ```
pub fn format_i64(value: i64, buf: &mut [u8]) -> Result<usize> {
    if value >= 0 {
        return encode_unsigned(value as u64, buf);
    }
    if buf.is_empty() {
        return Err(Error::FormatBuffer {
            field: "integer",
            needed: 2,
            available: 0,
        });
    }
    buf[0] = b'-';
    let digits = encode_unsigned(value.unsigned_abs(), &mut buf[1..])?;
    Ok(digits + 1)
}

/// Renders a `u8`. See [`format_u64`].
pub fn format_u8(value: u8, buf: &mut [u8]) -> Result<usize> {
    encode_unsigned(u64::from(value), buf)
}

/// Renders a `u16`. See [`format_u64`].
pub fn format_u16(value: u16, buf: &mut [u8]) -> Result<usize> {
    encode_unsigned(u64::from(value), buf)
}

/// Renders a `u32`. See [`format_u64`].
pub fn format_u32(value: u32, buf: &mut [u8]) -> Result<usize> {
    encode_unsigned(u64::from(value), buf)
}

/// Renders an `i8`. See [`format_i64`].
pub fn format_i8(value: i8, buf: &mut [u8]) -> Result<usize> {
    format_i64(i64::from(value), buf)
}

/// Renders an `i16`. See [`format_i64`].
pub fn format_i16(value: i16, buf: &mut [u8]) -> Result<usize> {
    format_i64(i64::from(value), buf)
}

/// Renders an `i32`. See [`format_i64`].
pub fn format_i32(value: i32, buf: &mut [u8]) -> Result<usize> {
    format_i64(i64::from(value), buf)
}

/// Renders an `f64` in shortest round-trippable decimal form.
///
/// Goes through `Display` with a fixed-capacity adapter, so no heap
/// allocation takes place.
pub fn format_f64(value: f64, buf: &mut [u8]) -> Result<usize> {
    let available = buf.len();
    let mut writer = FixedWriter::new(buf);
    write!(writer, "{value}").map_err(|_| Error::FormatBuffer {
        field: "float",
        needed: FLOAT_TEXT_MAX,
        available,
    })?;
    Ok(writer.len())
}

/// Renders an `f32`. See [`format_f64`].
pub fn format_f32(value: f32, buf: &mut [u8]) -> Result<usize> {
    let available = buf.len();
    let mut writer = FixedWriter::new(buf);
    write!(writer, "{value}").map_err(|_| Error::FormatBuffer {
        field: "float",
        needed: FLOAT_TEXT_MAX,
        available,
    })?;
    Ok(writer.len())
}

/// Renders a boolean as the pre-rendered literal `True` or `False`.
pub fn format_bool(value: bool, buf: &mut [u8]) -> Result<usize> {
    let literal = if value { BOOL_TRUE } else { BOOL_FALSE };
    put(buf, 0, literal, "boolean")
}

/// Renders a calendar date as `YYYY-MM-DD`.
///
/// # Examples
///
/// ```
/// # use mmap_logger::formatter::{format_date, DATE_TEXT_LEN};
/// # use time::{Date, Month};
/// let date = Date::from_calendar_date(2023, Month::December, 25).unwrap();
/// let mut buf = [0u8; DATE_TEXT_LEN];
/// let len = format_date(date, &mut buf).unwrap();
/// assert_eq!(&buf[..len], b"2023-12-25");
/// ```
pub fn format_date(date: Date, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < DATE_TEXT_LEN {
        return Err(Error::FormatBuffer {
            field: "date",
            needed: DATE_TEXT_LEN,
            available: buf.len(),
        });
    }
    // Log timestamps are four-digit years.
    pad4(&mut buf[0..4], date.year().clamp(0, 9999) as u16);
    buf[4] = b'-';
    pad2(&mut buf[5..7], date.month() as u8);
    buf[7] = b'-';
    pad2(&mut buf[8..10], date.day());
    Ok(DATE_TEXT_LEN)
}

/// Renders a wall-clock time as `HH:MM:SS`.
pub fn format_time(time: Time, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < TIME_TEXT_LEN {
        return Err(Error::FormatBuffer {
            field: "time",
            needed: TIME_TEXT_LEN,
            available: buf.len(),
        });
    }
    pad2(&mut buf[0..2], time.hour());
    buf[2] = b':';
    pad2(&mut buf[3..5], time.minute());
    buf[5] = b':';
    pad2(&mut buf[6..8], time.second());
    Ok(TIME_TEXT_LEN)
}

/// Renders a wall-clock time as `HH:MM:SS.mmm`.
pub fn format_time_ms(time: Time, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < TIME_MS_TEXT_LEN {
        return Err(Error::FormatBuffer {
            field: "time",
            needed: TIME_MS_TEXT_LEN,
            available: buf.len(),
        });
    }
    format_time(time, buf)?;
    buf[8] = b'.';
    pad3(&mut buf[9..12], time.millisecond());
    Ok(TIME_MS_TEXT_LEN)
}

/// Renders a bracketed line-prefix timestamp, `[YYYY-MM-DD HH:MM:SS] `.
///
/// The trailing space is part of the rendered form so the stamp can directly
/// prefix a message on the same logical line.
pub fn format_timestamp(stamp: PrimitiveDateTime, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < TIMESTAMP_TEXT_LEN {
        return Err(Error::FormatBuffer {
            field: "timestamp",
            needed: TIMESTAMP_TEXT_LEN,
            available: buf.len(),
        });
    }
    buf[0] = b'[';
    format_date(stamp.date(), &mut buf[1..11])?;
    buf[11] = b' ';
    format_time(stamp.time(), &mut buf[12..20])?;
    buf[20] = b']';
    buf[21] = b' ';
    Ok(TIMESTAMP_TEXT_LEN)
}

/// Renders a network endpoint.
///
/// # Examples
///
/// ```
/// # use mmap_logger::formatter::{format_endpoint, Endpoint, ENDPOINT_TEXT_MAX};
/// let endpoint: Endpoint = Endpoint::Socket("127.0.0.1:1234".parse().unwrap());
/// let mut buf = [0u8; ENDPOINT_TEXT_MAX];
/// let len = format_endpoint(&endpoint, &mut buf).unwrap();
/// assert_eq!(&buf[..len], b"127.0.0.1:1234");
/// ```
pub fn format_endpoint(endpoint: &Endpoint<'_>, buf: &mut [u8]) -> Result<usize> {
    let mut pos = 0;
    match endpoint {
        Endpoint::Socket(SocketAddr::V4(v4)) => {
            for (index, octet) in v4.ip().octets().iter().enumerate() {
                if index > 0 {
                    pos += put(buf, pos, b".", "address")?;
                }
                pos += encode_field(u64::from(*octet), buf, pos, "address")?;
            }
            pos += put(buf, pos, b":", "port")?;
            pos += encode_field(u64::from(v4.port()), buf, pos, "port")?;
        }
        Endpoint::Socket(SocketAddr::V6(v6)) => {
            pos += put(buf, pos, b"[", "address")?;
            pos += encode_v6(v6.ip(), buf, pos)?;
            pos += put(buf, pos, b"]:", "port")?;
            pos += encode_field(u64::from(v6.port()), buf, pos, "port")?;
        }
        Endpoint::Host { host, port } => {
            pos += put(buf, pos, host.as_bytes(), "host")?;
            pos += put(buf, pos, b":", "port")?;
            pos += encode_field(u64::from(*port), buf, pos, "port")?;
        }
    }
    Ok(pos)
}

/// Transcodes UTF-16 code units into UTF-8 bytes in `out`.
///
/// Unpaired surrogates are replaced with U+FFFD rather than rejected; this is
/// the lossy, explicitly opt-in companion to the zero-copy `&str` path.
pub fn transcode_utf16(units: &[u16], out: &mut [u8]) -> Result<usize> {
    let mut pos = 0;
    for decoded in char::decode_utf16(units.iter().copied()) {
        let ch = decoded.unwrap_or(char::REPLACEMENT_CHARACTER);
        let len = ch.len_utf8();
        if pos + len > out.len() {
            return Err(Error::FormatBuffer {
                field: "text",
                needed: len,
                available: out.len() - pos,
            });
        }
        ch.encode_utf8(&mut out[pos..]);
        pos += len;
    }
    Ok(pos)
}

/// Borrows a transcode buffer from the shared pool, or a fresh one if the
/// pool is empty.
pub(crate) fn take_transcode_buffer() -> Vec<u8> {
    TRANSCODE_POOL.lock().pop().unwrap_or_default()
}

/// Returns a transcode buffer to the pool, keeping its capacity for reuse.
pub(crate) fn return_transcode_buffer(mut buf: Vec<u8>) {
    buf.clear();
    let mut pool = TRANSCODE_POOL.lock();
    if pool.len() < POOL_MAX_IDLE {
        pool.push(buf);
    }
}

/// Fixed-capacity `fmt::Write` adapter over a caller-supplied byte slice.
///
/// Backs the float and IPv6 rendering paths, which reuse the std `Display`
/// machinery without allocating.
struct FixedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> FixedWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl fmt::Write for FixedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.len + bytes.len() > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

fn encode_unsigned(mut value: u64, buf: &mut [u8]) -> Result<usize> {
    // Render backwards into a scratch array, then copy the used tail.
    let mut digits = [0u8; U64_TEXT_MAX];
    let mut start = digits.len();
    loop {
        start -= 1;
        digits[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    let len = digits.len() - start;
    if buf.len() < len {
        return Err(Error::FormatBuffer {
            field: "integer",
            needed: len,
            available: buf.len(),
        });
    }
    buf[..len].copy_from_slice(&digits[start..]);
    Ok(len)
}

fn encode_field(value: u64, buf: &mut [u8], pos: usize, field: &'static str) -> Result<usize> {
    if pos > buf.len() {
        return Err(Error::FormatBuffer {
            field,
            needed: 1,
            available: 0,
        });
    }
    encode_unsigned(value, &mut buf[pos..]).map_err(|err| match err {
        Error::FormatBuffer {
            needed, available, ..
        } => Error::FormatBuffer {
            field,
            needed,
            available,
        },
        other => other,
    })
}

fn encode_v6(addr: &std::net::Ipv6Addr, buf: &mut [u8], pos: usize) -> Result<usize> {
    let available = buf.len().saturating_sub(pos);
    let mut writer = FixedWriter::new(&mut buf[pos..]);
    write!(writer, "{addr}").map_err(|_| Error::FormatBuffer {
        field: "address",
        needed: 45,
        available,
    })?;
    Ok(writer.len())
}

fn put(buf: &mut [u8], pos: usize, bytes: &[u8], field: &'static str) -> Result<usize> {
    let end = pos + bytes.len();
    if end > buf.len() {
        return Err(Error::FormatBuffer {
            field,
            needed: bytes.len(),
            available: buf.len().saturating_sub(pos),
        });
    }
    buf[pos..end].copy_from_slice(bytes);
    Ok(bytes.len())
}

fn pad2(buf: &mut [u8], value: u8) {
    buf[0] = b'0' + value / 10;
    buf[1] = b'0' + value % 10;
}

fn pad3(buf: &mut [u8], value: u16) {
    buf[0] = b'0' + (value / 100 % 10) as u8;
    buf[1] = b'0' + (value / 10 % 10) as u8;
    buf[2] = b'0' + (value % 10) as u8;
}

fn pad4(buf: &mut [u8], value: u16) {
    buf[0] = b'0' + (value / 1000 % 10) as u8;
    buf[1] = b'0' + (value / 100 % 10) as u8;
    buf[2] = b'0' + (value / 10 % 10) as u8;
    buf[3] = b'0' + (value % 10) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcode_pool_reuses_buffers() {
        let mut buf = take_transcode_buffer();
        buf.extend_from_slice(b"scratch");
        let capacity = buf.capacity();
        return_transcode_buffer(buf);

        let reused = take_transcode_buffer();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= capacity);
        return_transcode_buffer(reused);
    }

    #[test]
    fn pool_is_bounded() {
        let buffers: Vec<_> = (0..16).map(|_| take_transcode_buffer()).collect();
        for buf in buffers {
            return_transcode_buffer(buf);
        }
        assert!(TRANSCODE_POOL.lock().len() <= POOL_MAX_IDLE);
    }
}
