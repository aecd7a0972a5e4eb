use std::fs;
use std::sync::Once;

use mmap_logger::{
    log_line, Endpoint, Error, MappedLogWriter, FLUSH_THRESHOLD_BYTES, NEWLINE,
    REMAP_INTERVAL_BYTES,
};
use time::{Date, Month, Time};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

#[test]
fn append_persists_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.log");

    let writer = MappedLogWriter::open(&path).unwrap();
    writer.write(b"first session\n").unwrap();
    writer.close().unwrap();

    let writer = MappedLogWriter::open(&path).unwrap();
    writer.write(b"second session\n").unwrap();
    writer.close().unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "first session\nsecond session\n"
    );
}

#[test]
fn close_truncates_slack_to_logical_length() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncate.log");

    let writer = MappedLogWriter::open(&path).unwrap();
    writer.write(b"exactly these bytes").unwrap();

    // While open, the physical file carries slack beyond the logical length.
    assert!(fs::metadata(&path).unwrap().len() > 19);

    writer.close().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 19);
}

#[test]
fn flush_makes_bytes_visible_without_close() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("visible.log")).unwrap();

    writer.write(b"pending line\n").unwrap();
    writer.flush().unwrap();

    assert_eq!(writer.unflushed_bytes(), 0);
    assert_eq!(writer.read_current().unwrap(), "pending line\n");
}

#[test]
fn empty_write_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("noop.log")).unwrap();

    writer.write(b"seed").unwrap();
    let position = writer.position();
    let unflushed = writer.unflushed_bytes();

    writer.write(b"").unwrap();

    assert_eq!(writer.position(), position);
    assert_eq!(writer.unflushed_bytes(), unflushed);
}

#[test]
fn empty_path_is_rejected() {
    match MappedLogWriter::open("") {
        Err(Error::EmptyPath) => {}
        Err(other) => panic!("expected EmptyPath, got {other:?}"),
        Ok(_) => panic!("expected EmptyPath, got an open writer"),
    }
}

#[test]
fn gated_writes_can_cross_the_flush_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("gated-flush.log")).unwrap();

    // Holding the record gate must not block the internal flush that a large
    // write triggers.
    let token = writer.gate().acquire();
    let record = vec![b'y'; FLUSH_THRESHOLD_BYTES + 1];
    writer.write(&record).unwrap();
    writer.write(b" tail").unwrap();
    drop(token);

    assert_eq!(writer.position(), FLUSH_THRESHOLD_BYTES + 1 + 5);
    // The threshold crossing claimed a flush; only the tail is unsynced.
    assert_eq!(writer.unflushed_bytes(), 5);
}

#[test]
fn writes_after_close_fail() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("closed.log")).unwrap();
    writer.close().unwrap();

    match writer.write(b"late") {
        Err(Error::Closed) => {}
        other => panic!("expected Closed, got {other:?}"),
    }

    // Close stays idempotent.
    writer.close().unwrap();
    assert!(!writer.is_open());
}

#[test]
fn typed_writes_compose_a_line() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("typed.log")).unwrap();

    writer.write_str("peer ").unwrap();
    writer
        .write_endpoint(&Endpoint::Socket("10.0.0.7:9000".parse().unwrap()))
        .unwrap();
    writer.write_str(" sent ").unwrap();
    writer.write_u64(8192).unwrap();
    writer.write_str(" bytes, compressed: ").unwrap();
    writer.write_bool(false).unwrap();
    writer.write_newline().unwrap();

    let mut expected = String::from("peer 10.0.0.7:9000 sent 8192 bytes, compressed: False");
    expected.push_str(std::str::from_utf8(NEWLINE).unwrap());
    assert_eq!(writer.read_current().unwrap(), expected);
}

#[test]
fn date_and_time_writes_render_fixed_width() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("dates.log")).unwrap();

    let date = Date::from_calendar_date(2023, Month::December, 25).unwrap();
    let time = Time::from_hms_milli(13, 14, 15, 678).unwrap();

    writer.write_date(date).unwrap();
    writer.write_str(" ").unwrap();
    writer.write_time(time).unwrap();
    writer.write_str(" ").unwrap();
    writer.write_time_ms(time).unwrap();
    writer.write_str(" ").unwrap();
    writer.write_timestamp(date.with_time(time)).unwrap();

    assert_eq!(
        writer.read_current().unwrap(),
        "2023-12-25 13:14:15 13:14:15.678 [2023-12-25 13:14:15] "
    );
}

#[test]
fn timestamped_lines_match_the_bracketed_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stamped.log");
    let writer = MappedLogWriter::open(&path).unwrap();

    log_line!(writer, "startup complete").unwrap();
    writer.close().unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let line = content.lines().next().unwrap();
    let stamp = &line.as_bytes()[..22];

    assert_eq!(stamp[0], b'[');
    assert_eq!(stamp[21], b' ');
    assert_eq!(stamp[20], b']');
    assert_eq!(stamp[5], b'-');
    assert_eq!(stamp[8], b'-');
    assert_eq!(stamp[11], b' ');
    assert_eq!(stamp[14], b':');
    assert_eq!(stamp[17], b':');
    assert!(line.ends_with("startup complete"));
}

#[test]
fn utf16_text_uses_stack_and_pooled_paths() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("utf16.log")).unwrap();

    // Small input: stack path.
    let small: Vec<u16> = "naïve message".encode_utf16().collect();
    writer.write_utf16(&small).unwrap();

    // Large input: worst-case expansion exceeds the stack limit, so this
    // exercises the pooled path.
    let big_text = "é".repeat(2000);
    let big: Vec<u16> = big_text.encode_utf16().collect();
    writer.write_utf16(&big).unwrap();

    let content = writer.read_current().unwrap();
    assert!(content.starts_with("naïve message"));
    assert!(content.ends_with(&big_text));
    assert_eq!(content.len(), "naïve message".len() + big_text.len());
}

#[test]
fn sustained_writes_grow_the_mapping_and_truncate_cleanly() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("growth.log");
    let writer = MappedLogWriter::open(&path).unwrap();

    let chunk = [b'x'; 16 * 1024];
    let chunks = (REMAP_INTERVAL_BYTES + REMAP_INTERVAL_BYTES / 4) / chunk.len();
    for _ in 0..chunks {
        writer.write(&chunk).unwrap();
    }
    let written = chunks * chunk.len();
    assert_eq!(writer.position(), written);

    // Growth happened at least once: the initial slack could not have held
    // this much, so the mapping must now reach past everything written.
    assert!(writer.capacity().unwrap() > written);

    writer.close().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len() as usize, written);
    let content = fs::read(&path).unwrap();
    assert!(content.iter().all(|&b| b == b'x'));
}

#[test]
fn reopen_after_growth_resumes_at_logical_length() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resume.log");

    let writer = MappedLogWriter::open(&path).unwrap();
    writer.write(b"before close\n").unwrap();
    writer.close().unwrap();

    let writer = MappedLogWriter::open(&path).unwrap();
    assert_eq!(writer.position(), "before close\n".len());
    writer.write(b"after reopen\n").unwrap();
    writer.close().unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "before close\nafter reopen\n"
    );
}

#[test]
fn read_current_is_empty_when_nothing_written() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MappedLogWriter::open(dir.path().join("empty.log")).unwrap();
    assert_eq!(writer.read_current().unwrap(), "");
}

#[test]
fn drop_flushes_and_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.log");

    {
        let writer = MappedLogWriter::open(&path).unwrap();
        writer.write(b"not explicitly closed\n").unwrap();
    }

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "not explicitly closed\n"
    );
}
