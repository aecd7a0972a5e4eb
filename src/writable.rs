use time::{Date, PrimitiveDateTime, Time};

use crate::error::Result;
use crate::formatter::Endpoint;
use crate::mapped_writer::MappedLogWriter;

/// A value the writer knows how to append as text.
///
/// This is the dispatch point for the `log_line!` macro: each implementation
/// routes to the matching typed write operation, so macro call sites stay on
/// the allocation-free path.
pub trait Writable {
    /// Appends self to the writer in its canonical text form.
    fn write_to(&self, writer: &MappedLogWriter) -> Result<()>;
}

macro_rules! writable_via {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl Writable for $ty {
                fn write_to(&self, writer: &MappedLogWriter) -> Result<()> {
                    writer.$method(*self)
                }
            }
        )*
    };
}

writable_via!(
    u8 => write_u8,
    u16 => write_u16,
    u32 => write_u32,
    u64 => write_u64,
    i8 => write_i8,
    i16 => write_i16,
    i32 => write_i32,
    i64 => write_i64,
    f32 => write_f32,
    f64 => write_f64,
    bool => write_bool,
    Date => write_date,
    Time => write_time,
    PrimitiveDateTime => write_timestamp,
);

impl Writable for &str {
    fn write_to(&self, writer: &MappedLogWriter) -> Result<()> {
        writer.write_str(self)
    }
}

impl Writable for Endpoint<'_> {
    fn write_to(&self, writer: &MappedLogWriter) -> Result<()> {
        writer.write_endpoint(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_render_through_the_typed_path() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MappedLogWriter::open(dir.path().join("writable.log")).unwrap();

        12345i32.write_to(&writer).unwrap();
        " ".write_to(&writer).unwrap();
        true.write_to(&writer).unwrap();
        " ".write_to(&writer).unwrap();
        3.5f64.write_to(&writer).unwrap();

        assert_eq!(writer.read_current().unwrap(), "12345 True 3.5");
    }

    #[test]
    fn endpoint_renders_host_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MappedLogWriter::open(dir.path().join("endpoint.log")).unwrap();

        let endpoint = Endpoint::Host {
            host: "db.internal",
            port: 5432,
        };
        endpoint.write_to(&writer).unwrap();

        assert_eq!(writer.read_current().unwrap(), "db.internal:5432");
    }
}
