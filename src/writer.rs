//! Delimiter-separated output with RFC 4180 escaping.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// When to wrap a written field in quotes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum QuoteStyle {
    /// Quote only fields containing the quote byte, the delimiter, or a
    /// newline byte.
    #[default]
    Minimal,
    /// Quote every field.
    All,
}

/// Writer for delimiter-separated files.
///
/// Fields containing the quote byte, the delimiter, CR, or LF are wrapped in
/// quotes with interior quotes doubled; records end with `\n`. Construct
/// with [`DelimWriter::new`] for CSV, [`DelimWriter::tsv`] for TSV, or
/// [`DelimWriter::with_delimiter`] for anything else.
///
/// # Example
///
/// ```
/// use chunkcsv::DelimWriter;
///
/// let mut out = Vec::new();
/// let mut writer = DelimWriter::new(&mut out);
/// writer.write_record(["a", "b,c", "d\"e"])?;
/// writer.write_row(&(1, 2.5, "x"))?;
/// drop(writer);
/// assert_eq!(out, b"a,\"b,c\",\"d\"\"e\"\n1,2.50000,x\n");
/// # Ok::<(), chunkcsv::Error>(())
/// ```
pub struct DelimWriter<W: Write> {
    out: W,
    delimiter: u8,
    quote: u8,
    style: QuoteStyle,
    flush_on_write: bool,
    decimal_places: usize,
}

impl DelimWriter<BufWriter<File>> {
    /// Create or truncate a file and write to it through a buffer.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(|source| Error::Open {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Ok(DelimWriter::new(BufWriter::new(file)))
    }
}

impl<W: Write> DelimWriter<W> {
    /// CSV writer: comma delimiter, double-quote quote byte.
    pub fn new(out: W) -> Self {
        Self::with_delimiter(out, b',', b'"')
    }

    /// TSV writer.
    pub fn tsv(out: W) -> Self {
        Self::with_delimiter(out, b'\t', b'"')
    }

    /// Writer with arbitrary delimiter and quote bytes.
    pub fn with_delimiter(out: W, delimiter: u8, quote: u8) -> Self {
        DelimWriter {
            out,
            delimiter,
            quote,
            style: QuoteStyle::default(),
            flush_on_write: false,
            decimal_places: 5,
        }
    }

    /// Set the quoting style.
    pub fn quote_style(mut self, style: QuoteStyle) -> Self {
        self.style = style;
        self
    }

    /// Flush after every record instead of relying on the sink's buffering.
    pub fn flush_on_write(mut self, flush: bool) -> Self {
        self.flush_on_write = flush;
        self
    }

    /// Digits written after the decimal point for floating-point values.
    pub fn decimal_places(mut self, places: usize) -> Self {
        self.decimal_places = places;
        self
    }

    /// Write one record from a sequence of values.
    pub fn write_record<I, T>(&mut self, record: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: WriteValue,
    {
        let mut first = true;
        for value in record {
            if !first {
                self.out
                    .write_all(&[self.delimiter])
                    .map_err(|source| Error::Write { source })?;
            }
            first = false;
            let rendered = value.render(self.decimal_places);
            let escaped = self.escape(rendered.as_bytes());
            self.out
                .write_all(&escaped)
                .map_err(|source| Error::Write { source })?;
        }
        self.out
            .write_all(b"\n")
            .map_err(|source| Error::Write { source })?;
        if self.flush_on_write {
            self.flush()?;
        }
        Ok(())
    }

    /// Write one record from a heterogeneous tuple, e.g. `&(1, "a", 2.5)`.
    pub fn write_row<R: WriteRecord>(&mut self, record: &R) -> Result<()> {
        record.write_into(self)
    }

    /// Flush the underlying sink.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|source| Error::Write { source })
    }

    /// Apply the RFC 4180 escape to one rendered field.
    fn escape(&self, field: &[u8]) -> Vec<u8> {
        let needs_quotes = self.style == QuoteStyle::All
            || field
                .iter()
                .any(|&b| b == self.quote || b == self.delimiter || b == b'\r' || b == b'\n');
        if !needs_quotes {
            return field.to_vec();
        }
        let mut out = Vec::with_capacity(field.len() + 2);
        out.push(self.quote);
        for &b in field {
            if b == self.quote {
                out.push(self.quote);
            }
            out.push(b);
        }
        out.push(self.quote);
        out
    }
}

/// A value renderable as one CSV field.
pub trait WriteValue {
    /// Render to text; `decimal_places` applies to floating-point values.
    fn render(&self, decimal_places: usize) -> Cow<'_, str>;
}

impl WriteValue for &str {
    fn render(&self, _: usize) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl WriteValue for String {
    fn render(&self, _: usize) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl WriteValue for Cow<'_, str> {
    fn render(&self, _: usize) -> Cow<'_, str> {
        Cow::Borrowed(self.as_ref())
    }
}

macro_rules! write_value_int {
    ($($t:ty),* $(,)?) => {$(
        impl WriteValue for $t {
            fn render(&self, _: usize) -> Cow<'_, str> {
                Cow::Owned(self.to_string())
            }
        }
    )*};
}

write_value_int!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, isize, usize);

macro_rules! write_value_float {
    ($($t:ty),* $(,)?) => {$(
        impl WriteValue for $t {
            fn render(&self, decimal_places: usize) -> Cow<'_, str> {
                Cow::Owned(format!("{self:.decimal_places$}"))
            }
        }
    )*};
}

write_value_float!(f32, f64);

/// A heterogeneous record writable through [`DelimWriter::write_row`].
pub trait WriteRecord {
    /// Write every element, delimited and escaped, plus the terminator.
    fn write_into<W: Write>(&self, writer: &mut DelimWriter<W>) -> Result<()>;
}

macro_rules! write_record_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: WriteValue),+> WriteRecord for ($($name,)+) {
            fn write_into<W: Write>(&self, writer: &mut DelimWriter<W>) -> Result<()> {
                let fields = [$(self.$idx.render(writer.decimal_places)),+];
                writer.write_record(fields.iter().map(|f| f.as_ref()))
            }
        }
    };
}

write_record_tuple!(A: 0);
write_record_tuple!(A: 0, B: 1);
write_record_tuple!(A: 0, B: 1, C: 2);
write_record_tuple!(A: 0, B: 1, C: 2, D: 3);
write_record_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
write_record_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
write_record_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
write_record_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
