//! The `chunkcsv` crate provides a streaming, chunked CSV/DSV parser.
//!
//! # Primary Focuses
//!
//! chunkcsv is built for arbitrarily large delimited files read in bounded
//! memory. The source — a memory-mapped file or any blocking byte stream —
//! is consumed in fixed-size chunks on a dedicated worker thread, tokenized
//! by a character-class state machine, and delivered to the calling thread
//! as rows whose fields are views over the chunk's bytes. Only fields
//! containing escaped quotes ever allocate, and only on first access.
//!
//! - **Bounded memory**: a multi-gigabyte file is parsed one chunk at a
//!   time; rows you drop release their chunk.
//! - **Thread-decoupled**: disk reads and parsing overlap with your
//!   consumption of the rows.
//! - **Zero copy by default**: field access yields views into the mapped or
//!   buffered source bytes.
//! - **Tolerant of real-world files**: mixed `\r\n`/`\n`/`\r` newlines,
//!   unescaped interior quotes, missing trailing newlines, and UTF-8 byte
//!   order marks are absorbed rather than rejected.
//!
//! # Supported Features
//!
//! `chunkcsv` parses [RFC 4180](https://datatracker.ietf.org/doc/html/rfc4180)
//! with deliberate relaxations, plus:
//!
//! - Delimiter and header-row auto-detection ([`Format::guess`])
//! - Whitespace trimming with a configurable byte set
//! - Per-field type classification and checked numeric conversion
//! - Row serialization to JSON
//! - An RFC 4180 writer ([`DelimWriter`])
//!
//! # Examples
//!
//! ```
//! use chunkcsv::{parse, Format};
//!
//! let rows = parse("name,age\nalice,30\nbob,25\n", Format::new())?;
//! assert_eq!(rows.len(), 2);
//! assert_eq!(rows[0].get("name")?.as_str(), "alice");
//! assert_eq!(rows[0].get("age")?.get::<i32>()?, 30);
//! # Ok::<(), chunkcsv::Error>(())
//! ```
//!
//! Reading a large file without loading it:
//!
//! ```no_run
//! use chunkcsv::{Format, Reader};
//!
//! let mut reader = Reader::from_path("huge.csv", Format::guess())?;
//! for row in reader.rows() {
//!     let row = row?;
//!     if row.field(2)?.is_num() {
//!         println!("{}", row.to_json());
//!     }
//! }
//! # Ok::<(), chunkcsv::Error>(())
//! ```

#![deny(missing_docs)]

mod chunk;
mod columns;
mod detect;
mod driver;
mod error;
mod fields;
mod flags;
mod format;
mod parser;
mod queue;
mod reader;
mod row;
mod source;
mod types;
mod writer;

pub use error::{Error, Result};
pub use format::{Format, VariableColumnPolicy};
pub use reader::{Reader, Rows, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use row::{Field, Fields, FromField, Row};
pub use types::DataType;
pub use writer::{DelimWriter, QuoteStyle, WriteRecord, WriteValue};

/// Parse an in-memory CSV string into a vector of rows.
///
/// Auto-detection works here too: with a multi-delimiter format the buffer
/// itself serves as the detection window.
///
/// # Example
///
/// ```
/// use chunkcsv::{parse, Format};
///
/// let rows = parse("a|b\n1|2\n", Format::guess())?;
/// assert_eq!(rows[0].to_vec(), ["1", "2"]);
/// # Ok::<(), chunkcsv::Error>(())
/// ```
pub fn parse(input: impl Into<Vec<u8>>, format: Format) -> Result<Vec<Row>> {
    let input = input.into();
    let mut format = format;
    format.validate()?;
    if format.needs_guess() {
        let head_len = input.len().min(500_000);
        let guess = detect::guess_format(&input[..head_len], &format);
        format.delimiters = vec![guess.delimiter];
        format.header = Some(guess.header);
    }

    let mut reader = Reader::from_reader(std::io::Cursor::new(input), format)?;
    let mut rows = Vec::new();
    while let Some(row) = reader.read_row()? {
        rows.push(row);
    }
    Ok(rows)
}

/// Return a source's column names without reading it fully.
///
/// # Example
///
/// ```no_run
/// use chunkcsv::{get_col_names, Format};
///
/// let names = get_col_names("data.csv", Format::guess())?;
/// # Ok::<(), chunkcsv::Error>(())
/// ```
pub fn get_col_names(path: impl AsRef<std::path::Path>, format: Format) -> Result<Vec<String>> {
    let reader = Reader::from_path(path, format)?;
    Ok(reader.col_names())
}
