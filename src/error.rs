use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors reported by readers, writers, and field accessors.
///
/// Every failure mode is distinct and none are swallowed: configuration
/// problems surface at open time, I/O and parse problems surface on the first
/// read that advances past them, and conversion problems surface only when
/// typed access is requested.
#[derive(Error, Debug)]
pub enum Error {
    /// The quote byte, a candidate delimiter, and/or a trim byte coincide.
    #[error("no overlap allowed between the quote character, the set of possible delimiters and the set of trim characters; offending characters: {}", format_bytes(.0))]
    CharOverlap(Vec<u8>),

    /// A chunk size below the floor was requested.
    #[error("chunk size {requested} is below the minimum of {minimum} bytes")]
    ChunkTooSmall {
        /// The rejected chunk size.
        requested: usize,
        /// The enforced floor.
        minimum: usize,
    },

    /// Explicit column names were combined with a header row.
    #[error("explicit column names cannot be combined with a header row; disable the header with `header_row(None)`")]
    ColumnNamesWithHeader,

    /// A non-seekable source was opened with more than one candidate
    /// delimiter. Delimiter guessing needs a re-readable head window.
    #[error("more than one possible delimiter; auto-detection requires a file source")]
    DelimiterNotResolved,

    /// Opening the underlying file failed.
    #[error("cannot open file {path}: {source}")]
    Open {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Mapping a window of the underlying file failed.
    #[error("cannot map {length} bytes of {path} at offset {offset}: {source}")]
    Map {
        /// File that failed to map.
        path: PathBuf,
        /// Window start.
        offset: u64,
        /// Window length.
        length: usize,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Reading from a byte-stream source failed.
    #[error("cannot read {length} bytes at offset {offset}: {source}")]
    Read {
        /// Stream position at the time of the failure.
        offset: u64,
        /// Requested read length.
        length: usize,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A single row did not fit into one chunk. Raise the chunk size.
    #[error("a row is larger than the chunk size of {chunk_size} bytes; raise it with `set_chunk_size`")]
    RowLargerThanChunk {
        /// The chunk size in effect when the oversized row was found.
        chunk_size: usize,
    },

    /// A row's field count differed from the column count while the
    /// variable-column policy was [`Throw`](crate::VariableColumnPolicy::Throw).
    #[error("expected {expected} columns but row has {got}")]
    VariableColumns {
        /// The reader's column count.
        expected: usize,
        /// The offending row's field count.
        got: usize,
    },

    /// An unknown column name was looked up.
    #[error("no column named {column:?}")]
    NotFound {
        /// The requested column name.
        column: String,
    },

    /// A field index beyond the row length was accessed.
    #[error("field index {index} out of range for a row of {len} fields")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The row's field count.
        len: usize,
    },

    /// A numeric value was requested from a non-numeric field.
    #[error("attempted to convert a {found} value to {requested}")]
    NotANumber {
        /// Classified type of the field.
        found: &'static str,
        /// The requested target type.
        requested: &'static str,
    },

    /// An integer was requested from a floating-point field.
    #[error("attempted to convert a float to {requested}")]
    FloatToInt {
        /// The requested target type.
        requested: &'static str,
    },

    /// An unsigned integer was requested from a negative value.
    #[error("attempted to convert a negative value to {requested}")]
    NegativeToUnsigned {
        /// The requested target type.
        requested: &'static str,
    },

    /// The requested integer type is narrower than the classified type.
    #[error("value of type {found} overflows {requested}")]
    Overflow {
        /// Classified type of the field.
        found: &'static str,
        /// The requested target type.
        requested: &'static str,
    },

    /// The writer's underlying stream failed.
    #[error("write failed: {source}")]
    Write {
        /// Underlying OS error.
        source: io::Error,
    },
}

fn format_bytes(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('\'');
        out.push(*b as char);
        out.push('\'');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_overlap_lists_offenders() {
        let err = Error::CharOverlap(vec![b'"', b',']);
        let msg = err.to_string();
        assert!(msg.contains("'\"'"), "{msg}");
        assert!(msg.contains("','"), "{msg}");
    }

    #[test]
    fn open_error_contains_path() {
        let err = Error::Open {
            path: PathBuf::from("/no/such/file.csv"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/no/such/file.csv"));
    }
}
