//! Drives the source → tokenizer loop, one chunk per tick.

use std::sync::Arc;

use log::debug;

use crate::chunk::RawChunk;
use crate::columns::{ColNames, SharedColNames};
use crate::error::Result;
use crate::flags::ParseFlagMap;
use crate::parser::Tokenizer;
use crate::queue::WaitDeque;
use crate::row::Row;
use crate::source::ChunkSource;

/// Fetches chunks, runs the tokenizer, and rolls partial rows forward.
///
/// Rewinding the source by the unfinished-row remainder (rather than keeping
/// an explicit carry buffer) keeps row-start offsets monotone within a chunk,
/// which is what makes row field indexing O(1); a mapped source re-maps the
/// overlapping window cheaply.
pub(crate) struct ChunkDriver {
    source: Box<dyn ChunkSource>,
    tokenizer: Tokenizer,
    parse_flags: ParseFlagMap,
    col_names: SharedColNames,
    header: Option<usize>,
    header_trimmed: bool,
    /// Rows parsed before the header has been trimmed are staged here, so a
    /// consumer polling mid-parse can never pop a header row as data.
    staging: WaitDeque<Row>,
    eof: bool,
    chunk_size: usize,
}

impl ChunkDriver {
    pub(crate) fn new(
        source: Box<dyn ChunkSource>,
        tokenizer: Tokenizer,
        parse_flags: ParseFlagMap,
        col_names: SharedColNames,
        header: Option<usize>,
        chunk_size: usize,
    ) -> Self {
        ChunkDriver {
            source,
            tokenizer,
            parse_flags,
            col_names,
            header,
            header_trimmed: header.is_none(),
            staging: WaitDeque::new(),
            eof: false,
            chunk_size,
        }
    }

    pub(crate) fn eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn utf8_bom(&self) -> bool {
        self.tokenizer.utf8_bom()
    }

    pub(crate) fn set_chunk_size(&mut self, bytes: usize) {
        self.chunk_size = bytes;
    }

    /// Read and parse one chunk, pushing completed rows to `out`.
    ///
    /// Returns whether the chunk made any progress: bytes consumed or rows
    /// parsed, counting rows held back in the header staging area. The
    /// consumer's oversized-row guard fires only on a no-progress tick.
    pub(crate) fn tick(&mut self, out: &WaitDeque<Row>) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        let buf = self.source.next_chunk(self.chunk_size)?;
        if buf.as_bytes().is_empty() {
            self.eof = true;
            if self.header_trimmed {
                self.tokenizer.end_feed(out);
            } else {
                self.tokenizer.end_feed(&self.staging);
            }
            self.finish_header_trim(out);
            return Ok(false);
        }

        let chunk = RawChunk::new(buf, self.parse_flags, Arc::clone(&self.col_names));
        let chunk_len = chunk.bytes().len();
        self.tokenizer.begin_chunk(Arc::clone(&chunk));
        let consumed = if self.header_trimmed {
            self.tokenizer.parse(out)
        } else {
            self.tokenizer.parse(&self.staging)
        };
        let remainder = chunk_len - consumed;

        if self.source.exhausted() {
            self.eof = true;
            if self.header_trimmed {
                self.tokenizer.end_feed(out);
            } else {
                self.tokenizer.end_feed(&self.staging);
            }
        } else if remainder > 0 {
            self.source.rewind(&chunk.bytes()[consumed..]);
        }
        debug!(
            "chunk of {chunk_len} bytes parsed, {remainder} bytes carried over, eof={}",
            self.eof
        );

        self.finish_header_trim(out);
        Ok(consumed > 0 || self.tokenizer.rows_emitted() > 0)
    }

    /// Discard the leading header rows and bind the column names, then make
    /// the staged rows visible.
    fn finish_header_trim(&mut self, out: &WaitDeque<Row>) {
        if self.header_trimmed {
            return;
        }
        let header = self.header.unwrap_or(0);
        if self.staging.len() <= header && !self.eof {
            // Not enough rows yet; keep staging until the next tick.
            return;
        }
        for i in 0..=header {
            match self.staging.pop_front() {
                Some(row) => {
                    if i == header && self.col_names.get().is_none() {
                        let _ = self.col_names.set(ColNames::new(row.to_vec()));
                    }
                }
                None => break,
            }
        }
        self.header_trimmed = true;
        out.append_from(&self.staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::parser::Tokenizer;
    use crate::source::ReadSource;
    use std::io::Cursor;
    use std::sync::OnceLock;

    fn driver_for(input: &[u8], header: Option<usize>, chunk_size: usize) -> (ChunkDriver, SharedColNames) {
        let format = Format::new();
        let flags = format.parse_flags_for(b',');
        let tokenizer = Tokenizer::new(flags, format.ws_flags(), b'"', true);
        let col_names: SharedColNames = Arc::new(OnceLock::new());
        let driver = ChunkDriver::new(
            Box::new(ReadSource::new(Cursor::new(input.to_vec()))),
            tokenizer,
            flags,
            Arc::clone(&col_names),
            header,
            chunk_size,
        );
        (driver, col_names)
    }

    fn run(input: &[u8], header: Option<usize>, chunk_size: usize) -> (Vec<Vec<String>>, Vec<String>) {
        let (mut driver, col_names) = driver_for(input, header, chunk_size);
        let out = WaitDeque::new();
        while !driver.eof() {
            driver.tick(&out).unwrap();
        }
        let mut rows = Vec::new();
        while let Some(row) = out.pop_front() {
            rows.push(row.to_vec());
        }
        let names = col_names
            .get()
            .map(|c| c.names().to_vec())
            .unwrap_or_default();
        (rows, names)
    }

    // Quoted newlines, escaped quotes, empty fields, and a missing trailing
    // newline, pushed through every chunk size large enough to hold the
    // longest row. The row sequence must not depend on where the chunks cut.
    #[test]
    fn row_sequence_is_chunk_size_invariant() {
        let input: &[u8] =
            b"aaa,bbb\nq,\"x\ny\"\ne,\"a\"\"b\"\n,,\nlast,row";
        let baseline = run(input, None, 1 << 20).0;
        assert_eq!(baseline.len(), 5);
        assert_eq!(baseline[1], vec!["q", "x\ny"]);
        assert_eq!(baseline[2], vec!["e", "a\"b"]);
        assert_eq!(baseline[3], vec!["", "", ""]);
        assert_eq!(baseline[4], vec!["last", "row"]);
        for chunk_size in 10..=40 {
            assert_eq!(
                run(input, None, chunk_size).0,
                baseline,
                "chunk_size={chunk_size}"
            );
        }
    }

    #[test]
    fn header_row_is_trimmed_and_bound() {
        let (rows, names) = run(b"h1,h2\n1,2\n3,4\n", Some(0), 1 << 20);
        assert_eq!(names, ["h1", "h2"]);
        assert_eq!(rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn header_beyond_first_chunk_stays_staged() {
        // Small chunks: the header row only completes a tick in, and no row
        // may become visible before the trim happens.
        let (mut driver, col_names) = driver_for(b"junk\nh1,h2\na,b\nc,d\n", Some(1), 10);
        let out = WaitDeque::new();
        while !driver.eof() {
            driver.tick(&out).unwrap();
            if col_names.get().is_none() {
                assert!(out.empty(), "rows leaked before the header trim");
            }
        }
        assert_eq!(col_names.get().unwrap().names(), ["h1", "h2"]);
        let mut rows = Vec::new();
        while let Some(row) = out.pop_front() {
            rows.push(row.to_vec());
        }
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn preset_names_survive_header_trim() {
        let format = Format::new();
        let flags = format.parse_flags_for(b',');
        let tokenizer = Tokenizer::new(flags, format.ws_flags(), b'"', true);
        let col_names: SharedColNames = Arc::new(OnceLock::new());
        let _ = col_names.set(ColNames::new(vec!["x".into(), "y".into()]));
        let mut driver = ChunkDriver::new(
            Box::new(ReadSource::new(Cursor::new(b"h1,h2\n1,2\n".to_vec()))),
            tokenizer,
            flags,
            Arc::clone(&col_names),
            Some(0),
            1 << 20,
        );
        let out = WaitDeque::new();
        while !driver.eof() {
            driver.tick(&out).unwrap();
        }
        // The header row is still discarded but the names stay as given.
        assert_eq!(col_names.get().unwrap().names(), ["x", "y"]);
        assert_eq!(out.pop_front().unwrap().to_vec(), vec!["1", "2"]);
        assert!(out.pop_front().is_none());
    }

    #[test]
    fn oversized_row_makes_no_progress() {
        // A row larger than the chunk rewinds forever at this layer; the
        // no-progress ticks are what let the consumer turn it into an error.
        let (mut driver, _) = driver_for(b"0123456789abcdef,x\n", None, 8);
        let out = WaitDeque::new();
        for _ in 0..3 {
            assert!(!driver.tick(&out).unwrap());
        }
        assert!(out.empty());
        assert!(!driver.eof());
    }

    #[test]
    fn staged_header_rows_count_as_progress() {
        // The first tick completes only the junk row, which stays staged for
        // the header trim. That is still progress, not an oversized row.
        let (mut driver, col_names) = driver_for(b"junk\nh1,h2\na,b\n", Some(1), 10);
        let out = WaitDeque::new();
        assert!(driver.tick(&out).unwrap());
        assert!(out.empty());
        assert!(col_names.get().is_none());
        assert!(driver.tick(&out).unwrap());
        assert_eq!(col_names.get().unwrap().names(), ["h1", "h2"]);
    }

    #[test]
    fn empty_source_reaches_eof_with_no_rows() {
        let (rows, names) = run(b"", Some(0), 1 << 20);
        assert!(rows.is_empty());
        assert!(names.is_empty());
    }
}
