//! The tokenizer state machine.
//!
//! Consumes one chunk of bytes at a time, emitting completed fields into the
//! chunk's field store and completed rows into the output queue. The return
//! value of [`Tokenizer::parse`] is the offset at which the last *complete*
//! row ended, so the driver can roll any trailing partial row over into the
//! next chunk.
//!
//! Dispatch is a flag-table lookup combined with the in-quote demotion mask,
//! which keeps the hot path on the `NOT_SPECIAL` run scanner. Inside a quoted
//! field every byte except the quote itself is demoted to `NOT_SPECIAL`, so
//! that scan collapses to a single `memchr` for the quote byte.

use std::sync::Arc;

use memchr::memchr;

use crate::chunk::RawChunk;
use crate::fields::RawField;
use crate::flags::{quote_escape_flag, ParseFlag, ParseFlagMap, WhitespaceMap};
use crate::queue::WaitDeque;
use crate::row::Row;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// The row currently being assembled.
struct RowBuilder {
    data_start: usize,
    fields_start: usize,
    len: usize,
    /// Set once any delimiter or quote has been seen in the row, so that a
    /// bare newline run never produces a ghost row while `""` still does.
    saw_content: bool,
}

pub(crate) struct Tokenizer {
    parse_flags: ParseFlagMap,
    ws_flags: WhitespaceMap,
    quote: u8,
    detect_bom: bool,
    bom_scanned: bool,
    utf8_bom: bool,

    chunk: Option<Arc<RawChunk>>,
    row: RowBuilder,
    in_quote: bool,
    field_start: Option<u32>,
    field_len: usize,
    field_has_escaped_quote: bool,
    /// The last flag that could still demand a trailing empty field at
    /// end-of-feed. Whitespace runs do not overwrite it.
    last_flag: ParseFlag,
    /// Rows pushed since `begin_chunk`, counting end-of-feed rows.
    rows_emitted: usize,
}

impl Tokenizer {
    pub(crate) fn new(
        parse_flags: ParseFlagMap,
        ws_flags: WhitespaceMap,
        quote: u8,
        detect_bom: bool,
    ) -> Self {
        Tokenizer {
            parse_flags,
            ws_flags,
            quote,
            detect_bom,
            bom_scanned: !detect_bom,
            utf8_bom: false,
            chunk: None,
            row: RowBuilder {
                data_start: 0,
                fields_start: 0,
                len: 0,
                saw_content: false,
            },
            in_quote: false,
            field_start: None,
            field_len: 0,
            field_has_escaped_quote: false,
            last_flag: ParseFlag::Newline,
            rows_emitted: 0,
        }
    }

    /// Whether a UTF-8 byte order mark was stripped from the source.
    pub(crate) fn utf8_bom(&self) -> bool {
        self.utf8_bom
    }

    /// Rows pushed to the sink since the current chunk was installed.
    pub(crate) fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }

    /// Install the next chunk and reset all per-chunk state. Any partial row
    /// from the previous chunk is expected to reappear at the head of this
    /// one via the driver's rewind.
    pub(crate) fn begin_chunk(&mut self, chunk: Arc<RawChunk>) {
        self.field_start = None;
        self.field_len = 0;
        self.field_has_escaped_quote = false;
        self.in_quote = false;
        self.last_flag = ParseFlag::Newline;
        self.rows_emitted = 0;
        self.row = RowBuilder {
            data_start: 0,
            fields_start: chunk.fields.len(),
            len: 0,
            saw_content: false,
        };
        self.chunk = Some(chunk);
    }

    /// Tokenize the current chunk, pushing completed rows to `out`.
    ///
    /// Returns the byte offset at which the last complete row ended.
    pub(crate) fn parse(&mut self, out: &WaitDeque<Row>) -> usize {
        let chunk = match &self.chunk {
            Some(chunk) => Arc::clone(chunk),
            None => return 0,
        };
        let data = chunk.bytes();
        let mut pos = 0usize;

        if !self.bom_scanned {
            if data.len() >= 3 && data[..3] == UTF8_BOM {
                pos = 3;
                self.utf8_bom = true;
            }
            self.bom_scanned = true;
            self.row.data_start = pos;
        }

        while pos < data.len() {
            let flag = quote_escape_flag(self.parse_flags[data[pos] as usize], self.in_quote);
            match flag {
                ParseFlag::Delimiter => {
                    self.push_field(&chunk);
                    self.last_flag = ParseFlag::Delimiter;
                    pos += 1;
                }

                ParseFlag::Newline => {
                    if self.field_start.is_some()
                        || self.field_len > 0
                        || self.row.len > 0
                        || self.row.saw_content
                    {
                        self.push_field(&chunk);
                        self.push_row(&chunk, out);
                    }
                    // Absorb the whole newline run: CRLF, LFCR, and
                    // pathological mixes are all one record boundary.
                    pos += 1;
                    while pos < data.len()
                        && self.parse_flags[data[pos] as usize] == ParseFlag::Newline
                    {
                        pos += 1;
                    }
                    self.start_row(&chunk, pos);
                    self.last_flag = ParseFlag::Newline;
                }

                ParseFlag::NotSpecial => {
                    self.scan_field(data, &mut pos);
                    if self.field_len > 0 {
                        self.last_flag = ParseFlag::NotSpecial;
                    }
                }

                ParseFlag::Quote => {
                    self.row.saw_content = true;
                    self.last_flag = ParseFlag::Quote;
                    if self.field_len == 0 {
                        self.in_quote = true;
                        // The field proper begins after the quote.
                        self.field_start = None;
                    } else {
                        // Relaxed: an unescaped quote inside an unquoted
                        // field is literal data.
                        self.field_len += 1;
                    }
                    pos += 1;
                }

                ParseFlag::QuoteEscapeQuote => {
                    self.last_flag = ParseFlag::Quote;
                    if pos + 1 == data.len() {
                        // The quote's meaning depends on the next byte;
                        // leave it unconsumed until more data arrives.
                        return self.row.data_start;
                    }
                    let next = self.parse_flags[data[pos + 1] as usize];
                    if next >= ParseFlag::Delimiter {
                        // Closing quote.
                        self.in_quote = false;
                        pos += 1;
                    } else if next == ParseFlag::Quote {
                        // Escaped quote: both bytes stay in the field.
                        if self.field_start.is_none() {
                            self.field_start = Some((pos - self.row.data_start) as u32);
                        }
                        self.field_len += 2;
                        self.field_has_escaped_quote = true;
                        pos += 2;
                    } else {
                        // Relaxed: a lone quote inside a quoted field is
                        // literal data.
                        if self.field_start.is_none() {
                            self.field_start = Some((pos - self.row.data_start) as u32);
                        }
                        self.field_len += 1;
                        pos += 1;
                    }
                }
            }
        }

        self.row.data_start
    }

    /// Materialize the trailing field and row once the source is exhausted.
    ///
    /// A pending field exists if it has any length, or if the last
    /// significant byte was a delimiter or quote: that is what makes a
    /// trailing `a,` produce `["a", ""]` and a lone `""` produce `[""]`.
    pub(crate) fn end_feed(&mut self, out: &WaitDeque<Row>) {
        let chunk = match &self.chunk {
            Some(chunk) => Arc::clone(chunk),
            None => return,
        };
        if self.field_len > 0
            || self.last_flag == ParseFlag::Delimiter
            || self.last_flag == ParseFlag::Quote
        {
            self.push_field(&chunk);
        }
        if self.row.len > 0 {
            self.push_row(&chunk, out);
        }
        self.last_flag = ParseFlag::Newline;
        self.row.saw_content = false;
    }

    fn push_field(&mut self, chunk: &Arc<RawChunk>) {
        let field = RawField {
            start: self.field_start.unwrap_or(0),
            len: self.field_len as u32,
            has_escaped_quote: self.field_has_escaped_quote,
        };
        // SAFETY: the tokenizer is the only producer for this chunk's field
        // store, and the store was sized for the chunk's worst case.
        unsafe { chunk.fields.push(field) };
        self.row.len += 1;
        self.field_start = None;
        self.field_len = 0;
        self.field_has_escaped_quote = false;
    }

    fn push_row(&mut self, chunk: &Arc<RawChunk>, out: &WaitDeque<Row>) {
        out.push_back(Row::new(
            Arc::clone(chunk),
            self.row.data_start,
            self.row.fields_start,
            self.row.len,
        ));
        self.rows_emitted += 1;
        self.row.len = 0;
        self.row.saw_content = false;
    }

    fn start_row(&mut self, chunk: &Arc<RawChunk>, pos: usize) {
        self.row = RowBuilder {
            data_start: pos,
            fields_start: chunk.fields.len(),
            len: 0,
            saw_content: false,
        };
    }

    /// Consume a run of ordinary bytes, trimming whitespace at both edges.
    fn scan_field(&mut self, data: &[u8], pos: &mut usize) {
        if self.field_len == 0 && self.field_start.is_none() {
            while *pos < data.len() && self.ws_flags[data[*pos] as usize] {
                *pos += 1;
            }
        }
        if self.field_start.is_none() {
            self.field_start = Some((*pos - self.row.data_start) as u32);
        }

        if self.in_quote {
            // Demotion leaves the quote as the only stop byte in here.
            match memchr(self.quote, &data[*pos..]) {
                Some(found) => *pos += found,
                None => *pos = data.len(),
            }
        } else {
            while *pos < data.len()
                && self.parse_flags[data[*pos] as usize] == ParseFlag::NotSpecial
            {
                *pos += 1;
            }
        }

        let field_abs_start = self.row.data_start + self.field_start.unwrap_or(0) as usize;
        self.field_len = *pos - field_abs_start;

        // Trailing whitespace shrinks the field, but an all-whitespace field
        // stays empty rather than going negative.
        let mut end = *pos;
        while self.field_len > 0 && end > 0 && self.ws_flags[data[end - 1] as usize] {
            self.field_len -= 1;
            end -= 1;
        }
    }
}

/// Parse a complete in-memory buffer in one shot.
///
/// Used for head-window scanning during format detection and for the
/// in-memory `parse` convenience; the streaming path goes through the chunk
/// driver instead.
pub(crate) fn parse_buffer(
    data: Vec<u8>,
    parse_flags: ParseFlagMap,
    ws_flags: WhitespaceMap,
    quote: u8,
    detect_bom: bool,
    col_names: crate::columns::SharedColNames,
) -> (Vec<Row>, bool) {
    let out = WaitDeque::new();
    let mut tokenizer = Tokenizer::new(parse_flags, ws_flags, quote, detect_bom);
    let chunk = RawChunk::new(
        crate::source::ChunkBuffer::Owned(data),
        parse_flags,
        col_names,
    );
    tokenizer.begin_chunk(chunk);
    tokenizer.parse(&out);
    tokenizer.end_feed(&out);

    let mut rows = Vec::new();
    while let Some(row) = out.pop_front() {
        rows.push(row);
    }
    (rows, tokenizer.utf8_bom())
}
