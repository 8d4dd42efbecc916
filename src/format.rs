//! Input format configuration.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::flags::{make_parse_flags, make_parse_flags_quoted, make_ws_flags, ParseFlagMap, WhitespaceMap};

/// What a reader does with a row whose field count differs from the column
/// count.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum VariableColumnPolicy {
    /// Fail the read with [`Error::VariableColumns`].
    Throw,
    /// Silently drop the row.
    #[default]
    IgnoreRow,
    /// Hand the row to the caller as-is.
    Keep,
}

/// Describes how to parse a CSV source.
///
/// Construct with [`Format::new`] (RFC 4180 defaults), [`Format::guess`]
/// (delimiter and header auto-detection), or [`Format::rfc4180_strict`]
/// (variable-column rows are errors), then refine with the builder methods.
///
/// # Example
///
/// ```
/// use chunkcsv::Format;
///
/// let format = Format::new().delimiter(b'\t').trim(&[b' ']);
/// assert_eq!(format.get_delimiter(), Some(b'\t'));
/// ```
#[derive(Clone, Debug)]
pub struct Format {
    pub(crate) delimiters: Vec<u8>,
    pub(crate) quote: u8,
    pub(crate) quoting: bool,
    pub(crate) trim: Vec<u8>,
    pub(crate) header: Option<usize>,
    pub(crate) col_names: Vec<String>,
    pub(crate) variable_columns: VariableColumnPolicy,
    pub(crate) detect_bom: bool,
}

impl Default for Format {
    fn default() -> Self {
        Format {
            delimiters: vec![b','],
            quote: b'"',
            quoting: true,
            trim: Vec::new(),
            header: Some(0),
            col_names: Vec::new(),
            variable_columns: VariableColumnPolicy::default(),
            detect_bom: true,
        }
    }
}

/// Candidate delimiters tried by [`Format::guess`].
pub(crate) const GUESS_DELIMITERS: &[u8] = &[b',', b'|', b'\t', b';', b'^', b'~'];

impl Format {
    /// RFC 4180 settings: comma, double quote, header on row 0.
    pub fn new() -> Self {
        Format::default()
    }

    /// Auto-detect the delimiter (and header row) from the head of the file.
    pub fn guess() -> Self {
        Format {
            delimiters: GUESS_DELIMITERS.to_vec(),
            ..Format::default()
        }
    }

    /// RFC 4180 settings with variable-column rows treated as errors.
    pub fn rfc4180_strict() -> Self {
        Format {
            variable_columns: VariableColumnPolicy::Throw,
            ..Format::default()
        }
    }

    /// Use a single known delimiter.
    pub fn delimiter(mut self, delim: u8) -> Self {
        self.delimiters = vec![delim];
        self
    }

    /// Provide several candidate delimiters; more than one enables
    /// auto-detection.
    pub fn delimiters(mut self, delims: &[u8]) -> Self {
        self.delimiters = delims.to_vec();
        self
    }

    /// Set the quote byte.
    pub fn quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self.quoting = true;
        self
    }

    /// Turn quoting off entirely; the quote byte becomes ordinary data.
    pub fn no_quote(mut self) -> Self {
        self.quoting = false;
        self
    }

    /// Bytes to trim from both edges of unquoted fields.
    pub fn trim(mut self, bytes: &[u8]) -> Self {
        self.trim = bytes.to_vec();
        self
    }

    /// Which row holds the column names; `None` means the source has no
    /// header and every row is data.
    pub fn header_row(mut self, row: Option<usize>) -> Self {
        self.header = row;
        self
    }

    /// Supply the column names directly. Requires `header_row(None)`;
    /// combining explicit names with a header row is rejected at open time.
    pub fn column_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.col_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the variable-column policy.
    pub fn variable_columns(mut self, policy: VariableColumnPolicy) -> Self {
        self.variable_columns = policy;
        self
    }

    /// Whether to detect and strip a leading UTF-8 byte order mark.
    pub fn detect_bom(mut self, detect: bool) -> Self {
        self.detect_bom = detect;
        self
    }

    /// The configured delimiter, once resolved to a single byte.
    pub fn get_delimiter(&self) -> Option<u8> {
        match self.delimiters.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// The quote byte, or `None` when quoting is disabled.
    pub fn get_quote(&self) -> Option<u8> {
        self.quoting.then_some(self.quote)
    }

    /// The configured trim bytes.
    pub fn get_trim(&self) -> &[u8] {
        &self.trim
    }

    /// The configured header row.
    pub fn get_header(&self) -> Option<usize> {
        self.header
    }

    /// The explicit column names, if any.
    pub fn get_column_names(&self) -> &[String] {
        &self.col_names
    }

    /// The configured variable-column policy.
    pub fn get_variable_columns(&self) -> VariableColumnPolicy {
        self.variable_columns
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let delims: BTreeSet<u8> = self.delimiters.iter().copied().collect();
        let trims: BTreeSet<u8> = self.trim.iter().copied().collect();

        let mut overlap: BTreeSet<u8> = delims.intersection(&trims).copied().collect();
        if self.quoting && (delims.contains(&self.quote) || trims.contains(&self.quote)) {
            overlap.insert(self.quote);
        }
        if !overlap.is_empty() {
            return Err(Error::CharOverlap(overlap.into_iter().collect()));
        }

        if !self.col_names.is_empty() && self.header.is_some() {
            return Err(Error::ColumnNamesWithHeader);
        }
        Ok(())
    }

    pub(crate) fn needs_guess(&self) -> bool {
        self.delimiters.len() > 1
    }

    pub(crate) fn resolved_delimiter(&self) -> Result<u8> {
        self.get_delimiter().ok_or(Error::DelimiterNotResolved)
    }

    pub(crate) fn parse_flags_for(&self, delimiter: u8) -> ParseFlagMap {
        if self.quoting {
            make_parse_flags_quoted(delimiter, self.quote)
        } else {
            make_parse_flags(delimiter)
        }
    }

    pub(crate) fn ws_flags(&self) -> WhitespaceMap {
        make_ws_flags(&self.trim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_rfc4180() {
        let f = Format::new();
        assert_eq!(f.get_delimiter(), Some(b','));
        assert_eq!(f.get_quote(), Some(b'"'));
        assert_eq!(f.get_header(), Some(0));
        assert_eq!(f.get_variable_columns(), VariableColumnPolicy::IgnoreRow);
        f.validate().unwrap();
    }

    #[test]
    fn overlapping_bytes_are_rejected() {
        let err = Format::new().delimiter(b'"').validate().unwrap_err();
        assert!(matches!(err, Error::CharOverlap(bytes) if bytes == vec![b'"']));

        let err = Format::new().trim(&[b',', b' ']).validate().unwrap_err();
        assert!(matches!(err, Error::CharOverlap(bytes) if bytes == vec![b',']));
    }

    #[test]
    fn quote_overlap_ignored_when_quoting_disabled() {
        Format::new().no_quote().trim(&[b'"']).validate().unwrap();
    }

    #[test]
    fn names_with_header_is_an_error() {
        let err = Format::new()
            .column_names(["a", "b"])
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNamesWithHeader));

        Format::new()
            .header_row(None)
            .column_names(["a", "b"])
            .validate()
            .unwrap();
    }

    #[test]
    fn guess_needs_resolution() {
        let f = Format::guess();
        assert!(f.needs_guess());
        assert_eq!(f.get_delimiter(), None);
        assert!(matches!(
            f.resolved_delimiter(),
            Err(Error::DelimiterNotResolved)
        ));
    }
}
