//! Delimiter and header-row auto-detection.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::debug;

use crate::format::Format;
use crate::parser::parse_buffer;
use crate::row::Row;

/// How much of the source's head is scanned for detection and for column
/// names.
pub(crate) const HEAD_WINDOW: usize = 500_000;

pub(crate) struct Guess {
    pub(crate) delimiter: u8,
    pub(crate) header: usize,
}

/// Score one candidate delimiter: parse the head window with it, histogram
/// the row widths, and take the best `width * count` product. A delimiter
/// that splits many rows into many same-width fields wins.
fn score_delimiter(head: &[u8], format: &Format, delimiter: u8) -> (f64, Vec<usize>) {
    let (rows, _) = parse_buffer(
        head.to_vec(),
        format.parse_flags_for(delimiter),
        format.ws_flags(),
        format.quote,
        format.detect_bom,
        Arc::new(OnceLock::new()),
    );
    let widths: Vec<usize> = rows.iter().map(Row::len).collect();

    let mut histogram: HashMap<usize, usize> = HashMap::new();
    for &w in &widths {
        *histogram.entry(w).or_default() += 1;
    }
    let score = histogram
        .iter()
        .map(|(&w, &count)| (w * count) as f64)
        .fold(0.0, f64::max);
    (score, widths)
}

/// Pick the delimiter and header row for a source whose head is `head`.
///
/// The header row is row 0 when it is at least as wide as the dominant data
/// width (the common case of a header equal to or wider than the data);
/// otherwise it is the first row of exactly the dominant width, which skips
/// leading comment or blank lines.
pub(crate) fn guess_format(head: &[u8], format: &Format) -> Guess {
    let mut best_score = f64::MIN;
    let mut best_delim = b',';
    let mut best_widths = Vec::new();
    for &delimiter in &format.delimiters {
        let (score, widths) = score_delimiter(head, format, delimiter);
        if score > best_score {
            best_score = score;
            best_delim = delimiter;
            best_widths = widths;
        }
    }

    let mut histogram: HashMap<usize, usize> = HashMap::new();
    for &w in &best_widths {
        *histogram.entry(w).or_default() += 1;
    }
    // Dominant width: most frequent, widest on ties.
    let mode = histogram
        .iter()
        .max_by_key(|&(&w, &count)| (count, w))
        .map(|(&w, _)| w)
        .unwrap_or(0);

    let header = match best_widths.first() {
        Some(&w0) if w0 >= mode && w0 > 0 => 0,
        _ => best_widths.iter().position(|&w| w == mode).unwrap_or(0),
    };

    debug!(
        "guessed delimiter {:?} (score {best_score}), header row {header}",
        best_delim as char
    );
    Guess {
        delimiter: best_delim,
        header,
    }
}
