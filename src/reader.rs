//! The streaming reader: worker-side parsing, consumer-side row delivery.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use log::debug;
use parking_lot::Mutex;

use crate::columns::{ColNames, SharedColNames};
use crate::detect::{guess_format, HEAD_WINDOW};
use crate::driver::ChunkDriver;
use crate::error::{Error, Result};
use crate::format::{Format, VariableColumnPolicy};
use crate::parser::{parse_buffer, Tokenizer};
use crate::queue::WaitDeque;
use crate::row::Row;
use crate::source::{ChunkSource, MmapSource, ReadSource};

/// Smallest accepted chunk size. A chunk must be able to hold at least one
/// maximum-sized row plus carryover; anything smaller risks a live-lock on
/// oversized rows.
pub const MIN_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Chunk size used unless overridden with [`Reader::set_chunk_size`].
pub const DEFAULT_CHUNK_SIZE: usize = MIN_CHUNK_SIZE;

/// State shared between the consumer and the parse worker.
struct Shared {
    queue: WaitDeque<Row>,
    error: Mutex<Option<Error>>,
    shutdown: AtomicBool,
    eof: AtomicBool,
    utf8_bom: AtomicBool,
    /// Whether the last tick consumed bytes or parsed rows (including rows
    /// held in the header staging area). Distinguishes "nothing visible yet"
    /// from "a row does not fit the chunk".
    progress: AtomicBool,
}

/// Streaming CSV reader.
///
/// Chunks of the source are parsed on a dedicated worker thread while the
/// calling thread consumes rows; iteration is strictly single-pass. A [`Row`]
/// handed out stays valid for as long as the caller keeps it (it pins its
/// chunk), but the reader does not retain chunks the iteration has moved
/// past.
///
/// # Example
///
/// ```no_run
/// use chunkcsv::{Format, Reader};
///
/// let mut reader = Reader::from_path("data.csv", Format::guess())?;
/// while let Some(row) = reader.read_row()? {
///     println!("{}", row.field(0)?.as_str());
/// }
/// # Ok::<(), chunkcsv::Error>(())
/// ```
pub struct Reader {
    shared: Arc<Shared>,
    driver: Arc<Mutex<ChunkDriver>>,
    worker: Option<JoinHandle<()>>,
    col_names: SharedColNames,
    format: Format,
    chunk_size: usize,
    n_rows: u64,
    read_requested: bool,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("format", &self.format)
            .field("chunk_size", &self.chunk_size)
            .field("n_rows", &self.n_rows)
            .finish_non_exhaustive()
    }
}

impl Reader {
    /// Open a file for chunked reading.
    ///
    /// The first ~500 KiB are scanned up front: delimiter and header row are
    /// guessed if the format carries several candidate delimiters, and the
    /// column names are extracted from the header row.
    pub fn from_path(path: impl AsRef<Path>, format: Format) -> Result<Self> {
        let mut format = format;
        format.validate()?;

        let mut source = MmapSource::open(path.as_ref())?;
        let head_buf = source.next_chunk(HEAD_WINDOW)?;
        let head = head_buf.as_bytes().to_vec();
        source.rewind(head_buf.as_bytes());
        drop(head_buf);

        if format.needs_guess() {
            let guess = guess_format(&head, &format);
            format.delimiters = vec![guess.delimiter];
            format.header = Some(guess.header);
        }
        let delimiter = format.resolved_delimiter()?;
        let parse_flags = format.parse_flags_for(delimiter);
        let ws_flags = format.ws_flags();

        let col_names: SharedColNames = Arc::new(OnceLock::new());
        if !format.col_names.is_empty() {
            let _ = col_names.set(ColNames::new(format.col_names.clone()));
        } else if let Some(header) = format.header {
            let (rows, _) = parse_buffer(
                head,
                parse_flags,
                ws_flags,
                format.quote,
                format.detect_bom,
                Arc::new(OnceLock::new()),
            );
            if let Some(row) = rows.get(header) {
                debug!("column names: {row:?}");
                let _ = col_names.set(ColNames::new(row.to_vec()));
            }
        }

        let tokenizer = Tokenizer::new(parse_flags, ws_flags, format.quote, format.detect_bom);
        Ok(Self::assemble(
            Box::new(source),
            tokenizer,
            parse_flags,
            col_names,
            format,
        ))
    }

    /// Read from any blocking byte stream.
    ///
    /// Streams cannot be scanned ahead, so the format must carry exactly one
    /// delimiter; column names come from the explicit list or from the header
    /// row once the first chunk is parsed.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, format: Format) -> Result<Self> {
        format.validate()?;
        let delimiter = format.resolved_delimiter()?;
        let parse_flags = format.parse_flags_for(delimiter);
        let ws_flags = format.ws_flags();

        let col_names: SharedColNames = Arc::new(OnceLock::new());
        if !format.col_names.is_empty() {
            let _ = col_names.set(ColNames::new(format.col_names.clone()));
        }

        let tokenizer = Tokenizer::new(parse_flags, ws_flags, format.quote, format.detect_bom);
        Ok(Self::assemble(
            Box::new(ReadSource::new(reader)),
            tokenizer,
            parse_flags,
            col_names,
            format,
        ))
    }

    fn assemble(
        source: Box<dyn ChunkSource>,
        tokenizer: Tokenizer,
        parse_flags: crate::flags::ParseFlagMap,
        col_names: SharedColNames,
        format: Format,
    ) -> Self {
        let driver = ChunkDriver::new(
            source,
            tokenizer,
            parse_flags,
            Arc::clone(&col_names),
            format.header,
            DEFAULT_CHUNK_SIZE,
        );
        Reader {
            shared: Arc::new(Shared {
                queue: WaitDeque::new(),
                error: Mutex::new(None),
                shutdown: AtomicBool::new(false),
                eof: AtomicBool::new(false),
                utf8_bom: AtomicBool::new(false),
                progress: AtomicBool::new(false),
            }),
            driver: Arc::new(Mutex::new(driver)),
            worker: None,
            col_names,
            format,
            chunk_size: DEFAULT_CHUNK_SIZE,
            n_rows: 0,
            read_requested: false,
        }
    }

    /// Pull the next row, parsing further chunks on demand.
    ///
    /// Returns `Ok(None)` at the end of the source. Any error the worker hit
    /// (I/O, mapping, parsing) is rethrown here exactly once, on the call
    /// that observes queue exhaustion.
    pub fn read_row(&mut self) -> Result<Option<Row>> {
        loop {
            if !self.shared.queue.empty() {
                let Some(row) = self.shared.queue.pop_front() else {
                    continue;
                };
                // Any popped row proves the chunk produced output, so the
                // oversized-row guard resets even if this row gets dropped.
                self.read_requested = false;
                let expected = self.col_names.get().map(ColNames::len).unwrap_or(0);
                if expected > 0
                    && row.len() != expected
                    && self.format.variable_columns != VariableColumnPolicy::Keep
                {
                    if self.format.variable_columns == VariableColumnPolicy::Throw {
                        return Err(Error::VariableColumns {
                            expected,
                            got: row.len(),
                        });
                    }
                    continue;
                }
                self.n_rows += 1;
                return Ok(Some(row));
            }

            if self.shared.queue.is_waitable() {
                self.shared.queue.wait();
                continue;
            }

            // The producer is idle. Join it first so every queue push and
            // state store becomes visible, then re-observe.
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
                continue;
            }
            if let Some(err) = self.shared.error.lock().take() {
                // The error is delivered exactly once; afterwards the reader
                // behaves as exhausted.
                self.shared.eof.store(true, Ordering::Release);
                return Err(err);
            }
            if self.shared.eof.load(Ordering::Acquire) {
                return Ok(None);
            }
            if self.read_requested && !self.shared.progress.load(Ordering::Acquire) {
                // The requested chunk produced nothing at all: a single row
                // does not fit the chunk. A tick that parsed rows still held
                // for header trimming is progress, not an oversized row.
                return Err(Error::RowLargerThanChunk {
                    chunk_size: self.chunk_size,
                });
            }
            self.read_requested = true;
            self.spawn_worker();
        }
    }

    /// Iterate over the remaining rows.
    pub fn rows(&mut self) -> Rows<'_> {
        Rows { reader: self }
    }

    /// The column names, in order. Empty until a header has been seen or
    /// names were supplied explicitly.
    pub fn col_names(&self) -> Vec<String> {
        self.col_names
            .get()
            .map(|cols| cols.names().to_vec())
            .unwrap_or_default()
    }

    /// Position of a named column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.col_names.get().and_then(|cols| cols.index_of(name))
    }

    /// Number of columns, once known.
    pub fn n_cols(&self) -> usize {
        self.col_names.get().map(ColNames::len).unwrap_or(0)
    }

    /// Number of data rows handed to the caller so far.
    pub fn n_rows(&self) -> u64 {
        self.n_rows
    }

    /// Whether a UTF-8 byte order mark was stripped from the source.
    pub fn utf8_bom(&self) -> bool {
        self.shared.utf8_bom.load(Ordering::Acquire)
    }

    /// Whether the source is fully parsed.
    pub fn eof(&self) -> bool {
        self.shared.eof.load(Ordering::Acquire)
    }

    /// The reader's resolved format.
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Override the chunk size. Values below [`MIN_CHUNK_SIZE`] are
    /// rejected.
    pub fn set_chunk_size(&mut self, bytes: usize) -> Result<()> {
        if bytes < MIN_CHUNK_SIZE {
            return Err(Error::ChunkTooSmall {
                requested: bytes,
                minimum: MIN_CHUNK_SIZE,
            });
        }
        self.chunk_size = bytes;
        self.driver.lock().set_chunk_size(bytes);
        Ok(())
    }

    /// Start one worker to parse the next chunk. The queue is flagged
    /// waitable *before* the thread exists, so a consumer arriving in
    /// between blocks instead of concluding exhaustion.
    fn spawn_worker(&mut self) {
        let shared = Arc::clone(&self.shared);
        let driver = Arc::clone(&self.driver);
        shared.queue.start_waiters();
        self.worker = Some(std::thread::spawn(move || {
            if !shared.shutdown.load(Ordering::Acquire) {
                let mut driver = driver.lock();
                let result = driver.tick(&shared.queue);
                shared.eof.store(driver.eof(), Ordering::Release);
                shared
                    .utf8_bom
                    .store(driver.utf8_bom(), Ordering::Release);
                drop(driver);
                match result {
                    Ok(progress) => shared.progress.store(progress, Ordering::Release),
                    Err(err) => *shared.error.lock() = Some(err),
                }
            }
            shared.queue.stop_waiters();
        }));
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Single-pass row iterator returned by [`Reader::rows`].
pub struct Rows<'r> {
    reader: &'r mut Reader,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_row().transpose()
    }
}

impl<'r> IntoIterator for &'r mut Reader {
    type Item = Result<Row>;
    type IntoIter = Rows<'r>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows()
    }
}
