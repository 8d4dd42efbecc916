//! Byte sources feeding the chunk driver.
//!
//! Two variants exist: a memory-mapped moving window over a file, and a
//! generic blocking byte stream. Both hand out one chunk of at most
//! `max_bytes` at a time and support rolling the trailing bytes of an
//! unfinished row over into the next chunk.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::trace;
use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, Result};

/// Offset alignment used for file mappings. Mapping offsets must respect the
/// platform's allocation granularity; 64 KiB covers every target we map on.
const MAP_ALIGN: u64 = 64 * 1024;

/// A page-aligned mapping presenting an offset-exact byte window.
pub(crate) struct MmapWindow {
    mmap: Mmap,
    skip: usize,
    len: usize,
}

impl MmapWindow {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.mmap[self.skip..self.skip + self.len]
    }
}

/// The bytes backing one chunk.
pub(crate) enum ChunkBuffer {
    /// Heap buffer filled from a byte stream.
    Owned(Vec<u8>),
    /// Window of a memory-mapped file.
    Mapped(MmapWindow),
}

impl ChunkBuffer {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            ChunkBuffer::Owned(buf) => buf,
            ChunkBuffer::Mapped(window) => window.as_bytes(),
        }
    }
}

/// Supplies the next chunk of source bytes.
pub(crate) trait ChunkSource: Send {
    /// Produce up to `max_bytes` starting at the current position. An empty
    /// buffer means the source has nothing further.
    fn next_chunk(&mut self, max_bytes: usize) -> Result<ChunkBuffer>;

    /// Roll the given trailing bytes of the last chunk back so they reappear
    /// at the head of the next one.
    fn rewind(&mut self, tail: &[u8]);

    /// Whether every byte of the source has been handed out.
    fn exhausted(&self) -> bool;

    /// Current byte position.
    fn position(&self) -> u64;
}

/// Moving mapped window over a file.
#[derive(Debug)]
pub(crate) struct MmapSource {
    path: PathBuf,
    file: File,
    pos: u64,
    size: u64,
}

impl MmapSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        Ok(MmapSource {
            path: path.to_path_buf(),
            file,
            pos: 0,
            size,
        })
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }
}

impl ChunkSource for MmapSource {
    fn next_chunk(&mut self, max_bytes: usize) -> Result<ChunkBuffer> {
        let len = ((self.size - self.pos) as usize).min(max_bytes);
        if len == 0 {
            return Ok(ChunkBuffer::Owned(Vec::new()));
        }

        // The kernel wants an aligned offset; expose an offset-exact slice.
        let aligned = self.pos - self.pos % MAP_ALIGN;
        let skip = (self.pos - aligned) as usize;
        let mmap = unsafe {
            MmapOptions::new()
                .offset(aligned)
                .len(skip + len)
                .map(&self.file)
        }
        .map_err(|source| Error::Map {
            path: self.path.clone(),
            offset: self.pos,
            length: len,
            source,
        })?;

        trace!("mapped {len} bytes of {:?} at {}", self.path, self.pos);
        self.pos += len as u64;
        Ok(ChunkBuffer::Mapped(MmapWindow { mmap, skip, len }))
    }

    fn rewind(&mut self, tail: &[u8]) {
        debug_assert!(tail.len() as u64 <= self.pos);
        self.pos -= tail.len() as u64;
    }

    fn exhausted(&self) -> bool {
        self.pos == self.size
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

/// Chunked adapter over any blocking reader.
///
/// Streams cannot seek, so rewinding keeps a copy of the rolled-back tail
/// and prepends it to the next chunk.
pub(crate) struct ReadSource<R> {
    reader: R,
    carry: Vec<u8>,
    pos: u64,
    done: bool,
}

impl<R: Read + Send> ReadSource<R> {
    pub(crate) fn new(reader: R) -> Self {
        ReadSource {
            reader,
            carry: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl<R: Read + Send> ChunkSource for ReadSource<R> {
    fn next_chunk(&mut self, max_bytes: usize) -> Result<ChunkBuffer> {
        let mut buf = std::mem::take(&mut self.carry);
        let carried = buf.len();
        if buf.len() < max_bytes && !self.done {
            buf.resize(max_bytes, 0);
            let mut filled = carried;
            while filled < max_bytes {
                match self.reader.read(&mut buf[filled..]) {
                    Ok(0) => {
                        self.done = true;
                        break;
                    }
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(source) => {
                        return Err(Error::Read {
                            offset: self.pos,
                            length: max_bytes - carried,
                            source,
                        });
                    }
                }
            }
            buf.truncate(filled);
        }
        self.pos += (buf.len() - carried) as u64;
        Ok(ChunkBuffer::Owned(buf))
    }

    fn rewind(&mut self, tail: &[u8]) {
        self.carry = tail.to_vec();
    }

    fn exhausted(&self) -> bool {
        self.done && self.carry.is_empty()
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;

    #[test]
    fn read_source_chunks_and_carries() {
        let mut src = ReadSource::new(Cursor::new(b"abcdefghij".to_vec()));
        let chunk = src.next_chunk(4).unwrap();
        assert_eq!(chunk.as_bytes(), b"abcd");
        src.rewind(b"cd");
        let chunk = src.next_chunk(4).unwrap();
        assert_eq!(chunk.as_bytes(), b"cdef");
        let chunk = src.next_chunk(16).unwrap();
        assert_eq!(chunk.as_bytes(), b"ghij");
        assert!(src.exhausted());
        assert!(src.next_chunk(16).unwrap().as_bytes().is_empty());
    }

    #[test]
    fn mmap_source_windows_are_offset_exact() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();

        let mut src = MmapSource::open(tmp.path()).unwrap();
        assert_eq!(src.size(), 10);
        let chunk = src.next_chunk(6).unwrap();
        assert_eq!(chunk.as_bytes(), b"012345");
        assert!(!src.exhausted());
        src.rewind(b"45");
        assert_eq!(src.position(), 4);
        let chunk = src.next_chunk(100).unwrap();
        assert_eq!(chunk.as_bytes(), b"456789");
        assert!(src.exhausted());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = MmapSource::open(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.csv"));
    }
}
