//! The per-chunk record tying together bytes, fields, and metadata.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, OnceLock};

use crate::columns::SharedColNames;
use crate::fields::{FieldList, BLOCK_BYTES};
use crate::flags::{ParseFlag, ParseFlagMap};
use crate::source::ChunkBuffer;

type CacheEntry = OnceLock<Arc<[u8]>>;

const fn cache_block_capacity() -> usize {
    BLOCK_BYTES / std::mem::size_of::<CacheEntry>()
}

/// Cache of unescaped field values, indexed like the field store.
///
/// Entries live in on-demand blocks behind a pointer table, so a chunk with
/// no escaped fields allocates nothing. Reading a populated entry is an
/// acquire load of the block pointer plus `OnceLock::get` — no lock; only
/// the first access of an entry runs the unescape, and only a thread racing
/// that exact first access ever waits.
struct UnescapeCache {
    table: OnceLock<Box<[AtomicPtr<CacheEntry>]>>,
    max_entries: usize,
}

// SAFETY: block pointers are published with release stores and read with
// acquire loads, entries are `OnceLock`s, and blocks are only freed in
// `drop`, so cross-thread access always sees fully initialized memory.
unsafe impl Send for UnescapeCache {}
unsafe impl Sync for UnescapeCache {}

impl UnescapeCache {
    fn new(chunk_bytes: usize) -> Self {
        UnescapeCache {
            table: OnceLock::new(),
            max_entries: chunk_bytes + 1,
        }
    }

    fn entry(&self, index: usize) -> &CacheEntry {
        let table = self.table.get_or_init(|| {
            let len = self.max_entries.div_ceil(cache_block_capacity()).max(1);
            (0..len)
                .map(|_| AtomicPtr::new(std::ptr::null_mut()))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });

        let slot = &table[index / cache_block_capacity()];
        let mut block = slot.load(Ordering::Acquire);
        if block.is_null() {
            let fresh: Box<[CacheEntry]> = (0..cache_block_capacity())
                .map(|_| OnceLock::new())
                .collect();
            let candidate = Box::into_raw(fresh) as *mut CacheEntry;
            match slot.compare_exchange(
                std::ptr::null_mut(),
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => block = candidate,
                Err(winner) => {
                    // SAFETY: `candidate` came from `Box::into_raw` above and
                    // lost the race, so it was never published anywhere.
                    unsafe {
                        drop(Box::from_raw(std::slice::from_raw_parts_mut(
                            candidate,
                            cache_block_capacity(),
                        )));
                    }
                    block = winner;
                }
            }
        }

        // SAFETY: the block pointer was published with release ordering and
        // `index % capacity` is within the block.
        unsafe { &*block.add(index % cache_block_capacity()) }
    }
}

impl Drop for UnescapeCache {
    fn drop(&mut self) {
        if let Some(table) = self.table.get() {
            for slot in table.iter() {
                let block = slot.load(Ordering::Relaxed);
                if !block.is_null() {
                    // SAFETY: `block` was created by `Box::into_raw` from a
                    // boxed slice of exactly `cache_block_capacity()` entries.
                    unsafe {
                        drop(Box::from_raw(std::slice::from_raw_parts_mut(
                            block,
                            cache_block_capacity(),
                        )));
                    }
                }
            }
        }
    }
}

/// One parsed chunk of the source.
///
/// Owns the chunk's bytes (heap buffer or mapped window), the field
/// descriptors the tokenizer emitted into it, a snapshot of the parse flags
/// it was tokenized with, and a shared handle to the reader's column names.
/// Every row produced from this chunk holds an `Arc` to it, so the bytes
/// stay valid for as long as any row is alive.
pub(crate) struct RawChunk {
    buf: ChunkBuffer,
    pub(crate) fields: FieldList,
    pub(crate) parse_flags: ParseFlagMap,
    pub(crate) col_names: SharedColNames,
    /// Escaped fields unescape once, on first access. Hits clone the cached
    /// `Arc` without taking any lock.
    unescaped: UnescapeCache,
}

impl RawChunk {
    pub(crate) fn new(
        buf: ChunkBuffer,
        parse_flags: ParseFlagMap,
        col_names: SharedColNames,
    ) -> Arc<Self> {
        let chunk_bytes = buf.as_bytes().len();
        Arc::new(RawChunk {
            buf,
            fields: FieldList::for_chunk(chunk_bytes),
            parse_flags,
            col_names,
            unescaped: UnescapeCache::new(chunk_bytes),
        })
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// Contract doubled quote bytes out of `raw`, caching per field index.
    pub(crate) fn unescaped(&self, field_index: usize, raw: &[u8]) -> Arc<[u8]> {
        self.unescaped
            .entry(field_index)
            .get_or_init(|| {
                let mut out = Vec::with_capacity(raw.len());
                let mut prev_quote = false;
                for &b in raw {
                    if self.parse_flags[b as usize] == ParseFlag::Quote {
                        if prev_quote {
                            prev_quote = false;
                            continue;
                        }
                        prev_quote = true;
                    }
                    out.push(b);
                }
                out.into()
            })
            .clone()
    }
}
