//! Append-only storage for field descriptors.
//!
//! Descriptors are written by the parser thread and read by whichever thread
//! holds a row, possibly while the parser is still appending later fields of
//! the same chunk. The store therefore never reallocates: descriptors live in
//! page-sized blocks behind a pointer table that is pre-sized for the
//! worst-case field count of a chunk, block pointers are published with
//! release stores, and the length is the only synchronization point readers
//! need.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Size of the per-block allocation. Keeping adjacent fields of a row within
/// one page-sized block gives sequential field scans cache-line locality.
pub(crate) const BLOCK_BYTES: usize = 4096;

/// Descriptor of a single field within a chunk.
///
/// `start` is relative to the beginning of the field's row. `len` excludes
/// the surrounding quotes but counts escaped-quote bytes; the unescape pass
/// contracts them later.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub(crate) struct RawField {
    pub start: u32,
    pub len: u32,
    pub has_escaped_quote: bool,
}

/// Number of descriptors per block.
const fn block_capacity() -> usize {
    BLOCK_BYTES / std::mem::size_of::<RawField>()
}

/// An append-only sequence of [`RawField`] records.
///
/// One producer appends through [`FieldList::push`]; any number of readers
/// may call [`FieldList::get`] concurrently for indices they have observed
/// `len() > i` for. Appending never moves previously written descriptors.
pub(crate) struct FieldList {
    /// Pointer table, pre-sized so a chunk parse never needs to grow it.
    blocks: Box<[AtomicPtr<RawField>]>,
    /// Published length; a release store after each descriptor write.
    len: AtomicUsize,
}

// SAFETY: the single-producer discipline documented on `push` plus the
// release/acquire pairing on `len` and the block pointers make concurrent
// `get` calls sound; `RawField` is `Copy` with no interior pointers.
unsafe impl Send for FieldList {}
unsafe impl Sync for FieldList {}

impl FieldList {
    /// Create a store able to hold the worst-case field count of a chunk of
    /// `chunk_bytes` bytes (one field per byte, plus the trailing field).
    pub(crate) fn for_chunk(chunk_bytes: usize) -> Self {
        let max_fields = chunk_bytes + 1;
        let table_len = max_fields.div_ceil(block_capacity()).max(1);
        let blocks = (0..table_len)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        FieldList {
            blocks,
            len: AtomicUsize::new(0),
        }
    }

    /// Number of descriptors visible to the calling thread.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Append one descriptor.
    ///
    /// # Safety
    ///
    /// Only one thread may call `push` at a time, and the store must have
    /// been sized for at least `len() + 1` descriptors. Readers are fine.
    pub(crate) unsafe fn push(&self, field: RawField) {
        let pos = self.len.load(Ordering::Relaxed);
        let block_no = pos / block_capacity();
        let slot = &self.blocks[block_no];

        let mut block = slot.load(Ordering::Relaxed);
        if block.is_null() {
            let fresh: Box<[RawField]> = vec![RawField::default(); block_capacity()].into();
            block = Box::into_raw(fresh) as *mut RawField;
            slot.store(block, Ordering::Release);
        }

        // SAFETY: `block` points to a live allocation of `block_capacity()`
        // descriptors, and `pos % block_capacity()` is in bounds. No reader
        // looks at this index until the release store of `len` below.
        unsafe {
            *block.add(pos % block_capacity()) = field;
        }
        self.len.store(pos + 1, Ordering::Release);
    }

    /// Fetch the `n`-th descriptor, if it has been published.
    pub(crate) fn get(&self, n: usize) -> Option<&RawField> {
        if n >= self.len() {
            return None;
        }
        let block = self.blocks[n / block_capacity()].load(Ordering::Acquire);
        debug_assert!(!block.is_null());
        // SAFETY: `n < len` was observed with acquire ordering, so the block
        // pointer is published and the descriptor at this index is fully
        // written. Blocks are never freed while `self` is alive.
        Some(unsafe { &*block.add(n % block_capacity()) })
    }
}

impl Drop for FieldList {
    fn drop(&mut self) {
        for slot in self.blocks.iter() {
            let block = slot.load(Ordering::Relaxed);
            if !block.is_null() {
                // SAFETY: `block` was created by `Box::into_raw` from a boxed
                // slice of exactly `block_capacity()` descriptors.
                unsafe {
                    drop(Box::from_raw(std::slice::from_raw_parts_mut(
                        block,
                        block_capacity(),
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(n: u32) -> RawField {
        RawField {
            start: n,
            len: n * 2,
            has_escaped_quote: n % 2 == 0,
        }
    }

    #[test]
    fn push_and_get_across_blocks() {
        let cap = block_capacity();
        let list = FieldList::for_chunk(cap * 3);
        let total = cap * 2 + 7;
        for i in 0..total {
            unsafe { list.push(field(i as u32)) };
        }
        assert_eq!(list.len(), total);
        for i in 0..total {
            assert_eq!(*list.get(i).unwrap(), field(i as u32));
        }
        assert!(list.get(total).is_none());
    }

    #[test]
    fn references_survive_later_appends() {
        let list = FieldList::for_chunk(block_capacity() * 4);
        unsafe { list.push(field(1)) };
        let first = list.get(0).unwrap() as *const RawField;
        for i in 0..block_capacity() * 3 {
            unsafe { list.push(field(i as u32)) };
        }
        // The address of the first descriptor must not have moved.
        assert_eq!(first, list.get(0).unwrap() as *const RawField);
    }

    #[test]
    fn move_preserves_descriptors_and_append_position() {
        // Regression shape: after a move, appends must land after the
        // existing descriptors, not into the moved-from layout.
        let list = FieldList::for_chunk(block_capacity() * 2);
        for i in 0..block_capacity() + 3 {
            unsafe { list.push(field(i as u32)) };
        }
        let moved = list;
        unsafe { moved.push(field(9999)) };
        assert_eq!(moved.len(), block_capacity() + 4);
        for i in 0..block_capacity() + 3 {
            assert_eq!(*moved.get(i).unwrap(), field(i as u32));
        }
        assert_eq!(moved.get(block_capacity() + 3).unwrap().start, 9999);
    }

    #[test]
    fn concurrent_reads_during_append() {
        use std::sync::Arc;

        let list = Arc::new(FieldList::for_chunk(block_capacity() * 8));
        let reader = {
            let list = Arc::clone(&list);
            std::thread::spawn(move || {
                let mut seen = 0;
                while seen < block_capacity() * 4 {
                    let len = list.len();
                    for i in seen..len {
                        let f = list.get(i).unwrap();
                        assert_eq!(f.start, i as u32);
                    }
                    seen = len;
                }
            })
        };
        for i in 0..block_capacity() * 4 {
            unsafe {
                list.push(RawField {
                    start: i as u32,
                    len: 1,
                    has_escaped_quote: false,
                })
            };
        }
        reader.join().unwrap();
    }
}
