//! Heap block layouts.
//!
//! Every block starts with a [`Header`] so any block pointer can be viewed as a
//! header pointer. A sequence's elements live in a separate storage run:
//!
//! ```text
//! storage: [ prefill slack | e1 .. e_len | SENTINEL | postfill slack ]
//!                            ^ base
//! ```
//!
//! Growing the storage never moves the block itself, so a sequence value keeps
//! its identity across in-place growth.
use std::{alloc::Layout, ptr, ptr::NonNull, slice};

use crate::{CleanupChain, RuntimeError, RuntimeResult, Value};

#[repr(C)]
#[derive(Debug)]
pub struct Header {
    refcount: usize,
    cleanup: Option<Box<CleanupChain>>,
}

impl Header {
    pub fn new() -> Self {
        Self {
            refcount: 1,
            cleanup: None,
        }
    }

    #[inline]
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.refcount == 1
    }

    #[inline]
    pub fn increment(&mut self) {
        self.refcount += 1;
    }

    #[inline]
    pub fn increment_by(&mut self, count: usize) {
        self.refcount += count;
    }

    /// Returns the remaining count.
    #[inline]
    pub fn decrement(&mut self) -> usize {
        debug_assert!(self.refcount > 0, "refcount underflow");
        self.refcount -= 1;
        self.refcount
    }

    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    pub fn cleanup_mut(&mut self) -> &mut CleanupChain {
        self.cleanup.get_or_insert_with(Default::default)
    }

    pub fn take_cleanup(&mut self) -> Option<Box<CleanupChain>> {
        self.cleanup.take()
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct DoubleBlock {
    pub header: Header,
    pub value: f64,
}

impl DoubleBlock {
    pub fn required_layout() -> Layout {
        Layout::new::<Self>()
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SequenceBlock {
    pub header: Header,
    storage: NonNull<Value>,
    prefill: usize,
    length: usize,
    postfill: usize,
}

impl SequenceBlock {
    pub fn required_layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Layout of a storage run holding `capacity` slots.
    pub fn storage_layout(capacity: usize) -> RuntimeResult<Layout> {
        Layout::array::<Value>(capacity).map_err(|_| RuntimeError::OutOfMemory {
            requested: capacity.saturating_mul(size_of::<Value>()),
        })
    }

    /// Caller provides storage with room for `prefill + length + 1 + postfill`
    /// slots and initializes the live range before anyone reads it.
    pub fn new(
        storage: NonNull<Value>,
        prefill: usize,
        length: usize,
        postfill: usize,
    ) -> Self {
        Self {
            header: Header::new(),
            storage,
            prefill,
            length,
            postfill,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn prefill(&self) -> usize {
        self.prefill
    }

    #[inline]
    pub fn postfill(&self) -> usize {
        self.postfill
    }

    /// total slots in the storage run, sentinel included
    #[inline]
    pub fn capacity(&self) -> usize {
        self.prefill + self.length + 1 + self.postfill
    }

    #[inline]
    pub fn storage(&self) -> NonNull<Value> {
        self.storage
    }

    /// Layout the current storage run was allocated with.
    pub fn allocated_storage_layout(&self) -> Layout {
        // SAFETY: the same layout was validated when the run was allocated
        unsafe {
            Layout::from_size_align_unchecked(
                self.capacity() * size_of::<Value>(),
                align_of::<Value>(),
            )
        }
    }

    /// address of element 1
    #[inline]
    pub fn base(&self) -> *mut Value {
        // SAFETY: prefill is always within the storage run
        unsafe { self.storage.as_ptr().add(self.prefill) }
    }

    #[inline]
    pub fn elements(&self) -> &[Value] {
        // SAFETY: the live range is always initialized
        unsafe { slice::from_raw_parts(self.base(), self.length) }
    }

    #[inline]
    pub fn elements_mut(&mut self) -> &mut [Value] {
        // SAFETY: the live range is always initialized
        unsafe { slice::from_raw_parts_mut(self.base(), self.length) }
    }

    /// 1-based element access
    pub fn get(&self, index: usize) -> Option<Value> {
        if index == 0 {
            return None;
        }
        self.elements().get(index - 1).copied()
    }

    pub fn sentinel_intact(&self) -> bool {
        // SAFETY: the slot after the live range is part of the run
        unsafe { *self.base().add(self.length) == Value::SENTINEL }
    }

    /// Restore the terminator after the live range.
    #[inline]
    pub fn seal(&mut self) {
        // SAFETY: the slot after the live range is part of the run
        unsafe { self.base().add(self.length).write(Value::SENTINEL) };
    }

    pub fn push_unchecked(&mut self, value: Value) {
        debug_assert!(self.postfill > 0, "push without back slack");
        // SAFETY: the sentinel slot becomes the new element, slack holds the next
        unsafe { self.base().add(self.length).write(value) };
        self.length += 1;
        self.postfill -= 1;
        self.seal();
    }

    pub fn push_front_unchecked(&mut self, value: Value) {
        debug_assert!(self.prefill > 0, "push without front slack");
        self.prefill -= 1;
        self.length += 1;
        // SAFETY: the new base is inside the former front slack
        unsafe { self.base().write(value) };
    }

    /// Point the block at a new storage run, the live range already copied.
    pub fn relocate(
        &mut self,
        storage: NonNull<Value>,
        prefill: usize,
        postfill: usize,
    ) {
        self.storage = storage;
        self.prefill = prefill;
        self.postfill = postfill;
    }

    /// Keep `count` elements starting `skip` elements after the base, the rest
    /// of the run becomes slack. The dropped elements must be released by the
    /// caller.
    pub fn narrow(&mut self, skip: usize, count: usize) {
        debug_assert!(skip + count <= self.length);
        self.prefill += skip;
        self.postfill += self.length - skip - count;
        self.length = count;
        self.seal();
    }

    /// Shift everything from 0-based position `at` (sentinel included) right by
    /// `count`. The opened slots hold stale words the caller overwrites.
    pub fn open_gap(&mut self, at: usize, count: usize) {
        debug_assert!(at <= self.length);
        debug_assert!(count <= self.postfill, "gap larger than back slack");
        let tail = self.length - at + 1;
        // SAFETY: source and destination are inside the run, ptr::copy handles
        // overlap
        unsafe {
            let src = self.base().add(at);
            ptr::copy(src, src.add(count), tail);
        }
        self.length += count;
        self.postfill -= count;
    }

    /// Shift everything after `at + count` (sentinel included) left onto `at`.
    /// The overwritten elements must be released by the caller.
    pub fn close_gap(&mut self, at: usize, count: usize) {
        debug_assert!(at + count <= self.length);
        let tail = self.length - at - count + 1;
        // SAFETY: both ranges are inside the run
        unsafe {
            let dst = self.base().add(at);
            ptr::copy(dst.add(count), dst, tail);
        }
        self.length -= count;
        self.postfill += count;
    }
}
