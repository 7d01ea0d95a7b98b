use std::{alloc, alloc::Layout, ptr::NonNull};

use crate::{RuntimeError, RuntimeResult};

/// Minimum alignment every block allocation gets, keeps the value tag bits free.
pub const BLOCK_ALIGN: usize = 8;

/// Raw memory underneath the heap. Implementors must hand out addresses
/// aligned to at least the layout's alignment.
pub trait RawAllocator {
    fn allocate(&mut self, layout: Layout) -> RuntimeResult<NonNull<u8>>;

    /// Grow or shrink an allocation, contents up to the smaller size survive.
    /// # Safety
    /// `ptr` must come from this allocator with exactly `layout`
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        layout: Layout,
        new_size: usize,
    ) -> RuntimeResult<NonNull<u8>>;

    /// # Safety
    /// `ptr` must come from this allocator with exactly `layout` and must not be
    /// used afterwards
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout);

    /// bytes currently handed out
    fn in_use(&self) -> usize;
}

/// `std::alloc` backed allocator with byte accounting and an optional cap.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    in_use: usize,
    peak: usize,
    limit: Option<usize>,
}

impl SystemAllocator {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            in_use: 0,
            peak: 0,
            limit,
        }
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    fn reserve(&mut self, bytes: usize) -> RuntimeResult<()> {
        let total = self.in_use.saturating_add(bytes);
        if self.limit.is_some_and(|limit| total > limit) {
            return Err(RuntimeError::OutOfMemory { requested: bytes });
        }
        self.in_use = total;
        self.peak = self.peak.max(total);
        Ok(())
    }
}

impl RawAllocator for SystemAllocator {
    fn allocate(&mut self, layout: Layout) -> RuntimeResult<NonNull<u8>> {
        debug_assert!(layout.size() > 0, "zero sized block allocation");
        debug_assert!(
            layout.align() >= BLOCK_ALIGN,
            "block alignment must keep the value tag bits free"
        );
        self.reserve(layout.size())?;
        // SAFETY: layout has a non zero size
        let raw = unsafe { alloc::alloc(layout) };
        match NonNull::new(raw) {
            Some(ptr) => Ok(ptr),
            None => {
                self.in_use -= layout.size();
                Err(RuntimeError::OutOfMemory {
                    requested: layout.size(),
                })
            }
        }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        layout: Layout,
        new_size: usize,
    ) -> RuntimeResult<NonNull<u8>> {
        let old_size = layout.size();
        if new_size > old_size {
            self.reserve(new_size - old_size)?;
        }
        // SAFETY: by contract ptr was allocated with layout
        let raw = unsafe { alloc::realloc(ptr.as_ptr(), layout, new_size) };
        match NonNull::new(raw) {
            Some(ptr) => {
                if new_size < old_size {
                    self.in_use -= old_size - new_size;
                }
                Ok(ptr)
            }
            None => {
                if new_size > old_size {
                    self.in_use -= new_size - old_size;
                }
                Err(RuntimeError::OutOfMemory {
                    requested: new_size,
                })
            }
        }
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        debug_assert!(self.in_use >= layout.size(), "allocator underflow");
        self.in_use -= layout.size();
        // SAFETY: by contract ptr was allocated with layout
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }

    fn in_use(&self) -> usize {
        self.in_use
    }
}
