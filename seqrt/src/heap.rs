use std::{fmt, mem, ptr, ptr::NonNull, slice};

use crate::{
    BOXED_TAG_MASK, Cleanup, CleanupHost, DoubleBlock, Header, IndexError, MathError,
    RawAllocator, RuntimeError, RuntimeResult, SequenceBlock, SystemAllocator,
    Value, ValueKind,
};

#[derive(Debug, Default, Clone)]
pub struct HeapCreateInfo {
    // byte cap for the default allocator, unbounded if none
    pub memory_limit: Option<usize>,
    pub growth_extra: Option<usize>,
    pub growth_divisor: Option<usize>,
    pub slice_waste_factor: Option<usize>,
    pub concat_slack_factor: Option<usize>,
}

/// Tuning constants. None of them change results, only how often storage is
/// copied or grown.
#[derive(Debug, Clone, Copy)]
pub struct HeapSettings {
    // constant slack added whenever storage grows
    pub growth_extra: usize,
    // storage grows to `growth_extra + n + n / growth_divisor`
    pub growth_divisor: usize,
    // in place slicing while `prefill + length < factor * (kept + 1)`
    pub slice_waste_factor: usize,
    // in place concat while `len(a) > factor * (len(b) - postfill(a))`
    pub concat_slack_factor: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            growth_extra: 4,
            growth_divisor: 4,
            slice_waste_factor: 8,
            concat_slack_factor: 8,
        }
    }
}

impl HeapSettings {
    /// slots to reserve for a sequence that needs to hold `length` elements
    pub fn expanded(&self, length: usize) -> usize {
        self.growth_extra + length + length / self.growth_divisor.max(1)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub live_doubles: usize,
    pub live_sequences: usize,
    pub doubles_allocated: usize,
    pub sequences_allocated: usize,
    pub storage_reallocations: usize,
    pub cleanups_run: usize,
    pub rescued: usize,
}

/// Owner of every double and sequence block.
///
/// All lifetime transitions go through [`Heap::ref_value`] and
/// [`Heap::deref_value`]. A [`Value`] word carries no ownership by itself:
/// whoever holds a slot that was counted must release it exactly once.
pub struct Heap {
    allocator: Box<dyn RawAllocator>,
    settings: HeapSettings,
    stats: HeapStats,
    host: Option<Box<dyn CleanupHost>>,
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("settings", &self.settings)
            .field("stats", &self.stats)
            .field("bytes_in_use", &self.allocator.in_use())
            .field("has_host", &self.host.is_some())
            .finish()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapCreateInfo::default())
    }
}

/// Blocks still alive when the heap goes away are leaked, releasing every
/// value before the heap is the embedder's job.
impl Drop for Heap {
    fn drop(&mut self) {
        let live = self.live_blocks();
        if live > 0 {
            log::warn!(
                "heap dropped with {live} live blocks, {} bytes leaked",
                self.allocator.in_use()
            );
        }
    }
}

#[inline]
fn header_ptr(value: Value) -> *mut Header {
    debug_assert!(value.is_boxed());
    (value.raw() & !BOXED_TAG_MASK) as *mut Header
}

impl Heap {
    pub fn new(info: HeapCreateInfo) -> Self {
        let allocator = Box::new(SystemAllocator::new(info.memory_limit));
        Self::with_allocator(info, allocator)
    }

    pub fn with_allocator(
        info: HeapCreateInfo,
        allocator: Box<dyn RawAllocator>,
    ) -> Self {
        let mut settings = HeapSettings::default();
        info.growth_extra.inspect(|&val| settings.growth_extra = val);
        info.growth_divisor
            .inspect(|&val| settings.growth_divisor = val);
        info.slice_waste_factor
            .inspect(|&val| settings.slice_waste_factor = val);
        info.concat_slack_factor
            .inspect(|&val| settings.concat_slack_factor = val);

        Self {
            allocator,
            settings,
            stats: HeapStats::default(),
            host: None,
        }
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    pub fn bytes_in_use(&self) -> usize {
        self.allocator.in_use()
    }

    pub fn live_blocks(&self) -> usize {
        self.stats.live_doubles + self.stats.live_sequences
    }

    pub(crate) fn note_storage_reallocation(&mut self) {
        self.stats.storage_reallocations += 1;
    }

    // ---- allocation ----

    pub fn new_double(&mut self, value: f64) -> RuntimeResult<Value> {
        let raw = self.allocator.allocate(DoubleBlock::required_layout())?;
        let ptr = raw.cast::<DoubleBlock>();
        // SAFETY: freshly allocated with the layout of a DoubleBlock
        unsafe {
            ptr.write(DoubleBlock {
                header: Header::new(),
                value,
            })
        };
        self.stats.live_doubles += 1;
        self.stats.doubles_allocated += 1;
        Ok(Value::from_double_ptr(ptr))
    }

    /// Small integer if it fits, boxed double otherwise.
    pub fn new_integer(&mut self, value: i64) -> RuntimeResult<Value> {
        match Value::from_small_int(value) {
            Some(value) => Ok(value),
            None => self.new_double(value as f64),
        }
    }

    /// Integral doubles in small integer range are stored unboxed.
    pub fn new_number(&mut self, value: f64) -> RuntimeResult<Value> {
        if value.fract() == 0.0 {
            let int = value as i64;
            if int as f64 == value {
                if let Some(small) = Value::from_small_int(int) {
                    return Ok(small);
                }
            }
        }
        self.new_double(value)
    }

    /// Allocate a sequence whose live range holds small integer zeros.
    pub(crate) fn allocate_sequence(
        &mut self,
        length: usize,
        prefill: usize,
        postfill: usize,
    ) -> RuntimeResult<NonNull<SequenceBlock>> {
        let capacity = prefill + length + 1 + postfill;
        let storage_layout = SequenceBlock::storage_layout(capacity)?;
        let storage = self.allocator.allocate(storage_layout)?.cast::<Value>();
        let block = match self.allocator.allocate(SequenceBlock::required_layout())
        {
            Ok(raw) => raw.cast::<SequenceBlock>(),
            Err(err) => {
                // SAFETY: allocated right above with this layout
                unsafe { self.allocator.deallocate(storage.cast(), storage_layout) };
                return Err(err);
            }
        };

        // SAFETY: both allocations are fresh and sized for what is written
        unsafe {
            // the all zero word is the small integer 0
            ptr::write_bytes(storage.as_ptr().add(prefill), 0, length);
            block.write(SequenceBlock::new(storage, prefill, length, postfill));
            (*block.as_ptr()).seal();
        }
        self.stats.live_sequences += 1;
        self.stats.sequences_allocated += 1;
        Ok(block)
    }

    /// New sequence holding its own reference to every element.
    pub fn new_sequence(&mut self, elements: &[Value]) -> RuntimeResult<Value> {
        for &element in elements {
            check_storable(element)?;
        }
        let block = self.allocate_sequence(elements.len(), 0, 0)?;
        // SAFETY: the block was just allocated with room for every element
        unsafe {
            let dst = (*block.as_ptr()).base();
            self.copy_counted(dst, elements.as_ptr(), elements.len());
        }
        Ok(Value::from_sequence_ptr(block))
    }

    pub fn new_empty_sequence(&mut self) -> RuntimeResult<Value> {
        self.new_sequence(&[])
    }

    /// Strings are sequences of character codes.
    pub fn new_string(&mut self, text: &str) -> RuntimeResult<Value> {
        let length = text.chars().count();
        let block = self.allocate_sequence(length, 0, 0)?;
        // SAFETY: fresh block with `length` slots
        let slots = unsafe { (*block.as_ptr()).elements_mut() };
        for (slot, ch) in slots.iter_mut().zip(text.chars()) {
            *slot = Value::from(ch as i32);
        }
        Ok(Value::from_sequence_ptr(block))
    }

    /// `count` copies of `item`.
    pub fn repeat(&mut self, item: Value, count: i64) -> RuntimeResult<Value> {
        check_storable(item)?;
        if count < 0 {
            return Err(MathError::NegativeRepeatCount.into());
        }
        let count = count as usize;
        let block = self.allocate_sequence(count, 0, 0)?;
        self.ref_value_by(item, count);
        // SAFETY: fresh block with `count` slots
        unsafe { (*block.as_ptr()).elements_mut().fill(item) };
        Ok(Value::from_sequence_ptr(block))
    }

    /// Copy `count` words and take a reference for each boxed one.
    /// # Safety
    /// `dst` must have room for `count` words, `src` must hold `count` live values
    pub(crate) unsafe fn copy_counted(
        &mut self,
        dst: *mut Value,
        src: *const Value,
        count: usize,
    ) {
        for i in 0..count {
            // SAFETY: by contract both ranges hold `count` slots
            let value = unsafe { src.add(i).read() };
            self.ref_value(value);
            // SAFETY: by contract
            unsafe { dst.add(i).write(value) };
        }
    }

    // ---- reference counting ----

    #[inline]
    pub fn ref_value(&mut self, value: Value) {
        if value.is_boxed() {
            // SAFETY: a boxed value points at a live block
            unsafe { (*header_ptr(value)).increment() };
        }
    }

    pub fn ref_value_by(&mut self, value: Value, count: usize) {
        if value.is_boxed() && count > 0 {
            // SAFETY: a boxed value points at a live block
            unsafe { (*header_ptr(value)).increment_by(count) };
        }
    }

    /// Drop one reference, releasing the block when it was the last.
    #[inline]
    pub fn deref_value(&mut self, value: Value) {
        if !value.is_boxed() {
            return;
        }
        // SAFETY: a boxed value points at a live block
        let remaining = unsafe { (*header_ptr(value)).decrement() };
        if remaining == 0 {
            self.free(value);
        }
    }

    pub fn deref_all(&mut self, values: impl IntoIterator<Item = Value>) {
        for value in values {
            self.deref_value(value);
        }
    }

    /// Install `value` in `target` and release what was there before.
    /// `value` must already carry the reference the slot owns.
    pub fn assign(&mut self, target: &mut Value, value: Value) {
        let old = mem::replace(target, value);
        self.deref_value(old);
    }

    pub fn refcount(&self, value: Value) -> Option<usize> {
        if !value.is_boxed() {
            return None;
        }
        // SAFETY: a boxed value points at a live block
        Some(unsafe { (*header_ptr(value)).refcount() })
    }

    pub fn is_unique(&self, value: Value) -> bool {
        self.refcount(value) == Some(1)
    }

    fn free(&mut self, value: Value) {
        if !self.finalize(value) {
            return;
        }
        match value.kind() {
            ValueKind::Double(ptr) => self.release_double(ptr),
            ValueKind::Sequence(ptr) => self.release_sequence_tree(ptr),
            ValueKind::SmallInt(_) | ValueKind::Sentinel => {}
        }
    }

    /// Run the cleanup chain of a block whose count just reached zero.
    /// Returns false if a cleanup took a new reference, the block stays alive.
    fn finalize(&mut self, value: Value) -> bool {
        let header = header_ptr(value);
        // cleanups may register more cleanups, those run before release too
        // SAFETY: the block is dead but not yet released
        while let Some(chain) = unsafe { (*header).take_cleanup() } {
            // SAFETY: as above, the temporary reference keeps nested derefs
            // from freeing it underneath the chain
            unsafe { (*header).increment() };
            for entry in *chain {
                self.run_cleanup(entry, value);
                self.stats.cleanups_run += 1;
            }
            // SAFETY: still not released
            let remaining = unsafe { (*header).decrement() };
            if remaining > 0 {
                self.stats.rescued += 1;
                log::debug!("{value:?} rescued by cleanup, {remaining} references");
                return false;
            }
        }
        true
    }

    fn run_cleanup(&mut self, entry: Cleanup, value: Value) {
        match entry {
            Cleanup::Native(callback) => callback(self, value),
            Cleanup::Routine(routine) => match self.host.take() {
                Some(mut host) => {
                    host.call_routine(self, routine, value);
                    if self.host.is_none() {
                        self.host = Some(host);
                    }
                }
                None => {
                    log::warn!("no cleanup host, skipping routine {routine} for {value:?}");
                }
            },
        }
    }

    fn release_double(&mut self, ptr: NonNull<DoubleBlock>) {
        // SAFETY: the block is dead and finalized, nothing points at it
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
            self.allocator
                .deallocate(ptr.cast(), DoubleBlock::required_layout());
        }
        self.stats.live_doubles -= 1;
    }

    /// Release a dead sequence and everything only it kept alive.
    ///
    /// Dead child sequences go on an explicit worklist instead of the native
    /// stack, so nesting depth only costs worklist entries. Every scan stops
    /// at the sentinel.
    fn release_sequence_tree(&mut self, root: NonNull<SequenceBlock>) {
        let mut pending = vec![root];
        while let Some(block) = pending.pop() {
            // SAFETY: blocks on the worklist are dead and finalized
            let mut cursor = unsafe {
                debug_assert!(
                    (*block.as_ptr()).sentinel_intact(),
                    "sequence lost its sentinel"
                );
                (*block.as_ptr()).base()
            };
            loop {
                // SAFETY: the scan never passes the sentinel
                let element = unsafe { cursor.read() };
                if element.is_sentinel() {
                    break;
                }
                // SAFETY: the sentinel is still ahead
                cursor = unsafe { cursor.add(1) };
                if !element.is_boxed() {
                    continue;
                }
                // SAFETY: a boxed element points at a live block
                let remaining = unsafe { (*header_ptr(element)).decrement() };
                if remaining > 0 || !self.finalize(element) {
                    continue;
                }
                match element.kind() {
                    ValueKind::Double(ptr) => self.release_double(ptr),
                    ValueKind::Sequence(ptr) => pending.push(ptr),
                    ValueKind::SmallInt(_) | ValueKind::Sentinel => {}
                }
            }
            self.release_sequence_block(block);
        }
    }

    /// Release a sequence's storage and block, its elements are handled already.
    fn release_sequence_block(&mut self, block: NonNull<SequenceBlock>) {
        // SAFETY: the block is dead, finalized and its elements released
        unsafe {
            let storage = (*block.as_ptr()).storage();
            let storage_layout = (*block.as_ptr()).allocated_storage_layout();
            ptr::drop_in_place(block.as_ptr());
            self.allocator.deallocate(storage.cast(), storage_layout);
            self.allocator
                .deallocate(block.cast(), SequenceBlock::required_layout());
        }
        self.stats.live_sequences -= 1;
    }

    // ---- cleanup registration ----

    /// Attach a destructor to a double or sequence block.
    pub fn add_cleanup(
        &mut self,
        value: Value,
        cleanup: Cleanup,
    ) -> RuntimeResult<()> {
        if !value.is_boxed() {
            return Err(RuntimeError::TypeMismatch(
                "cleanup needs a double or a sequence",
            ));
        }
        // SAFETY: a boxed value points at a live block
        unsafe { (*header_ptr(value)).cleanup_mut().push(cleanup) };
        Ok(())
    }

    pub fn set_cleanup_host(&mut self, host: Box<dyn CleanupHost>) {
        self.host = Some(host);
    }

    pub fn take_cleanup_host(&mut self) -> Option<Box<dyn CleanupHost>> {
        self.host.take()
    }

    // ---- inspection ----

    pub(crate) fn sequence_ptr(
        &self,
        value: Value,
        expected: &'static str,
    ) -> RuntimeResult<NonNull<SequenceBlock>> {
        value
            .as_sequence_ptr()
            .ok_or(RuntimeError::TypeMismatch(expected))
    }

    /// Block behind a sequence value. The reference is only valid until the
    /// next mutating heap call.
    #[inline]
    pub(crate) fn block(&self, ptr: NonNull<SequenceBlock>) -> &SequenceBlock {
        // SAFETY: live sequence values point at live blocks
        unsafe { ptr.as_ref() }
    }

    pub fn length(&self, value: Value) -> RuntimeResult<usize> {
        let ptr = self.sequence_ptr(value, "length of an atom")?;
        Ok(self.block(ptr).len())
    }

    pub fn elements(&self, value: Value) -> RuntimeResult<&[Value]> {
        let ptr = self.sequence_ptr(value, "elements of an atom")?;
        Ok(self.block(ptr).elements())
    }

    /// 1-based element read, no reference is taken.
    pub fn element(&self, value: Value, index: i64) -> RuntimeResult<Value> {
        let ptr = self.sequence_ptr(value, "subscript of an atom")?;
        let block = self.block(ptr);
        usize::try_from(index)
            .ok()
            .and_then(|index| block.get(index))
            .ok_or_else(|| {
                RuntimeError::from(IndexError::ElementOutOfRange {
                    index,
                    length: block.len(),
                })
            })
    }

    /// (prefill, postfill) of a sequence
    pub fn slack(&self, value: Value) -> RuntimeResult<(usize, usize)> {
        let ptr = self.sequence_ptr(value, "slack of an atom")?;
        let block = self.block(ptr);
        Ok((block.prefill(), block.postfill()))
    }

    pub fn double_value(&self, value: Value) -> Option<f64> {
        // SAFETY: a double reference points at a live block
        value.as_double_ptr().map(|ptr| unsafe { ptr.as_ref().value })
    }

    /// Numeric value of an atom.
    pub fn number(&self, value: Value) -> RuntimeResult<f64> {
        match value.kind() {
            ValueKind::SmallInt(i) => Ok(i as f64),
            ValueKind::Double(ptr) => {
                // SAFETY: a double reference points at a live block
                Ok(unsafe { ptr.as_ref().value })
            }
            _ => Err(RuntimeError::TypeMismatch("atom expected")),
        }
    }

    /// Collect a sequence of small integers, handy for tests and the driver.
    pub fn to_ints(&self, value: Value) -> RuntimeResult<Vec<i64>> {
        self.elements(value)?
            .iter()
            .map(|v| {
                v.as_small_int()
                    .ok_or(RuntimeError::TypeMismatch("integer element expected"))
            })
            .collect()
    }

    // ---- storage management ----

    /// Copy-on-write: after this call `target` is a sequence block only this
    /// slot references.
    pub fn make_unique(&mut self, target: &mut Value) -> RuntimeResult<()> {
        let ptr = self.sequence_ptr(*target, "sequence expected")?;
        if self.block(ptr).header.is_unique() {
            return Ok(());
        }
        let copy = self.copy_sequence(ptr, 0, 0)?;
        self.assign(target, copy);
        Ok(())
    }

    /// Fresh block with the same elements, each referenced once more.
    pub(crate) fn copy_sequence(
        &mut self,
        source: NonNull<SequenceBlock>,
        prefill: usize,
        postfill: usize,
    ) -> RuntimeResult<Value> {
        let length = self.block(source).len();
        let block = self.allocate_sequence(length, prefill, postfill)?;
        // SAFETY: the new block has room for `length` elements, the source
        // block is a different live block
        unsafe {
            let src = (*source.as_ptr()).base();
            self.copy_counted((*block.as_ptr()).base(), src, length);
        }
        Ok(Value::from_sequence_ptr(block))
    }

    /// Make room for at least `additional` elements after the live range.
    /// The block keeps its address, only the storage run may move.
    pub(crate) fn reserve_back(
        &mut self,
        block: NonNull<SequenceBlock>,
        additional: usize,
    ) -> RuntimeResult<()> {
        // SAFETY: live block, no other reference to it is held across this call
        let seq = unsafe { &mut *block.as_ptr() };
        if seq.postfill() >= additional {
            return Ok(());
        }
        let length = seq.len();
        let postfill = self.settings.expanded(length + additional) - length;
        let capacity = seq.prefill() + length + 1 + postfill;
        let new_layout = SequenceBlock::storage_layout(capacity)?;
        let old_layout = seq.allocated_storage_layout();
        // SAFETY: the run was allocated with old_layout
        let storage = unsafe {
            self.allocator.reallocate(
                seq.storage().cast(),
                old_layout,
                new_layout.size(),
            )?
        };
        seq.relocate(storage.cast(), seq.prefill(), postfill);
        self.note_storage_reallocation();
        log::trace!("grew {length} element sequence, back slack {postfill}");
        Ok(())
    }

    /// Make room for at least `additional` elements before element 1.
    pub(crate) fn reserve_front(
        &mut self,
        block: NonNull<SequenceBlock>,
        additional: usize,
    ) -> RuntimeResult<()> {
        // SAFETY: live block, no other reference to it is held across this call
        let seq = unsafe { &mut *block.as_ptr() };
        if seq.prefill() >= additional {
            return Ok(());
        }
        let length = seq.len();
        let prefill = self.settings.expanded(length + additional) - length;
        let postfill = seq.postfill();
        let capacity = prefill + length + 1 + postfill;
        let new_layout = SequenceBlock::storage_layout(capacity)?;
        let storage = self.allocator.allocate(new_layout)?.cast::<Value>();
        let old_storage = seq.storage();
        let old_layout = seq.allocated_storage_layout();
        // SAFETY: live range plus sentinel fit in both runs, they do not overlap
        unsafe {
            ptr::copy_nonoverlapping(
                seq.base(),
                storage.as_ptr().add(prefill),
                length + 1,
            );
            self.allocator.deallocate(old_storage.cast(), old_layout);
        }
        seq.relocate(storage, prefill, postfill);
        self.note_storage_reallocation();
        log::trace!("grew {length} element sequence, front slack {prefill}");
        Ok(())
    }

    /// Raw view of the live range for code that writes into fresh blocks.
    /// # Safety
    /// `ptr` must be a live block nobody else is reading
    pub(crate) unsafe fn slots_mut<'a>(
        ptr: NonNull<SequenceBlock>,
    ) -> &'a mut [Value] {
        // SAFETY: by contract
        unsafe {
            let block = &*ptr.as_ptr();
            slice::from_raw_parts_mut(block.base(), block.len())
        }
    }
}

/// The sentinel marks the end of storage and can never be an element.
pub(crate) fn check_storable(value: Value) -> RuntimeResult<()> {
    if value.is_sentinel() {
        return Err(RuntimeError::TypeMismatch("the sentinel is not a value"));
    }
    Ok(())
}
