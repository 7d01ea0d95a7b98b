//! Insert, remove and the general range replacement.
use std::ptr::NonNull;

use crate::{Heap, RuntimeResult, SequenceBlock, Value, heap::check_storable};

impl Heap {
    /// Insert `item` as a single element before position `pos`. Positions
    /// outside `1..=len+1` are clamped.
    pub fn insert(
        &mut self,
        source: Value,
        item: Value,
        pos: i64,
        target: &mut Value,
    ) -> RuntimeResult<()> {
        check_storable(item)?;
        let ptr = self.sequence_ptr(source, "insert into an atom")?;
        let length = self.block(ptr).len();
        let at = (pos.clamp(1, length as i64 + 1) - 1) as usize;
        self.replace_range(target, source, ptr, &[item], at, 0)
    }

    /// Remove `source[lo..hi]`. Bounds are clamped to the sequence, an empty
    /// range leaves the source as it is.
    pub fn remove(
        &mut self,
        source: Value,
        lo: i64,
        hi: i64,
        target: &mut Value,
    ) -> RuntimeResult<()> {
        let ptr = self.sequence_ptr(source, "remove from an atom")?;
        let length = self.block(ptr).len() as i64;
        let lo = lo.max(1);
        let hi = hi.min(length);
        if lo > hi {
            if *target != source {
                self.ref_value(source);
                self.assign(target, source);
            }
            return Ok(());
        }
        let at = (lo - 1) as usize;
        let count = (hi - lo + 1) as usize;
        self.replace_range(target, source, ptr, &[], at, count)
    }

    /// Replace `source[lo..hi]` with `replacement`. A sequence replacement
    /// contributes its elements, an atom contributes itself.
    ///
    /// Out of range bounds degrade the way slicing users expect: a range
    /// entirely before the sequence prepends, one entirely after it appends,
    /// and `lo > hi` inserts at `lo`.
    pub fn splice(
        &mut self,
        source: Value,
        replacement: Value,
        lo: i64,
        hi: i64,
        target: &mut Value,
    ) -> RuntimeResult<()> {
        check_storable(replacement)?;
        let ptr = self.sequence_ptr(source, "replace in an atom")?;
        let length = self.block(ptr).len() as i64;

        if hi < 0 && lo <= length {
            return self.concat(replacement, source, target);
        }
        let hi = hi.min(length);
        let lo = lo.max(1);
        if lo > length {
            return self.concat(source, replacement, target);
        }
        if lo < 2 && hi == length {
            let whole = match replacement.as_sequence_ptr() {
                Some(_) => {
                    self.ref_value(replacement);
                    replacement
                }
                None => self.new_sequence(&[replacement])?,
            };
            self.assign(target, whole);
            return Ok(());
        }
        if lo < 2 && hi < 1 {
            return self.concat(replacement, source, target);
        }

        let at = (lo - 1) as usize;
        let removed = if lo > hi { 0 } else { (hi - lo + 1) as usize };
        match replacement.as_sequence_ptr() {
            Some(rp) if rp != ptr => {
                let incoming = self.block(rp).elements().to_vec();
                self.replace_range(target, source, ptr, &incoming, at, removed)
            }
            Some(_) => {
                // the source is its own replacement, build a new block
                let incoming = self.block(ptr).elements().to_vec();
                self.rebuild_range(target, ptr, &incoming, at, removed)
            }
            None => {
                self.replace_range(target, source, ptr, &[replacement], at, removed)
            }
        }
    }

    /// Swap `removed` elements at 0-based `at` for `incoming`, in one pass.
    fn replace_range(
        &mut self,
        target: &mut Value,
        source: Value,
        ptr: NonNull<SequenceBlock>,
        incoming: &[Value],
        at: usize,
        removed: usize,
    ) -> RuntimeResult<()> {
        if !self.owns_in_place(*target, source) || incoming.contains(&source) {
            return self.rebuild_range(target, ptr, incoming, at, removed);
        }

        let added = incoming.len();
        if added > removed {
            self.reserve_back(ptr, added - removed)?;
        }
        for &value in incoming {
            self.ref_value(value);
        }
        // SAFETY: unique block with enough back slack for the growth
        let dropped = unsafe {
            let seq = &mut *ptr.as_ptr();
            let dropped = seq.elements()[at..at + removed].to_vec();
            if added > removed {
                seq.open_gap(at + removed, added - removed);
            } else if added < removed {
                seq.close_gap(at + added, removed - added);
            }
            seq.elements_mut()[at..at + added].copy_from_slice(incoming);
            dropped
        };
        self.deref_all(dropped);
        Ok(())
    }

    /// Copy path of [`Heap::replace_range`]: prefix, incoming, suffix.
    fn rebuild_range(
        &mut self,
        target: &mut Value,
        ptr: NonNull<SequenceBlock>,
        incoming: &[Value],
        at: usize,
        removed: usize,
    ) -> RuntimeResult<()> {
        let length = self.block(ptr).len();
        let added = incoming.len();
        let block = self.allocate_sequence(length - removed + added, 0, 0)?;
        // SAFETY: the new block holds exactly prefix, incoming and suffix
        unsafe {
            let src = (*ptr.as_ptr()).base();
            let dst = (*block.as_ptr()).base();
            self.copy_counted(dst, src, at);
            self.copy_counted(dst.add(at), incoming.as_ptr(), added);
            self.copy_counted(
                dst.add(at + added),
                src.add(at + removed),
                length - at - removed,
            );
        }
        self.assign(target, Value::from_sequence_ptr(block));
        Ok(())
    }
}
