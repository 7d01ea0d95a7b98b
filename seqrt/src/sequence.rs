//! Growing, joining and slicing sequences.
//!
//! Every operation writes its result into `target`, its last argument. When `target` already
//! holds the source block and is its only owner the block is rewritten in
//! place, otherwise a new block is built and installed, releasing whatever
//! `target` held before. All other value arguments are borrowed, the
//! operation takes its own references.
use std::ptr::NonNull;

use crate::{
    Heap, IndexError, RuntimeError, RuntimeResult, SequenceBlock, Value,
    heap::check_storable,
};

/// Validate `lo..=hi` against a sequence of `length` elements.
/// Returns the 0-based start and the element count.
pub fn check_slice(lo: i64, hi: i64, length: usize) -> RuntimeResult<(usize, usize)> {
    if lo < 1 {
        return Err(IndexError::SliceLowerBelowOne(lo).into());
    }
    if hi < 0 {
        return Err(IndexError::SliceUpperBelowZero(hi).into());
    }
    let count = hi - lo + 1;
    if count < 0 {
        return Err(IndexError::SliceLengthNegative(count).into());
    }
    let n = length as i64;
    if (lo > n + 1 || count > 0) && lo > n {
        return Err(IndexError::SliceStartPastEnd { start: lo, length }.into());
    }
    if hi > n {
        return Err(IndexError::SliceEndPastEnd { end: hi, length }.into());
    }
    Ok(((lo - 1) as usize, count as usize))
}

impl Heap {
    /// `target` holds `source` and nobody else does
    #[inline]
    pub(crate) fn owns_in_place(&self, target: Value, source: Value) -> bool {
        target == source && self.is_unique(source)
    }

    pub fn append(
        &mut self,
        source: Value,
        item: Value,
        target: &mut Value,
    ) -> RuntimeResult<()> {
        check_storable(item)?;
        let ptr = self.sequence_ptr(source, "append to an atom")?;

        if self.owns_in_place(*target, source) && item != source {
            self.reserve_back(ptr, 1)?;
            self.ref_value(item);
            // SAFETY: unique block with at least one slot of back slack
            unsafe { (*ptr.as_ptr()).push_unchecked(item) };
            return Ok(());
        }

        let length = self.block(ptr).len();
        let postfill = self.settings().expanded(length + 1) - length - 1;
        let block = self.allocate_sequence(length + 1, 0, postfill)?;
        // SAFETY: the new block has `length + 1` slots, source is another block
        unsafe {
            let dst = (*block.as_ptr()).base();
            self.copy_counted(dst, (*ptr.as_ptr()).base(), length);
            self.ref_value(item);
            dst.add(length).write(item);
        }
        self.assign(target, Value::from_sequence_ptr(block));
        Ok(())
    }

    pub fn prepend(
        &mut self,
        source: Value,
        item: Value,
        target: &mut Value,
    ) -> RuntimeResult<()> {
        check_storable(item)?;
        let ptr = self.sequence_ptr(source, "prepend to an atom")?;

        if self.owns_in_place(*target, source) && item != source {
            self.reserve_front(ptr, 1)?;
            self.ref_value(item);
            // SAFETY: unique block with at least one slot of front slack
            unsafe { (*ptr.as_ptr()).push_front_unchecked(item) };
            return Ok(());
        }

        let length = self.block(ptr).len();
        let prefill = self.settings().expanded(length + 1) - length - 1;
        let block = self.allocate_sequence(length + 1, prefill, 0)?;
        // SAFETY: the new block has `length + 1` slots, source is another block
        unsafe {
            let dst = (*block.as_ptr()).base();
            self.ref_value(item);
            dst.write(item);
            self.copy_counted(dst.add(1), (*ptr.as_ptr()).base(), length);
        }
        self.assign(target, Value::from_sequence_ptr(block));
        Ok(())
    }

    /// `a & b`. Two atoms form a pair, an atom joins a sequence as one element,
    /// two sequences are joined elementwise.
    pub fn concat(
        &mut self,
        a: Value,
        b: Value,
        target: &mut Value,
    ) -> RuntimeResult<()> {
        check_storable(a)?;
        check_storable(b)?;
        match (a.as_sequence_ptr(), b.as_sequence_ptr()) {
            (None, None) => {
                let pair = self.new_sequence(&[a, b])?;
                self.assign(target, pair);
                Ok(())
            }
            (Some(_), None) => self.append(a, b, target),
            (None, Some(_)) => self.prepend(b, a, target),
            (Some(pa), Some(pb)) => self.concat_sequences(target, a, pa, pb),
        }
    }

    fn concat_sequences(
        &mut self,
        target: &mut Value,
        a: Value,
        pa: NonNull<SequenceBlock>,
        pb: NonNull<SequenceBlock>,
    ) -> RuntimeResult<()> {
        let na = self.block(pa).len();
        let nb = self.block(pb).len();

        if self.owns_in_place(*target, a) && pa != pb {
            let overflow = nb.saturating_sub(self.block(pa).postfill());
            if overflow == 0 || na > overflow * self.settings().concat_slack_factor {
                self.reserve_back(pa, nb)?;
                // SAFETY: unique block with `nb` slots of back slack, b is
                // another block
                unsafe {
                    let seq = &mut *pa.as_ptr();
                    seq.open_gap(na, nb);
                    let dst = seq.base().add(na);
                    self.copy_counted(dst, (*pb.as_ptr()).base(), nb);
                }
                return Ok(());
            }
        }

        let block = self.allocate_sequence(na + nb, 0, 0)?;
        // SAFETY: the new block has room for both operands
        unsafe {
            let dst = (*block.as_ptr()).base();
            self.copy_counted(dst, (*pa.as_ptr()).base(), na);
            self.copy_counted(dst.add(na), (*pb.as_ptr()).base(), nb);
        }
        self.assign(target, Value::from_sequence_ptr(block));
        Ok(())
    }

    /// Join every operand into one new block, sized up front.
    pub fn concat_n(
        &mut self,
        operands: &[Value],
        target: &mut Value,
    ) -> RuntimeResult<()> {
        let mut total = 0;
        for &operand in operands {
            check_storable(operand)?;
            total += match operand.as_sequence_ptr() {
                Some(ptr) => self.block(ptr).len(),
                None => 1,
            };
        }

        let block = self.allocate_sequence(total, 0, 0)?;
        // SAFETY: the new block has `total` slots, one per atom and one per
        // element of each sequence operand
        unsafe {
            let mut dst = (*block.as_ptr()).base();
            for &operand in operands {
                match operand.as_sequence_ptr() {
                    Some(ptr) => {
                        let length = (*ptr.as_ptr()).len();
                        self.copy_counted(dst, (*ptr.as_ptr()).base(), length);
                        dst = dst.add(length);
                    }
                    None => {
                        self.ref_value(operand);
                        dst.write(operand);
                        dst = dst.add(1);
                    }
                }
            }
        }
        self.assign(target, Value::from_sequence_ptr(block));
        Ok(())
    }

    /// `source[lo..hi]`, negative bounds count back from the length.
    pub fn read_slice(
        &mut self,
        source: Value,
        lo: i64,
        hi: i64,
        target: &mut Value,
    ) -> RuntimeResult<()> {
        let ptr = self.sequence_ptr(source, "attempt to slice an atom")?;
        let length = self.block(ptr).len();
        let lo = if lo < 0 { lo + length as i64 } else { lo };
        let hi = if hi < 0 { hi + length as i64 } else { hi };
        let (start, count) = check_slice(lo, hi, length)?;

        let waste_limit = self.settings().slice_waste_factor * (count + 1);
        if self.owns_in_place(*target, source)
            && self.block(ptr).prefill() + length < waste_limit
        {
            let elements = self.block(ptr).elements();
            let dropped: Vec<Value> = elements[..start]
                .iter()
                .chain(&elements[start + count..])
                .copied()
                .filter(|v| v.is_boxed())
                .collect();
            // SAFETY: unique block, the dropped elements are released below
            unsafe { (*ptr.as_ptr()).narrow(start, count) };
            self.deref_all(dropped);
            return Ok(());
        }

        let block = self.allocate_sequence(count, 0, 0)?;
        // SAFETY: the new block has `count` slots, the range was validated
        unsafe {
            let src = (*ptr.as_ptr()).base().add(start);
            self.copy_counted((*block.as_ptr()).base(), src, count);
        }
        self.assign(target, Value::from_sequence_ptr(block));
        Ok(())
    }

    /// Overwrite `target[lo..hi]`. An atom lands in every slot, a sequence
    /// must match the range length and is copied pairwise.
    ///
    /// `target` must already be uniquely owned, see [`Heap::assign_slice`].
    pub fn write_slice(
        &mut self,
        target: Value,
        lo: i64,
        hi: i64,
        value: Value,
    ) -> RuntimeResult<()> {
        check_storable(value)?;
        let ptr = self.sequence_ptr(target, "attempt to slice an atom")?;
        debug_assert!(
            self.is_unique(target),
            "slice assignment into a shared sequence"
        );
        let (start, count) = check_slice(lo, hi, self.block(ptr).len())?;

        let incoming: Vec<Value> = match value.as_sequence_ptr() {
            Some(vp) => {
                let elements = self.block(vp).elements();
                if elements.len() != count {
                    return Err(RuntimeError::LengthMismatch {
                        left: count,
                        right: elements.len(),
                    });
                }
                let elements = elements.to_vec();
                for &element in &elements {
                    self.ref_value(element);
                }
                elements
            }
            None => {
                self.ref_value_by(value, count);
                vec![value; count]
            }
        };

        // SAFETY: unique block, the range was validated
        let slots = unsafe { &mut Heap::slots_mut(ptr)[start..start + count] };
        let replaced: Vec<Value> = slots.to_vec();
        slots.copy_from_slice(&incoming);
        self.deref_all(replaced);
        Ok(())
    }

    /// Copy-on-write slice assignment.
    pub fn assign_slice(
        &mut self,
        target: &mut Value,
        lo: i64,
        hi: i64,
        value: Value,
    ) -> RuntimeResult<()> {
        self.make_unique(target)?;
        self.write_slice(*target, lo, hi, value)
    }

    /// Copy-on-write `target[index] = value`.
    pub fn assign_element(
        &mut self,
        target: &mut Value,
        index: i64,
        value: Value,
    ) -> RuntimeResult<()> {
        check_storable(value)?;
        let ptr = self.sequence_ptr(*target, "subscript of an atom")?;
        let length = self.block(ptr).len();
        if index < 1 || index as usize > length {
            return Err(IndexError::ElementOutOfRange { index, length }.into());
        }
        // the slot's reference, taken first so replacing target cannot free value
        self.ref_value(value);
        let unique = if value == *target {
            // storing a block inside itself would make it its own ancestor
            self.copy_sequence(ptr, 0, 0)
                .map(|copy| self.assign(target, copy))
        } else {
            self.make_unique(target)
        };
        if let Err(err) = unique {
            self.deref_value(value);
            return Err(err);
        }

        let ptr = target.to_sequence_ptr();
        // SAFETY: unique block, index validated
        let slot = unsafe { &mut Heap::slots_mut(ptr)[index as usize - 1] };
        let old = std::mem::replace(slot, value);
        self.deref_value(old);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(heap: &mut Heap, values: &[i64]) -> Value {
        let values: Vec<Value> = values
            .iter()
            .map(|&i| Value::from_small_int(i).unwrap())
            .collect();
        heap.new_sequence(&values).unwrap()
    }

    fn assert_clean(heap: &Heap) {
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.bytes_in_use(), 0);
    }

    #[test]
    fn test_check_slice() {
        assert_eq!(check_slice(2, 4, 5).unwrap(), (1, 3));
        assert_eq!(check_slice(6, 5, 5).unwrap(), (5, 0));
        assert_eq!(check_slice(1, 0, 0).unwrap(), (0, 0));
        assert_eq!(
            check_slice(0, 3, 5),
            Err(IndexError::SliceLowerBelowOne(0).into())
        );
        assert_eq!(
            check_slice(1, -1, 5),
            Err(IndexError::SliceUpperBelowZero(-1).into())
        );
        assert_eq!(
            check_slice(4, 2, 5),
            Err(IndexError::SliceLengthNegative(-1).into())
        );
        assert_eq!(
            check_slice(7, 6, 5),
            Err(IndexError::SliceStartPastEnd { start: 7, length: 5 }.into())
        );
        assert_eq!(
            check_slice(6, 6, 5),
            Err(IndexError::SliceStartPastEnd { start: 6, length: 5 }.into())
        );
        assert_eq!(
            check_slice(2, 6, 5),
            Err(IndexError::SliceEndPastEnd { end: 6, length: 5 }.into())
        );
    }

    #[test]
    fn test_append_in_place_keeps_block() {
        let mut heap = Heap::default();
        let mut s = ints(&mut heap, &[1, 2, 3]);
        // first append has no slack and grows the storage run
        heap.append(s, Value::from(4), &mut s).unwrap();
        let block = s;
        let grown = heap.stats().storage_reallocations;
        heap.append(s, Value::from(5), &mut s).unwrap();
        assert_eq!(s, block);
        assert_eq!(heap.stats().storage_reallocations, grown);
        assert_eq!(heap.to_ints(s).unwrap(), vec![1, 2, 3, 4, 5]);
        heap.deref_value(s);
        assert_clean(&heap);
    }

    #[test]
    fn test_append_shared_copies() {
        let mut heap = Heap::default();
        let a = ints(&mut heap, &[1, 2]);
        let mut b = a;
        heap.ref_value(a);
        heap.append(b, Value::from(3), &mut b).unwrap();
        assert_ne!(a, b);
        assert_eq!(heap.to_ints(a).unwrap(), vec![1, 2]);
        assert_eq!(heap.to_ints(b).unwrap(), vec![1, 2, 3]);
        assert!(heap.is_unique(a));
        heap.deref_all([a, b]);
        assert_clean(&heap);
    }

    #[test]
    fn test_append_self_does_not_nest_in_place() {
        let mut heap = Heap::default();
        let mut s = ints(&mut heap, &[1]);
        let before = s;
        heap.append(s, s, &mut s).unwrap();
        assert_ne!(s, before);
        let inner = heap.element(s, 2).unwrap();
        assert_eq!(inner, before);
        assert_eq!(heap.refcount(before), Some(1));
        heap.deref_value(s);
        assert_clean(&heap);
    }

    #[test]
    fn test_prepend() {
        let mut heap = Heap::default();
        let mut s = ints(&mut heap, &[2, 3]);
        heap.prepend(s, Value::from(1), &mut s).unwrap();
        let block = s;
        heap.prepend(s, Value::from(0), &mut s).unwrap();
        assert_eq!(s, block);
        assert_eq!(heap.to_ints(s).unwrap(), vec![0, 1, 2, 3]);

        let mut fresh = Value::ZERO;
        heap.prepend(s, Value::from(-1), &mut fresh).unwrap();
        assert_eq!(heap.to_ints(fresh).unwrap(), vec![-1, 0, 1, 2, 3]);
        assert!(heap.slack(fresh).unwrap().0 > 0);
        heap.deref_all([s, fresh]);
        assert_clean(&heap);
    }

    #[test]
    fn test_concat_variants() {
        let mut heap = Heap::default();
        let mut out = Value::ZERO;
        heap.concat(Value::from(1), Value::from(2), &mut out).unwrap();
        assert_eq!(heap.to_ints(out).unwrap(), vec![1, 2]);

        let a = ints(&mut heap, &[1, 2]);
        let b = ints(&mut heap, &[3, 4]);
        heap.concat(a, b, &mut out).unwrap();
        assert_ne!(out, a);
        assert_ne!(out, b);
        assert_eq!(heap.to_ints(out).unwrap(), vec![1, 2, 3, 4]);

        heap.concat(Value::from(0), a, &mut out).unwrap();
        assert_eq!(heap.to_ints(out).unwrap(), vec![0, 1, 2]);
        heap.concat(a, Value::from(9), &mut out).unwrap();
        assert_eq!(heap.to_ints(out).unwrap(), vec![1, 2, 9]);

        heap.deref_all([out, a, b]);
        assert_clean(&heap);
    }

    #[test]
    fn test_concat_in_place_uses_slack() {
        let mut heap = Heap::default();
        let mut a = ints(&mut heap, &(0..32).collect::<Vec<_>>());
        let b = ints(&mut heap, &[100, 101]);
        heap.concat(a, b, &mut a).unwrap();
        let block = a;
        heap.concat(a, b, &mut a).unwrap();
        assert_eq!(a, block);
        assert_eq!(heap.length(a).unwrap(), 36);
        assert_eq!(heap.element(a, 36).unwrap(), Value::from(101));
        heap.deref_all([a, b]);
        assert_clean(&heap);
    }

    #[test]
    fn test_concat_self() {
        let mut heap = Heap::default();
        let mut a = ints(&mut heap, &[1, 2]);
        heap.concat(a, a, &mut a).unwrap();
        assert_eq!(heap.to_ints(a).unwrap(), vec![1, 2, 1, 2]);
        heap.deref_value(a);
        assert_clean(&heap);
    }

    #[test]
    fn test_concat_n() {
        let mut heap = Heap::default();
        let a = ints(&mut heap, &[1, 2]);
        let d = heap.new_double(0.5).unwrap();
        let empty = heap.new_empty_sequence().unwrap();
        let mut out = Value::ZERO;
        heap.concat_n(&[a, Value::from(3), empty, d, a], &mut out)
            .unwrap();
        assert_eq!(heap.length(out).unwrap(), 6);
        assert_eq!(heap.element(out, 4).unwrap(), d);
        assert_eq!(heap.refcount(d), Some(2));
        heap.deref_all([a, d, empty, out]);
        assert_clean(&heap);
    }

    #[test]
    fn test_read_slice() {
        let mut heap = Heap::default();
        let s = ints(&mut heap, &[10, 20, 30, 40, 50]);
        let mut out = Value::ZERO;
        heap.read_slice(s, 2, 4, &mut out).unwrap();
        assert_eq!(heap.to_ints(out).unwrap(), vec![20, 30, 40]);

        heap.read_slice(s, 2, -1, &mut out).unwrap();
        assert_eq!(heap.to_ints(out).unwrap(), vec![20, 30, 40]);

        heap.read_slice(s, 6, 5, &mut out).unwrap();
        assert_eq!(heap.length(out).unwrap(), 0);

        assert!(matches!(
            heap.read_slice(s, 3, 9, &mut out),
            Err(RuntimeError::IndexOutOfRange(IndexError::SliceEndPastEnd {
                ..
            }))
        ));
        assert!(matches!(
            heap.read_slice(Value::from(1), 1, 1, &mut out),
            Err(RuntimeError::TypeMismatch(_))
        ));

        // negative bounds that still land below the valid range
        assert_eq!(
            heap.read_slice(s, -10, 2, &mut out),
            Err(IndexError::SliceLowerBelowOne(-5).into())
        );
        assert_eq!(
            heap.read_slice(s, 1, -7, &mut out),
            Err(IndexError::SliceUpperBelowZero(-2).into())
        );
        assert_eq!(heap.length(out).unwrap(), 0);
        heap.deref_all([s, out]);
        assert_clean(&heap);
    }

    #[test]
    fn test_read_slice_narrows_in_place() {
        let mut heap = Heap::default();
        let d = heap.new_double(1.0).unwrap();
        let mut s = heap
            .new_sequence(&[d, Value::from(2), Value::from(3), d])
            .unwrap();
        heap.deref_value(d);
        heap.read_slice(s, 2, 3, &mut s).unwrap();
        let narrowed = s;
        assert_eq!(heap.to_ints(s).unwrap(), vec![2, 3]);
        assert_eq!(heap.slack(s).unwrap(), (1, 1));
        assert_eq!(heap.stats().live_doubles, 0);

        // narrowing again keeps the block while waste stays bounded
        heap.read_slice(s, 2, 2, &mut s).unwrap();
        assert_eq!(s, narrowed);
        assert_eq!(heap.to_ints(s).unwrap(), vec![3]);
        heap.deref_value(s);
        assert_clean(&heap);
    }

    #[test]
    fn test_write_slice() {
        let mut heap = Heap::default();
        let s = ints(&mut heap, &[1, 2, 3, 4, 5]);
        heap.write_slice(s, 2, 4, Value::ZERO).unwrap();
        assert_eq!(heap.to_ints(s).unwrap(), vec![1, 0, 0, 0, 5]);

        let d = heap.new_double(2.5).unwrap();
        heap.write_slice(s, 1, 2, d).unwrap();
        assert_eq!(heap.refcount(d), Some(3));
        let r = ints(&mut heap, &[7, 8]);
        heap.write_slice(s, 1, 2, r).unwrap();
        assert_eq!(heap.refcount(d), Some(1));
        assert_eq!(heap.to_ints(s).unwrap(), vec![7, 8, 0, 0, 5]);

        assert_eq!(
            heap.write_slice(s, 1, 3, r),
            Err(RuntimeError::LengthMismatch { left: 3, right: 2 })
        );
        heap.deref_all([s, d, r]);
        assert_clean(&heap);
    }

    #[test]
    fn test_assign_slice_copies_shared() {
        let mut heap = Heap::default();
        let a = ints(&mut heap, &[1, 2, 3]);
        let mut b = a;
        heap.ref_value(a);
        heap.assign_slice(&mut b, 1, 3, Value::from(9)).unwrap();
        assert_eq!(heap.to_ints(a).unwrap(), vec![1, 2, 3]);
        assert_eq!(heap.to_ints(b).unwrap(), vec![9, 9, 9]);
        heap.deref_all([a, b]);
        assert_clean(&heap);
    }

    #[test]
    fn test_assign_element() {
        let mut heap = Heap::default();
        let mut s = ints(&mut heap, &[1, 2]);
        heap.assign_element(&mut s, 2, Value::from(5)).unwrap();
        assert_eq!(heap.to_ints(s).unwrap(), vec![1, 5]);

        let before = s;
        heap.assign_element(&mut s, 1, before).unwrap();
        assert_ne!(s, before);
        assert_eq!(heap.element(s, 1).unwrap(), before);
        assert_eq!(heap.to_ints(before).unwrap(), vec![1, 5]);

        assert!(matches!(
            heap.assign_element(&mut s, 3, Value::ZERO),
            Err(RuntimeError::IndexOutOfRange(_))
        ));
        heap.deref_value(s);
        assert_clean(&heap);
    }

    #[test]
    fn test_sentinel_never_stored() {
        let mut heap = Heap::default();
        let mut s = ints(&mut heap, &[1, 2, 3]);
        let block = s;
        let sentinel = Value::SENTINEL;
        let mismatch = |result: RuntimeResult<()>| {
            assert!(matches!(result, Err(RuntimeError::TypeMismatch(_))));
        };

        mismatch(heap.append(s, sentinel, &mut s));
        mismatch(heap.prepend(s, sentinel, &mut s));
        mismatch(heap.concat(s, sentinel, &mut s));
        mismatch(heap.concat(sentinel, s, &mut s));
        mismatch(heap.write_slice(s, 1, 2, sentinel));
        mismatch(heap.assign_slice(&mut s, 1, 2, sentinel));
        mismatch(heap.assign_element(&mut s, 1, sentinel));
        let mut out = Value::ZERO;
        mismatch(heap.concat_n(&[s, sentinel], &mut out));
        assert_eq!(out, Value::ZERO);
        assert!(matches!(
            heap.repeat(sentinel, 2),
            Err(RuntimeError::TypeMismatch(_))
        ));

        assert_eq!(s, block);
        assert_eq!(heap.to_ints(s).unwrap(), vec![1, 2, 3]);
        assert_eq!(heap.refcount(s), Some(1));
        assert_eq!(heap.live_blocks(), 1);
        heap.deref_value(s);
        assert_clean(&heap);
    }
}
