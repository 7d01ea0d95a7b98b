//! Total order over values and the searches built on it.
//!
//! Atoms come before sequences, atoms compare numerically and sequences
//! lexicographically with a strict prefix ordered first.
use std::cmp::Ordering;

use crate::{Heap, IndexError, RuntimeError, RuntimeResult, Value};

struct Frame<'a> {
    left: &'a [Value],
    right: &'a [Value],
    index: usize,
}

impl<'a> Frame<'a> {
    fn new(left: &'a [Value], right: &'a [Value]) -> Self {
        Self {
            left,
            right,
            index: 0,
        }
    }
}

impl Heap {
    /// Three way comparison. Nested sequences are walked with an explicit
    /// frame stack, not native recursion.
    pub fn compare(&self, a: Value, b: Value) -> Ordering {
        if let Some(order) = self.compare_shallow(a, b) {
            return order;
        }
        let mut frames = vec![Frame::new(self.sequence_slice(a), self.sequence_slice(b))];
        while let Some(frame) = frames.last_mut() {
            let i = frame.index;
            if i == frame.left.len() || i == frame.right.len() {
                let order = frame.left.len().cmp(&frame.right.len());
                frames.pop();
                if order != Ordering::Equal {
                    return order;
                }
                continue;
            }
            frame.index += 1;
            let (x, y) = (frame.left[i], frame.right[i]);
            match self.compare_shallow(x, y) {
                Some(Ordering::Equal) => {}
                Some(order) => return order,
                None => frames.push(Frame::new(
                    self.sequence_slice(x),
                    self.sequence_slice(y),
                )),
            }
        }
        Ordering::Equal
    }

    /// `compare` as the -1/0/1 small integer the language sees
    pub fn compare_value(&self, a: Value, b: Value) -> Value {
        match self.compare(a, b) {
            Ordering::Less => Value::from(-1),
            Ordering::Equal => Value::ZERO,
            Ordering::Greater => Value::ONE,
        }
    }

    pub fn equal(&self, a: Value, b: Value) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// `None` when both are sequences and their elements decide.
    fn compare_shallow(&self, a: Value, b: Value) -> Option<Ordering> {
        if a == b {
            return Some(Ordering::Equal);
        }
        match (a.is_sequence_ref(), b.is_sequence_ref()) {
            (true, true) => None,
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (false, false) => Some(self.compare_atoms(a, b)),
        }
    }

    fn compare_atoms(&self, a: Value, b: Value) -> Ordering {
        if let (Some(x), Some(y)) = (a.as_small_int(), b.as_small_int()) {
            return x.cmp(&y);
        }
        let x = self.number(a).unwrap_or(f64::NAN);
        let y = self.number(b).unwrap_or(f64::NAN);
        // NaN sorts after everything
        if x < y {
            Ordering::Less
        } else if x == y {
            Ordering::Equal
        } else {
            Ordering::Greater
        }
    }

    fn sequence_slice(&self, value: Value) -> &[Value] {
        self.block(value.to_sequence_ptr()).elements()
    }

    pub fn find(&self, needle: Value, haystack: Value) -> RuntimeResult<usize> {
        self.find_from(needle, haystack, 1)
    }

    /// 1-based position of the first element equal to `needle` at or after
    /// `start`, 0 if there is none.
    pub fn find_from(
        &self,
        needle: Value,
        haystack: Value,
        start: i64,
    ) -> RuntimeResult<usize> {
        let elements = self.search_space(haystack, start)?;
        let skip = start as usize - 1;
        let found = elements[skip..]
            .iter()
            .position(|&element| self.equal(element, needle));
        Ok(found.map_or(0, |pos| skip + pos + 1))
    }

    pub fn match_sequence(
        &self,
        needle: Value,
        haystack: Value,
    ) -> RuntimeResult<usize> {
        self.match_from(needle, haystack, 1)
    }

    /// 1-based position where `needle`'s elements appear as a contiguous run
    /// of `haystack`, at or after `start`. 0 if they do not.
    pub fn match_from(
        &self,
        needle: Value,
        haystack: Value,
        start: i64,
    ) -> RuntimeResult<usize> {
        let pattern = match needle.as_sequence_ptr() {
            Some(ptr) => self.block(ptr).elements(),
            None => {
                return Err(RuntimeError::TypeMismatch(
                    "first argument of match must be a sequence",
                ));
            }
        };
        if pattern.is_empty() {
            return Err(RuntimeError::TypeMismatch(
                "first argument of match must be a non-empty sequence",
            ));
        }
        let elements = self.search_space(haystack, start)?;
        let skip = start as usize - 1;
        let found = elements[skip..]
            .windows(pattern.len())
            .position(|window| {
                window
                    .iter()
                    .zip(pattern)
                    .all(|(&x, &y)| self.equal(x, y))
            });
        Ok(found.map_or(0, |pos| skip + pos + 1))
    }

    fn search_space(&self, haystack: Value, start: i64) -> RuntimeResult<&[Value]> {
        let ptr = self.sequence_ptr(haystack, "search in an atom")?;
        let elements = self.block(ptr).elements();
        if start < 1 || start as usize > elements.len() + 1 {
            return Err(IndexError::SearchStartOutOfBounds {
                start,
                length: elements.len(),
            }
            .into());
        }
        Ok(elements)
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

    #[test]
    fn test_atoms() {
        let mut heap = Heap::default();
        let d = heap.new_double(2.0).unwrap();
        let nan = heap.new_double(f64::NAN).unwrap();
        assert_eq!(heap.compare(Value::from(1), Value::from(2)), Ordering::Less);
        assert_eq!(heap.compare(d, Value::from(2)), Ordering::Equal);
        assert_eq!(heap.compare(Value::from(3), d), Ordering::Greater);
        assert_eq!(heap.compare(nan, Value::from(0)), Ordering::Greater);
        assert_eq!(heap.compare(Value::from(0), nan), Ordering::Greater);
        heap.deref_all([d, nan]);
    }

    #[test]
    fn test_atoms_before_sequences() {
        let mut heap = Heap::default();
        let empty = heap.new_empty_sequence().unwrap();
        assert_eq!(heap.compare(Value::from(1_000_000), empty), Ordering::Less);
        assert_eq!(heap.compare(empty, Value::from(-5)), Ordering::Greater);
        assert_eq!(heap.compare_value(empty, Value::ZERO), Value::ONE);
        heap.deref_value(empty);
    }

    #[test]
    fn test_lexicographic() {
        let mut heap = Heap::default();
        let a = ints(&mut heap, &[1, 2]);
        let b = ints(&mut heap, &[1, 2, 0]);
        let c = ints(&mut heap, &[1, 3]);
        assert_eq!(heap.compare(a, b), Ordering::Less);
        assert_eq!(heap.compare(b, c), Ordering::Less);
        assert_eq!(heap.compare(c, a), Ordering::Greater);

        let nested_a = heap.new_sequence(&[a, Value::from(9)]).unwrap();
        let nested_b = heap.new_sequence(&[b, Value::from(0)]).unwrap();
        assert_eq!(heap.compare(nested_a, nested_b), Ordering::Less);
        let copy = heap.new_sequence(&[a, Value::from(9)]).unwrap();
        assert!(heap.equal(nested_a, copy));
        assert_eq!(heap.compare_value(nested_b, nested_a), Value::ONE);

        heap.deref_all([a, b, c, nested_a, nested_b, copy]);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_deep_compare() {
        let mut heap = Heap::default();
        let mut left = heap.new_empty_sequence().unwrap();
        let mut right = heap.new_sequence(&[Value::ONE]).unwrap();
        for _ in 0..50_000 {
            let l = heap.new_sequence(&[left]).unwrap();
            let r = heap.new_sequence(&[right]).unwrap();
            heap.deref_all([left, right]);
            left = l;
            right = r;
        }
        assert_eq!(heap.compare(left, right), Ordering::Less);
        heap.deref_all([left, right]);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_find() {
        let mut heap = Heap::default();
        let d = heap.new_double(3.0).unwrap();
        let inner = ints(&mut heap, &[7]);
        let s = heap
            .new_sequence(&[Value::from(1), inner, Value::from(3), Value::from(1)])
            .unwrap();
        let needle = ints(&mut heap, &[7]);
        assert_eq!(heap.find(Value::from(1), s).unwrap(), 1);
        assert_eq!(heap.find(d, s).unwrap(), 3);
        assert_eq!(heap.find(needle, s).unwrap(), 2);
        assert_eq!(heap.find_from(Value::from(1), s, 2).unwrap(), 4);
        assert_eq!(heap.find(Value::from(5), s).unwrap(), 0);
        assert_eq!(heap.find_from(Value::from(1), s, 5).unwrap(), 0);
        assert_eq!(
            heap.find_from(Value::from(1), s, 6),
            Err(IndexError::SearchStartOutOfBounds {
                start: 6,
                length: 4
            }
            .into())
        );
        heap.deref_all([d, inner, s, needle]);
    }

    #[test]
    fn test_match() {
        let mut heap = Heap::default();
        let s = heap.new_string("abcabc").unwrap();
        let bc = heap.new_string("bc").unwrap();
        let empty = heap.new_empty_sequence().unwrap();
        assert_eq!(heap.match_sequence(bc, s).unwrap(), 2);
        assert_eq!(heap.match_from(bc, s, 3).unwrap(), 5);
        assert_eq!(heap.match_from(bc, s, 6).unwrap(), 0);
        assert_eq!(heap.match_from(s, bc, 1).unwrap(), 0);
        assert!(matches!(
            heap.match_sequence(empty, s),
            Err(RuntimeError::TypeMismatch(_))
        ));
        assert!(matches!(
            heap.match_sequence(Value::ONE, s),
            Err(RuntimeError::TypeMismatch(_))
        ));
        heap.deref_all([s, bc, empty]);
    }
}
