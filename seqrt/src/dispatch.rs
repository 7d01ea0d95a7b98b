//! Elementwise application of operators over nested sequences.
//!
//! An atom against a sequence is repeated for every element, two sequences
//! must have the same length and pair up. Results are always new blocks.
//! Nesting is walked with an explicit frame stack, so depth only costs frames.
use std::ptr::NonNull;

use crate::{
    BinaryOp, BinaryOperator, Heap, RuntimeError, RuntimeResult, SequenceBlock,
    UnaryOp, UnaryOperator, Value,
};

/// One result block being filled, `left` and `right` are its operands.
/// At least one operand is a sequence of `length` elements.
struct Frame {
    left: Value,
    right: Value,
    result: NonNull<SequenceBlock>,
    length: usize,
    index: usize,
}

impl Heap {
    pub fn binary_op(
        &mut self,
        op: BinaryOp,
        a: Value,
        b: Value,
    ) -> RuntimeResult<Value> {
        let operator = op.operator();
        self.broadcast(a, b, |heap, x, y| heap.binary_leaf(operator, x, y))
    }

    /// The right operand is a constant atom, it never adds structure.
    pub fn unary_op(&mut self, op: UnaryOp, a: Value) -> RuntimeResult<Value> {
        let operator = op.operator();
        self.broadcast(a, Value::ZERO, |heap, x, _| heap.unary_leaf(operator, x))
    }

    fn broadcast(
        &mut self,
        a: Value,
        b: Value,
        mut leaf: impl FnMut(&mut Heap, Value, Value) -> RuntimeResult<Value>,
    ) -> RuntimeResult<Value> {
        let Some(root) = self.open_frame(a, b)? else {
            return leaf(self, a, b);
        };
        let result = Value::from_sequence_ptr(root.result);
        let mut frames = vec![root];
        if let Err(err) = self.fill_frames(&mut frames, &mut leaf) {
            // children are already installed in their parents, unfilled
            // slots still hold small integer zeros
            self.deref_value(result);
            return Err(err);
        }
        Ok(result)
    }

    fn fill_frames(
        &mut self,
        frames: &mut Vec<Frame>,
        leaf: &mut impl FnMut(&mut Heap, Value, Value) -> RuntimeResult<Value>,
    ) -> RuntimeResult<()> {
        while let Some(frame) = frames.last_mut() {
            let i = frame.index;
            if i == frame.length {
                frames.pop();
                continue;
            }
            frame.index += 1;
            let x = operand_at(self, frame.left, i);
            let y = operand_at(self, frame.right, i);
            let parent = frame.result;

            let value = match self.open_frame(x, y)? {
                Some(child) => {
                    let value = Value::from_sequence_ptr(child.result);
                    frames.push(child);
                    value
                }
                None => leaf(self, x, y)?,
            };
            // SAFETY: fresh block nobody else has seen, `i` is below its length
            unsafe { Heap::slots_mut(parent)[i] = value };
        }
        Ok(())
    }

    /// Allocate the result block for `a op b`, `None` when both are atoms.
    fn open_frame(&mut self, a: Value, b: Value) -> RuntimeResult<Option<Frame>> {
        let left = a.as_sequence_ptr().map(|ptr| self.block(ptr).len());
        let right = b.as_sequence_ptr().map(|ptr| self.block(ptr).len());
        let length = match (left, right) {
            (None, None) => return Ok(None),
            (Some(left), Some(right)) if left != right => {
                return Err(RuntimeError::LengthMismatch { left, right });
            }
            (Some(length), _) | (None, Some(length)) => length,
        };
        let result = self.allocate_sequence(length, 0, 0)?;
        Ok(Some(Frame {
            left: a,
            right: b,
            result,
            length,
            index: 0,
        }))
    }

    fn binary_leaf(
        &mut self,
        operator: &BinaryOperator,
        a: Value,
        b: Value,
    ) -> RuntimeResult<Value> {
        if a.is_small_int() && b.is_small_int() {
            return (operator.int_fn)(
                self,
                a.small_int_unchecked(),
                b.small_int_unchecked(),
            );
        }
        let x = self.number(a)?;
        let y = self.number(b)?;
        (operator.double_fn)(self, x, y)
    }

    fn unary_leaf(
        &mut self,
        operator: &UnaryOperator,
        a: Value,
    ) -> RuntimeResult<Value> {
        if a.is_small_int() {
            return (operator.int_fn)(self, a.small_int_unchecked());
        }
        let x = self.number(a)?;
        (operator.double_fn)(self, x)
    }
}

/// Element `index` of a sequence operand, an atom stands for every element.
#[inline]
fn operand_at(heap: &Heap, operand: Value, index: usize) -> Value {
    match operand.as_sequence_ptr() {
        Some(ptr) => heap.block(ptr).elements()[index],
        None => operand,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MathError, RuntimeError};

    fn ints(heap: &mut Heap, values: &[i64]) -> Value {
        let values: Vec<Value> = values
            .iter()
            .map(|&i| Value::from_small_int(i).unwrap())
            .collect();
        heap.new_sequence(&values).unwrap()
    }

    #[test]
    fn test_broadcast_atom_over_sequence() {
        let mut heap = Heap::default();
        let s = ints(&mut heap, &[1, 2, 3]);
        let sum = heap.binary_op(BinaryOp::Add, Value::from(5), s).unwrap();
        assert_eq!(heap.to_ints(sum).unwrap(), vec![6, 7, 8]);
        let diff = heap.binary_op(BinaryOp::Subtract, s, Value::from(1)).unwrap();
        assert_eq!(heap.to_ints(diff).unwrap(), vec![0, 1, 2]);
        heap.deref_all([s, sum, diff]);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_pairwise_and_nested() {
        let mut heap = Heap::default();
        let inner = ints(&mut heap, &[10, 20]);
        let a = heap.new_sequence(&[Value::from(1), inner]).unwrap();
        let b = ints(&mut heap, &[2, 3]);
        let product = heap.binary_op(BinaryOp::Multiply, a, b).unwrap();
        assert_eq!(heap.element(product, 1).unwrap(), Value::from(2));
        let nested = heap.element(product, 2).unwrap();
        assert_eq!(heap.to_ints(nested).unwrap(), vec![30, 60]);
        heap.deref_all([inner, a, b, product]);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_length_mismatch() {
        let mut heap = Heap::default();
        let a = ints(&mut heap, &[1, 2]);
        let b = ints(&mut heap, &[1, 2, 3]);
        assert_eq!(
            heap.binary_op(BinaryOp::Add, a, b),
            Err(RuntimeError::LengthMismatch { left: 2, right: 3 })
        );
        heap.deref_all([a, b]);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_error_releases_partial_result() {
        let mut heap = Heap::default();
        let d = heap.new_double(1.5).unwrap();
        let s = heap.new_sequence(&[d, Value::from(2), Value::ZERO]).unwrap();
        assert_eq!(
            heap.binary_op(BinaryOp::Divide, Value::from(1), s),
            Err(RuntimeError::MathDomainError(MathError::DivideByZero))
        );
        heap.deref_all([d, s]);
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.bytes_in_use(), 0);
    }

    #[test]
    fn test_nested_mismatch_releases_filled_children() {
        let mut heap = Heap::default();
        let pair = ints(&mut heap, &[1, 2]);
        let single = ints(&mut heap, &[1]);
        let d = heap.new_double(0.5).unwrap();
        let deep = heap.new_sequence(&[d, Value::ONE]).unwrap();
        let a = heap.new_sequence(&[deep, pair, single]).unwrap();
        let b = heap.new_sequence(&[pair, pair, pair]).unwrap();
        assert_eq!(
            heap.binary_op(BinaryOp::Add, a, b),
            Err(RuntimeError::LengthMismatch { left: 1, right: 2 })
        );
        heap.deref_all([pair, single, d, deep, a, b]);
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.bytes_in_use(), 0);
    }

    #[test]
    fn test_mixed_leaves_use_doubles() {
        let mut heap = Heap::default();
        let d = heap.new_double(0.5).unwrap();
        let sum = heap.binary_op(BinaryOp::Add, Value::from(1), d).unwrap();
        assert_eq!(heap.double_value(sum), Some(1.5));
        let eq = heap.binary_op(BinaryOp::Equal, d, d).unwrap();
        assert_eq!(eq, Value::ONE);
        heap.deref_all([d, sum]);
    }

    #[test]
    fn test_unary_broadcast() {
        let mut heap = Heap::default();
        let d = heap.new_double(-1.5).unwrap();
        let s = heap.new_sequence(&[Value::from(3), d]).unwrap();
        let neg = heap.unary_op(UnaryOp::Negate, s).unwrap();
        assert_eq!(heap.element(neg, 1).unwrap(), Value::from(-3));
        let second = heap.element(neg, 2).unwrap();
        assert_eq!(heap.double_value(second), Some(1.5));

        let floor = heap.unary_op(UnaryOp::Floor, s).unwrap();
        assert_eq!(heap.to_ints(floor).unwrap(), vec![3, -2]);

        assert_eq!(
            heap.unary_op(UnaryOp::Sqrt, s),
            Err(RuntimeError::MathDomainError(MathError::SqrtOfNegative))
        );
        heap.deref_all([d, s, neg, floor]);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_sentinel_operand_rejected() {
        let mut heap = Heap::default();
        assert!(matches!(
            heap.binary_op(BinaryOp::Add, Value::SENTINEL, Value::ONE),
            Err(RuntimeError::TypeMismatch(_))
        ));
    }
}
