//! Value: a tagged machine word, small integer, boxed double, boxed sequence
//! or the sentinel.
//!
//! The low bit distinguishes small integers from everything else, the low
//! three bits distinguish the boxed kinds. Blocks are at least 8 byte aligned
//! so a block address never has any of the tag bits set.
use std::{fmt, ptr::NonNull};

use crate::{DoubleBlock, SequenceBlock};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueTag {
    SmallInt = 0b0,
    Double = 0b001,
    Sequence = 0b011,
    Sentinel = 0b111,
}

pub const SMALL_INT_TAG_MASK: u64 = 0b1;
pub const BOXED_TAG_MASK: u64 = 0b111;

/// payload bits of a small integer
pub const SMALL_INT_BITS: u32 = 63;
pub const MAX_SMALL_INT: i64 = (1 << (SMALL_INT_BITS - 1)) - 1;
pub const MIN_SMALL_INT: i64 = -(1 << (SMALL_INT_BITS - 1));

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(u64);

/// Decoded view of a [`Value`], for matching instead of bit testing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueKind {
    SmallInt(i64),
    Double(NonNull<DoubleBlock>),
    Sequence(NonNull<SequenceBlock>),
    Sentinel,
}

impl Value {
    /// no value, also the terminator one past the end of every sequence
    pub const SENTINEL: Value = Value(ValueTag::Sentinel as u64);
    pub const ZERO: Value = Value(0);
    pub const ONE: Value = Value(1 << 1);

    /// Encode a small integer, `None` if it does not fit and must be boxed.
    #[inline]
    pub fn from_small_int(value: i64) -> Option<Self> {
        if !(MIN_SMALL_INT..=MAX_SMALL_INT).contains(&value) {
            return None;
        }
        Some(Self(value.cast_unsigned() << 1))
    }

    /// # Safety
    /// value must be within `MIN_SMALL_INT..=MAX_SMALL_INT`
    #[inline]
    pub const unsafe fn from_small_int_unchecked(value: i64) -> Self {
        debug_assert!(value >= MIN_SMALL_INT && value <= MAX_SMALL_INT);
        Self(value.cast_unsigned() << 1)
    }

    /// Decode a small integer. Calling this on anything else yields garbage.
    #[inline]
    pub const fn small_int_unchecked(self) -> i64 {
        debug_assert!(self.is_small_int());
        self.0.cast_signed() >> 1
    }

    #[inline]
    pub const fn as_small_int(self) -> Option<i64> {
        if self.is_small_int() {
            return Some(self.small_int_unchecked());
        }
        None
    }

    #[inline]
    pub const fn is_small_int(self) -> bool {
        self.0 & SMALL_INT_TAG_MASK == ValueTag::SmallInt as u64
    }

    #[inline]
    pub const fn is_double_ref(self) -> bool {
        self.0 & BOXED_TAG_MASK == ValueTag::Double as u64
    }

    #[inline]
    pub const fn is_sequence_ref(self) -> bool {
        self.0 & BOXED_TAG_MASK == ValueTag::Sequence as u64
    }

    #[inline]
    pub const fn is_sentinel(self) -> bool {
        self.0 == ValueTag::Sentinel as u64
    }

    /// integer or double
    #[inline]
    pub const fn is_atom(self) -> bool {
        self.is_small_int() || self.is_double_ref()
    }

    /// carries a refcounted block
    #[inline]
    pub const fn is_boxed(self) -> bool {
        self.is_double_ref() || self.is_sequence_ref()
    }

    #[inline]
    pub fn from_double_ptr(ptr: NonNull<DoubleBlock>) -> Self {
        let raw = ptr.as_ptr() as u64;
        debug_assert_eq!(
            raw & BOXED_TAG_MASK,
            0,
            "pointer must be aligned so low 3 bits are free"
        );
        Self(raw | ValueTag::Double as u64)
    }

    #[inline]
    pub fn from_sequence_ptr(ptr: NonNull<SequenceBlock>) -> Self {
        let raw = ptr.as_ptr() as u64;
        debug_assert_eq!(
            raw & BOXED_TAG_MASK,
            0,
            "pointer must be aligned so low 3 bits are free"
        );
        Self(raw | ValueTag::Sequence as u64)
    }

    /// Decode a double reference, the caller checked the tag.
    #[inline]
    pub fn to_double_ptr(self) -> NonNull<DoubleBlock> {
        debug_assert!(self.is_double_ref());
        let raw = (self.0 & !BOXED_TAG_MASK) as *mut DoubleBlock;
        // SAFETY: a double reference is never built from a null pointer
        unsafe { NonNull::new_unchecked(raw) }
    }

    /// Decode a sequence reference, the caller checked the tag.
    #[inline]
    pub fn to_sequence_ptr(self) -> NonNull<SequenceBlock> {
        debug_assert!(self.is_sequence_ref());
        let raw = (self.0 & !BOXED_TAG_MASK) as *mut SequenceBlock;
        // SAFETY: a sequence reference is never built from a null pointer
        unsafe { NonNull::new_unchecked(raw) }
    }

    #[inline]
    pub fn as_sequence_ptr(self) -> Option<NonNull<SequenceBlock>> {
        if self.is_sequence_ref() {
            return Some(self.to_sequence_ptr());
        }
        None
    }

    #[inline]
    pub fn as_double_ptr(self) -> Option<NonNull<DoubleBlock>> {
        if self.is_double_ref() {
            return Some(self.to_double_ptr());
        }
        None
    }

    pub fn kind(self) -> ValueKind {
        if self.is_small_int() {
            ValueKind::SmallInt(self.small_int_unchecked())
        } else if self.is_double_ref() {
            ValueKind::Double(self.to_double_ptr())
        } else if self.is_sequence_ref() {
            ValueKind::Sequence(self.to_sequence_ptr())
        } else {
            debug_assert!(self.is_sentinel(), "corrupt value word {:#x}", self.0);
            ValueKind::Sentinel
        }
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// # Safety
    /// raw must be a word previously obtained from [`Value::raw`] whose block
    /// (if any) is still alive
    #[inline]
    pub const unsafe fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::SmallInt(i) => write!(f, "SmallInt({i})"),
            ValueKind::Double(ptr) => write!(f, "Double({ptr:p})"),
            ValueKind::Sequence(ptr) => write!(f, "Sequence({ptr:p})"),
            ValueKind::Sentinel => write!(f, "Sentinel"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        if value { Value::ONE } else { Value::ZERO }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        // SAFETY: every i32 fits in a small integer
        unsafe { Self::from_small_int_unchecked(value as i64) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_int_roundtrip() {
        for i in [0, 1, -1, 42, -42, MAX_SMALL_INT, MIN_SMALL_INT] {
            let value = Value::from_small_int(i).expect("in range");
            assert!(value.is_small_int());
            assert!(!value.is_double_ref());
            assert!(!value.is_sequence_ref());
            assert!(!value.is_sentinel());
            assert_eq!(value.small_int_unchecked(), i);
            assert_eq!(value.kind(), ValueKind::SmallInt(i));
        }
    }

    #[test]
    fn test_small_int_out_of_range() {
        assert!(Value::from_small_int(MAX_SMALL_INT + 1).is_none());
        assert!(Value::from_small_int(MIN_SMALL_INT - 1).is_none());
        assert!(Value::from_small_int(i64::MAX).is_none());
        assert!(Value::from_small_int(i64::MIN).is_none());
    }

    #[test]
    fn test_sentinel_is_exclusive() {
        let s = Value::SENTINEL;
        assert!(s.is_sentinel());
        assert!(!s.is_small_int());
        assert!(!s.is_double_ref());
        assert!(!s.is_sequence_ref());
        assert!(!s.is_atom());
        assert!(!s.is_boxed());
        assert_eq!(s.kind(), ValueKind::Sentinel);
    }

    #[test]
    fn test_pointer_tags() {
        #[repr(align(8))]
        struct Slot([u8; 64]);
        let mut slot = Slot([0; 64]);
        let raw = slot.0.as_mut_ptr();

        let double = Value::from_double_ptr(NonNull::new(raw.cast()).unwrap());
        assert!(double.is_double_ref());
        assert!(double.is_atom());
        assert!(double.is_boxed());
        assert_eq!(double.to_double_ptr().as_ptr().cast::<u8>(), raw);

        let seq = Value::from_sequence_ptr(NonNull::new(raw.cast()).unwrap());
        assert!(seq.is_sequence_ref());
        assert!(!seq.is_atom());
        assert!(seq.is_boxed());
        assert_eq!(seq.to_sequence_ptr().as_ptr().cast::<u8>(), raw);
        assert_ne!(double, seq);
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(Value::from(true), Value::ONE);
        assert_eq!(Value::from(false), Value::ZERO);
        assert_eq!(Value::ONE.small_int_unchecked(), 1);
        assert_eq!(Value::from(-7).small_int_unchecked(), -7);
    }
}
