use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    SliceLowerBelowOne(i64),
    SliceUpperBelowZero(i64),
    SliceLengthNegative(i64),
    SliceStartPastEnd { start: i64, length: usize },
    SliceEndPastEnd { end: i64, length: usize },
    ElementOutOfRange { index: i64, length: usize },
    SearchStartOutOfBounds { start: i64, length: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    DivideByZero,
    RemainderByZero,
    SqrtOfNegative,
    LogOfNonPositive,
    ZeroToNonPositivePower,
    NegativeToFractionalPower,
    NegativeRepeatCount,
}

/// Every failure the runtime core can raise. None of them are retried here,
/// they travel up to whoever drives the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    TypeMismatch(&'static str),
    IndexOutOfRange(IndexError),
    LengthMismatch { left: usize, right: usize },
    MathDomainError(MathError),
    OutOfMemory { requested: usize },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::SliceLowerBelowOne(lo) => {
                write!(f, "slice lower index is less than 1 ({lo})")
            }
            IndexError::SliceUpperBelowZero(hi) => {
                write!(f, "slice upper index is less than 0 ({hi})")
            }
            IndexError::SliceLengthNegative(len) => {
                write!(f, "slice length is less than 0 ({len})")
            }
            IndexError::SliceStartPastEnd { start, length } => write!(
                f,
                "slice starts past end of sequence ({start} > {length})"
            ),
            IndexError::SliceEndPastEnd { end, length } => write!(
                f,
                "slice ends past end of sequence ({end} > {length})"
            ),
            IndexError::ElementOutOfRange { index, length } => write!(
                f,
                "subscript value {index} is out of bounds, sequence length is {length}"
            ),
            IndexError::SearchStartOutOfBounds { start, length } => write!(
                f,
                "search start index {start} is out of bounds for a sequence of length {length}"
            ),
        }
    }
}

impl fmt::Display for MathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MathError::DivideByZero => "attempt to divide by 0",
            MathError::RemainderByZero => "can't get remainder of a number divided by 0",
            MathError::SqrtOfNegative => "attempt to take square root of a negative number",
            MathError::LogOfNonPositive => "may only take log of a positive number",
            MathError::ZeroToNonPositivePower => "can't raise 0 to power <= 0",
            MathError::NegativeToFractionalPower => {
                "can't raise negative number to non-integer power"
            }
            MathError::NegativeRepeatCount => "repetition count must not be negative",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeMismatch(expected) => {
                write!(f, "type mismatch: {expected}")
            }
            RuntimeError::IndexOutOfRange(err) => write!(f, "{err}"),
            RuntimeError::LengthMismatch { left, right } => write!(
                f,
                "sequence lengths are not the same ({left} != {right})"
            ),
            RuntimeError::MathDomainError(err) => write!(f, "{err}"),
            RuntimeError::OutOfMemory { requested } => {
                write!(f, "out of memory allocating {requested} bytes")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<IndexError> for RuntimeError {
    fn from(err: IndexError) -> Self {
        RuntimeError::IndexOutOfRange(err)
    }
}

impl From<MathError> for RuntimeError {
    fn from(err: MathError) -> Self {
        RuntimeError::MathDomainError(err)
    }
}
