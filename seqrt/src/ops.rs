//! Operator table. Each operator has an integer leaf, used when both operands
//! are small integers, and a double leaf used as soon as one of them is boxed.
use crate::{Heap, MathError, RuntimeResult, Value};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Power,
    AndBits,
    OrBits,
    XorBits,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
    Xor,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
    NotBits,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Arctan,
    Log,
    Floor,
}

pub type IntBinaryFn = fn(&mut Heap, i64, i64) -> RuntimeResult<Value>;
pub type DoubleBinaryFn = fn(&mut Heap, f64, f64) -> RuntimeResult<Value>;
pub type IntUnaryFn = fn(&mut Heap, i64) -> RuntimeResult<Value>;
pub type DoubleUnaryFn = fn(&mut Heap, f64) -> RuntimeResult<Value>;

#[derive(Debug, Copy, Clone)]
pub struct BinaryOperator {
    pub name: &'static str,
    pub int_fn: IntBinaryFn,
    pub double_fn: DoubleBinaryFn,
}

impl BinaryOperator {
    pub const fn new(
        name: &'static str,
        int_fn: IntBinaryFn,
        double_fn: DoubleBinaryFn,
    ) -> Self {
        Self {
            name,
            int_fn,
            double_fn,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct UnaryOperator {
    pub name: &'static str,
    pub int_fn: IntUnaryFn,
    pub double_fn: DoubleUnaryFn,
}

impl UnaryOperator {
    pub const fn new(
        name: &'static str,
        int_fn: IntUnaryFn,
        double_fn: DoubleUnaryFn,
    ) -> Self {
        Self {
            name,
            int_fn,
            double_fn,
        }
    }
}

// order must follow BinaryOp
pub const BINARY_OPERATORS: &[BinaryOperator] = &[
    BinaryOperator::new("add", int_add, double_add),
    BinaryOperator::new("subtract", int_subtract, double_subtract),
    BinaryOperator::new("multiply", int_multiply, double_multiply),
    BinaryOperator::new("divide", int_divide, double_divide),
    BinaryOperator::new("remainder", int_remainder, double_remainder),
    BinaryOperator::new("power", int_power, double_power),
    BinaryOperator::new("and_bits", int_and_bits, double_and_bits),
    BinaryOperator::new("or_bits", int_or_bits, double_or_bits),
    BinaryOperator::new("xor_bits", int_xor_bits, double_xor_bits),
    BinaryOperator::new("=", |_, a, b| Ok((a == b).into()), |_, a, b| Ok((a == b).into())),
    BinaryOperator::new("!=", |_, a, b| Ok((a != b).into()), |_, a, b| Ok((a != b).into())),
    BinaryOperator::new("<", |_, a, b| Ok((a < b).into()), |_, a, b| Ok((a < b).into())),
    BinaryOperator::new(">", |_, a, b| Ok((a > b).into()), |_, a, b| Ok((a > b).into())),
    BinaryOperator::new("<=", |_, a, b| Ok((a <= b).into()), |_, a, b| Ok((a <= b).into())),
    BinaryOperator::new(">=", |_, a, b| Ok((a >= b).into()), |_, a, b| Ok((a >= b).into())),
    BinaryOperator::new("and", |_, a, b| Ok((a != 0 && b != 0).into()), |_, a, b| {
        Ok((a != 0.0 && b != 0.0).into())
    }),
    BinaryOperator::new("or", |_, a, b| Ok((a != 0 || b != 0).into()), |_, a, b| {
        Ok((a != 0.0 || b != 0.0).into())
    }),
    BinaryOperator::new("xor", |_, a, b| Ok(((a != 0) != (b != 0)).into()), |_, a, b| {
        Ok(((a != 0.0) != (b != 0.0)).into())
    }),
];

// order must follow UnaryOp
pub const UNARY_OPERATORS: &[UnaryOperator] = &[
    UnaryOperator::new("negate", |heap, a| heap.new_integer(-a), |heap, a| heap.new_double(-a)),
    UnaryOperator::new("not", |_, a| Ok((a == 0).into()), |_, a| Ok((a == 0.0).into())),
    UnaryOperator::new("not_bits", |heap, a| heap.new_integer(!a), |heap, a| {
        heap.new_integer(!(a as i64))
    }),
    UnaryOperator::new("sqrt", |heap, a| double_sqrt(heap, a as f64), double_sqrt),
    UnaryOperator::new("sin", |heap, a| heap.new_double((a as f64).sin()), |heap, a| {
        heap.new_double(a.sin())
    }),
    UnaryOperator::new("cos", |heap, a| heap.new_double((a as f64).cos()), |heap, a| {
        heap.new_double(a.cos())
    }),
    UnaryOperator::new("tan", |heap, a| heap.new_double((a as f64).tan()), |heap, a| {
        heap.new_double(a.tan())
    }),
    UnaryOperator::new("arctan", |heap, a| heap.new_double((a as f64).atan()), |heap, a| {
        heap.new_double(a.atan())
    }),
    UnaryOperator::new("log", |heap, a| double_log(heap, a as f64), double_log),
    UnaryOperator::new("floor", |_, a| Ok(int_unchanged(a)), |heap, a| {
        heap.new_number(a.floor())
    }),
];

impl BinaryOp {
    pub const ALL: [BinaryOp; 18] = [
        BinaryOp::Add,
        BinaryOp::Subtract,
        BinaryOp::Multiply,
        BinaryOp::Divide,
        BinaryOp::Remainder,
        BinaryOp::Power,
        BinaryOp::AndBits,
        BinaryOp::OrBits,
        BinaryOp::XorBits,
        BinaryOp::Equal,
        BinaryOp::NotEqual,
        BinaryOp::Less,
        BinaryOp::Greater,
        BinaryOp::LessEqual,
        BinaryOp::GreaterEqual,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
    ];

    #[inline]
    pub fn operator(self) -> &'static BinaryOperator {
        &BINARY_OPERATORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.operator().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 10] = [
        UnaryOp::Negate,
        UnaryOp::Not,
        UnaryOp::NotBits,
        UnaryOp::Sqrt,
        UnaryOp::Sin,
        UnaryOp::Cos,
        UnaryOp::Tan,
        UnaryOp::Arctan,
        UnaryOp::Log,
        UnaryOp::Floor,
    ];

    #[inline]
    pub fn operator(self) -> &'static UnaryOperator {
        &UNARY_OPERATORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.operator().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

fn int_unchanged(a: i64) -> Value {
    // SAFETY: leaf operands are decoded small integers
    unsafe { Value::from_small_int_unchecked(a) }
}

// small integers are 63 bit, sums and differences cannot overflow an i64

fn int_add(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    heap.new_integer(a + b)
}

fn int_subtract(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    heap.new_integer(a - b)
}

fn int_multiply(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    match a.checked_mul(b) {
        Some(product) => heap.new_integer(product),
        None => heap.new_double(a as f64 * b as f64),
    }
}

fn int_divide(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    if b == 0 {
        return Err(MathError::DivideByZero.into());
    }
    if a % b == 0 {
        return heap.new_integer(a / b);
    }
    heap.new_double(a as f64 / b as f64)
}

fn int_remainder(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    if b == 0 {
        return Err(MathError::RemainderByZero.into());
    }
    heap.new_integer(a % b)
}

fn int_power(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    if a == 0 && b <= 0 {
        return Err(MathError::ZeroToNonPositivePower.into());
    }
    if b == 0 {
        return Ok(Value::ONE);
    }
    let exact = u32::try_from(b).ok().and_then(|b| a.checked_pow(b));
    match exact {
        Some(result) => heap.new_integer(result),
        None => heap.new_double((a as f64).powf(b as f64)),
    }
}

fn int_and_bits(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    heap.new_integer(a & b)
}

fn int_or_bits(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    heap.new_integer(a | b)
}

fn int_xor_bits(heap: &mut Heap, a: i64, b: i64) -> RuntimeResult<Value> {
    heap.new_integer(a ^ b)
}

fn double_add(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    heap.new_double(a + b)
}

fn double_subtract(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    heap.new_double(a - b)
}

fn double_multiply(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    heap.new_double(a * b)
}

fn double_divide(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    if b == 0.0 {
        return Err(MathError::DivideByZero.into());
    }
    heap.new_double(a / b)
}

fn double_remainder(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    if b == 0.0 {
        return Err(MathError::RemainderByZero.into());
    }
    heap.new_double(a % b)
}

fn double_power(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    if a < 0.0 && b.floor() != b {
        return Err(MathError::NegativeToFractionalPower.into());
    }
    if a == 0.0 && b <= 0.0 {
        return Err(MathError::ZeroToNonPositivePower.into());
    }
    heap.new_double(a.powf(b))
}

// bit operations see doubles as their truncated integer

fn double_and_bits(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    heap.new_integer(a as i64 & b as i64)
}

fn double_or_bits(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    heap.new_integer(a as i64 | b as i64)
}

fn double_xor_bits(heap: &mut Heap, a: f64, b: f64) -> RuntimeResult<Value> {
    heap.new_integer(a as i64 ^ b as i64)
}

fn double_sqrt(heap: &mut Heap, a: f64) -> RuntimeResult<Value> {
    if a < 0.0 {
        return Err(MathError::SqrtOfNegative.into());
    }
    heap.new_double(a.sqrt())
}

fn double_log(heap: &mut Heap, a: f64) -> RuntimeResult<Value> {
    if a <= 0.0 {
        return Err(MathError::LogOfNonPositive.into());
    }
    heap.new_double(a.ln())
}
