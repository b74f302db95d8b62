//! Tagged numeric used for literal values.
//!
//! A [`Number`] is a boolean, a signed integer, or a double. The parser
//! stores these in literal AST nodes; [`value_unary`] and [`value_binary`]
//! evaluate operators over them at parse time. Operations that make no
//! sense for an operand kind (shifting a float, negating a bool) return
//! `None` rather than erroring; comparisons promote both sides to a
//! common arithmetic kind first.

use crate::ast::ExprOp;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Number {
    /// Build from a lexed integer literal. Values wider than `i64` fall
    /// back to floating point.
    pub fn from_u64(x: u64) -> Number {
        if x <= i64::MAX as u64 {
            Number::Int(x as i64)
        } else {
            Number::Float(x as f64)
        }
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, Number::Bool(_))
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Number::Int(_))
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Number::Float(_))
    }

    pub fn is_arithmetic(self) -> bool {
        self.is_integral() || self.is_floating()
    }

    pub fn as_bool(self) -> bool {
        match self {
            Number::Bool(b) => b,
            Number::Int(i) => i != 0,
            Number::Float(d) => d != 0.0,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Number::Bool(b) => b as i64,
            Number::Int(i) => i,
            Number::Float(d) => d as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Bool(b) => b as u8 as f64,
            Number::Int(i) => i as f64,
            Number::Float(d) => d,
        }
    }

    pub fn to_boolean(self) -> Number {
        Number::Bool(self.as_bool())
    }

    pub fn to_integral(self) -> Number {
        Number::Int(self.as_i64())
    }

    pub fn to_floating(self) -> Number {
        Number::Float(self.as_f64())
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(d) => write!(f, "{}", d),
        }
    }
}

/// True when either side is floating; both sides of a mixed arithmetic
/// operation promote to the floating kind.
fn promotes_to_float(left: Number, right: Number) -> bool {
    left.is_floating() || right.is_floating()
}

/// Evaluate a unary operator. `None` means the operator does not apply to
/// this operand kind (or has no compile-time value at all, like `++`).
pub fn value_unary(op: ExprOp, value: Number) -> Option<Number> {
    match op {
        ExprOp::Complement => {
            if value.is_floating() {
                None
            } else {
                Some(Number::Int(!value.as_i64()))
            }
        }

        ExprOp::Not => Some(Number::Bool(!value.as_bool())),

        ExprOp::Plus => Some(value),

        ExprOp::Neg => match value {
            Number::Bool(_) => None,
            Number::Int(i) => Some(Number::Int(i.wrapping_neg())),
            Number::Float(d) => Some(Number::Float(-d)),
        },

        _ => None,
    }
}

/// Evaluate a binary operator over two numbers. `None` when the operand
/// kinds do not support the operation.
pub fn value_binary(op: ExprOp, left: Number, right: Number) -> Option<Number> {
    match op {
        ExprOp::Add | ExprOp::Sub | ExprOp::Mul | ExprOp::Div => {
            if !left.is_arithmetic() || !right.is_arithmetic() {
                return None;
            }
            if promotes_to_float(left, right) {
                let (a, b) = (left.as_f64(), right.as_f64());
                let x = match op {
                    ExprOp::Add => a + b,
                    ExprOp::Sub => a - b,
                    ExprOp::Mul => a * b,
                    _ => a / b,
                };
                Some(Number::Float(x))
            } else {
                let (a, b) = (left.as_i64(), right.as_i64());
                let x = match op {
                    ExprOp::Add => a.wrapping_add(b),
                    ExprOp::Sub => a.wrapping_sub(b),
                    ExprOp::Mul => a.wrapping_mul(b),
                    _ => return a.checked_div(b).map(Number::Int),
                };
                Some(Number::Int(x))
            }
        }

        // Integer only.
        ExprOp::Shl | ExprOp::Shr | ExprOp::BitAnd | ExprOp::BitXor | ExprOp::BitOr => {
            if !left.is_integral() || !right.is_integral() {
                return None;
            }
            let (a, b) = (left.as_i64(), right.as_i64());
            let x = match op {
                ExprOp::Shl => return a.checked_shl(u32::try_from(b).ok()?).map(Number::Int),
                ExprOp::Shr => return a.checked_shr(u32::try_from(b).ok()?).map(Number::Int),
                ExprOp::BitAnd => a & b,
                ExprOp::BitXor => a ^ b,
                _ => a | b,
            };
            Some(Number::Int(x))
        }

        ExprOp::Lt | ExprOp::Gt | ExprOp::Le | ExprOp::Ge => {
            if !left.is_arithmetic() || !right.is_arithmetic() {
                return None;
            }
            let x = if promotes_to_float(left, right) {
                let (a, b) = (left.as_f64(), right.as_f64());
                match op {
                    ExprOp::Lt => a < b,
                    ExprOp::Gt => a > b,
                    ExprOp::Le => a <= b,
                    _ => a >= b,
                }
            } else {
                let (a, b) = (left.as_i64(), right.as_i64());
                match op {
                    ExprOp::Lt => a < b,
                    ExprOp::Gt => a > b,
                    ExprOp::Le => a <= b,
                    _ => a >= b,
                }
            };
            Some(Number::Bool(x))
        }

        ExprOp::Eq | ExprOp::Ne => {
            // Promote to the common arithmetic kind (booleans compare as
            // integers).
            let x = if promotes_to_float(left, right) {
                left.as_f64() == right.as_f64()
            } else {
                left.as_i64() == right.as_i64()
            };
            Some(Number::Bool(if op == ExprOp::Eq { x } else { !x }))
        }

        ExprOp::LogAnd => Some(Number::Bool(left.as_bool() && right.as_bool())),
        ExprOp::LogOr => Some(Number::Bool(left.as_bool() || right.as_bool())),

        ExprOp::Sequence => Some(right),

        _ => None,
    }
}
