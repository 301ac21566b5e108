//! Shared, panic-free arithmetic semantics.
//!
//! Constant folding, the generic interpreter, and the integer fast path
//! all evaluate the same operators on raw `i64`/`f64`/`bool` values; this
//! module is their single source of truth so the three can never drift
//! apart. Division and modulo by zero saturate to zero and shift amounts
//! are taken modulo 64 rather than trapping, so every function here is
//! total — no operator ever panics or returns an error.

use crate::instruction::{BinaryOp, UnaryOp};

pub fn eval_binary_int(op: BinaryOp, x: i64, y: i64) -> i64 {
    match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div => if y == 0 { 0 } else { x.wrapping_div(y) },
        BinaryOp::Mod => if y == 0 { 0 } else { x.wrapping_rem(y) },
        BinaryOp::Root => (x as f64).powf(1.0 / y as f64).floor() as i64,
        BinaryOp::Shl => x.wrapping_shl((y.rem_euclid(64)) as u32),
        BinaryOp::Shr => x.wrapping_shr((y.rem_euclid(64)) as u32),
        BinaryOp::UShl => ((x as u64).wrapping_shl((y.rem_euclid(64)) as u32)) as i64,
        BinaryOp::UShr => ((x as u64).wrapping_shr((y.rem_euclid(64)) as u32)) as i64,
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
        BinaryOp::BitXand => !(x ^ y),
        BinaryOp::LogicalAnd => bool_to_i64(i64_to_bool(x) && i64_to_bool(y)),
        BinaryOp::LogicalOr => bool_to_i64(i64_to_bool(x) || i64_to_bool(y)),
        BinaryOp::LogicalXor => bool_to_i64(i64_to_bool(x) ^ i64_to_bool(y)),
        BinaryOp::LogicalXand => bool_to_i64(!(i64_to_bool(x) ^ i64_to_bool(y))),
        BinaryOp::Lt => bool_to_i64(x < y),
        BinaryOp::Le => bool_to_i64(x <= y),
        BinaryOp::Gt => bool_to_i64(x > y),
        BinaryOp::Ge => bool_to_i64(x >= y),
        BinaryOp::Eq => bool_to_i64(x == y),
        BinaryOp::Ne => bool_to_i64(x != y),
    }
}

pub fn eval_binary_float(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Mod => x % y,
        BinaryOp::Root => x.powf(1.0 / y),
        _ => 0.0,
    }
}

pub fn eval_binary_float_comparison(op: BinaryOp, x: f64, y: f64) -> Option<bool> {
    match op {
        BinaryOp::Lt => Some(x < y),
        BinaryOp::Le => Some(x <= y),
        BinaryOp::Gt => Some(x > y),
        BinaryOp::Ge => Some(x >= y),
        BinaryOp::Eq => Some(x == y),
        BinaryOp::Ne => Some(x != y),
        _ => None,
    }
}

pub fn eval_unary_int(op: UnaryOp, x: i64) -> i64 {
    match op {
        UnaryOp::Identity => x,
        UnaryOp::Negate => x.wrapping_neg(),
        UnaryOp::LogicalNot => bool_to_i64(!i64_to_bool(x)),
        UnaryOp::BitwiseNot => !x,
    }
}

pub fn eval_unary_float(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Identity => x,
        UnaryOp::Negate => -x,
        _ => x,
    }
}

/// Truncates toward zero, saturating at the `i64` bounds and mapping NaN
/// to zero, mirroring Rust's `as` cast rules for `f64 -> i64`.
pub fn float_to_int(x: f64) -> i64 {
    x as i64
}

pub fn int_to_float(x: i64) -> f64 {
    x as f64
}

pub fn bool_to_i64(b: bool) -> i64 {
    if b { 1 } else { 0 }
}

pub fn i64_to_bool(x: i64) -> bool {
    x != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_by_zero_saturates_to_zero_rather_than_panicking() {
        assert_eq!(eval_binary_int(BinaryOp::Div, 10, 0), 0);
        assert_eq!(eval_binary_int(BinaryOp::Mod, 10, 0), 0);
    }

    #[test]
    fn shift_amount_wraps_modulo_64() {
        assert_eq!(eval_binary_int(BinaryOp::Shl, 1, 64), eval_binary_int(BinaryOp::Shl, 1, 0));
    }

    #[test]
    fn float_to_int_saturates_rather_than_wrapping() {
        assert_eq!(float_to_int(f64::INFINITY), i64::MAX);
        assert_eq!(float_to_int(f64::NAN), 0);
    }

    #[test]
    fn root_floors_a_negative_non_integral_result_instead_of_truncating() {
        // (-2)^(1/-1) = -0.5: negative and non-integral, where floor()
        // (-1) and truncation-toward-zero (0) disagree.
        assert_eq!(eval_binary_int(BinaryOp::Root, -2, -1), -1);
    }
}
