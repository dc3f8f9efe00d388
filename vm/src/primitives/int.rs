//! Checked integer arithmetic shared by the generic and `INT_*` opcodes.

use crate::fault::{FaultKind, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl IntOp {
    pub fn symbol(self) -> &'static str {
        match self {
            IntOp::Add => "+",
            IntOp::Sub => "-",
            IntOp::Mul => "*",
            IntOp::Div => "/",
            IntOp::Mod => "%",
            IntOp::And => "&",
            IntOp::Or => "|",
            IntOp::Xor => "^",
            IntOp::Shl => "<<",
            IntOp::Shr => ">>",
        }
    }
}

fn shift_amount(amount: i64) -> Result<u32, RuntimeError> {
    if (0..64).contains(&amount) {
        Ok(amount as u32)
    } else {
        Err(RuntimeError::new(
            FaultKind::IntegerOverflow,
            format!("shift amount {amount} out of range"),
        ))
    }
}

pub fn apply(op: IntOp, lhs: i64, rhs: i64) -> Result<i64, RuntimeError> {
    let result = match op {
        IntOp::Add => lhs.checked_add(rhs),
        IntOp::Sub => lhs.checked_sub(rhs),
        IntOp::Mul => lhs.checked_mul(rhs),
        IntOp::Div | IntOp::Mod if rhs == 0 => {
            return Err(RuntimeError::new(
                FaultKind::DivideByZero,
                format!("{lhs} {} 0", op.symbol()),
            ));
        }
        IntOp::Div => lhs.checked_div(rhs),
        IntOp::Mod => lhs.checked_rem(rhs),
        IntOp::And => Some(lhs & rhs),
        IntOp::Or => Some(lhs | rhs),
        IntOp::Xor => Some(lhs ^ rhs),
        IntOp::Shl => {
            let amount = shift_amount(rhs)?;
            let shifted = lhs.wrapping_shl(amount);
            // reject bits shifted out of the sign-preserving range
            (shifted.wrapping_shr(amount) == lhs).then_some(shifted)
        }
        IntOp::Shr => Some(lhs >> shift_amount(rhs)?),
    };
    result.ok_or_else(|| RuntimeError::overflow(op.symbol()))
}

pub fn negate(value: i64) -> Result<i64, RuntimeError> {
    value.checked_neg().ok_or_else(|| RuntimeError::overflow("negation"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        assert_eq!(apply(IntOp::Add, 1, 2), Ok(3));
        assert_eq!(apply(IntOp::Div, -7, 2), Ok(-3));
        assert_eq!(apply(IntOp::Mod, -7, 2), Ok(-1));
        assert_eq!(apply(IntOp::Xor, 0b1100, 0b1010), Ok(0b0110));
        assert_eq!(apply(IntOp::Shl, 3, 4), Ok(48));
        assert_eq!(apply(IntOp::Shr, -16, 2), Ok(-4));
    }

    #[test]
    fn faults() {
        let kind = |r: Result<i64, RuntimeError>| r.map_err(|e| e.kind);
        assert_eq!(kind(apply(IntOp::Add, i64::MAX, 1)), Err(FaultKind::IntegerOverflow));
        assert_eq!(kind(apply(IntOp::Div, i64::MIN, -1)), Err(FaultKind::IntegerOverflow));
        assert_eq!(kind(apply(IntOp::Mod, 5, 0)), Err(FaultKind::DivideByZero));
        assert_eq!(kind(apply(IntOp::Shl, 1, 64)), Err(FaultKind::IntegerOverflow));
        assert_eq!(kind(apply(IntOp::Shl, i64::MAX, 1)), Err(FaultKind::IntegerOverflow));
        assert_eq!(kind(negate(i64::MIN)), Err(FaultKind::IntegerOverflow));
    }
}
