use thiserror::Error;

use super::value::Value;
use crate::{binary::opcode::NumericOp, numeric, trap::Trap};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Trap(#[from] Trap),
    #[error("operands {1:?} do not fit {0:?}")]
    Operands(NumericOp, Vec<Value>),
}

/// Applies a numeric operator to its operands (bottom of the stack first).
pub fn eval(op: NumericOp, args: &[Value]) -> Result<Value, EvalError> {
    use NumericOp::*;
    use Value::{F32 as F, F64 as D, I32 as I, I64 as L};

    let value = match (op, args) {
        (I32Eqz, [I(a)]) => (*a == 0).into(),
        (I32Eq, [I(a), I(b)]) => (a == b).into(),
        (I32Ne, [I(a), I(b)]) => (a != b).into(),
        (I32LtS, [I(a), I(b)]) => (a < b).into(),
        (I32LtU, [I(a), I(b)]) => ((*a as u32) < (*b as u32)).into(),
        (I32GtS, [I(a), I(b)]) => (a > b).into(),
        (I32GtU, [I(a), I(b)]) => ((*a as u32) > (*b as u32)).into(),
        (I32LeS, [I(a), I(b)]) => (a <= b).into(),
        (I32LeU, [I(a), I(b)]) => ((*a as u32) <= (*b as u32)).into(),
        (I32GeS, [I(a), I(b)]) => (a >= b).into(),
        (I32GeU, [I(a), I(b)]) => ((*a as u32) >= (*b as u32)).into(),

        (I64Eqz, [L(a)]) => (*a == 0).into(),
        (I64Eq, [L(a), L(b)]) => (a == b).into(),
        (I64Ne, [L(a), L(b)]) => (a != b).into(),
        (I64LtS, [L(a), L(b)]) => (a < b).into(),
        (I64LtU, [L(a), L(b)]) => ((*a as u64) < (*b as u64)).into(),
        (I64GtS, [L(a), L(b)]) => (a > b).into(),
        (I64GtU, [L(a), L(b)]) => ((*a as u64) > (*b as u64)).into(),
        (I64LeS, [L(a), L(b)]) => (a <= b).into(),
        (I64LeU, [L(a), L(b)]) => ((*a as u64) <= (*b as u64)).into(),
        (I64GeS, [L(a), L(b)]) => (a >= b).into(),
        (I64GeU, [L(a), L(b)]) => ((*a as u64) >= (*b as u64)).into(),

        (F32Eq, [F(a), F(b)]) => (a == b).into(),
        (F32Ne, [F(a), F(b)]) => (a != b).into(),
        (F32Lt, [F(a), F(b)]) => (a < b).into(),
        (F32Gt, [F(a), F(b)]) => (a > b).into(),
        (F32Le, [F(a), F(b)]) => (a <= b).into(),
        (F32Ge, [F(a), F(b)]) => (a >= b).into(),

        (F64Eq, [D(a), D(b)]) => (a == b).into(),
        (F64Ne, [D(a), D(b)]) => (a != b).into(),
        (F64Lt, [D(a), D(b)]) => (a < b).into(),
        (F64Gt, [D(a), D(b)]) => (a > b).into(),
        (F64Le, [D(a), D(b)]) => (a <= b).into(),
        (F64Ge, [D(a), D(b)]) => (a >= b).into(),

        (I32Clz, [I(a)]) => I(a.leading_zeros() as i32),
        (I32Ctz, [I(a)]) => I(a.trailing_zeros() as i32),
        (I32Popcnt, [I(a)]) => I(a.count_ones() as i32),
        (I32Add, [I(a), I(b)]) => I(a.wrapping_add(*b)),
        (I32Sub, [I(a), I(b)]) => I(a.wrapping_sub(*b)),
        (I32Mul, [I(a), I(b)]) => I(a.wrapping_mul(*b)),
        (I32DivS, [I(a), I(b)]) => I(numeric::i32_div_s(*a, *b)?),
        (I32DivU, [I(a), I(b)]) => I(numeric::i32_div_u(*a, *b)?),
        (I32RemS, [I(a), I(b)]) => I(numeric::i32_rem_s(*a, *b)?),
        (I32RemU, [I(a), I(b)]) => I(numeric::i32_rem_u(*a, *b)?),
        (I32And, [I(a), I(b)]) => I(a & b),
        (I32Or, [I(a), I(b)]) => I(a | b),
        (I32Xor, [I(a), I(b)]) => I(a ^ b),
        (I32Shl, [I(a), I(b)]) => I(a.wrapping_shl(*b as u32)),
        (I32ShrS, [I(a), I(b)]) => I(a.wrapping_shr(*b as u32)),
        (I32ShrU, [I(a), I(b)]) => I((*a as u32).wrapping_shr(*b as u32) as i32),
        (I32Rotl, [I(a), I(b)]) => I(a.rotate_left(*b as u32 % 32)),
        (I32Rotr, [I(a), I(b)]) => I(a.rotate_right(*b as u32 % 32)),

        (I64Clz, [L(a)]) => L(a.leading_zeros() as i64),
        (I64Ctz, [L(a)]) => L(a.trailing_zeros() as i64),
        (I64Popcnt, [L(a)]) => L(a.count_ones() as i64),
        (I64Add, [L(a), L(b)]) => L(a.wrapping_add(*b)),
        (I64Sub, [L(a), L(b)]) => L(a.wrapping_sub(*b)),
        (I64Mul, [L(a), L(b)]) => L(a.wrapping_mul(*b)),
        (I64DivS, [L(a), L(b)]) => L(numeric::i64_div_s(*a, *b)?),
        (I64DivU, [L(a), L(b)]) => L(numeric::i64_div_u(*a, *b)?),
        (I64RemS, [L(a), L(b)]) => L(numeric::i64_rem_s(*a, *b)?),
        (I64RemU, [L(a), L(b)]) => L(numeric::i64_rem_u(*a, *b)?),
        (I64And, [L(a), L(b)]) => L(a & b),
        (I64Or, [L(a), L(b)]) => L(a | b),
        (I64Xor, [L(a), L(b)]) => L(a ^ b),
        (I64Shl, [L(a), L(b)]) => L(a.wrapping_shl(*b as u32)),
        (I64ShrS, [L(a), L(b)]) => L(a.wrapping_shr(*b as u32)),
        (I64ShrU, [L(a), L(b)]) => L((*a as u64).wrapping_shr(*b as u32) as i64),
        (I64Rotl, [L(a), L(b)]) => L(a.rotate_left((*b as u64 % 64) as u32)),
        (I64Rotr, [L(a), L(b)]) => L(a.rotate_right((*b as u64 % 64) as u32)),

        (F32Abs, [F(a)]) => F(a.abs()),
        (F32Neg, [F(a)]) => F(-a),
        (F32Ceil, [F(a)]) => F(a.ceil()),
        (F32Floor, [F(a)]) => F(a.floor()),
        (F32Trunc, [F(a)]) => F(a.trunc()),
        (F32Nearest, [F(a)]) => F(numeric::f32_nearest(*a)),
        (F32Sqrt, [F(a)]) => F(a.sqrt()),
        (F32Add, [F(a), F(b)]) => F(a + b),
        (F32Sub, [F(a), F(b)]) => F(a - b),
        (F32Mul, [F(a), F(b)]) => F(a * b),
        (F32Div, [F(a), F(b)]) => F(a / b),
        (F32Min, [F(a), F(b)]) => F(numeric::f32_min(*a, *b)),
        (F32Max, [F(a), F(b)]) => F(numeric::f32_max(*a, *b)),
        (F32Copysign, [F(a), F(b)]) => F(a.copysign(*b)),

        (F64Abs, [D(a)]) => D(a.abs()),
        (F64Neg, [D(a)]) => D(-a),
        (F64Ceil, [D(a)]) => D(a.ceil()),
        (F64Floor, [D(a)]) => D(a.floor()),
        (F64Trunc, [D(a)]) => D(a.trunc()),
        (F64Nearest, [D(a)]) => D(numeric::f64_nearest(*a)),
        (F64Sqrt, [D(a)]) => D(a.sqrt()),
        (F64Add, [D(a), D(b)]) => D(a + b),
        (F64Sub, [D(a), D(b)]) => D(a - b),
        (F64Mul, [D(a), D(b)]) => D(a * b),
        (F64Div, [D(a), D(b)]) => D(a / b),
        (F64Min, [D(a), D(b)]) => D(numeric::f64_min(*a, *b)),
        (F64Max, [D(a), D(b)]) => D(numeric::f64_max(*a, *b)),
        (F64Copysign, [D(a), D(b)]) => D(a.copysign(*b)),

        (I32WrapI64, [L(a)]) => I(*a as i32),
        (I32TruncF32S, [F(a)]) => I(numeric::i32_trunc_f32_s(*a)?),
        (I32TruncF32U, [F(a)]) => I(numeric::i32_trunc_f32_u(*a)? as i32),
        (I32TruncF64S, [D(a)]) => I(numeric::i32_trunc_f64_s(*a)?),
        (I32TruncF64U, [D(a)]) => I(numeric::i32_trunc_f64_u(*a)? as i32),
        (I64ExtendI32S, [I(a)]) => L(*a as i64),
        (I64ExtendI32U, [I(a)]) => L(*a as u32 as i64),
        (I64TruncF32S, [F(a)]) => L(numeric::i64_trunc_f32_s(*a)?),
        (I64TruncF32U, [F(a)]) => L(numeric::i64_trunc_f32_u(*a)? as i64),
        (I64TruncF64S, [D(a)]) => L(numeric::i64_trunc_f64_s(*a)?),
        (I64TruncF64U, [D(a)]) => L(numeric::i64_trunc_f64_u(*a)? as i64),
        (F32ConvertI32S, [I(a)]) => F(*a as f32),
        (F32ConvertI32U, [I(a)]) => F(*a as u32 as f32),
        (F32ConvertI64S, [L(a)]) => F(*a as f32),
        (F32ConvertI64U, [L(a)]) => F(numeric::f32_convert_i64_u(*a)),
        (F32DemoteF64, [D(a)]) => F(*a as f32),
        (F64ConvertI32S, [I(a)]) => D(*a as f64),
        (F64ConvertI32U, [I(a)]) => D(*a as u32 as f64),
        (F64ConvertI64S, [L(a)]) => D(*a as f64),
        (F64ConvertI64U, [L(a)]) => D(numeric::f64_convert_i64_u(*a)),
        (F64PromoteF32, [F(a)]) => D(*a as f64),
        (I32ReinterpretF32, [F(a)]) => I(a.to_bits() as i32),
        (I64ReinterpretF64, [D(a)]) => L(a.to_bits() as i64),
        (F32ReinterpretI32, [I(a)]) => F(f32::from_bits(*a as u32)),
        (F64ReinterpretI64, [L(a)]) => D(f64::from_bits(*a as u64)),

        (I32Extend8S, [I(a)]) => I(*a as i8 as i32),
        (I32Extend16S, [I(a)]) => I(*a as i16 as i32),
        (I64Extend8S, [L(a)]) => L(*a as i8 as i64),
        (I64Extend16S, [L(a)]) => L(*a as i16 as i64),
        (I64Extend32S, [L(a)]) => L(*a as i32 as i64),

        (I32TruncSatF32S, [F(a)]) => I(numeric::i32_trunc_sat_f32_s(*a)),
        (I32TruncSatF32U, [F(a)]) => I(numeric::i32_trunc_sat_f32_u(*a) as i32),
        (I32TruncSatF64S, [D(a)]) => I(numeric::i32_trunc_sat_f64_s(*a)),
        (I32TruncSatF64U, [D(a)]) => I(numeric::i32_trunc_sat_f64_u(*a) as i32),
        (I64TruncSatF32S, [F(a)]) => L(numeric::i64_trunc_sat_f32_s(*a)),
        (I64TruncSatF32U, [F(a)]) => L(numeric::i64_trunc_sat_f32_u(*a) as i64),
        (I64TruncSatF64S, [D(a)]) => L(numeric::i64_trunc_sat_f64_s(*a)),
        (I64TruncSatF64U, [D(a)]) => L(numeric::i64_trunc_sat_f64_u(*a) as i64),

        _ => return Err(EvalError::Operands(op, args.to_vec())),
    };

    Ok(value)
}
