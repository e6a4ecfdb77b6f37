//! Wasm's exact integer division and float/int conversion semantics.
//!
//! Everything here is a pure function over host primitives. The trapping
//! variants return the [`Trap`] the executor raises; nothing in this module
//! panics on any input.

use crate::trap::Trap;

macro_rules! div_rem {
    ($div_s:ident, $div_u:ident, $rem_s:ident, $rem_u:ident, $s:ty, $u:ty) => {
        pub fn $div_s(lhs: $s, rhs: $s) -> Result<$s, Trap> {
            if rhs == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            if lhs == <$s>::MIN && rhs == -1 {
                return Err(Trap::IntegerOverflow);
            }
            Ok(lhs / rhs)
        }

        pub fn $div_u(lhs: $s, rhs: $s) -> Result<$s, Trap> {
            if rhs == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(((lhs as $u) / (rhs as $u)) as $s)
        }

        /// `MIN % -1` is 0, not an overflow.
        pub fn $rem_s(lhs: $s, rhs: $s) -> Result<$s, Trap> {
            if rhs == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(lhs.wrapping_rem(rhs))
        }

        pub fn $rem_u(lhs: $s, rhs: $s) -> Result<$s, Trap> {
            if rhs == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(((lhs as $u) % (rhs as $u)) as $s)
        }
    };
}

div_rem!(i32_div_s, i32_div_u, i32_rem_s, i32_rem_u, i32, u32);
div_rem!(i64_div_s, i64_div_u, i64_rem_s, i64_rem_u, i64, u64);

/// Generates a trapping and a saturating truncation sharing one open range
/// `(lower, upper)`: the source must be strictly inside it to convert.
///
/// Upper bounds are the power of two just past the destination's maximum.
/// Lower bounds are `MIN - 1` where the source float can represent values
/// between that and `MIN` (so `-2147483648.5` still truncates to `MIN`),
/// and the largest representable float below `MIN` otherwise.
macro_rules! trunc {
    ($trapping:ident, $saturating:ident, $f:ty, $i:ty, $lower:expr, $upper:expr) => {
        pub fn $trapping(value: $f) -> Result<$i, Trap> {
            if value.is_nan() {
                return Err(Trap::InvalidConversionToInteger);
            }
            if !(value > $lower && value < $upper) {
                return Err(Trap::IntegerOverflow);
            }
            Ok(value.trunc() as $i)
        }

        pub fn $saturating(value: $f) -> $i {
            if value.is_nan() {
                0
            } else if !(value > $lower) {
                <$i>::MIN
            } else if !(value < $upper) {
                <$i>::MAX
            } else {
                value.trunc() as $i
            }
        }
    };
}

// f32 cannot hold anything strictly between -2^31 - 2^8 and -2^31, so the
// signed f32 lower bounds are the next float down from MIN.
trunc!(i32_trunc_f32_s, i32_trunc_sat_f32_s, f32, i32, -2147483904.0f32, 2147483648.0f32);
trunc!(i32_trunc_f32_u, i32_trunc_sat_f32_u, f32, u32, -1.0f32, 4294967296.0f32);
trunc!(i32_trunc_f64_s, i32_trunc_sat_f64_s, f64, i32, -2147483649.0f64, 2147483648.0f64);
trunc!(i32_trunc_f64_u, i32_trunc_sat_f64_u, f64, u32, -1.0f64, 4294967296.0f64);
trunc!(i64_trunc_f32_s, i64_trunc_sat_f32_s, f32, i64, -9223373136366403584.0f32, 9223372036854775808.0f32);
trunc!(i64_trunc_f32_u, i64_trunc_sat_f32_u, f32, u64, -1.0f32, 18446744073709551616.0f32);
trunc!(i64_trunc_f64_s, i64_trunc_sat_f64_s, f64, i64, -9223372036854777856.0f64, 9223372036854775808.0f64);
trunc!(i64_trunc_f64_u, i64_trunc_sat_f64_u, f64, u64, -1.0f64, 18446744073709551616.0f64);

/// Unsigned 64-bit integer to f32. Values with the top bit set are halved
/// (keeping the lost low bit as a sticky bit) before the signed conversion,
/// then doubled, so the result is rounded only once.
pub fn f32_convert_i64_u(value: i64) -> f32 {
    if value >= 0 {
        return value as f32;
    }
    let bits = value as u64;
    let half = ((bits >> 1) | (bits & 1)) as i64;
    (half as f32) * 2.0
}

pub fn f64_convert_i64_u(value: i64) -> f64 {
    if value >= 0 {
        return value as f64;
    }
    let bits = value as u64;
    let half = ((bits >> 1) | (bits & 1)) as i64;
    (half as f64) * 2.0
}

macro_rules! float_ops {
    ($min:ident, $max:ident, $nearest:ident, $f:ty) => {
        /// NaN if either side is NaN; `-0.0` orders below `+0.0`.
        pub fn $min(lhs: $f, rhs: $f) -> $f {
            if lhs.is_nan() || rhs.is_nan() {
                <$f>::NAN
            } else if lhs == 0.0 && rhs == 0.0 {
                if lhs.is_sign_negative() {
                    lhs
                } else {
                    rhs
                }
            } else {
                lhs.min(rhs)
            }
        }

        pub fn $max(lhs: $f, rhs: $f) -> $f {
            if lhs.is_nan() || rhs.is_nan() {
                <$f>::NAN
            } else if lhs == 0.0 && rhs == 0.0 {
                if lhs.is_sign_positive() {
                    lhs
                } else {
                    rhs
                }
            } else {
                lhs.max(rhs)
            }
        }

        /// Round to nearest, ties to even.
        pub fn $nearest(value: $f) -> $f {
            let rounded = value.round();
            if (rounded - value).abs() == 0.5 {
                2.0 * (value / 2.0).round()
            } else {
                rounded
            }
        }
    };
}

float_ops!(f32_min, f32_max, f32_nearest, f32);
float_ops!(f64_min, f64_max, f64_nearest, f64);

#[cfg(test)]
mod numeric_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn integer_division_traps() {
        assert_eq!(Err(Trap::IntegerDivideByZero), i32_div_s(5, 0));
        assert_eq!(Err(Trap::IntegerOverflow), i32_div_s(i32::MIN, -1));
        assert_eq!(Ok(-2), i32_div_s(-7, 3));
        assert_eq!(Ok(0x7FFF_FFFF), i32_div_u(-1, 2));
        assert_eq!(Err(Trap::IntegerDivideByZero), i64_div_u(1, 0));
        assert_eq!(Err(Trap::IntegerOverflow), i64_div_s(i64::MIN, -1));
    }

    #[test]
    fn integer_remainder() {
        assert_eq!(Ok(0), i32_rem_s(i32::MIN, -1));
        assert_eq!(Ok(-1), i32_rem_s(-7, 3));
        assert_eq!(Ok(1), i32_rem_u(-1, 2));
        assert_eq!(Err(Trap::IntegerDivideByZero), i64_rem_s(1, 0));
        assert_eq!(Ok(0), i64_rem_s(i64::MIN, -1));
        assert_eq!(Ok(5), i64_rem_u(-1, 10));
    }

    #[test]
    fn i32_trunc_f32_s_bounds() {
        assert_eq!(Err(Trap::InvalidConversionToInteger), i32_trunc_f32_s(f32::NAN));
        assert_eq!(Ok(i32::MIN), i32_trunc_f32_s(-2147483648.0));
        assert_eq!(Err(Trap::IntegerOverflow), i32_trunc_f32_s(-2147483904.0));
        assert_eq!(Err(Trap::IntegerOverflow), i32_trunc_f32_s(2147483648.0));
        assert_eq!(Ok(2147483520), i32_trunc_f32_s(2147483520.0));
        assert_eq!(Ok(-1), i32_trunc_f32_s(-1.9));
    }

    #[test]
    fn i32_trunc_f64_bounds() {
        assert_eq!(Ok(i32::MIN), i32_trunc_f64_s(-2147483648.9));
        assert_eq!(Err(Trap::IntegerOverflow), i32_trunc_f64_s(-2147483649.0));
        assert_eq!(Ok(i32::MAX), i32_trunc_f64_s(2147483647.9));
        assert_eq!(Err(Trap::IntegerOverflow), i32_trunc_f64_s(2147483648.0));

        assert_eq!(Ok(0), i32_trunc_f64_u(-0.9));
        assert_eq!(Err(Trap::IntegerOverflow), i32_trunc_f64_u(-1.0));
        assert_eq!(Ok(u32::MAX), i32_trunc_f64_u(4294967295.9));
        assert_eq!(Err(Trap::IntegerOverflow), i32_trunc_f64_u(4294967296.0));
    }

    #[test]
    fn i64_trunc_bounds() {
        assert_eq!(Ok(i64::MIN), i64_trunc_f64_s(-9223372036854775808.0));
        assert_eq!(Err(Trap::IntegerOverflow), i64_trunc_f64_s(9223372036854775808.0));
        assert_eq!(Ok(i64::MIN), i64_trunc_f32_s(-9223372036854775808.0));
        assert_eq!(Err(Trap::IntegerOverflow), i64_trunc_f32_s(9223372036854775808.0));
        assert_eq!(Ok(u64::MAX - 2047), i64_trunc_f64_u(18446744073709549568.0));
        assert_eq!(Err(Trap::IntegerOverflow), i64_trunc_f64_u(18446744073709551616.0));
        assert_eq!(Err(Trap::IntegerOverflow), i64_trunc_f32_u(f32::INFINITY));
        assert_eq!(Err(Trap::InvalidConversionToInteger), i64_trunc_f32_u(f32::NAN));
    }

    #[test]
    fn saturating_truncations_clamp() {
        assert_eq!(0, i32_trunc_sat_f32_s(f32::NAN));
        assert_eq!(i32::MIN, i32_trunc_sat_f32_s(f32::NEG_INFINITY));
        assert_eq!(i32::MAX, i32_trunc_sat_f32_s(2147483648.0));
        assert_eq!(0, i32_trunc_sat_f64_u(-5.0));
        assert_eq!(u32::MAX, i32_trunc_sat_f64_u(1e10));
        assert_eq!(i64::MIN, i64_trunc_sat_f64_s(-1e300));
        assert_eq!(u64::MAX, i64_trunc_sat_f32_u(f32::INFINITY));
        assert_eq!(42, i64_trunc_sat_f64_s(42.9));
    }

    #[test]
    fn unsigned_64_bit_conversions_round_once() {
        for value in [0u64, 1, u64::MAX, 1 << 63, (1 << 63) + 1, 0x8000_0080_0000_0001, 0xFFFF_FF7F_FFFF_FFFF] {
            assert_eq!(value as f32, f32_convert_i64_u(value as i64), "{value:#x}");
            assert_eq!(value as f64, f64_convert_i64_u(value as i64), "{value:#x}");
        }
    }

    #[test]
    fn float_min_max_and_nearest() {
        assert!(f32_min(f32::NAN, 1.0).is_nan());
        assert!(f64_max(1.0, f64::NAN).is_nan());
        assert!(f32_min(0.0, -0.0).is_sign_negative());
        assert!(f64_max(-0.0, 0.0).is_sign_positive());
        assert_eq!(2.0, f64_nearest(2.5));
        assert_eq!(4.0, f64_nearest(3.5));
        assert_eq!(-2.0, f32_nearest(-2.5));
        assert!(f64_nearest(-0.4).is_sign_negative());
    }
}
