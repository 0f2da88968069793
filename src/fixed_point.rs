//! # Fixed-Point Arithmetic
//!
//! 17.14 signed fixed-point numbers for the MLFQS controller. The kernel
//! never touches the FPU, so `recent_cpu` and `load_avg` are kept as
//! integers scaled by `F = 2^14`.
//!
//! ```text
//!  31 30            14 13             0
//! ┌──┬───────────────┬────────────────┐
//! │ s│  integer (17) │  fraction (14) │
//! └──┴───────────────┴────────────────┘
//! ```
//!
//! Sums of two fixed values and products with plain integers need no
//! rescaling. Products and quotients of two fixed values go through an
//! `i64` intermediate so the scaled value cannot overflow for the ranges the
//! controller uses.

use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Number of fraction bits.
pub const FRACTION_BITS: u32 = 14;

/// Scale factor, `1.0` in fixed-point representation.
pub const F: i32 = 1 << FRACTION_BITS;

/// A 17.14 fixed-point number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(F);

    /// Convert an integer to fixed point.
    #[inline]
    pub const fn from_int(n: i32) -> Self {
        Fixed(n * F)
    }

    /// Wrap an already-scaled value.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    /// `numerator / denominator` as a fixed-point value.
    #[inline]
    pub fn ratio(numerator: i32, denominator: i32) -> Self {
        Fixed::from_int(numerator) / Fixed::from_int(denominator)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert to an integer, rounding toward zero.
    #[inline]
    pub const fn to_int_trunc(self) -> i32 {
        self.0 / F
    }

    /// Convert to an integer, rounding to nearest with ties away from zero.
    #[inline]
    pub const fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }
}

impl Add for Fixed {
    type Output = Fixed;

    #[inline]
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    #[inline]
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl Add<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn add(self, n: i32) -> Fixed {
        Fixed(self.0 + n * F)
    }
}

impl Sub<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn sub(self, n: i32) -> Fixed {
        Fixed(self.0 - n * F)
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    #[inline]
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed((self.0 as i64 * rhs.0 as i64 / F as i64) as i32)
    }
}

impl Div for Fixed {
    type Output = Fixed;

    #[inline]
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed((self.0 as i64 * F as i64 / rhs.0 as i64) as i32)
    }
}

impl Mul<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn mul(self, n: i32) -> Fixed {
        Fixed(self.0 * n)
    }
}

impl Div<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn div(self, n: i32) -> Fixed {
        Fixed(self.0 / n)
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    #[inline]
    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}

impl AddAssign<i32> for Fixed {
    #[inline]
    fn add_assign(&mut self, n: i32) {
        *self = *self + n;
    }
}

impl AddAssign for Fixed {
    #[inline]
    fn add_assign(&mut self, rhs: Fixed) {
        *self = *self + rhs;
    }
}

impl SubAssign for Fixed {
    #[inline]
    fn sub_assign(&mut self, rhs: Fixed) {
        *self = *self - rhs;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_conversions() {
        assert_eq!(Fixed::from_int(3).raw(), 3 * 16384);
        assert_eq!(Fixed::from_int(-7).to_int_trunc(), -7);
        assert_eq!(Fixed::from_raw(F + F / 2 - 1).to_int_trunc(), 1);
        assert_eq!(Fixed::from_raw(-(F + F / 2 - 1)).to_int_trunc(), -1);
    }

    #[test]
    fn test_rounding_ties_away_from_zero() {
        // 2.5 -> 3, -2.5 -> -3
        assert_eq!(Fixed::from_raw(2 * F + F / 2).to_int_round(), 3);
        assert_eq!(Fixed::from_raw(-(2 * F + F / 2)).to_int_round(), -3);
        // 2.49.. -> 2, -2.49.. -> -2
        assert_eq!(Fixed::from_raw(2 * F + F / 2 - 1).to_int_round(), 2);
        assert_eq!(Fixed::from_raw(-(2 * F + F / 2 - 1)).to_int_round(), -2);
    }

    #[test]
    fn test_round_trip_over_controller_range() {
        for n in -100_000..=100_000 {
            assert_eq!(Fixed::from_int(n).to_int_round(), n);
            assert_eq!(Fixed::from_int(n).to_int_trunc(), n);
        }
    }

    #[test]
    fn test_mixed_arithmetic() {
        let x = Fixed::from_raw(F / 4); // 0.25
        assert_eq!((x + 2).raw(), 2 * F + F / 4);
        assert_eq!((x - 1).raw(), F / 4 - F);
        assert_eq!((x * 8).to_int_trunc(), 2);
        assert_eq!((Fixed::from_int(9) / 4).raw(), 9 * F / 4);
        assert_eq!((Fixed::from_int(5) + Fixed::from_int(-2)).to_int_trunc(), 3);
        assert_eq!((Fixed::from_int(5) - Fixed::from_int(7)).to_int_trunc(), -2);
    }

    #[test]
    fn test_fixed_mul_div_use_wide_intermediate() {
        // The raw product of 100.0 * 100.0 overflows i32; the result fits.
        let big = Fixed::from_int(100);
        assert_eq!((big * big).to_int_trunc(), 10_000);
        assert_eq!((Fixed::from_int(30_000) / Fixed::from_int(60)).to_int_trunc(), 500);
        assert_eq!(Fixed::ratio(59, 60).raw(), 59 * F / 60);
    }

    #[test]
    fn test_div_then_mul_within_one_unit() {
        let divisors = [
            Fixed::ONE,
            Fixed::from_raw(F / 2),
            Fixed::from_raw(3 * F / 4),
            Fixed::from_raw(-F / 3),
        ];
        for raw in (-5_000_000..5_000_000).step_by(9_973) {
            let x = Fixed::from_raw(raw);
            for &y in divisors.iter() {
                let back = (x / y) * y;
                assert!(
                    (back.raw() - x.raw()).abs() <= 1,
                    "x={} y={} back={}",
                    x.raw(),
                    y.raw(),
                    back.raw()
                );
            }
        }
    }

    #[test]
    fn test_assign_ops() {
        let mut x = Fixed::ZERO;
        x += 1;
        x += Fixed::ONE;
        assert_eq!(x, Fixed::from_int(2));
        x -= Fixed::from_int(3);
        assert_eq!(-x, Fixed::ONE);
    }
}
