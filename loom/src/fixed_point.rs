//! # Fixed-Point Arithmetic
//!
//! The kernel never touches the FPU, so the MLFQS statistics are kept as
//! 17.14 fixed-point numbers: an `i32` holding the real value scaled by 2^14.
//! Products and quotients widen to `i64` before rescaling, so a single
//! operation loses at most one unit in the last place. A product or quotient
//! that does not fit back into 17.14 halts instead of wrapping.

use core::ops::{Add, Div, Mul, Neg, Sub};

/// Number of fractional bits.
pub const FRACTION_BITS: u32 = 14;

/// Scale factor: the raw value of `1.0`.
pub const F: i32 = 1 << FRACTION_BITS;

/// A real number in 17.14 fixed-point representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(F);

    /// Wrap an already-scaled raw value.
    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    /// The scaled raw value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert an integer to fixed-point.
    pub const fn from_int(n: i32) -> Self {
        Fixed(n * F)
    }

    /// Convert to an integer, truncating toward zero.
    pub const fn to_int_trunc(self) -> i32 {
        self.0 / F
    }

    /// Convert to an integer, rounding to nearest (halves away from zero).
    pub const fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    pub const fn add_int(self, n: i32) -> Self {
        Fixed(self.0 + n * F)
    }

    pub const fn sub_int(self, n: i32) -> Self {
        Fixed(self.0 - n * F)
    }

    pub const fn mul_int(self, n: i32) -> Self {
        Fixed(self.0 * n)
    }

    pub const fn div_int(self, n: i32) -> Self {
        Fixed(self.0 / n)
    }
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

/// Narrow a rescaled `i64` back to 17.14.
///
/// # Panics
/// If the value is outside the representable range.
fn narrow(raw: i64, op: &str) -> Fixed {
    match i32::try_from(raw) {
        Ok(raw) => Fixed(raw),
        Err(_) => panic!("fixed-point {} overflows 17.14 (raw {})", op, raw),
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    /// # Panics
    /// If the product is outside the 17.14 range.
    fn mul(self, rhs: Fixed) -> Fixed {
        narrow((self.0 as i64) * (rhs.0 as i64) / F as i64, "product")
    }
}

impl Div for Fixed {
    type Output = Fixed;

    /// # Panics
    /// If the quotient is outside the 17.14 range, or `rhs` is zero.
    fn div(self, rhs: Fixed) -> Fixed {
        narrow((self.0 as i64) * F as i64 / rhs.0 as i64, "quotient")
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}
