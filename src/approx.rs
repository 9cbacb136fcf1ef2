//! Graded approximate equality of `f32` values and slices.
//!
//! Kernels on different paths agree to different degrees: two f32 paths to a few
//! ulps, a bf16 path only to about three significant digits. Comparisons return an
//! [`ApproxEquality`] grade so a check can state how close it expects to be.

/// The max epsilon accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The expected minimum epsilon accepted on `f32`s.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected epsilon accepted on `f32`s.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// Relative epsilon of values that went through bf16 storage (8 significand bits).
pub const BF16_MAX_ERROR: f32 = 1e-2;

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,

    /// Good epsilon.
    Partial = 1,

    /// Acceptable epsilon.
    Relative = 2,

    /// Within bf16 rounding.
    Compact = 3,

    /// No relative equality.
    Scarce = 4,
}

/// Checks the relative distance based off epsilon.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq<Self> for f32 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.to_bits() == rhs.to_bits() {
            return ApproxEquality::Precise;
        }
        let dif = (self - rhs).abs();
        let scale = self.abs().max(rhs.abs()).max(1.0);

        if dif < F32_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F32_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F32_MAX_ERROR {
            ApproxEquality::Relative
        } else if dif < BF16_MAX_ERROR * scale {
            ApproxEquality::Compact
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq<[f32]> for [f32] {
    fn approx_eq(&self, rhs: &[f32]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        let mut eq = ApproxEquality::Precise;
        for (a, b) in self.iter().zip(rhs) {
            eq = eq.max(a.approx_eq(b));
            if eq == ApproxEquality::Scarce {
                break; // can't improve from here; not equal
            }
        }
        eq
    }
}

impl<const N: usize> RelativeEq<[f32; N]> for [f32] {
    fn approx_eq(&self, rhs: &[f32; N]) -> ApproxEquality {
        self.approx_eq(rhs.as_slice())
    }
}

/// Approximates equality at the strictest grade.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) == ApproxEquality::Precise
}

/// Whether `a` and `b` are equal at `grade` or better.
pub fn approx_within<A: RelativeEq<B> + ?Sized, B: ?Sized>(
    a: &A,
    b: &B,
    grade: ApproxEquality,
) -> bool {
    a.approx_eq(b) <= grade
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_follow_the_distance() {
        assert_eq!(1.0f32.approx_eq(&1.0), ApproxEquality::Precise);
        assert_eq!(1.0f32.approx_eq(&1.000_002), ApproxEquality::Partial);
        assert_eq!(1.0f32.approx_eq(&1.0005), ApproxEquality::Relative);
        assert_eq!(100.0f32.approx_eq(&100.5), ApproxEquality::Compact);
        assert_eq!(1.0f32.approx_eq(&2.0), ApproxEquality::Scarce);
        assert_eq!(f32::NAN.approx_eq(&f32::NAN), ApproxEquality::Precise);
    }

    #[test]
    fn slices_take_the_worst_grade() {
        let a = [1.0f32, 2.0, 3.0];
        assert!(approx_eq(a.as_slice(), &[1.0, 2.0, 3.0]));
        assert!(approx_within(a.as_slice(), &[1.0, 2.0005, 3.0], ApproxEquality::Relative));
        assert!(!approx_within(a.as_slice(), &[1.0, 2.0], ApproxEquality::Compact));
    }
}
