//! Four-lane `f32` vector.
//!
//! [`Float4`] is the unit of work for every CPU kernel: one depth group of one pixel.
//! It compiles to SSE on `x86_64` and NEON on `aarch64` when the `simd` feature is on,
//! and to plain arrays otherwise. The conditional [`Float4::select`] is a lane-wise
//! bitwise blend on every target, so kernels never branch on data.

#![allow(unused_unsafe)]

use core::fmt;
use core::ops::{Add, Mul};

use half::bf16;

use crate::dtype::Element;
use crate::layout::LANES;

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
use core::arch::x86_64::*;

#[cfg(all(feature = "simd", target_arch = "aarch64"))]
use core::arch::aarch64::*;

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
type Reg = __m128;
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
type MaskReg = __m128;

#[cfg(all(feature = "simd", target_arch = "aarch64"))]
type Reg = float32x4_t;
#[cfg(all(feature = "simd", target_arch = "aarch64"))]
type MaskReg = uint32x4_t;

#[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
type Reg = [f32; LANES];
#[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
type MaskReg = [u32; LANES];

/// Four `f32` lanes.
#[derive(Clone, Copy)]
pub struct Float4(Reg);

/// Per-lane all-ones / all-zeros mask produced by comparisons.
#[derive(Clone, Copy)]
pub struct Mask4(MaskReg);

impl Float4 {
    /// Loads the first four values of `src`.
    ///
    /// # Panics
    ///
    /// If `src` holds fewer than four values.
    #[inline(always)]
    #[must_use]
    pub fn load(src: &[f32]) -> Self {
        let src = &src[..LANES];
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Self(unsafe { _mm_loadu_ps(src.as_ptr()) })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Self(unsafe { vld1q_f32(src.as_ptr()) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Self([src[0], src[1], src[2], src[3]])
        }
    }

    /// Stores the four lanes into the first four slots of `dst`.
    ///
    /// # Panics
    ///
    /// If `dst` holds fewer than four slots.
    #[inline(always)]
    pub fn save(self, dst: &mut [f32]) {
        let dst = &mut dst[..LANES];
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        unsafe {
            _mm_storeu_ps(dst.as_mut_ptr(), self.0);
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        unsafe {
            vst1q_f32(dst.as_mut_ptr(), self.0);
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        dst.copy_from_slice(&self.0);
    }

    /// Broadcasts `v` to every lane.
    #[inline(always)]
    #[must_use]
    pub fn splat(v: f32) -> Self {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Self(unsafe { _mm_set1_ps(v) })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Self(unsafe { vdupq_n_f32(v) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Self([v; LANES])
        }
    }

    /// Builds a vector from an array.
    #[inline(always)]
    #[must_use]
    pub fn from_array(a: [f32; LANES]) -> Self {
        Self::load(&a)
    }

    /// Copies the lanes out.
    #[inline(always)]
    #[must_use]
    pub fn to_array(self) -> [f32; LANES] {
        let mut out = [0.0; LANES];
        self.save(&mut out);
        out
    }

    /// Lane-wise maximum.
    #[inline(always)]
    #[must_use]
    pub fn max(self, rhs: Self) -> Self {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Self(unsafe { _mm_max_ps(self.0, rhs.0) })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Self(unsafe { vmaxq_f32(self.0, rhs.0) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Self(core::array::from_fn(|i| if self.0[i] > rhs.0[i] { self.0[i] } else { rhs.0[i] }))
        }
    }

    /// Lane-wise minimum.
    #[inline(always)]
    #[must_use]
    pub fn min(self, rhs: Self) -> Self {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Self(unsafe { _mm_min_ps(self.0, rhs.0) })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Self(unsafe { vminq_f32(self.0, rhs.0) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Self(core::array::from_fn(|i| if self.0[i] < rhs.0[i] { self.0[i] } else { rhs.0[i] }))
        }
    }

    /// Lane-wise `self < rhs`.
    #[inline(always)]
    #[must_use]
    pub fn lt(self, rhs: Self) -> Mask4 {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Mask4(unsafe { _mm_cmplt_ps(self.0, rhs.0) })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Mask4(unsafe { vcltq_f32(self.0, rhs.0) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Mask4(core::array::from_fn(|i| if self.0[i] < rhs.0[i] { u32::MAX } else { 0 }))
        }
    }

    /// Takes lanes from `if_true` where `mask` is set and from `if_false` elsewhere.
    #[inline(always)]
    #[must_use]
    pub fn select(mask: Mask4, if_true: Self, if_false: Self) -> Self {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Self(unsafe {
                _mm_or_ps(
                    _mm_and_ps(mask.0, if_true.0),
                    _mm_andnot_ps(mask.0, if_false.0),
                )
            })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Self(unsafe { vbslq_f32(mask.0, if_true.0, if_false.0) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Self(core::array::from_fn(|i| {
                let m = mask.0[i];
                f32::from_bits((if_true.0[i].to_bits() & m) | (if_false.0[i].to_bits() & !m))
            }))
        }
    }
}

impl Add for Float4 {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Self(unsafe { _mm_add_ps(self.0, rhs.0) })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Self(unsafe { vaddq_f32(self.0, rhs.0) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Self(core::array::from_fn(|i| self.0[i] + rhs.0[i]))
        }
    }
}

impl Mul for Float4 {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            Self(unsafe { _mm_mul_ps(self.0, rhs.0) })
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            Self(unsafe { vmulq_f32(self.0, rhs.0) })
        }
        #[cfg(not(all(feature = "simd", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            Self(core::array::from_fn(|i| self.0[i] * rhs.0[i]))
        }
    }
}

impl fmt::Debug for Float4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Float4").field(&self.to_array()).finish()
    }
}

/// Storage element that widens to and narrows from [`Float4`].
pub trait Lane: Element {
    /// Widens four stored values.
    fn load4(src: &[Self]) -> Float4;
    /// Narrows four lanes into storage.
    fn save4(v: Float4, dst: &mut [Self]);
}

impl Lane for f32 {
    #[inline(always)]
    fn load4(src: &[Self]) -> Float4 {
        Float4::load(src)
    }

    #[inline(always)]
    fn save4(v: Float4, dst: &mut [Self]) {
        v.save(dst);
    }
}

impl Lane for bf16 {
    #[inline(always)]
    fn load4(src: &[Self]) -> Float4 {
        Float4::from_array([src[0].to_f32(), src[1].to_f32(), src[2].to_f32(), src[3].to_f32()])
    }

    #[inline(always)]
    fn save4(v: Float4, dst: &mut [Self]) {
        for (slot, x) in dst[..LANES].iter_mut().zip(v.to_array()) {
            *slot = bf16::from_f32(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_is_lane_wise() {
        let a = Float4::from_array([1.0, -2.0, 3.0, -4.0]);
        let b = Float4::splat(2.0);
        assert_eq!((a * b).to_array(), [2.0, -4.0, 6.0, -8.0]);
        assert_eq!((a + b).to_array(), [3.0, 0.0, 5.0, -2.0]);
        assert_eq!(a.max(Float4::splat(0.0)).to_array(), [1.0, 0.0, 3.0, 0.0]);
        assert_eq!(a.min(Float4::splat(0.0)).to_array(), [0.0, -2.0, 0.0, -4.0]);
    }

    #[test]
    fn select_blends_by_mask() {
        let x = Float4::from_array([-1.0, 0.0, 2.0, -0.5]);
        let mask = x.lt(Float4::splat(0.0));
        let picked = Float4::select(mask, Float4::splat(10.0), Float4::splat(20.0));
        assert_eq!(picked.to_array(), [10.0, 20.0, 20.0, 10.0]);
    }

    #[test]
    fn nan_is_never_less_than_zero() {
        let x = Float4::from_array([f32::NAN, -1.0, 1.0, -0.0]);
        let out = Float4::select(x.lt(Float4::splat(0.0)), Float4::splat(1.0), Float4::splat(0.0));
        assert_eq!(out.to_array(), [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn bf16_lanes_round_on_store() {
        let src = [bf16::from_f32(1.5), bf16::from_f32(-2.0), bf16::ZERO, bf16::ONE];
        let v = bf16::load4(&src);
        assert_eq!(v.to_array(), [1.5, -2.0, 0.0, 1.0]);

        let mut dst = [bf16::ZERO; 4];
        bf16::save4(Float4::splat(1.0 / 3.0), &mut dst);
        assert!(dst.iter().all(|&d| d == bf16::from_f32(1.0 / 3.0)));
    }
}
