//! Packed tensor layout.
//!
//! Blobs are stored channel-packed: channels are grouped in fours ("depth groups"),
//! and inside a depth group the four channel values of one spatial position are
//! adjacent. For logical dims `(N, C, H, W)`:
//!
//! ```text
//! paddedC      = ceil4(C)
//! depth_groups = paddedC / 4
//! batch_stride = W * H * paddedC
//! total        = N * batch_stride
//! offset(n, c, h, w) = n * batch_stride + (c / 4) * H * W * 4 + (h * W + w) * 4 + c % 4
//! ```
//!
//! Kernels must take their loop bounds from [`PackedLayout`], never from the raw
//! channel count. Lanes with `C <= channel < paddedC` hold padding.

use core::fmt;

use rayon::prelude::*;

use crate::error::{AccError, Result};

/// Number of channels in one depth group.
pub const LANES: usize = 4;

/// Rounds `x` up to the next multiple of `y`.
#[inline]
#[must_use]
pub const fn round_up(x: usize, y: usize) -> usize {
    x.div_ceil(y).saturating_mul(y)
}

/// Integer division rounding up.
#[inline]
#[must_use]
pub const fn up_div(x: usize, y: usize) -> usize {
    x.div_ceil(y)
}

/// Logical four-dimensional extents (batch, channel, height, width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dims4 {
    /// Batch.
    pub n: usize,
    /// Channels.
    pub c: usize,
    /// Height.
    pub h: usize,
    /// Width.
    pub w: usize,
}

impl Dims4 {
    /// Creates dims from the four extents.
    #[must_use]
    pub const fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self { n, c, h, w }
    }

    /// Element count of the unpadded (NCHW) tensor, saturating at `usize::MAX`.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.n
            .saturating_mul(self.c)
            .saturating_mul(self.h)
            .saturating_mul(self.w)
    }
}

impl From<[usize; 4]> for Dims4 {
    fn from([n, c, h, w]: [usize; 4]) -> Self {
        Self { n, c, h, w }
    }
}

impl fmt::Display for Dims4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.n, self.c, self.h, self.w)
    }
}

/// Physical geometry of a packed blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedLayout {
    dims: Dims4,
    padded_channels: usize,
}

impl PackedLayout {
    /// Computes the packed geometry for `dims`.
    #[must_use]
    pub const fn new(dims: Dims4) -> Self {
        Self {
            dims,
            padded_channels: round_up(dims.c, LANES),
        }
    }

    /// Logical dims this layout was built from.
    #[must_use]
    pub const fn dims(&self) -> Dims4 {
        self.dims
    }

    /// `ceil4(C)`.
    #[must_use]
    pub const fn padded_channels(&self) -> usize {
        self.padded_channels
    }

    /// Number of 4-channel groups.
    #[must_use]
    pub const fn depth_groups(&self) -> usize {
        up_div(self.dims.c, LANES)
    }

    /// `H * W`.
    #[must_use]
    pub const fn plane_size(&self) -> usize {
        self.dims.h.saturating_mul(self.dims.w)
    }

    /// Elements in one depth group of one batch.
    #[must_use]
    pub const fn depth_stride(&self) -> usize {
        self.plane_size().saturating_mul(LANES)
    }

    /// Elements in one batch.
    #[must_use]
    pub const fn batch_stride(&self) -> usize {
        self.plane_size().saturating_mul(self.padded_channels)
    }

    /// Elements in the whole padded buffer, saturating at `usize::MAX`.
    #[must_use]
    pub const fn total_elements(&self) -> usize {
        self.dims.n.saturating_mul(self.batch_stride())
    }

    /// Elements in the whole padded buffer, `None` on overflow.
    #[must_use]
    pub fn checked_total_elements(&self) -> Option<usize> {
        self.dims
            .h
            .checked_mul(self.dims.w)?
            .checked_mul(self.padded_channels)?
            .checked_mul(self.dims.n)
    }

    /// Packed offset of logical element `(n, c, h, w)`.
    #[must_use]
    pub const fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        n * self.batch_stride()
            + (c / LANES) * self.depth_stride()
            + (h * self.dims.w + w) * LANES
            + c % LANES
    }
}

fn check_len(needed: usize, actual: usize) -> Result<()> {
    if actual < needed {
        return Err(AccError::BufferTooSmall { needed, actual });
    }
    Ok(())
}

/// Packs an NCHW tensor into the channel-packed layout. Padding lanes are zeroed.
///
/// # Errors
///
/// [`AccError::BufferTooSmall`] if either slice is shorter than `dims` requires.
pub fn pack_nchw<T>(dims: Dims4, src: &[T], dst: &mut [T]) -> Result<()>
where
    T: Copy + Default + Send + Sync,
{
    let layout = PackedLayout::new(dims);
    check_len(dims.count(), src.len())?;
    check_len(layout.total_elements(), dst.len())?;
    if layout.total_elements() == 0 {
        return Ok(());
    }

    let plane = layout.plane_size();
    let chw = dims.c * plane;
    dst[..layout.total_elements()]
        .par_chunks_mut(layout.batch_stride())
        .zip(src.par_chunks(chw.max(1)))
        .for_each(|(packed, planar)| {
            for (dz, group) in packed.chunks_exact_mut(layout.depth_stride()).enumerate() {
                for (p, px) in group.chunks_exact_mut(LANES).enumerate() {
                    for (lane, slot) in px.iter_mut().enumerate() {
                        let c = dz * LANES + lane;
                        *slot = if c < dims.c {
                            planar[c * plane + p]
                        } else {
                            T::default()
                        };
                    }
                }
            }
        });
    Ok(())
}

/// Unpacks a channel-packed tensor back to NCHW, skipping padding lanes.
///
/// # Errors
///
/// [`AccError::BufferTooSmall`] if either slice is shorter than `dims` requires.
pub fn unpack_nchw<T>(dims: Dims4, src: &[T], dst: &mut [T]) -> Result<()>
where
    T: Copy + Send + Sync,
{
    let layout = PackedLayout::new(dims);
    check_len(layout.total_elements(), src.len())?;
    check_len(dims.count(), dst.len())?;
    if dims.count() == 0 {
        return Ok(());
    }

    let plane = layout.plane_size();
    dst[..dims.count()]
        .par_chunks_mut(dims.c * plane)
        .zip(src.par_chunks(layout.batch_stride()))
        .for_each(|(planar, packed)| {
            for c in 0..dims.c {
                let group = &packed[(c / LANES) * layout.depth_stride()..];
                for p in 0..plane {
                    planar[c * plane + p] = group[p * LANES + c % LANES];
                }
            }
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn padded_channels_is_next_multiple_of_four(c in 0usize..10_000) {
            let padded = PackedLayout::new(Dims4::new(1, c, 1, 1)).padded_channels();
            prop_assert_eq!(padded % LANES, 0);
            prop_assert!(padded >= c);
            prop_assert!(padded < c + LANES);
        }

        #[test]
        fn offsets_stay_inside_the_padded_buffer(
            n in 1usize..3, c in 1usize..11, h in 1usize..5, w in 1usize..5,
        ) {
            let layout = PackedLayout::new(Dims4::new(n, c, h, w));
            let last = layout.offset(n - 1, c - 1, h - 1, w - 1);
            prop_assert!(last < layout.total_elements());
        }
    }

    #[test]
    fn strides_follow_the_padded_channel_count() {
        let layout = PackedLayout::new(Dims4::new(2, 3, 2, 5));
        assert_eq!(layout.padded_channels(), 4);
        assert_eq!(layout.depth_groups(), 1);
        assert_eq!(layout.plane_size(), 10);
        assert_eq!(layout.batch_stride(), 40);
        assert_eq!(layout.total_elements(), 80);

        let wide = PackedLayout::new(Dims4::new(1, 9, 1, 1));
        assert_eq!(wide.padded_channels(), 12);
        assert_eq!(wide.depth_groups(), 3);
    }

    #[test]
    fn zero_channels_yield_an_empty_layout() {
        let layout = PackedLayout::new(Dims4::new(4, 0, 8, 8));
        assert_eq!(layout.padded_channels(), 0);
        assert_eq!(layout.total_elements(), 0);
    }

    #[test]
    fn huge_dims_saturate_instead_of_overflowing() {
        let layout = PackedLayout::new(Dims4::new(usize::MAX / 2, 5, 3, 3));
        assert_eq!(layout.total_elements(), usize::MAX);
        assert_eq!(layout.checked_total_elements(), None);
        assert_eq!(Dims4::new(usize::MAX, 2, 1, 1).count(), usize::MAX);

        let small = PackedLayout::new(Dims4::new(2, 5, 3, 3));
        assert_eq!(small.checked_total_elements(), Some(small.total_elements()));
        assert_eq!(up_div(5, LANES), small.depth_groups());
    }

    #[test]
    fn pack_interleaves_channels_and_zeroes_padding() {
        // 1 x 3 x 1 x 2, channel-major input
        let dims = Dims4::new(1, 3, 1, 2);
        let nchw = [1.0f32, 2.0, 10.0, 20.0, 100.0, 200.0];
        let mut packed = [f32::NAN; 8];
        pack_nchw(dims, &nchw, &mut packed).unwrap();
        assert_eq!(packed, [1.0, 10.0, 100.0, 0.0, 2.0, 20.0, 200.0, 0.0]);

        let mut back = [0.0f32; 6];
        unpack_nchw(dims, &packed, &mut back).unwrap();
        assert_eq!(back, nchw);
    }

    #[test]
    fn pack_matches_offset_for_every_element() {
        let dims = Dims4::new(2, 6, 3, 2);
        let layout = PackedLayout::new(dims);
        let nchw: Vec<i32> = (0..i32::try_from(dims.count()).unwrap()).collect();
        let mut packed = vec![-1; layout.total_elements()];
        pack_nchw(dims, &nchw, &mut packed).unwrap();

        for n in 0..dims.n {
            for c in 0..dims.c {
                for h in 0..dims.h {
                    for w in 0..dims.w {
                        let planar = ((n * dims.c + c) * dims.h + h) * dims.w + w;
                        assert_eq!(packed[layout.offset(n, c, h, w)], nchw[planar]);
                    }
                }
            }
        }
    }

    #[test]
    fn short_buffers_are_rejected() {
        let dims = Dims4::new(1, 5, 2, 2);
        let mut packed = vec![0.0f32; 8];
        let err = pack_nchw(dims, &[0.0; 20], &mut packed).unwrap_err();
        assert_eq!(err, AccError::BufferTooSmall { needed: 32, actual: 8 });
    }
}
