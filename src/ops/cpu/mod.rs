//! CPU device kernels.
//!
//! Every kernel here works on the packed layout four lanes at a time through
//! [`vec4::Float4`]. Two loop shapes cover all elementwise operators:
//!
//! - [`map_flat`] streams the whole padded buffer, for operators whose constants are
//!   the same for every channel.
//! - [`map_depth_groups`] walks (batch, depth group, pixel) and lets the caller derive
//!   its per-channel constants once per depth group.
//!
//! Both take their bounds from [`PackedLayout`], so padding lanes are processed like
//! any other lane and never read past the buffer.
//!
//! ## Implemented Ops
//!
//! - [`CpuPReluLayerAcc`]: parametric leaky activation
//! - [`CpuReluLayerAcc`]: `max(x, 0)`
//! - [`CpuScaleLayerAcc`]: per-channel `x * scale + bias`

use crate::backend::Backend;
use crate::buffer::{Blob, RawBuffer};
use crate::error::{AccError, Result};
use crate::layer::LayerType;
use crate::layout::{LANES, PackedLayout};
use crate::registry::RegistryBuilder;

pub mod prelu;
pub mod relu;
pub mod scale;
pub mod vec4;

pub use prelu::CpuPReluLayerAcc;
pub use relu::CpuReluLayerAcc;
pub use scale::CpuScaleLayerAcc;

use vec4::{Float4, Lane};

/// Registers every CPU kernel.
///
/// # Errors
///
/// [`AccError::DuplicateKernel`] if any of them is already registered.
pub fn register_cpu_kernels(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register(Backend::Cpu, LayerType::PRelu, || Box::new(CpuPReluLayerAcc::default()))?;
    builder.register(Backend::Cpu, LayerType::Relu, || Box::new(CpuReluLayerAcc::default()))?;
    builder.register(Backend::Cpu, LayerType::Scale, || Box::new(CpuScaleLayerAcc::default()))?;
    Ok(())
}

/// Applies `op` to every group of four lanes.
pub(crate) fn map_flat<T: Lane>(src: &[T], dst: &mut [T], op: impl Fn(Float4) -> Float4) {
    for (s, d) in src.chunks_exact(LANES).zip(dst.chunks_exact_mut(LANES)) {
        T::save4(op(T::load4(s)), d);
    }
}

/// Applies `op` pixel by pixel, with `group(dz)` evaluated once per depth group.
pub(crate) fn map_depth_groups<T: Lane, G>(
    layout: &PackedLayout,
    src: &[T],
    dst: &mut [T],
    group: impl Fn(usize) -> G,
    op: impl Fn(Float4, &G) -> Float4,
) {
    if layout.total_elements() == 0 {
        return;
    }
    let batch = layout.batch_stride();
    let depth = layout.depth_stride();
    for (src_b, dst_b) in src.chunks_exact(batch).zip(dst.chunks_exact_mut(batch)) {
        for (dz, (src_z, dst_z)) in src_b
            .chunks_exact(depth)
            .zip(dst_b.chunks_exact_mut(depth))
            .enumerate()
        {
            let constants = group(dz);
            map_flat(src_z, dst_z, |x| op(x, &constants));
        }
    }
}

/// Borrows the packed region of an input and an output blob as `T`.
pub(crate) fn packed_views<'i, 'o, T: Lane>(
    input: &'i Blob,
    output: &'o mut Blob,
) -> Result<(&'i [T], &'o mut [T])> {
    let total = input.desc().layout().total_elements();
    let src = input.handle().as_slice::<T>()?;
    let dst = output.handle_mut().as_mut_slice::<T>()?;
    let actual = src.len().min(dst.len());
    if actual < total {
        return Err(AccError::BufferTooSmall {
            needed: total,
            actual,
        });
    }
    Ok((&src[..total], &mut dst[..total]))
}

/// Widens per-channel constants to `f32` and pads them to `ceil4(channels)` with zeros.
///
/// A shared buffer (`shared == true`) contributes its first value only.
pub(crate) fn padded_constants(
    what: &str,
    buf: &RawBuffer,
    shared: bool,
    channels: usize,
    padded: usize,
) -> Result<Vec<f32>> {
    let needed = if shared { 1 } else { channels };
    if buf.len() < needed {
        return Err(AccError::InvalidResource(format!(
            "{what} holds {} values, {needed} required",
            buf.len()
        )));
    }
    let values = buf.to_f32_vec()?;
    if shared {
        return Ok(vec![values[0]]);
    }
    let mut out = vec![0.0; padded];
    out[..channels].copy_from_slice(&values[..channels]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Dims4;

    #[test]
    fn depth_group_constants_follow_channels() {
        // two depth groups, two pixels each
        let layout = PackedLayout::new(Dims4::new(1, 8, 1, 2));
        let src = vec![1.0f32; layout.total_elements()];
        let mut dst = vec![0.0f32; layout.total_elements()];
        map_depth_groups(
            &layout,
            &src,
            &mut dst,
            |dz| Float4::splat(dz as f32 + 1.0),
            |x, k| x * *k,
        );
        assert_eq!(
            dst,
            [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0]
        );
    }

    #[test]
    fn empty_layouts_are_a_no_op() {
        let layout = PackedLayout::new(Dims4::new(1, 0, 3, 3));
        map_depth_groups::<f32, ()>(&layout, &[], &mut [], |_| (), |x, _| x);
    }

    #[test]
    fn constants_are_padded_with_zeros() {
        let buf = RawBuffer::from_slice(&[0.1f32, 0.2, 0.3]);
        assert_eq!(
            padded_constants("slope", &buf, false, 3, 4).unwrap(),
            [0.1, 0.2, 0.3, 0.0]
        );
        assert_eq!(padded_constants("slope", &buf, true, 3, 4).unwrap(), [0.1]);
        assert!(matches!(
            padded_constants("slope", &buf, false, 5, 8),
            Err(AccError::InvalidResource(_))
        ));
    }
}
