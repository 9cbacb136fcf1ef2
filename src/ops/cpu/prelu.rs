//! PReLU on the CPU device: `y = x` for `x >= 0`, `y = x * slope` otherwise.
//!
//! With a shared slope the kernel streams the padded buffer with the slope broadcast
//! once. With per-channel slopes it walks depth groups and loads the group's four
//! slopes once before visiting its pixels. Either way the negative branch is a lane
//! select, not a data-dependent jump.

use std::sync::Arc;

use half::bf16;

use super::vec4::{Float4, Lane};
use super::{map_depth_groups, map_flat, packed_views, padded_constants};
use crate::backend::Backend;
use crate::buffer::{Blob, BlobDesc};
use crate::error::{AccError, Result};
use crate::layer::{LayerParam, LayerResource, LayerType};
use crate::layout::{Dims4, LANES};
use crate::ops::{LayerAcc, check_pair, unary_desc, unary_io};
use crate::precision::{ComputePath, select_compute_path};

#[inline(always)]
fn prelu(x: Float4, slope: Float4) -> Float4 {
    Float4::select(x.lt(Float4::splat(0.0)), x * slope, x)
}

#[derive(Debug)]
struct Bound {
    param: Arc<LayerParam>,
    resource: Arc<LayerResource>,
    dims: Dims4,
    /// Shared: one value. Per-channel: `paddedC` values, padding lanes zero.
    slopes: Vec<f32>,
}

impl Bound {
    fn run<T: Lane>(&self, shared: bool, input: &Blob, output: &mut Blob) -> Result<()> {
        let layout = input.desc().layout();
        let (src, dst) = packed_views::<T>(input, output)?;
        if shared {
            let k = Float4::splat(self.slopes[0]);
            map_flat(src, dst, |x| prelu(x, k));
        } else {
            map_depth_groups(
                &layout,
                src,
                dst,
                |dz| Float4::load(&self.slopes[dz * LANES..]),
                |x, k| prelu(x, *k),
            );
        }
        Ok(())
    }
}

/// CPU PReLU kernel.
#[derive(Debug, Default)]
pub struct CpuPReluLayerAcc {
    bound: Option<Bound>,
}

impl LayerAcc for CpuPReluLayerAcc {
    fn layer_type(&self) -> LayerType {
        LayerType::PRelu
    }

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn init(
        &mut self,
        param: Option<Arc<LayerParam>>,
        resource: Option<Arc<LayerResource>>,
        inputs: &[BlobDesc],
        outputs: &[BlobDesc],
    ) -> Result<()> {
        self.bound = None;
        let param = param.ok_or(AccError::ParameterMissing(LayerType::PRelu))?;
        let resource = resource.ok_or(AccError::ResourceMissing(LayerType::PRelu))?;
        let shared = param.as_prelu()?.channel_shared;
        let slope = &resource.as_prelu()?.slope;

        let (input, output) = unary_desc(LayerType::PRelu, inputs, outputs)?;
        let path =
            select_compute_path(LayerType::PRelu, output.data_type, Some(slope.data_type()))?;
        check_pair(input, output)?;

        let layout = input.layout();
        let slopes = padded_constants(
            "PReLU slope",
            slope,
            shared,
            layout.dims().c,
            layout.padded_channels(),
        )?;
        log::debug!(
            "PReLU bound: {} slope(s) on {}, {path:?}",
            if shared { "shared" } else { "per-channel" },
            input.dims
        );

        self.bound = Some(Bound {
            param,
            resource,
            dims: input.dims,
            slopes,
        });
        Ok(())
    }

    fn forward(&self, inputs: &[&Blob], outputs: &mut [Blob]) -> Result<()> {
        let bound = self
            .bound
            .as_ref()
            .ok_or(AccError::ParameterMissing(LayerType::PRelu))?;
        let shared = bound.param.as_prelu()?.channel_shared;
        let slope_type = bound.resource.as_prelu()?.slope.data_type();

        let (input, output) = unary_io(LayerType::PRelu, inputs, outputs)?;
        let path = select_compute_path(LayerType::PRelu, output.data_type(), Some(slope_type))?;
        check_pair(input.desc(), output.desc())?;
        if !shared && input.dims().c != bound.dims.c {
            return Err(AccError::ShapeMismatch {
                expected: bound.dims,
                found: input.dims(),
            });
        }

        log::trace!("PReLU forward on {} via {path:?}", input.dims());
        match path {
            ComputePath::Float => bound.run::<f32>(shared, input, output),
            ComputePath::Bfp16FloatParams | ComputePath::Bfp16 => {
                bound.run::<bf16>(shared, input, output)
            }
        }
    }
}
