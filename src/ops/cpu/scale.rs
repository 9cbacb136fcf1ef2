//! Per-channel affine transform on the CPU device: `y = x * scale[c] + bias[c]`.

use std::sync::Arc;

use half::bf16;

use super::vec4::{Float4, Lane};
use super::{map_depth_groups, packed_views, padded_constants};
use crate::backend::Backend;
use crate::buffer::{Blob, BlobDesc};
use crate::error::{AccError, Result};
use crate::layer::{LayerParam, LayerResource, LayerType};
use crate::layout::{Dims4, LANES};
use crate::ops::{LayerAcc, check_pair, unary_desc, unary_io};
use crate::precision::{ComputePath, select_compute_path};

#[derive(Debug)]
struct Bound {
    resource: Arc<LayerResource>,
    dims: Dims4,
    /// `paddedC` multipliers.
    scale: Vec<f32>,
    /// `paddedC` addends, all zero without a bias term.
    bias: Vec<f32>,
}

impl Bound {
    fn run<T: Lane>(&self, input: &Blob, output: &mut Blob) -> Result<()> {
        let layout = input.desc().layout();
        let (src, dst) = packed_views::<T>(input, output)?;
        map_depth_groups(
            &layout,
            src,
            dst,
            |dz| {
                let at = dz * LANES;
                (Float4::load(&self.scale[at..]), Float4::load(&self.bias[at..]))
            },
            |x, (k, b)| x * *k + *b,
        );
        Ok(())
    }
}

fn broadcast(values: Vec<f32>, shared: bool, padded: usize) -> Vec<f32> {
    if shared { vec![values[0]; padded] } else { values }
}

/// CPU Scale kernel.
#[derive(Debug, Default)]
pub struct CpuScaleLayerAcc {
    bound: Option<Bound>,
}

impl LayerAcc for CpuScaleLayerAcc {
    fn layer_type(&self) -> LayerType {
        LayerType::Scale
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
        let param = param.ok_or(AccError::ParameterMissing(LayerType::Scale))?;
        let resource = resource.ok_or(AccError::ResourceMissing(LayerType::Scale))?;
        let p = *param.as_scale()?;
        let weights = resource.as_scale()?;

        let (input, output) = unary_desc(LayerType::Scale, inputs, outputs)?;
        let path = select_compute_path(
            LayerType::Scale,
            output.data_type,
            Some(weights.scale.data_type()),
        )?;
        check_pair(input, output)?;

        let layout = input.layout();
        let (c, padded) = (layout.dims().c, layout.padded_channels());
        let scale = padded_constants("scale", &weights.scale, p.channel_shared, c, padded)?;
        let bias = match (p.bias_term, &weights.bias) {
            (false, _) => vec![0.0; padded],
            (true, None) => {
                return Err(AccError::InvalidResource(
                    "Scale layer declares a bias term but has no bias buffer".into(),
                ));
            }
            (true, Some(bias)) => {
                if bias.data_type() != weights.scale.data_type() {
                    return Err(AccError::TypeMismatch {
                        expected: weights.scale.data_type().name(),
                        found: bias.data_type().name(),
                    });
                }
                let values = padded_constants("bias", bias, p.channel_shared, c, padded)?;
                broadcast(values, p.channel_shared, padded)
            }
        };
        let scale = broadcast(scale, p.channel_shared, padded);
        log::debug!("Scale bound on {}, bias {}, {path:?}", input.dims, p.bias_term);

        self.bound = Some(Bound {
            resource,
            dims: input.dims,
            scale,
            bias,
        });
        Ok(())
    }

    fn forward(&self, inputs: &[&Blob], outputs: &mut [Blob]) -> Result<()> {
        let bound = self
            .bound
            .as_ref()
            .ok_or(AccError::ParameterMissing(LayerType::Scale))?;
        let scale_type = bound.resource.as_scale()?.scale.data_type();

        let (input, output) = unary_io(LayerType::Scale, inputs, outputs)?;
        let path = select_compute_path(LayerType::Scale, output.data_type(), Some(scale_type))?;
        check_pair(input.desc(), output.desc())?;
        if input.dims().c != bound.dims.c {
            return Err(AccError::ShapeMismatch {
                expected: bound.dims,
                found: input.dims(),
            });
        }

        log::trace!("Scale forward on {} via {path:?}", input.dims());
        match path {
            ComputePath::Float => bound.run::<f32>(input, output),
            ComputePath::Bfp16FloatParams | ComputePath::Bfp16 => bound.run::<bf16>(input, output),
        }
    }
}
