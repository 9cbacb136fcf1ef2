//! ReLU on the CPU device.

use std::sync::Arc;

use half::bf16;

use super::vec4::{Float4, Lane};
use super::{map_flat, packed_views};
use crate::backend::Backend;
use crate::buffer::{Blob, BlobDesc};
use crate::error::{AccError, Result};
use crate::layer::{LayerParam, LayerResource, LayerType};
use crate::ops::{LayerAcc, check_pair, unary_desc, unary_io};
use crate::precision::{ComputePath, select_compute_path};

fn run<T: Lane>(input: &Blob, output: &mut Blob) -> Result<()> {
    let (src, dst) = packed_views::<T>(input, output)?;
    let zero = Float4::splat(0.0);
    map_flat(src, dst, |x| x.max(zero));
    Ok(())
}

/// CPU ReLU kernel. Takes no parameter or resource.
#[derive(Debug, Default)]
pub struct CpuReluLayerAcc {
    ready: bool,
}

impl LayerAcc for CpuReluLayerAcc {
    fn layer_type(&self) -> LayerType {
        LayerType::Relu
    }

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn init(
        &mut self,
        _param: Option<Arc<LayerParam>>,
        _resource: Option<Arc<LayerResource>>,
        inputs: &[BlobDesc],
        outputs: &[BlobDesc],
    ) -> Result<()> {
        self.ready = false;
        let (input, output) = unary_desc(LayerType::Relu, inputs, outputs)?;
        select_compute_path(LayerType::Relu, output.data_type, None)?;
        check_pair(input, output)?;
        self.ready = true;
        Ok(())
    }

    fn forward(&self, inputs: &[&Blob], outputs: &mut [Blob]) -> Result<()> {
        if !self.ready {
            return Err(AccError::ParameterMissing(LayerType::Relu));
        }
        let (input, output) = unary_io(LayerType::Relu, inputs, outputs)?;
        let path = select_compute_path(LayerType::Relu, output.data_type(), None)?;
        check_pair(input.desc(), output.desc())?;

        log::trace!("ReLU forward on {} via {path:?}", input.dims());
        match path {
            ComputePath::Float => run::<f32>(input, output),
            ComputePath::Bfp16FloatParams | ComputePath::Bfp16 => run::<bf16>(input, output),
        }
    }
}
