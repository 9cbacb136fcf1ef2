//! # Layer Accelerators
//!
//! A layer accelerator is the implementation of one operator type on one device. The
//! [`crate::registry`] creates them; the caller then drives two phases:
//!
//! 1. [`LayerAcc::init`] once, at network compile time, with the node's parameter,
//!    resource and the descriptions of its blobs. Configuration mistakes surface here.
//! 2. [`LayerAcc::forward`] any number of times, with the actual blobs. The output
//!    blobs are fully overwritten.
//!
//! ## Submodules
//!
//! - [`cpu`]: vectorized kernels over the packed layout (always available)
//! - [`wgpu`] *(opt-in)*: compute-shader kernels using `wgpu`
//!
//! ## Adding an operator
//!
//! 1. Add a [`LayerType`] variant (and param/resource variants if it has any)
//! 2. Implement [`LayerAcc`] in one or more device modules
//! 3. Register the creator in that module's `register_*_kernels`

use std::sync::Arc;

use crate::backend::Backend;
use crate::buffer::{Blob, BlobDesc};
use crate::error::{AccError, Result};
use crate::layer::{LayerParam, LayerResource, LayerType};

pub mod cpu;
#[cfg(feature = "wgpu")]
pub mod wgpu;

/// Kernel contract shared by every operator on every device.
///
/// `forward` takes `&self`: after `init` a kernel is read-only and may be run from
/// several threads on disjoint blobs.
pub trait LayerAcc: Send + Sync {
    /// Operator this kernel implements.
    fn layer_type(&self) -> LayerType;

    /// Device this kernel runs on.
    fn backend(&self) -> Backend;

    /// Binds parameter and resource and validates the blob descriptions.
    ///
    /// # Errors
    ///
    /// [`AccError::ParameterMissing`] / [`AccError::ResourceMissing`] when a required
    /// object is absent, [`AccError::TypeMismatch`] when it is the wrong variant,
    /// [`AccError::UnsupportedDataType`] when the declared types have no path.
    fn init(
        &mut self,
        param: Option<Arc<LayerParam>>,
        resource: Option<Arc<LayerResource>>,
        inputs: &[BlobDesc],
        outputs: &[BlobDesc],
    ) -> Result<()>;

    /// Computes `outputs` from `inputs`.
    ///
    /// # Errors
    ///
    /// [`AccError::ParameterMissing`] before a successful `init`; shape, type and
    /// count errors for blobs that do not fit the kernel.
    fn forward(&self, inputs: &[&Blob], outputs: &mut [Blob]) -> Result<()>;
}

fn check_count(layer: LayerType, kind: &'static str, actual: usize) -> Result<()> {
    if actual != 1 {
        return Err(AccError::BlobCount {
            layer,
            kind,
            expected: 1,
            actual,
        });
    }
    Ok(())
}

/// Input and output of an elementwise node must agree on dims and element type.
pub(crate) fn check_pair(input: &BlobDesc, output: &BlobDesc) -> Result<()> {
    if input.dims != output.dims {
        return Err(AccError::ShapeMismatch {
            expected: input.dims,
            found: output.dims,
        });
    }
    if input.data_type != output.data_type {
        return Err(AccError::TypeMismatch {
            expected: input.data_type.name(),
            found: output.data_type.name(),
        });
    }
    Ok(())
}

/// Splits the descriptions of a one-in, one-out elementwise node.
///
/// Only the counts are checked; callers classify the output type before
/// [`check_pair`] so a quantized output is reported as such.
pub(crate) fn unary_desc<'a>(
    layer: LayerType,
    inputs: &'a [BlobDesc],
    outputs: &'a [BlobDesc],
) -> Result<(&'a BlobDesc, &'a BlobDesc)> {
    check_count(layer, "input", inputs.len())?;
    check_count(layer, "output", outputs.len())?;
    Ok((&inputs[0], &outputs[0]))
}

/// Splits the blobs of a one-in, one-out elementwise node. See [`unary_desc`].
pub(crate) fn unary_io<'i, 'o>(
    layer: LayerType,
    inputs: &[&'i Blob],
    outputs: &'o mut [Blob],
) -> Result<(&'i Blob, &'o mut Blob)> {
    check_count(layer, "input", inputs.len())?;
    check_count(layer, "output", outputs.len())?;
    Ok((inputs[0], &mut outputs[0]))
}
