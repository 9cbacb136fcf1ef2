//! Numeric path selection.
//!
//! Blobs and resources carry independent data types. Before touching data a kernel
//! maps the pair (output blob type, resource type) to a [`ComputePath`]; pairs with no
//! implemented path are rejected with [`AccError::UnsupportedDataType`], which is
//! fatal. No quantized path is ever substituted.

use crate::backend::Backend;
use crate::dtype::DataType;
use crate::error::{AccError, Result};
use crate::layer::LayerType;

/// Arithmetic and storage combination a kernel runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputePath {
    /// f32 blobs, f32 parameters.
    Float,
    /// bf16 blobs, f32 parameters. Arithmetic in f32, results rounded to bf16.
    Bfp16FloatParams,
    /// bf16 blobs, bf16 parameters.
    Bfp16,
}

impl ComputePath {
    /// Element type the path stores blobs in.
    #[must_use]
    pub const fn blob_data_type(self) -> DataType {
        match self {
            Self::Float => DataType::Float,
            Self::Bfp16FloatParams | Self::Bfp16 => DataType::Bfp16,
        }
    }
}

/// Chooses the compute path for `layer` given the declared output blob type and the
/// resource type (`None` for layers without weights).
///
/// # Errors
///
/// [`AccError::UnsupportedDataType`] for every pair outside the table below.
///
/// | output | resource       | path                 |
/// |--------|----------------|----------------------|
/// | float  | float / none   | `Float`              |
/// | bfp16  | float          | `Bfp16FloatParams`   |
/// | bfp16  | bfp16 / none   | `Bfp16`              |
pub fn select_compute_path(
    layer: LayerType,
    output: DataType,
    resource: Option<DataType>,
) -> Result<ComputePath> {
    match (output, resource) {
        (DataType::Float, None | Some(DataType::Float)) => Ok(ComputePath::Float),
        (DataType::Bfp16, Some(DataType::Float)) => Ok(ComputePath::Bfp16FloatParams),
        (DataType::Bfp16, None | Some(DataType::Bfp16)) => Ok(ComputePath::Bfp16),
        _ => Err(AccError::UnsupportedDataType {
            layer,
            output,
            resource,
        }),
    }
}

/// Network-wide precision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    /// Let the device decide; currently the same as [`Precision::High`].
    #[default]
    Auto,
    /// Full f32 everywhere.
    High,
    /// Same as high on every device that has no mid-precision storage.
    Normal,
    /// Compact storage where the device supports it (bf16 on the CPU).
    Low,
}

impl Precision {
    /// Element type of blobs a network allocates on `backend` under this policy.
    #[must_use]
    pub const fn blob_data_type(self, backend: Backend) -> DataType {
        match (self, backend) {
            (Self::Low, Backend::Cpu) => DataType::Bfp16,
            _ => DataType::Float,
        }
    }
}
