//! Error type shared by every layer accelerator.
//!
//! Errors are plain values: `init` and `forward` return a [`Result`], the caller
//! propagates the first failure and drops whatever the run produced so far.
//!
//! [`AccError::UnsupportedDataType`] is special. It means a model and a kernel disagree
//! about numeric representation, which no retry can fix, so [`AccError::is_fatal`]
//! reports it and the network harness refuses to keep running.

use crate::backend::Backend;
use crate::dtype::DataType;
use crate::layer::LayerType;
use crate::layout::Dims4;

/// Result alias used across the crate.
pub type Result<T, E = AccError> = core::result::Result<T, E>;

/// Everything that can go wrong while resolving or running a layer accelerator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccError {
    /// The node carries no parameter object, or the kernel was run before `init`.
    #[error("{0} layer has no parameter")]
    ParameterMissing(LayerType),

    /// The node carries no resource object.
    #[error("{0} layer has no resource")]
    ResourceMissing(LayerType),

    /// The declared output/resource data types have no implemented path.
    #[error(
        "{layer} layer has no path for output {output} with resource {}",
        .resource.map_or_else(|| "none".to_string(), |d| d.to_string())
    )]
    UnsupportedDataType {
        /// Layer whose kernel rejected the combination.
        layer: LayerType,
        /// Declared output blob type.
        output: DataType,
        /// Declared resource type, if the layer has one.
        resource: Option<DataType>,
    },

    /// No kernel is registered for this (device, layer) pair.
    #[error("no {layer} kernel registered for device {backend}")]
    UnsupportedDevice {
        /// Requested device.
        backend: Backend,
        /// Requested layer.
        layer: LayerType,
    },

    /// A (device, layer) pair was registered twice.
    #[error("duplicate {layer} kernel registration for device {backend}")]
    DuplicateKernel {
        /// Device of the rejected entry.
        backend: Backend,
        /// Layer of the rejected entry.
        layer: LayerType,
    },

    /// A tagged value was read as the wrong variant or element type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// What the accessor asked for.
        expected: &'static str,
        /// What the value is tagged as.
        found: &'static str,
    },

    /// Two blobs that must share a shape do not.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Reference dims.
        expected: Dims4,
        /// Offending dims.
        found: Dims4,
    },

    /// A buffer holds fewer elements than the packed layout needs.
    #[error("buffer too small: need {needed} elements, have {actual}")]
    BufferTooSmall {
        /// Elements required.
        needed: usize,
        /// Elements present.
        actual: usize,
    },

    /// Resource contents do not fit the layer (e.g. slope count below channel count).
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// A kernel received the wrong number of input or output blobs.
    #[error("{layer} layer expects {expected} {kind} blob(s), got {actual}")]
    BlobCount {
        /// Layer being run.
        layer: LayerType,
        /// `"input"` or `"output"`.
        kind: &'static str,
        /// Expected count.
        expected: usize,
        /// Received count.
        actual: usize,
    },

    /// A network referenced a blob name that does not exist.
    #[error("unknown blob `{0}`")]
    UnknownBlob(String),

    /// GPU setup or execution failed.
    #[error("GPU failure: {0}")]
    Gpu(String),
}

impl AccError {
    /// Whether the error indicates a model/kernel mismatch that must stop inference.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::UnsupportedDataType { .. })
    }
}
