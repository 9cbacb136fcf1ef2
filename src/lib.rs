//! layer_acc: per-device layer accelerators for neural-network inference.
//!
//! This crate is the execution layer underneath an inference runtime. It does not
//! parse models or schedule graphs; it answers "which kernel runs this node on this
//! device" and then runs it fast.
//!
//! # Features
//!
//! - An explicit, immutable kernel registry keyed by `(device, operator)`.
//! - The channel-packed ("NC4HW4") tensor layout shared by all CPU kernels.
//! - Mixed-precision dispatch: f32 and bf16 blobs, with f32 or bf16 parameters.
//! - 4-lane vectorized elementwise kernels (PReLU, ReLU, Scale) with branchless select.
//! - An optional `wgpu` device.
//!
//! # Modules
//!
//! - [`layout`]: packed geometry and NCHW conversion.
//! - [`buffer`]: tagged buffers and blobs.
//! - [`layer`]: operator identifiers, parameters and resources.
//! - [`precision`]: compute-path selection and network precision policy.
//! - [`ops`]: the kernel contract and the per-device kernels.
//! - [`registry`]: kernel lookup.
//! - [`net`]: a minimal compile-and-run harness.
//!
//! # Example
//!
//! ```rust
//! use layer_acc::prelude::*;
//!
//! let dims = Dims4::new(1, 3, 2, 2);
//! let mut weights = NetResource::default();
//! weights.insert(
//!     "prelu1",
//!     LayerResource::PRelu(PReluLayerResource {
//!         slope: RawBuffer::from_slice(&[0.1f32]),
//!     }),
//! );
//! let structure = NetStructure {
//!     inputs: vec![("data".into(), dims)],
//!     layers: vec![
//!         LayerInfo::unary("prelu1", LayerType::PRelu, "data", "out")
//!             .with_param(LayerParam::PRelu(PReluLayerParam { channel_shared: true })),
//!     ],
//! };
//!
//! let registry = default_registry()?;
//! let mut net = Network::new(NetworkConfig::default(), registry, structure, &weights)?;
//! net.set_input("data", &[-1.0, 2.0, -3.0, 4.0, 5.0, -6.0, 7.0, -8.0, 9.0, -10.0, 11.0, -12.0])?;
//! net.forward()?;
//! assert_eq!(net.output_nchw("out")?[0], -0.1);
//! # Ok::<(), layer_acc::error::AccError>(())
//! ```

pub mod approx;
pub mod backend;
pub mod buffer;
pub mod dtype;
pub mod error;
pub mod layer;
pub mod layout;
pub mod net;
pub mod ops;
pub mod precision;
pub mod registry;

/// The types most callers need.
pub mod prelude {
    pub use crate::backend::{Backend, get_backend, set_backend};
    pub use crate::buffer::{Blob, BlobDesc, RawBuffer};
    pub use crate::dtype::DataType;
    pub use crate::error::{AccError, Result};
    pub use crate::layer::{
        LayerParam, LayerResource, LayerType, PReluLayerParam, PReluLayerResource,
        ScaleLayerParam, ScaleLayerResource,
    };
    pub use crate::layout::{Dims4, PackedLayout};
    pub use crate::net::{LayerInfo, NetResource, NetStructure, Network, NetworkConfig};
    pub use crate::ops::LayerAcc;
    pub use crate::precision::{ComputePath, Precision, select_compute_path};
    pub use crate::registry::{KernelRegistry, RegistryBuilder, default_registry};
}
