//! Operator identifiers, parameters and resources.
//!
//! A model node is described by a [`LayerType`], an optional [`LayerParam`]
//! (scalar configuration) and an optional [`LayerResource`] (weight buffers). Both are
//! tagged enums; a kernel asks for the variant it expects and gets
//! [`AccError::TypeMismatch`] instead of reinterpreting someone else's data.
//!
//! Parameters and resources are shared read-only with kernels through `Arc`.

use core::fmt;

use crate::buffer::RawBuffer;
use crate::error::{AccError, Result};

/// Operator-type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    /// Parametric leaky activation.
    PRelu,
    /// Rectified linear activation.
    Relu,
    /// Per-channel affine transform.
    Scale,
}

impl LayerType {
    /// Every operator type, in declaration order.
    pub const ALL: [Self; 3] = [Self::PRelu, Self::Relu, Self::Scale];

    /// Short name used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PRelu => "PReLU",
            Self::Relu => "ReLU",
            Self::Scale => "Scale",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// PReLU configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PReluLayerParam {
    /// One slope for all channels instead of one per channel.
    pub channel_shared: bool,
}

/// Scale configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaleLayerParam {
    /// One scale (and bias) for all channels.
    pub channel_shared: bool,
    /// Whether a bias buffer follows the scale.
    pub bias_term: bool,
}

/// Scalar configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerParam {
    /// See [`PReluLayerParam`].
    PRelu(PReluLayerParam),
    /// See [`ScaleLayerParam`].
    Scale(ScaleLayerParam),
}

impl LayerParam {
    fn variant(&self) -> &'static str {
        match self {
            Self::PRelu(_) => "PReLU param",
            Self::Scale(_) => "Scale param",
        }
    }

    /// The PReLU parameters.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] on any other variant.
    pub fn as_prelu(&self) -> Result<&PReluLayerParam> {
        match self {
            Self::PRelu(p) => Ok(p),
            other => Err(AccError::TypeMismatch {
                expected: "PReLU param",
                found: other.variant(),
            }),
        }
    }

    /// The Scale parameters.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] on any other variant.
    pub fn as_scale(&self) -> Result<&ScaleLayerParam> {
        match self {
            Self::Scale(p) => Ok(p),
            other => Err(AccError::TypeMismatch {
                expected: "Scale param",
                found: other.variant(),
            }),
        }
    }
}

/// PReLU weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PReluLayerResource {
    /// Negative-side slopes: one value when shared, otherwise at least one per channel.
    pub slope: RawBuffer,
}

/// Scale weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleLayerResource {
    /// Multipliers.
    pub scale: RawBuffer,
    /// Addends, present when the parameter asks for a bias term.
    pub bias: Option<RawBuffer>,
}

/// Weight buffers of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerResource {
    /// See [`PReluLayerResource`].
    PRelu(PReluLayerResource),
    /// See [`ScaleLayerResource`].
    Scale(ScaleLayerResource),
}

impl LayerResource {
    fn variant(&self) -> &'static str {
        match self {
            Self::PRelu(_) => "PReLU resource",
            Self::Scale(_) => "Scale resource",
        }
    }

    /// The PReLU weights.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] on any other variant.
    pub fn as_prelu(&self) -> Result<&PReluLayerResource> {
        match self {
            Self::PRelu(r) => Ok(r),
            other => Err(AccError::TypeMismatch {
                expected: "PReLU resource",
                found: other.variant(),
            }),
        }
    }

    /// The Scale weights.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] on any other variant.
    pub fn as_scale(&self) -> Result<&ScaleLayerResource> {
        match self {
            Self::Scale(r) => Ok(r),
            other => Err(AccError::TypeMismatch {
                expected: "Scale resource",
                found: other.variant(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_variant_is_a_type_mismatch() {
        let param = LayerParam::Scale(ScaleLayerParam::default());
        assert_eq!(
            param.as_prelu().unwrap_err(),
            AccError::TypeMismatch {
                expected: "PReLU param",
                found: "Scale param"
            }
        );
        assert!(param.as_scale().is_ok());

        let res = LayerResource::PRelu(PReluLayerResource {
            slope: RawBuffer::from_slice(&[0.1f32]),
        });
        assert!(matches!(
            res.as_scale(),
            Err(AccError::TypeMismatch { found: "PReLU resource", .. })
        ));
    }
}
