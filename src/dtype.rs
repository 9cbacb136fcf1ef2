//! Element data types.
//!
//! Every blob and every resource buffer carries a [`DataType`] tag. Kernels never
//! assume the tag of one from the other: a bf16 blob may be paired with f32 slopes.

use core::fmt;

use bytemuck::Pod;
use half::{bf16, f16};

/// Declared element type of a blob or resource buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DataType {
    /// 32-bit IEEE float.
    #[default]
    Float = 0,
    /// 16-bit IEEE float.
    Half,
    /// bfloat16, the compact float used by the CPU device.
    Bfp16,
    /// 8-bit quantized integer.
    Int8,
    /// 32-bit integer.
    Int32,
}

impl DataType {
    /// All tags, in declaration order.
    pub const ALL: [Self; 5] = [Self::Float, Self::Half, Self::Bfp16, Self::Int8, Self::Int32];

    /// Size of one element in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Float | Self::Int32 => 4,
            Self::Half | Self::Bfp16 => 2,
            Self::Int8 => 1,
        }
    }

    /// Short lowercase name, also used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Half => "half",
            Self::Bfp16 => "bfp16",
            Self::Int8 => "int8",
            Self::Int32 => "int32",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for DataType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Float),
            1 => Ok(Self::Half),
            2 => Ok(Self::Bfp16),
            3 => Ok(Self::Int8),
            4 => Ok(Self::Int32),
            _ => Err(()),
        }
    }
}

/// A Rust type that can be viewed out of a tagged buffer.
pub trait Element: Pod + Default + Send + Sync {
    /// The tag this type corresponds to.
    const DATA_TYPE: DataType;
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::Float;
}

impl Element for f16 {
    const DATA_TYPE: DataType = DataType::Half;
}

impl Element for bf16 {
    const DATA_TYPE: DataType = DataType::Bfp16;
}

impl Element for i8 {
    const DATA_TYPE: DataType = DataType::Int8;
}

impl Element for i32 {
    const DATA_TYPE: DataType = DataType::Int32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_rust_types() {
        assert_eq!(DataType::Float.size(), size_of::<f32>());
        assert_eq!(DataType::Half.size(), size_of::<f16>());
        assert_eq!(DataType::Bfp16.size(), size_of::<bf16>());
        assert_eq!(DataType::Int8.size(), size_of::<i8>());
        assert_eq!(DataType::Int32.size(), size_of::<i32>());
    }

    #[test]
    fn tag_round_trips_through_u8() {
        for dt in DataType::ALL {
            assert_eq!(DataType::try_from(dt as u8), Ok(dt));
        }
        assert!(DataType::try_from(42).is_err());
    }
}
