//! Tagged buffers and blobs.
//!
//! A [`RawBuffer`] is a byte region tagged with the [`DataType`] of its elements.
//! Typed access goes through [`RawBuffer::as_slice`] / [`RawBuffer::as_mut_slice`],
//! which refuse to reinterpret the bytes as anything but the tagged type.
//!
//! A [`Blob`] is a [`RawBuffer`] sized for the packed layout of a [`BlobDesc`]. Blobs
//! are owned by whoever allocated them; kernels only borrow them for one `forward`.

use briny::prelude::*;
use half::{bf16, f16};

use crate::backend::Backend;
use crate::dtype::{DataType, Element};
use crate::error::{AccError, Result};
use crate::layout::{Dims4, PackedLayout, pack_nchw, unpack_nchw};

/// Backing words are 8 bytes wide so every element type is aligned.
type Word = u64;

/// Borrowed bytes claiming to hold elements of one data type.
struct TaggedBytes<'a> {
    data_type: DataType,
    bytes: &'a [u8],
}

impl Validate for TaggedBytes<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.bytes.len() % self.data_type.size() != 0 {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// A contiguous, typed-by-tag element buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuffer {
    data_type: DataType,
    len: usize,
    words: Vec<Word>,
}

impl RawBuffer {
    /// Allocates `len` zeroed elements of `data_type`.
    ///
    /// # Errors
    ///
    /// [`AccError::InvalidResource`] if `len` elements do not fit in memory.
    pub fn zeros(data_type: DataType, len: usize) -> Result<Self> {
        let too_large = || {
            AccError::InvalidResource(format!("{len} {data_type} elements do not fit in memory"))
        };
        let bytes = len
            .checked_mul(data_type.size())
            .filter(|&b| isize::try_from(b).is_ok())
            .ok_or_else(too_large)?;
        let count = bytes.div_ceil(size_of::<Word>());
        let mut words = Vec::new();
        words.try_reserve_exact(count).map_err(|_| too_large())?;
        words.resize(count, 0);
        Ok(Self {
            data_type,
            len,
            words,
        })
    }

    /// Zeroed buffer the size of an existing slice, which cannot overflow.
    fn zeros_like(data_type: DataType, len: usize) -> Self {
        Self {
            data_type,
            len,
            words: vec![0; (len * data_type.size()).div_ceil(size_of::<Word>())],
        }
    }

    /// Copies typed elements into a new buffer tagged with `T`'s data type.
    #[must_use]
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let mut buf = Self::zeros_like(T::DATA_TYPE, values.len());
        buf.bytes_mut().copy_from_slice(bytemuck::cast_slice(values));
        buf
    }

    /// Copies raw little-endian bytes into a buffer tagged `data_type`.
    ///
    /// # Errors
    ///
    /// [`AccError::InvalidResource`] if `bytes` is not a whole number of elements.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        TaggedBytes { data_type, bytes }.validate().map_err(|_| {
            AccError::InvalidResource(format!(
                "{} bytes is not a whole number of {data_type} elements",
                bytes.len()
            ))
        })?;
        let mut buf = Self::zeros_like(data_type, bytes.len() / data_type.size());
        buf.bytes_mut().copy_from_slice(bytes);
        Ok(buf)
    }

    /// Element tag.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Element count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.len * self.data_type.size()
    }

    /// The raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<Word, u8>(&self.words)[..self.byte_len()]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.byte_len();
        &mut bytemuck::cast_slice_mut::<Word, u8>(&mut self.words)[..len]
    }

    fn check_tag<T: Element>(&self) -> Result<()> {
        if T::DATA_TYPE != self.data_type {
            return Err(AccError::TypeMismatch {
                expected: T::DATA_TYPE.name(),
                found: self.data_type.name(),
            });
        }
        Ok(())
    }

    /// Views the buffer as `&[T]`.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] if `T` is not the tagged element type.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_tag::<T>()?;
        Ok(bytemuck::cast_slice(self.bytes()))
    }

    /// Views the buffer as `&mut [T]`.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] if `T` is not the tagged element type.
    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_tag::<T>()?;
        Ok(bytemuck::cast_slice_mut(self.bytes_mut()))
    }

    /// Reads every element widened to `f32`.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] for integer buffers, which have no scale to
    /// dequantize with.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.data_type {
            DataType::Float => Ok(self.as_slice::<f32>()?.to_vec()),
            DataType::Half => Ok(self.as_slice::<f16>()?.iter().map(|v| v.to_f32()).collect()),
            DataType::Bfp16 => Ok(self.as_slice::<bf16>()?.iter().map(|v| v.to_f32()).collect()),
            other => Err(AccError::TypeMismatch {
                expected: "floating-point buffer",
                found: other.name(),
            }),
        }
    }
}

/// Static description of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobDesc {
    /// Logical extents.
    pub dims: Dims4,
    /// Element type of the blob's buffer.
    pub data_type: DataType,
    /// Device the blob lives on.
    pub backend: Backend,
}

impl BlobDesc {
    /// Describes an `f32` blob on the CPU.
    #[must_use]
    pub const fn new(dims: Dims4) -> Self {
        Self {
            dims,
            data_type: DataType::Float,
            backend: Backend::Cpu,
        }
    }

    /// Same description with a different element type.
    #[must_use]
    pub const fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Same description on a different device.
    #[must_use]
    pub const fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Packed geometry of the blob.
    #[must_use]
    pub const fn layout(&self) -> PackedLayout {
        PackedLayout::new(self.dims)
    }
}

/// A packed tensor: description plus backing buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    desc: BlobDesc,
    handle: RawBuffer,
}

impl Default for Blob {
    fn default() -> Self {
        let desc = BlobDesc::new(Dims4::default());
        Self {
            desc,
            handle: RawBuffer::zeros_like(desc.data_type, 0),
        }
    }
}

impl Blob {
    /// Allocates a zeroed blob sized for the packed layout of `desc`.
    ///
    /// # Errors
    ///
    /// [`AccError::InvalidResource`] if the packed size overflows or cannot be
    /// allocated.
    pub fn new(desc: BlobDesc) -> Result<Self> {
        let len = desc.layout().checked_total_elements().ok_or_else(|| {
            AccError::InvalidResource(format!("packed size of {} overflows", desc.dims))
        })?;
        let handle = RawBuffer::zeros(desc.data_type, len)?;
        Ok(Self { desc, handle })
    }

    /// Wraps an existing buffer.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] if the buffer tag differs from `desc.data_type`,
    /// [`AccError::BufferTooSmall`] if it cannot hold the packed layout.
    pub fn from_raw(desc: BlobDesc, handle: RawBuffer) -> Result<Self> {
        if handle.data_type() != desc.data_type {
            return Err(AccError::TypeMismatch {
                expected: desc.data_type.name(),
                found: handle.data_type().name(),
            });
        }
        let needed = desc.layout().total_elements();
        if handle.len() < needed {
            return Err(AccError::BufferTooSmall {
                needed,
                actual: handle.len(),
            });
        }
        Ok(Self { desc, handle })
    }

    /// Allocates a blob and fills it from an NCHW `f32` tensor, converting to the
    /// blob's element type.
    ///
    /// # Errors
    ///
    /// See [`Blob::write_nchw`].
    pub fn from_nchw(desc: BlobDesc, nchw: &[f32]) -> Result<Self> {
        let mut blob = Self::new(desc)?;
        blob.write_nchw(nchw)?;
        Ok(blob)
    }

    /// Blob description.
    #[must_use]
    pub const fn desc(&self) -> &BlobDesc {
        &self.desc
    }

    /// Logical dims.
    #[must_use]
    pub const fn dims(&self) -> Dims4 {
        self.desc.dims
    }

    /// Element type.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.desc.data_type
    }

    /// Backing buffer.
    #[must_use]
    pub const fn handle(&self) -> &RawBuffer {
        &self.handle
    }

    /// Mutable backing buffer.
    pub fn handle_mut(&mut self) -> &mut RawBuffer {
        &mut self.handle
    }

    /// Overwrites the blob from an NCHW `f32` tensor.
    ///
    /// # Errors
    ///
    /// [`AccError::BufferTooSmall`] for short input, [`AccError::TypeMismatch`] for
    /// integer blobs (no quantization scheme is defined here).
    pub fn write_nchw(&mut self, nchw: &[f32]) -> Result<()> {
        let dims = self.desc.dims;
        match self.desc.data_type {
            DataType::Float => pack_nchw(dims, nchw, self.handle.as_mut_slice::<f32>()?),
            DataType::Half => {
                let converted: Vec<f16> = nchw.iter().map(|&v| f16::from_f32(v)).collect();
                pack_nchw(dims, &converted, self.handle.as_mut_slice::<f16>()?)
            }
            DataType::Bfp16 => {
                let converted: Vec<bf16> = nchw.iter().map(|&v| bf16::from_f32(v)).collect();
                pack_nchw(dims, &converted, self.handle.as_mut_slice::<bf16>()?)
            }
            other @ (DataType::Int8 | DataType::Int32) => Err(AccError::TypeMismatch {
                expected: "floating-point blob",
                found: other.name(),
            }),
        }
    }

    /// Reads the blob back as an NCHW `f32` tensor.
    ///
    /// # Errors
    ///
    /// [`AccError::TypeMismatch`] for integer blobs.
    pub fn to_nchw(&self) -> Result<Vec<f32>> {
        let dims = self.desc.dims;
        let packed = self.handle.to_f32_vec()?;
        let mut nchw = vec![0.0; dims.count()];
        unpack_nchw(dims, &packed, &mut nchw)?;
        Ok(nchw)
    }
}
