//! Device selection.
//!
//! A [`Backend`] names the device a kernel runs on. The registry is keyed by it and
//! blobs carry it in their description.
//!
//! # Supported Backends
//!
//! - `Cpu`: portable kernels with 4-lane vector intrinsics (default).
//! - `Wgpu`: compute-shader kernels through `wgpu` (feature `wgpu`).
//! - `Cuda`: reserved; nothing registers kernels for it.
//!
//! The process-wide default device is stored in an `AtomicU8` (a plain `u8` on
//! targets without byte atomics). It is only the starting value of
//! [`crate::net::NetworkConfig::backend`]; kernels never consult it.

use core::convert::TryFrom;
use core::fmt;
#[cfg(target_has_atomic = "8")]
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of execution devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// CPU device (default).
    #[default]
    Cpu = 0,
    /// GPU device driven through `wgpu`.
    Wgpu,
    /// Reserved for a CUDA device.
    Cuda,
}

impl Backend {
    /// Every device identifier.
    pub const ALL: [Self; 3] = [Self::Cpu, Self::Wgpu, Self::Cuda];
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
            Self::Cuda => "cuda",
        })
    }
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            2 => Ok(Self::Cuda),
            _ => Err(()),
        }
    }
}

/// Process default device.
///
/// Relaxed enough for a value that changes once at startup.
#[cfg(target_has_atomic = "8")]
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Non-atomic default device for targets without byte atomics.
///
/// Such targets are assumed to run single-threaded.
#[cfg(not(target_has_atomic = "8"))]
static mut UNSYNC_DEFAULT_BACKEND: u8 = Backend::Cpu as u8;

/// Sets the process default device.
///
/// # Example
///
/// ```
/// use layer_acc::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Wgpu);
/// assert_eq!(get_backend(), Backend::Wgpu);
/// set_backend(Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    #[cfg(not(target_has_atomic = "8"))]
    unsafe {
        UNSYNC_DEFAULT_BACKEND = b as u8;
    }
    #[cfg(target_has_atomic = "8")]
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the process default device.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    #[cfg(not(target_has_atomic = "8"))]
    {
        Backend::try_from(unsafe { UNSYNC_DEFAULT_BACKEND }).unwrap_or_default()
    }
    #[cfg(target_has_atomic = "8")]
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_u8() {
        for b in Backend::ALL {
            assert_eq!(Backend::try_from(b as u8), Ok(b));
        }
        assert_eq!(Backend::try_from(7), Err(()));
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(Backend::Wgpu.to_string(), "wgpu");
    }
}
