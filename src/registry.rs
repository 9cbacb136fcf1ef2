//! Kernel registry.
//!
//! Kernels are looked up by `(device, operator)` pair. Population happens in one
//! explicit step: a [`RegistryBuilder`] collects creators, then [`RegistryBuilder::build`]
//! freezes them into an immutable [`KernelRegistry`]. Nothing can be registered after
//! that, so lookups never race with registration.
//!
//! A process-wide registry holding every kernel compiled into the crate is available
//! through [`default_registry`].

use std::collections::HashMap;

use crate::backend::Backend;
use crate::error::{AccError, Result};
use crate::layer::LayerType;
use crate::ops::LayerAcc;

/// Produces a fresh, uninitialized kernel.
pub type KernelCreator = fn() -> Box<dyn LayerAcc>;

/// Mutable registration phase.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    creators: HashMap<(Backend, LayerType), KernelCreator>,
}

impl RegistryBuilder {
    /// Starts an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a creator for `(backend, layer)`.
    ///
    /// # Errors
    ///
    /// [`AccError::DuplicateKernel`] if the pair already has a creator; the existing
    /// entry is kept.
    pub fn register(
        &mut self,
        backend: Backend,
        layer: LayerType,
        creator: KernelCreator,
    ) -> Result<&mut Self> {
        if self.creators.contains_key(&(backend, layer)) {
            return Err(AccError::DuplicateKernel { backend, layer });
        }
        log::debug!("registered {layer} kernel for {backend}");
        self.creators.insert((backend, layer), creator);
        Ok(self)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> KernelRegistry {
        KernelRegistry {
            creators: self.creators,
        }
    }
}

/// Immutable `(device, operator)` → kernel map.
#[derive(Debug)]
pub struct KernelRegistry {
    creators: HashMap<(Backend, LayerType), KernelCreator>,
}

impl KernelRegistry {
    /// A registry holding every kernel compiled into this crate.
    ///
    /// # Errors
    ///
    /// Propagates [`AccError::DuplicateKernel`], which would indicate two device
    /// modules claiming the same pair.
    pub fn with_default_kernels() -> Result<Self> {
        let mut builder = RegistryBuilder::new();
        crate::ops::cpu::register_cpu_kernels(&mut builder)?;
        #[cfg(feature = "wgpu")]
        crate::ops::wgpu::register_wgpu_kernels(&mut builder)?;
        Ok(builder.build())
    }

    /// Creates an uninitialized kernel for `layer` on `backend`.
    ///
    /// No other device is tried.
    ///
    /// # Errors
    ///
    /// [`AccError::UnsupportedDevice`] if nothing is registered for the pair.
    pub fn create(&self, backend: Backend, layer: LayerType) -> Result<Box<dyn LayerAcc>> {
        let creator = self
            .creators
            .get(&(backend, layer))
            .ok_or(AccError::UnsupportedDevice { backend, layer })?;
        log::trace!("creating {layer} kernel for {backend}");
        Ok(creator())
    }

    /// Whether a kernel is registered for the pair.
    #[must_use]
    pub fn supports(&self, backend: Backend, layer: LayerType) -> bool {
        self.creators.contains_key(&(backend, layer))
    }

    /// Operators available on `backend`, in [`LayerType::ALL`] order.
    #[must_use]
    pub fn layers_for(&self, backend: Backend) -> Vec<LayerType> {
        LayerType::ALL
            .into_iter()
            .filter(|&layer| self.supports(backend, layer))
            .collect()
    }

    /// Number of registered pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

lazy_static::lazy_static! {
    static ref DEFAULT_REGISTRY: Result<KernelRegistry> = KernelRegistry::with_default_kernels();
}

/// The process-wide registry, built on first use.
///
/// # Errors
///
/// The error [`KernelRegistry::with_default_kernels`] returned on first use.
pub fn default_registry() -> Result<&'static KernelRegistry> {
    DEFAULT_REGISTRY.as_ref().map_err(Clone::clone)
}
