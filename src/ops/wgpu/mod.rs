//! GPU device kernels using WGPU.
//!
//! This module owns the process-wide GPU context and the compute pipelines of the
//! `Wgpu` device. Everything is created lazily on first use and cached via
//! `lazy_static`; initialization failures are cached as errors too, so a machine
//! without an adapter reports [`AccError::Gpu`] on every call instead of panicking.
//!
//! Blobs stay in host memory. A kernel uploads its input, dispatches, and reads the
//! result back into the output blob within one `forward`.
//!
//! WGSL sources are checked with `briny`'s [`Validate`] before they reach the driver.

use briny::prelude::*;

use crate::backend::Backend;
use crate::error::{AccError, Result};
use crate::layer::LayerType;
use crate::registry::RegistryBuilder;

pub mod prelu;

pub use prelu::WgpuPReluLayerAcc;

/// Threads per workgroup in every shader of this module.
pub(crate) const WORKGROUP_SIZE: u32 = 64;

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    /// The GPU device.
    pub device: wgpu::Device,
    /// Submission queue of `device`.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and opens a device on it.
    ///
    /// # Errors
    ///
    /// [`AccError::Gpu`] if no adapter is available or the device request fails.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(|e| AccError::Gpu(format!("adapter: {e}")))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("layer_acc"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|e| AccError::Gpu(format!("device: {e}")))?;

        log::debug!("wgpu device ready on {:?}", adapter.get_info().backend);
        Ok(Self { device, queue })
    }
}

/// WGSL source awaiting validation.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 {
            return Err(ValidationError);
        }
        if !src.contains("fn main") {
            return Err(ValidationError);
        }
        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }
        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Validates `source` and compiles it into a shader module.
///
/// # Errors
///
/// [`AccError::Gpu`] if the source fails validation.
pub fn load_shader(device: &wgpu::Device, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
    WgslSource(source)
        .validate()
        .map_err(|_| AccError::Gpu(format!("shader `{label}` failed validation")))?;

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

/// Storage access of one binding slot.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Slot {
    Uniform,
    Read,
    ReadWrite,
}

/// A compiled compute pipeline and the layout of its single bind group.
pub(crate) struct ComputeKernel {
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) pipeline: wgpu::ComputePipeline,
}

impl ComputeKernel {
    /// Compiles `source` with bindings `0..slots.len()` in group 0.
    pub(crate) fn new(ctx: &GpuContext, label: &str, source: &str, slots: &[Slot]) -> Result<Self> {
        let device = &ctx.device;
        let module = load_shader(device, label, source)?;

        let entries: Vec<wgpu::BindGroupLayoutEntry> = slots
            .iter()
            .zip(0u32..)
            .map(|(slot, binding)| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match slot {
                        Slot::Uniform => wgpu::BufferBindingType::Uniform,
                        Slot::Read => wgpu::BufferBindingType::Storage { read_only: true },
                        Slot::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label}_bgl")),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label}_pipeline_layout")),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("{label}_pipeline")),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Ok(Self {
            bind_group_layout,
            pipeline,
        })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: Result<GpuContext> = GpuContext::new();
}

/// The process-wide GPU context.
///
/// # Errors
///
/// The [`AccError::Gpu`] produced when the context was first requested.
pub fn context() -> Result<&'static GpuContext> {
    GPU_CONTEXT.as_ref().map_err(Clone::clone)
}

/// Workgroup grid covering `count` threads, and the row stride the shader must use
/// to rebuild the flat index.
pub(crate) fn dispatch_grid(count: u32, max_per_dim: u32) -> (u32, u32, u32) {
    let groups = count.div_ceil(WORKGROUP_SIZE).max(1);
    if groups <= max_per_dim {
        return (groups, 1, groups * WORKGROUP_SIZE);
    }
    let x = max_per_dim;
    (x, groups.div_ceil(x), x * WORKGROUP_SIZE)
}

/// Registers every WGPU kernel.
///
/// # Errors
///
/// [`AccError::DuplicateKernel`] if any of them is already registered.
pub fn register_wgpu_kernels(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register(Backend::Wgpu, LayerType::PRelu, || Box::new(WgpuPReluLayerAcc::default()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_sources_are_screened() {
        assert!(WgslSource(prelu::PRELU_WGSL).validate().is_ok());
        assert!(WgslSource("fn helper() {}").validate().is_err());
        assert!(WgslSource("fn main() { unsafe {} }").validate().is_err());
    }

    #[test]
    fn large_dispatches_wrap_into_rows() {
        assert_eq!(dispatch_grid(100, 65535), (2, 1, 128));
        assert_eq!(dispatch_grid(0, 65535), (1, 1, 64));
        let (x, y, stride) = dispatch_grid(70_000 * 64, 65535);
        assert_eq!((x, y, stride), (65535, 2, 65535 * 64));
    }
}
