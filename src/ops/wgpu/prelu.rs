//! PReLU on the WGPU device.
//!
//! Only the all-`f32` path exists here; compact blobs are a CPU feature and are
//! rejected at `init` with the same fatal error the selector produces.

use std::sync::Arc;
use std::sync::mpsc;

use wgpu::util::DeviceExt;

use super::{ComputeKernel, GpuContext, Slot, context, dispatch_grid};
use crate::backend::Backend;
use crate::buffer::{Blob, BlobDesc};
use crate::error::{AccError, Result};
use crate::layer::{LayerParam, LayerResource, LayerType};
use crate::layout::Dims4;
use crate::ops::cpu::padded_constants;
use crate::ops::{LayerAcc, check_pair, unary_desc, unary_io};
use crate::precision::{ComputePath, select_compute_path};

pub(crate) const PRELU_WGSL: &str = include_str!("shaders/prelu.wgsl");

lazy_static::lazy_static! {
    static ref PRELU_KERNEL: Result<ComputeKernel> = context().and_then(|ctx| {
        ComputeKernel::new(
            ctx,
            "prelu",
            PRELU_WGSL,
            &[Slot::Uniform, Slot::Read, Slot::Read, Slot::ReadWrite],
        )
    });
}

fn gpu_u32(v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| AccError::Gpu(format!("{v} exceeds the 32-bit index range")))
}

#[derive(Debug)]
struct Bound {
    param: Arc<LayerParam>,
    resource: Arc<LayerResource>,
    dims: Dims4,
    slopes: Vec<f32>,
}

/// WGPU PReLU kernel.
#[derive(Debug, Default)]
pub struct WgpuPReluLayerAcc {
    bound: Option<Bound>,
}

impl WgpuPReluLayerAcc {
    async fn dispatch(
        ctx: &GpuContext,
        kernel: &ComputeKernel,
        params: [u32; 8],
        src: &[f32],
        slopes: &[f32],
        out: &mut [f32],
    ) -> Result<()> {
        let device = &ctx.device;
        let size = size_of_val(out) as u64;

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prelu_params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let src_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prelu_src"),
            contents: bytemuck::cast_slice(src),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let slope_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prelu_slope"),
            contents: bytemuck::cast_slice(slopes),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let dst_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prelu_dst"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prelu_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prelu_bind_group"),
            layout: &kernel.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: src_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: slope_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: dst_buffer.as_entire_binding(),
                },
            ],
        });

        let max_groups = device.limits().max_compute_workgroups_per_dimension;
        let (x, y, _) = dispatch_grid(params[0], max_groups);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("prelu_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("prelu_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        encoder.copy_buffer_to_buffer(&dst_buffer, 0, &staging, 0, size);
        ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| AccError::Gpu(format!("poll: {e}")))?;
        rx.recv()
            .map_err(|_| AccError::Gpu("map callback dropped".into()))?
            .map_err(|e| AccError::Gpu(format!("map: {e}")))?;

        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice::<u8, f32>(&mapped));
        }
        staging.unmap();
        Ok(())
    }
}

impl LayerAcc for WgpuPReluLayerAcc {
    fn layer_type(&self) -> LayerType {
        LayerType::PRelu
    }

    fn backend(&self) -> Backend {
        Backend::Wgpu
    }

    fn init(
        &mut self,
        param: Option<Arc<LayerParam>>,
        resource: Option<Arc<LayerResource>>,
        inputs: &[BlobDesc],
        outputs: &[BlobDesc],
    ) -> Result<()> {
        self.bound = None;
        let param = param.ok_or(AccError::ParameterMissing(LayerType::PRelu))?;
        let resource = resource.ok_or(AccError::ResourceMissing(LayerType::PRelu))?;
        let shared = param.as_prelu()?.channel_shared;
        let slope = &resource.as_prelu()?.slope;

        let (input, output) = unary_desc(LayerType::PRelu, inputs, outputs)?;
        let resource_type = Some(slope.data_type());
        if select_compute_path(LayerType::PRelu, output.data_type, resource_type)?
            != ComputePath::Float
        {
            return Err(AccError::UnsupportedDataType {
                layer: LayerType::PRelu,
                output: output.data_type,
                resource: resource_type,
            });
        }
        check_pair(input, output)?;

        let layout = input.layout();
        let slopes = padded_constants(
            "PReLU slope",
            slope,
            shared,
            layout.dims().c,
            layout.padded_channels(),
        )?;
        self.bound = Some(Bound {
            param,
            resource,
            dims: input.dims,
            slopes,
        });
        Ok(())
    }

    fn forward(&self, inputs: &[&Blob], outputs: &mut [Blob]) -> Result<()> {
        let bound = self
            .bound
            .as_ref()
            .ok_or(AccError::ParameterMissing(LayerType::PRelu))?;
        let shared = bound.param.as_prelu()?.channel_shared;
        let slope_type = Some(bound.resource.as_prelu()?.slope.data_type());

        let (input, output) = unary_io(LayerType::PRelu, inputs, outputs)?;
        let path = select_compute_path(LayerType::PRelu, output.data_type(), slope_type)?;
        if path != ComputePath::Float {
            return Err(AccError::UnsupportedDataType {
                layer: LayerType::PRelu,
                output: output.data_type(),
                resource: slope_type,
            });
        }
        check_pair(input.desc(), output.desc())?;
        if !shared && input.dims().c != bound.dims.c {
            return Err(AccError::ShapeMismatch {
                expected: bound.dims,
                found: input.dims(),
            });
        }

        let layout = input.desc().layout();
        let total = layout.total_elements();
        if total == 0 {
            return Ok(());
        }
        let ctx = context()?;
        let kernel = PRELU_KERNEL.as_ref().map_err(Clone::clone)?;
        let count = gpu_u32(total)?;
        let (_, _, row_stride) =
            dispatch_grid(count, ctx.device.limits().max_compute_workgroups_per_dimension);
        let params = [
            count,
            gpu_u32(layout.plane_size())?,
            gpu_u32(layout.padded_channels())?,
            u32::from(shared),
            row_stride,
            0,
            0,
            0,
        ];

        let src = &input.handle().as_slice::<f32>()?[..total];
        let dst = &mut output.handle_mut().as_mut_slice::<f32>()?[..total];

        log::trace!("PReLU forward on {} via wgpu", input.dims());
        pollster::block_on(Self::dispatch(ctx, kernel, params, src, &bound.slopes, dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RawBuffer;
    use crate::dtype::DataType;
    use crate::layer::{PReluLayerParam, PReluLayerResource};

    fn bind(shared: bool, slopes: &[f32], d: BlobDesc) -> Result<WgpuPReluLayerAcc> {
        let mut acc = WgpuPReluLayerAcc::default();
        acc.init(
            Some(Arc::new(LayerParam::PRelu(PReluLayerParam {
                channel_shared: shared,
            }))),
            Some(Arc::new(LayerResource::PRelu(PReluLayerResource {
                slope: RawBuffer::from_slice(slopes),
            }))),
            &[d],
            &[d],
        )?;
        Ok(acc)
    }

    #[test]
    fn compact_blobs_are_rejected_at_init() {
        let d = BlobDesc::new(Dims4::new(1, 3, 2, 2)).with_data_type(DataType::Bfp16);
        assert!(bind(true, &[0.1], d).unwrap_err().is_fatal());
    }

    #[test]
    fn per_channel_slopes_on_the_gpu() {
        if context().is_err() {
            eprintln!("no wgpu adapter, skipping");
            return;
        }
        let d = BlobDesc::new(Dims4::new(1, 3, 2, 2));
        let acc = bind(false, &[0.1, 0.2, 0.3], d).unwrap();
        let input = Blob::from_nchw(
            d,
            &[-1.0, 2.0, -3.0, 4.0, 5.0, -6.0, 7.0, -8.0, 9.0, -10.0, 11.0, -12.0],
        )
        .unwrap();
        let mut out = [Blob::new(d).unwrap()];
        acc.forward(&[&input], &mut out).unwrap();

        let got = out[0].to_nchw().unwrap();
        let expected = [-0.1, 2.0, -0.3, 4.0, 5.0, -1.2, 7.0, -1.6, 9.0, -3.0, 11.0, -3.6];
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-6, "{got:?}");
        }
    }
}
