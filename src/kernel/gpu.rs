//! wgpu compute execution of the kernels.
//!
//! One long-lived device/queue pair with a compiled pipeline per kernel; a
//! shader that fails to compile or link here reflects a broken build, so
//! construction fails with a fatal configuration error rather than deferring
//! to per-render handling. Semantics of record live in [`crate::kernel::cpu`];
//! this path must match them within quantization error.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::{
    error::{HalationError, HalationResult},
    image::Image,
    kernel::{KernelArgs, KernelId},
};

const VIGNETTE_CORNER_HALF_ANGLE: f32 = 0.55;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    width: u32,
    height: u32,
    lut_size: u32,
    _pad: u32,
    v0: [f32; 4],
    v1: [f32; 4],
}

pub struct GpuKernels {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: HashMap<KernelId, wgpu::ComputePipeline>,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl GpuKernels {
    pub fn new() -> HalationResult<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> HalationResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| HalationError::config(format!("no suitable gpu adapter: {e}")))?;

        let info = adapter.get_info();
        info!(adapter = %info.name, backend = ?info.backend, "gpu adapter selected for kernels");

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("halation_kernels"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(|e| HalationError::config(format!("failed to create gpu device: {e}")))?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("halation_kernel_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("halation_kernel_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mut pipelines = HashMap::new();
        for (id, source) in [
            (KernelId::Threshold, include_str!("shaders/threshold.wgsl")),
            (
                KernelId::ColorTable,
                include_str!("shaders/color_table.wgsl"),
            ),
            (KernelId::Burn, include_str!("shaders/burn.wgsl")),
            (KernelId::Vignette, include_str!("shaders/vignette.wgsl")),
            (KernelId::Dispersion, include_str!("shaders/dispersion.wgsl")),
        ] {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(id.name()),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(id.name()),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
            pipelines.insert(id, pipeline);
        }

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("halation_kernel_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            device,
            queue,
            pipelines,
            bind_group_layout,
            sampler,
        })
    }

    pub(crate) fn execute(&self, args: &KernelArgs, image: &Image) -> HalationResult<Image> {
        let (width, height) = (image.width(), image.height());
        let pipeline = self
            .pipelines
            .get(&args.id())
            .ok_or_else(|| HalationError::config("kernel pipeline missing"))?;

        let (params, lut_data) = encode_params(args, image);
        debug!(kernel = args.id().name(), width, height, "gpu kernel dispatch");

        let input_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("halation_kernel_input"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &input_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let buffer_size = u64::from(width) * u64::from(height) * 4;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("halation_kernel_output"),
            size: buffer_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("halation_kernel_staging"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("halation_kernel_params"),
            size: std::mem::size_of::<Params>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&uniform_buffer, 0, bytemuck::bytes_of(&params));

        let lut_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("halation_kernel_lut"),
            size: (lut_data.len() * std::mem::size_of::<[f32; 4]>()).max(16) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if !lut_data.is_empty() {
            self.queue
                .write_buffer(&lut_buffer, 0, bytemuck::cast_slice(&lut_data));
        }

        let input_view = input_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("halation_kernel_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: lut_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("halation_kernel_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("halation_kernel_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, Some(&bind_group), &[]);
            pass.dispatch_workgroups(width.div_ceil(16), height.div_ceil(16), 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, buffer_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = self.read_buffer(&staging_buffer)?;
        Image::from_premul_rgba8(image.extent(), data)
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer) -> HalationResult<Vec<u8>> {
        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| HalationError::render(format!("gpu poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| HalationError::render("gpu readback channel closed"))?
            .map_err(|e| HalationError::render(format!("gpu buffer map failed: {e}")))?;

        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}

fn encode_params(args: &KernelArgs, image: &Image) -> (Params, Vec<[f32; 4]>) {
    let rect = image.extent().rect();
    let mut params = Params {
        width: image.width(),
        height: image.height(),
        lut_size: 0,
        _pad: 0,
        v0: [0.0; 4],
        v1: [0.0; 4],
    };
    let mut lut_data = Vec::new();

    match args {
        KernelArgs::Threshold(a) => {
            params.v0[0] = a.cutoff;
        }
        KernelArgs::ColorTable(a) => {
            params.v0[0] = a.intensity.clamp(0.0, 1.0);
            params.lut_size = a.lut.size();
            let n = a.lut.size();
            lut_data.reserve((n * n * n) as usize);
            for b in 0..n {
                for g in 0..n {
                    for r in 0..n {
                        let max = (n - 1) as f32;
                        let rgb = a.lut.sample([r as f32 / max, g as f32 / max, b as f32 / max]);
                        lut_data.push([rgb[0], rgb[1], rgb[2], 1.0]);
                    }
                }
            }
        }
        KernelArgs::Burn(a) => {
            params.v0 = [a.inner.x, a.inner.y, a.inner.width, a.inner.height];
            params.v1[0] = a.feather_px.max(0.0);
        }
        KernelArgs::Vignette(a) => {
            params.v0[0] = a.intensity.clamp(0.0, 1.0);
            params.v0[1] = rect.half_diagonal().max(1.0) / VIGNETTE_CORNER_HALF_ANGLE.tan();
        }
        KernelArgs::Dispersion(a) => {
            params.v0 = [
                a.scale_px,
                a.base_px,
                a.exponent,
                rect.half_diagonal().max(1.0),
            ];
        }
    }

    (params, lut_data)
}
