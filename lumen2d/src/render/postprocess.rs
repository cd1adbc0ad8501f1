//! Post-processing of the lighting buffer: a separable Gaussian blur for
//! soft overall lighting, and a quarter-resolution "wall bleed" pass that
//! diffuses light color onto occluder silhouettes.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use wgpu::{
    AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, Buffer,
    BufferBindingType, BufferUsages, ColorTargetState, ColorWrites, CommandEncoder, FilterMode,
    FragmentState, LoadOp, MultisampleState, Operations, PipelineLayoutDescriptor, PrimitiveState,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    Sampler, SamplerDescriptor, ShaderModuleDescriptor, ShaderSource, TextureFormat, TextureView,
    VertexState,
};

use crate::render::occlusion::OcclusionGeometry;

/// Ping-pong iterations of the main lighting blur; the radius doubles each
/// round.
const BLUR_ITERATIONS: u32 = 3;
/// The wall bleed runs at quarter resolution, so fewer rounds suffice.
const BLEED_ITERATIONS: u32 = 2;
/// How strongly the blurred bleed color shows on walls.
const BLEED_STRENGTH: f32 = 0.75;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlurParams {
    dir: [f32; 2],
    _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BleedParams {
    view_proj: [[f32; 4]; 4],
    strength: f32,
    _pad: [f32; 3],
}

pub(crate) struct PostProcessor {
    blur_pipeline: RenderPipeline,
    copy_pipeline: RenderPipeline,
    blur_bind_group_layout: BindGroupLayout,
    blur_uniform_buffer: Buffer,
    uniform_alignment: u64,
    blur_blocks: u64,
    bleed_pipeline: RenderPipeline,
    bleed_bind_group_layout: BindGroupLayout,
    bleed_uniform_buffer: Buffer,
    sampler: Sampler,
}

impl PostProcessor {
    pub fn new(device: &wgpu::Device, light_format: TextureFormat) -> Self {
        let blur_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("blur-shader"),
            source: ShaderSource::Wgsl(include_str!("blur.wgsl").into()),
        });
        let bleed_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("wall-bleed-shader"),
            source: ShaderSource::Wgsl(include_str!("wall_bleed.wgsl").into()),
        });

        let blur_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("blur-bind-group-layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: std::num::NonZeroU64::new(
                            std::mem::size_of::<BlurParams>() as u64,
                        ),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let bleed_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("wall-bleed-bind-group-layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(
                            std::mem::size_of::<BleedParams>() as u64,
                        ),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let blur_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("blur-pipeline-layout"),
            bind_group_layouts: &[&blur_bind_group_layout],
            immediate_size: 0,
        });
        let bleed_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("wall-bleed-pipeline-layout"),
            bind_group_layouts: &[&bleed_bind_group_layout],
            immediate_size: 0,
        });

        let make_fullscreen_pipeline = |entry_point: &str, label: &str| {
            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&blur_pipeline_layout),
                vertex: VertexState {
                    module: &blur_shader,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(FragmentState {
                    module: &blur_shader,
                    entry_point: Some(entry_point),
                    targets: &[Some(ColorTargetState {
                        format: light_format,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: PrimitiveState::default(),
                depth_stencil: None,
                multisample: MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        };

        let blur_pipeline = make_fullscreen_pipeline("fs_blur", "blur-pipeline");
        let copy_pipeline = make_fullscreen_pipeline("fs_copy", "downsample-pipeline");

        // The bleed merge rasterizes the occluder outline mesh, so blurred
        // color lands only where a wall silhouette exists.
        let additive = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        };

        let bleed_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("wall-bleed-pipeline"),
            layout: Some(&bleed_pipeline_layout),
            vertex: VertexState {
                module: &bleed_shader,
                entry_point: Some("vs_main"),
                buffers: &[OcclusionGeometry::outline_vertex_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &bleed_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format: light_format,
                    blend: Some(additive),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        // One horizontal and one vertical block per iteration of either
        // blur, plus one zero-radius block for the downsample copy.
        let blur_blocks = u64::from(BLUR_ITERATIONS + BLEED_ITERATIONS) * 2 + 1;
        let blur_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blur-uniform-buffer"),
            size: blur_blocks * uniform_alignment,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bleed_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wall-bleed-uniform-buffer"),
            size: std::mem::size_of::<BleedParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("postprocess-sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        Self {
            blur_pipeline,
            copy_pipeline,
            blur_bind_group_layout,
            blur_uniform_buffer,
            uniform_alignment,
            blur_blocks,
            bleed_pipeline,
            bleed_bind_group_layout,
            bleed_uniform_buffer,
            sampler,
        }
    }

    fn blur_bind_group(&self, device: &wgpu::Device, source: &TextureView) -> BindGroup {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some("blur-bind-group"),
            layout: &self.blur_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.blur_uniform_buffer,
                        offset: 0,
                        size: std::num::NonZeroU64::new(std::mem::size_of::<BlurParams>() as u64),
                    }),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(source),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    fn fullscreen_pass(
        encoder: &mut CommandEncoder,
        target: &TextureView,
        pipeline: &RenderPipeline,
        bind_group: &BindGroup,
        offset: u32,
        label: &'static str,
    ) {
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            multiview_mask: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[offset]);
        pass.draw(0..3, 0..1);
    }

    /// Blurs the lighting buffer in place, ping-ponging through the two
    /// scratch targets. The radius grows each iteration and is scaled by
    /// viewport size and zoom so the visual width is resolution-invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn blur_lights(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut CommandEncoder,
        light_view: &TextureView,
        scratch: [&TextureView; 2],
        viewport_size: (u32, u32),
        factor: f32,
        zoom: f32,
    ) {
        let base_radius = blur_radius(factor, viewport_size, zoom);
        if base_radius <= 0.0 {
            return;
        }

        // Blocks 0.. are reserved for this blur; the bleed blur and the
        // downsample copy use the tail of the buffer.
        for i in 0..BLUR_ITERATIONS {
            let radius = base_radius * (1 << i) as f32;
            self.write_blur_block(queue, u64::from(i) * 2, [radius, 0.0]);
            self.write_blur_block(queue, u64::from(i) * 2 + 1, [0.0, radius]);
        }

        for i in 0..BLUR_ITERATIONS {
            let source = if i == 0 { light_view } else { scratch[1] };
            let horizontal = self.blur_bind_group(device, source);
            Self::fullscreen_pass(
                encoder,
                scratch[0],
                &self.blur_pipeline,
                &horizontal,
                (u64::from(i) * 2 * self.uniform_alignment) as u32,
                "blur-horizontal-pass",
            );

            let target = if i + 1 == BLUR_ITERATIONS {
                light_view
            } else {
                scratch[1]
            };
            let vertical = self.blur_bind_group(device, scratch[0]);
            Self::fullscreen_pass(
                encoder,
                target,
                &self.blur_pipeline,
                &vertical,
                ((u64::from(i) * 2 + 1) * self.uniform_alignment) as u32,
                "blur-vertical-pass",
            );
        }
    }

    /// Wall bleed: downsample the lighting buffer to quarter resolution,
    /// blur it, then composite it back through the occluder outline mesh.
    #[allow(clippy::too_many_arguments)]
    pub fn wall_bleed(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut CommandEncoder,
        light_view: &TextureView,
        bleed: [&TextureView; 2],
        occlusion: &OcclusionGeometry,
        bleed_size: (u32, u32),
        view_proj: Mat4,
        zoom: f32,
    ) {
        let Some((outline_vbo, outline_ibo)) = occlusion.outline_buffers() else {
            return;
        };
        if occlusion.outline_index_count() == 0 {
            return;
        }

        let copy_block = self.blur_blocks - 1;
        self.write_blur_block(queue, copy_block, [0.0, 0.0]);

        // Downsample into the first quarter-resolution target.
        let downsample = self.blur_bind_group(device, light_view);
        Self::fullscreen_pass(
            encoder,
            bleed[0],
            &self.copy_pipeline,
            &downsample,
            (copy_block * self.uniform_alignment) as u32,
            "bleed-downsample-pass",
        );

        let base_radius = blur_radius(1.0 / 256.0, bleed_size, zoom).max(1.0);
        let block_base = u64::from(BLUR_ITERATIONS) * 2;
        for i in 0..BLEED_ITERATIONS {
            let radius = base_radius * (1 << i) as f32;
            self.write_blur_block(queue, block_base + u64::from(i) * 2, [radius, 0.0]);
            self.write_blur_block(queue, block_base + u64::from(i) * 2 + 1, [0.0, radius]);
        }

        for i in 0..BLEED_ITERATIONS {
            let horizontal = self.blur_bind_group(device, bleed[0]);
            Self::fullscreen_pass(
                encoder,
                bleed[1],
                &self.blur_pipeline,
                &horizontal,
                ((block_base + u64::from(i) * 2) * self.uniform_alignment) as u32,
                "bleed-blur-horizontal-pass",
            );
            let vertical = self.blur_bind_group(device, bleed[1]);
            Self::fullscreen_pass(
                encoder,
                bleed[0],
                &self.blur_pipeline,
                &vertical,
                ((block_base + u64::from(i) * 2 + 1) * self.uniform_alignment) as u32,
                "bleed-blur-vertical-pass",
            );
        }

        let params = BleedParams {
            view_proj: view_proj.to_cols_array_2d(),
            strength: BLEED_STRENGTH,
            _pad: [0.0; 3],
        };
        queue.write_buffer(&self.bleed_uniform_buffer, 0, bytemuck::bytes_of(&params));

        let bleed_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("wall-bleed-bind-group"),
            layout: &self.bleed_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.bleed_uniform_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(bleed[0]),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("wall-bleed-merge-pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: light_view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            multiview_mask: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.bleed_pipeline);
        pass.set_bind_group(0, &bleed_bind_group, &[]);
        pass.set_vertex_buffer(0, outline_vbo.slice(..));
        pass.set_index_buffer(outline_ibo.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..occlusion.outline_index_count(), 0, 0..1);
    }

    fn write_blur_block(&self, queue: &wgpu::Queue, block: u64, dir: [f32; 2]) {
        let params = BlurParams {
            dir,
            _pad: [0.0; 2],
        };
        queue.write_buffer(
            &self.blur_uniform_buffer,
            block * self.uniform_alignment,
            bytemuck::bytes_of(&params),
        );
    }
}

/// Blur radius in texels for the given factor, target size, and zoom.
pub(crate) fn blur_radius(factor: f32, size: (u32, u32), zoom: f32) -> f32 {
    let reference = size.0.min(size.1) as f32;
    (factor * reference / zoom.max(0.01)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_radius_scales_with_size_and_zoom() {
        let base = blur_radius(0.01, (1000, 2000), 1.0);
        assert_eq!(base, 10.0);
        // Zooming in tightens the world-space radius.
        assert_eq!(blur_radius(0.01, (1000, 2000), 2.0), 5.0);
        // Larger targets get proportionally more texels.
        assert_eq!(blur_radius(0.01, (2000, 4000), 1.0), 20.0);
    }

    #[test]
    fn zero_factor_disables_blur() {
        assert_eq!(blur_radius(0.0, (1920, 1080), 1.0), 0.0);
    }
}
