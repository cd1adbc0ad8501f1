//! Shadow and FOV depth rendering.
//!
//! For every center point (a light, or the eye) the occlusion faces are
//! rasterized into one 1-pixel row of a depth atlas, encoding distance
//! rather than standard depth. Each row is drawn twice with a toggled
//! overlap uniform to close the seam where the radial parameterization
//! wraps.

use bytemuck::{Pod, Zeroable};
use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, Buffer, BufferBindingType, BufferUsages,
    ColorTargetState, ColorWrites, CommandEncoder, CompareFunction, DepthBiasState,
    DepthStencilState, Extent3d, FragmentState, LoadOp, MultisampleState, Operations,
    PipelineLayoutDescriptor, PrimitiveState, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderModuleDescriptor, ShaderSource, StencilState, Texture,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor, VertexState,
};

use crate::capabilities::GpuCapabilities;
use crate::math::Vec2;
use crate::render::culler::CulledLight;
use crate::render::occlusion::{IndexMode, OcclusionGeometry};

/// Width of one shadow depth row; one angular sample per texel.
pub(crate) const SHADOW_MAP_SIZE: u32 = 512;
/// The FOV atlas covers the whole screen, so it gets more angular samples.
pub(crate) const FOV_MAP_SIZE: u32 = 1024;
/// Clear value for the distance encoding; "no occluder in this direction".
pub(crate) const DISTANCE_SENTINEL: f64 = 1.0e6;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DepthParams {
    center: [f32; 2],
    overlap: f32,
    max_dist: f32,
}

struct Atlas {
    _texture: Texture,
    view: TextureView,
    _depth_texture: Texture,
    depth_view: TextureView,
    rows: u32,
}

/// Pipelines and atlases for the depth passes.
pub(crate) struct DepthRenderer {
    format: TextureFormat,
    pipeline_near: RenderPipeline,
    pipeline_far: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    uniform_buffer: Buffer,
    uniform_alignment: u64,
    bind_group: wgpu::BindGroup,
    shadow_atlas: Atlas,
    fov_atlas: Atlas,
    recreations: u32,
}

impl DepthRenderer {
    pub fn new(
        device: &wgpu::Device,
        caps: &GpuCapabilities,
        rows: u32,
        index_mode: IndexMode,
    ) -> Self {
        let format = caps.depth_atlas_format();

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("shadow-depth-shader"),
            source: ShaderSource::Wgsl(include_str!("shadow_depth.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("shadow-depth-bind-group-layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: std::num::NonZeroU64::new(
                        std::mem::size_of::<DepthParams>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("shadow-depth-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let make_pipeline = |cull_mode: wgpu::Face, label: &str| {
            let (topology, strip_index_format) = match index_mode {
                IndexMode::Strip => (
                    wgpu::PrimitiveTopology::TriangleStrip,
                    Some(wgpu::IndexFormat::Uint16),
                ),
                IndexMode::List => (wgpu::PrimitiveTopology::TriangleList, None),
            };

            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[OcclusionGeometry::face_vertex_layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(ColorTargetState {
                        format,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: PrimitiveState {
                    topology,
                    strip_index_format,
                    // Faces toward the center rasterize clockwise.
                    front_face: wgpu::FrontFace::Cw,
                    cull_mode: Some(cull_mode),
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(DepthStencilState {
                    format: TextureFormat::Depth32Float,
                    depth_write_enabled: true,
                    // Nearer occluders win.
                    depth_compare: CompareFunction::LessEqual,
                    stencil: StencilState::default(),
                    bias: DepthBiasState::default(),
                }),
                multisample: MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        };

        let pipeline_near = make_pipeline(wgpu::Face::Back, "shadow-depth-near-pipeline");
        let pipeline_far = make_pipeline(wgpu::Face::Front, "shadow-depth-far-pipeline");

        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let (uniform_buffer, bind_group) =
            create_uniforms(device, &bind_group_layout, rows, uniform_alignment);

        let shadow_atlas = create_atlas(device, format, SHADOW_MAP_SIZE, rows, "shadow-atlas");
        let fov_atlas = create_atlas(device, format, FOV_MAP_SIZE, 2, "fov-atlas");

        Self {
            format,
            pipeline_near,
            pipeline_far,
            bind_group_layout,
            uniform_buffer,
            uniform_alignment,
            bind_group,
            shadow_atlas,
            fov_atlas,
            recreations: 0,
        }
    }

    pub fn rows(&self) -> u32 {
        self.shadow_atlas.rows
    }

    pub fn recreation_count(&self) -> u32 {
        self.recreations
    }

    pub fn shadow_view(&self) -> &TextureView {
        &self.shadow_atlas.view
    }

    pub fn fov_view(&self) -> &TextureView {
        &self.fov_atlas.view
    }

    /// Recreates the shadow atlas for a new row capacity. The atlas is
    /// replaced, never resized in place.
    pub fn set_rows(&mut self, device: &wgpu::Device, rows: u32) {
        let rows = rows.max(1);
        if rows == self.shadow_atlas.rows {
            return;
        }

        log::debug!(
            "recreating shadow depth atlas: {} -> {} rows",
            self.shadow_atlas.rows,
            rows
        );

        self.shadow_atlas = create_atlas(device, self.format, SHADOW_MAP_SIZE, rows, "shadow-atlas");
        let (uniform_buffer, bind_group) =
            create_uniforms(device, &self.bind_group_layout, rows, self.uniform_alignment);
        self.uniform_buffer = uniform_buffer;
        self.bind_group = bind_group;
        self.recreations += 1;
    }

    /// Renders one depth row per shadow-casting light.
    pub fn render_shadows(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut CommandEncoder,
        occlusion: &OcclusionGeometry,
        lights: &[CulledLight],
    ) {
        let Some((vbo, ibo)) = occlusion.face_buffers() else {
            return;
        };

        // Two uniform blocks per row: primary draw and wrap-overlap draw.
        for light in lights {
            let Some(row) = light.depth_row else { continue };
            debug_assert!(row < self.shadow_atlas.rows, "depth row out of range");
            for overlap in 0..2u32 {
                let offset = (u64::from(row) * 2 + u64::from(overlap)) * self.uniform_alignment;
                let params = DepthParams {
                    center: [light.world_pos.x, light.world_pos.y],
                    overlap: overlap as f32,
                    max_dist: light.radius.max(0.01),
                };
                queue.write_buffer(&self.uniform_buffer, offset, bytemuck::bytes_of(&params));
            }
        }

        let mut pass = begin_atlas_pass(encoder, &self.shadow_atlas, "shadow-depth-pass");
        pass.set_pipeline(&self.pipeline_near);
        pass.set_vertex_buffer(0, vbo.slice(..));
        pass.set_index_buffer(ibo.slice(..), wgpu::IndexFormat::Uint16);

        let index_count = occlusion.face_index_count();
        for light in lights {
            let Some(row) = light.depth_row else { continue };
            pass.set_viewport(0.0, row as f32, SHADOW_MAP_SIZE as f32, 1.0, 0.0, 1.0);
            for overlap in 0..2u32 {
                let offset = (u64::from(row) * 2 + u64::from(overlap)) * self.uniform_alignment;
                pass.set_bind_group(0, &self.bind_group, &[offset as u32]);
                pass.draw_indexed(0..index_count, 0, 0..1);
            }
        }
    }

    /// Renders the eye's FOV rows: near-side distances into row 0, far-side
    /// distances into row 1.
    pub fn render_fov(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut CommandEncoder,
        occlusion: &OcclusionGeometry,
        eye_pos: Vec2,
        max_dist: f32,
    ) {
        let Some((vbo, ibo)) = occlusion.face_buffers() else {
            return;
        };

        // The FOV blocks live past the per-light region of the buffer.
        let base_block = u64::from(self.shadow_atlas.rows) * 2;
        for overlap in 0..2u32 {
            let offset = (base_block + u64::from(overlap)) * self.uniform_alignment;
            let params = DepthParams {
                center: [eye_pos.x, eye_pos.y],
                overlap: overlap as f32,
                max_dist: max_dist.max(0.01),
            };
            queue.write_buffer(&self.uniform_buffer, offset, bytemuck::bytes_of(&params));
        }

        let mut pass = begin_atlas_pass(encoder, &self.fov_atlas, "fov-depth-pass");
        pass.set_vertex_buffer(0, vbo.slice(..));
        pass.set_index_buffer(ibo.slice(..), wgpu::IndexFormat::Uint16);

        let index_count = occlusion.face_index_count();
        for (row, pipeline) in [(0u32, &self.pipeline_near), (1u32, &self.pipeline_far)] {
            pass.set_pipeline(pipeline);
            pass.set_viewport(0.0, row as f32, FOV_MAP_SIZE as f32, 1.0, 0.0, 1.0);
            for overlap in 0..2u32 {
                let offset = (base_block + u64::from(overlap)) * self.uniform_alignment;
                pass.set_bind_group(0, &self.bind_group, &[offset as u32]);
                pass.draw_indexed(0..index_count, 0, 0..1);
            }
        }
    }
}

fn create_atlas(
    device: &wgpu::Device,
    format: TextureFormat,
    width: u32,
    rows: u32,
    label: &str,
) -> Atlas {
    let size = Extent3d {
        width,
        height: rows.max(1),
        depth_or_array_layers: 1,
    };

    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&TextureViewDescriptor::default());

    let depth_texture = device.create_texture(&TextureDescriptor {
        label: Some("depth-atlas-zbuffer"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Depth32Float,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&TextureViewDescriptor::default());

    Atlas {
        _texture: texture,
        view,
        _depth_texture: depth_texture,
        depth_view,
        rows: rows.max(1),
    }
}

fn create_uniforms(
    device: &wgpu::Device,
    layout: &BindGroupLayout,
    rows: u32,
    alignment: u64,
) -> (Buffer, wgpu::BindGroup) {
    // Two blocks per shadow row plus two for the FOV passes.
    let blocks = u64::from(rows.max(1)) * 2 + 2;
    let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("shadow-depth-uniform-buffer"),
        size: blocks * alignment,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let bind_group = device.create_bind_group(&BindGroupDescriptor {
        label: Some("shadow-depth-bind-group"),
        layout,
        entries: &[BindGroupEntry {
            binding: 0,
            resource: BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &uniform_buffer,
                offset: 0,
                size: std::num::NonZeroU64::new(std::mem::size_of::<DepthParams>() as u64),
            }),
        }],
    });

    (uniform_buffer, bind_group)
}

fn begin_atlas_pass<'a>(
    encoder: &'a mut CommandEncoder,
    atlas: &'a Atlas,
    label: &'static str,
) -> wgpu::RenderPass<'a> {
    encoder.begin_render_pass(&RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: &atlas.view,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Clear(wgpu::Color {
                    r: DISTANCE_SENTINEL,
                    g: DISTANCE_SENTINEL,
                    b: DISTANCE_SENTINEL,
                    a: 1.0,
                }),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: &atlas.depth_view,
            depth_ops: Some(Operations {
                load: LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        multiview_mask: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    })
}
