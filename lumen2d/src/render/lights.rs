//! Light compositing.
//!
//! Every surviving light draws one additively-blended quad into the
//! lighting buffer. The fragment stage attenuates by the light's shadow
//! depth row; a stencil pre-pass marks FOV-occluded pixels so no light
//! ever reaches what the viewer cannot see.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;
use wgpu::{
    AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, Buffer,
    BufferBindingType, BufferUsages, ColorTargetState, ColorWrites, CommandEncoder,
    CompareFunction, DepthBiasState, DepthStencilState, Extent3d, FilterMode, FragmentState,
    LoadOp, MultisampleState, Operations, Origin3d, PipelineLayoutDescriptor, PrimitiveState,
    RenderPassColorAttachment, RenderPassDepthStencilAttachment, RenderPassDescriptor,
    RenderPipeline, RenderPipelineDescriptor, Sampler, SamplerBindingType, SamplerDescriptor,
    ShaderModuleDescriptor, ShaderSource, StencilFaceState, StencilOperation, StencilState,
    TexelCopyBufferLayout, TexelCopyTextureInfo, Texture, TextureAspect, TextureDescriptor,
    TextureDimension, TextureFormat, TextureSampleType, TextureUsages, TextureView,
    TextureViewDescriptor, TextureViewDimension, VertexState, vertex_attr_array,
};

use crate::capabilities::GpuCapabilities;
use crate::math::Vec2;
use crate::render::culler::CulledLight;
use crate::render::MaskHandle;

/// Depth/stencil format of the lighting buffer's companion attachment.
pub(crate) const LIGHT_DEPTH_STENCIL_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
struct LightDrawUniforms {
    mvp: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
    center: [f32; 2],
    depth_row: f32,
    atlas_rows: f32,
}

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
struct LightStyleUniforms {
    color: [f32; 4],
    range: f32,
    power: f32,
    softness: f32,
    soft_enabled: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FovMaskUniforms {
    inv_view_proj: [[f32; 4]; 4],
    eye: [f32; 2],
    _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

const QUAD_VERTICES: [QuadVertex; 6] = [
    QuadVertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
    QuadVertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
    QuadVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
];

struct MaskEntry {
    _texture: Texture,
    view: TextureView,
}

/// Compositor state: pipelines, the light mask registry, and per-light
/// uniform storage.
pub(crate) struct LightCompositor {
    light_pipeline: RenderPipeline,
    light_bind_group_layout: BindGroupLayout,
    shadow_bind_group_layout: BindGroupLayout,
    fov_pipeline: RenderPipeline,
    fov_bind_group_layout: BindGroupLayout,
    draw_uniform_buffer: Buffer,
    style_uniform_buffer: Buffer,
    fov_uniform_buffer: Buffer,
    uniform_alignment: u64,
    capacity: usize,
    vertex_buffer: Buffer,
    mask_sampler: Sampler,
    atlas_sampler: Sampler,
    masks: HashMap<MaskHandle, MaskEntry>,
    next_mask_id: u32,
    white: MaskEntry,
    // Per-frame bind group cache, keyed by mask.
    bind_group_cache: HashMap<Option<MaskHandle>, BindGroup>,
}

impl LightCompositor {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        caps: &GpuCapabilities,
        max_lights: usize,
    ) -> Self {
        let light_format = caps.light_map_format();
        let atlas_filterable = caps.float32_filterable;

        let light_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("light-shader"),
            source: ShaderSource::Wgsl(include_str!("light.wgsl").into()),
        });
        let fov_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("fov-mask-shader"),
            source: ShaderSource::Wgsl(include_str!("fov_mask.wgsl").into()),
        });

        let light_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("light-bind-group-layout"),
                entries: &[
                    BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: BindingType::Buffer {
                            ty: BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: std::num::NonZeroU64::new(
                                std::mem::size_of::<LightDrawUniforms>() as u64,
                            ),
                        },
                        count: None,
                    },
                    BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: BindingType::Buffer {
                            ty: BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: std::num::NonZeroU64::new(
                                std::mem::size_of::<LightStyleUniforms>() as u64,
                            ),
                        },
                        count: None,
                    },
                    BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: BindingType::Texture {
                            sample_type: TextureSampleType::Float { filterable: true },
                            view_dimension: TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: BindingType::Sampler(SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let shadow_bind_group_layout = atlas_bind_group_layout(
            device,
            "shadow-atlas-bind-group-layout",
            atlas_filterable,
        );

        let fov_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("fov-mask-bind-group-layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(
                            std::mem::size_of::<FovMaskUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float {
                            filterable: atlas_filterable,
                        },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(if atlas_filterable {
                        SamplerBindingType::Filtering
                    } else {
                        SamplerBindingType::NonFiltering
                    }),
                    count: None,
                },
            ],
        });

        let light_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("light-pipeline-layout"),
            bind_group_layouts: &[&light_bind_group_layout, &shadow_bind_group_layout],
            immediate_size: 0,
        });
        let fov_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("fov-mask-pipeline-layout"),
            bind_group_layouts: &[&fov_bind_group_layout],
            immediate_size: 0,
        });

        // Lights accumulate; order does not matter.
        let additive = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        };

        let light_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("light-pipeline"),
            layout: Some(&light_pipeline_layout),
            vertex: VertexState {
                module: &light_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &light_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format: light_format,
                    blend: Some(additive),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: Some(DepthStencilState {
                format: LIGHT_DEPTH_STENCIL_FORMAT,
                depth_write_enabled: false,
                depth_compare: CompareFunction::Always,
                // Only pixels the FOV pre-pass left unmarked receive light.
                stencil: StencilState {
                    front: StencilFaceState {
                        compare: CompareFunction::Equal,
                        fail_op: StencilOperation::Keep,
                        depth_fail_op: StencilOperation::Keep,
                        pass_op: StencilOperation::Keep,
                    },
                    back: StencilFaceState {
                        compare: CompareFunction::Equal,
                        fail_op: StencilOperation::Keep,
                        depth_fail_op: StencilOperation::Keep,
                        pass_op: StencilOperation::Keep,
                    },
                    read_mask: 0xFF,
                    write_mask: 0,
                },
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let fov_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("fov-mask-pipeline"),
            layout: Some(&fov_pipeline_layout),
            vertex: VertexState {
                module: &fov_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &fov_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format: light_format,
                    blend: None,
                    write_mask: ColorWrites::empty(),
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: Some(DepthStencilState {
                format: LIGHT_DEPTH_STENCIL_FORMAT,
                depth_write_enabled: false,
                depth_compare: CompareFunction::Always,
                stencil: StencilState {
                    front: StencilFaceState {
                        compare: CompareFunction::Always,
                        fail_op: StencilOperation::Keep,
                        depth_fail_op: StencilOperation::Keep,
                        pass_op: StencilOperation::Replace,
                    },
                    back: StencilFaceState {
                        compare: CompareFunction::Always,
                        fail_op: StencilOperation::Keep,
                        depth_fail_op: StencilOperation::Keep,
                        pass_op: StencilOperation::Replace,
                    },
                    read_mask: 0xFF,
                    write_mask: 0xFF,
                },
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let capacity = max_lights.max(1);
        let draw_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("light-draw-uniform-buffer"),
            size: capacity as u64 * uniform_alignment,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let style_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("light-style-uniform-buffer"),
            size: capacity as u64 * uniform_alignment,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let fov_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fov-mask-uniform-buffer"),
            size: std::mem::size_of::<FovMaskUniforms>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("light-quad-vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: BufferUsages::VERTEX,
        });

        let mask_sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("light-mask-sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let atlas_filter = caps.atlas_filter();
        let atlas_sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("depth-atlas-sampler"),
            // The u axis is angular and wraps.
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: atlas_filter,
            min_filter: atlas_filter,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let white = create_mask_texture(device, queue, &[255, 255, 255, 255], 1, 1, "white-mask");

        Self {
            light_pipeline,
            light_bind_group_layout,
            shadow_bind_group_layout,
            fov_pipeline,
            fov_bind_group_layout,
            draw_uniform_buffer,
            style_uniform_buffer,
            fov_uniform_buffer,
            uniform_alignment,
            capacity,
            vertex_buffer,
            mask_sampler,
            atlas_sampler,
            masks: HashMap::new(),
            next_mask_id: 1,
            white,
            bind_group_cache: HashMap::new(),
        }
    }

    /// Registers a light mask from raw RGBA8 data.
    pub fn load_mask_from_rgba(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> MaskHandle {
        let handle = MaskHandle(self.next_mask_id);
        self.next_mask_id += 1;
        let entry = create_mask_texture(device, queue, data, width, height, "light-mask");
        self.masks.insert(handle, entry);
        handle
    }

    pub fn unload_mask(&mut self, handle: MaskHandle) {
        self.masks.remove(&handle);
    }

    /// Runs the FOV stencil pre-pass and then draws every light.
    /// Returns the number of lights drawn.
    #[allow(clippy::too_many_arguments)]
    pub fn composite(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut CommandEncoder,
        light_view: &TextureView,
        depth_stencil_view: &TextureView,
        shadow_view: &TextureView,
        fov_view: &TextureView,
        atlas_rows: u32,
        lights: &[CulledLight],
        view_proj: Mat4,
        eye_pos: Vec2,
        ambient: [f32; 3],
        soft_shadows: bool,
    ) -> usize {
        self.bind_group_cache.clear();

        let fov_uniforms = FovMaskUniforms {
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            eye: [eye_pos.x, eye_pos.y],
            _pad: [0.0; 2],
        };
        queue.write_buffer(&self.fov_uniform_buffer, 0, bytemuck::bytes_of(&fov_uniforms));

        let fov_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("fov-mask-bind-group"),
            layout: &self.fov_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.fov_uniform_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(fov_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&self.atlas_sampler),
                },
            ],
        });

        let shadow_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("shadow-atlas-bind-group"),
            layout: &self.shadow_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(shadow_view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.atlas_sampler),
                },
            ],
        });

        // Write uniforms up front; the style block is only rewritten when a
        // light's parameters differ from the previous one.
        let mut draws: Vec<(u64, u64, Option<MaskHandle>)> = Vec::with_capacity(lights.len());
        let mut last_style: Option<LightStyleUniforms> = None;
        let mut style_offset = 0u64;
        let mut style_blocks = 0u64;

        for (i, light) in lights.iter().take(self.capacity).enumerate() {
            let scale = Mat4::from_scale(Vec3::new(light.radius, light.radius, 1.0));
            // Rotation only matters when a mask shapes the light.
            let rotation = if light.mask.is_some() {
                Mat4::from_rotation_z(light.rotation)
            } else {
                Mat4::IDENTITY
            };
            let translation =
                Mat4::from_translation(Vec3::new(light.world_pos.x, light.world_pos.y, 0.0));
            let model = translation * rotation * scale;

            let draw_uniforms = LightDrawUniforms {
                mvp: (view_proj * model).to_cols_array_2d(),
                model: model.to_cols_array_2d(),
                center: [light.world_pos.x, light.world_pos.y],
                depth_row: light.depth_row.map_or(-1.0, |row| row as f32),
                atlas_rows: atlas_rows.max(1) as f32,
            };
            let draw_offset = i as u64 * self.uniform_alignment;
            queue.write_buffer(
                &self.draw_uniform_buffer,
                draw_offset,
                bytemuck::bytes_of(&draw_uniforms),
            );

            let style = LightStyleUniforms {
                color: [light.color[0], light.color[1], light.color[2], 1.0],
                range: light.radius,
                power: light.energy,
                softness: light.softness,
                soft_enabled: if soft_shadows { 1.0 } else { 0.0 },
            };
            if last_style != Some(style) {
                style_offset = style_blocks * self.uniform_alignment;
                queue.write_buffer(
                    &self.style_uniform_buffer,
                    style_offset,
                    bytemuck::bytes_of(&style),
                );
                style_blocks += 1;
                last_style = Some(style);
            }

            draws.push((draw_offset, style_offset, light.mask));
        }

        // Make sure every mask bind group exists before the pass borrows us.
        for (_, _, mask) in &draws {
            self.ensure_bind_group(device, *mask);
        }

        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("light-composite-pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: light_view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(wgpu::Color {
                        r: ambient[0] as f64,
                        g: ambient[1] as f64,
                        b: ambient[2] as f64,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: depth_stencil_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(Operations {
                    load: LoadOp::Clear(0),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            multiview_mask: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        // Stencil pre-pass: mark everything outside the viewer's FOV.
        pass.set_pipeline(&self.fov_pipeline);
        pass.set_bind_group(0, &fov_bind_group, &[]);
        pass.set_stencil_reference(1);
        pass.draw(0..3, 0..1);

        // Light pass, gated to unmarked pixels.
        pass.set_pipeline(&self.light_pipeline);
        pass.set_bind_group(1, &shadow_bind_group, &[]);
        pass.set_stencil_reference(0);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));

        let mut last_mask = None;
        let mut bound: Option<&BindGroup> = None;
        for &(draw_offset, style_offset, mask) in &draws {
            if bound.is_none() || last_mask != mask {
                bound = self.bind_group_cache.get(&mask);
                last_mask = mask;
            }
            let Some(bind_group) = bound else { continue };
            pass.set_bind_group(0, bind_group, &[draw_offset as u32, style_offset as u32]);
            pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
        }

        drop(pass);
        draws.len()
    }

    fn ensure_bind_group(&mut self, device: &wgpu::Device, mask: Option<MaskHandle>) {
        if self.bind_group_cache.contains_key(&mask) {
            return;
        }

        let view = mask
            .and_then(|handle| self.masks.get(&handle))
            .map(|entry| &entry.view)
            .unwrap_or(&self.white.view);

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("light-bind-group"),
            layout: &self.light_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.draw_uniform_buffer,
                        offset: 0,
                        size: std::num::NonZeroU64::new(
                            std::mem::size_of::<LightDrawUniforms>() as u64
                        ),
                    }),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.style_uniform_buffer,
                        offset: 0,
                        size: std::num::NonZeroU64::new(
                            std::mem::size_of::<LightStyleUniforms>() as u64
                        ),
                    }),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(view),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::Sampler(&self.mask_sampler),
                },
            ],
        });
        self.bind_group_cache.insert(mask, bind_group);
    }
}

fn atlas_bind_group_layout(
    device: &wgpu::Device,
    label: &str,
    filterable: bool,
) -> BindGroupLayout {
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: BindingType::Sampler(if filterable {
                    SamplerBindingType::Filtering
                } else {
                    SamplerBindingType::NonFiltering
                }),
                count: None,
            },
        ],
    })
}

fn create_mask_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    data: &[u8],
    width: u32,
    height: u32,
    label: &'static str,
) -> MaskEntry {
    let size = Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };

    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Rgba8UnormSrgb,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        data,
        TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );

    let view = texture.create_view(&TextureViewDescriptor::default());

    MaskEntry {
        _texture: texture,
        view,
    }
}
