//! The per-frame lighting entry point.
//!
//! `LightRenderer` owns every GPU resource of the subsystem and drives the
//! frame: occlusion geometry, FOV and shadow depth rows, light
//! compositing, post-processing, and the readback poll. All methods are
//! render-thread-only.

use anyhow::Result;
use glam::{Mat4, Vec3};
use thiserror::Error;
use wgpu::{CommandEncoderDescriptor, LoadOp, Operations, RenderPassColorAttachment, RenderPassDescriptor, TextureUsages};

use crate::capabilities::GpuCapabilities;
use crate::config::LightingConfig;
use crate::math::{Box2, PixelRegion, Vec2};
use crate::render::culler::LightCuller;
use crate::render::depth::DepthRenderer;
use crate::render::lights::{LightCompositor, LIGHT_DEPTH_STENCIL_FORMAT};
use crate::render::occlusion::{IndexMode, OcclusionGeometry};
use crate::render::postprocess::PostProcessor;
use crate::render::readback::{ReadbackQueue, ScreenshotCallback, TransferKind};
use crate::render::targets::{TargetDesc, TargetHandle, TargetPool};
use crate::render::MaskHandle;
use crate::scene::{Eye, SceneQuery, Viewport};

/// Hard failures of the lighting subsystem. Everything else degrades.
#[derive(Debug, Error)]
pub enum LightingError {
    #[error("render target was disposed or never created")]
    DisposedTarget,
    #[error("invalid capacity change: {0}")]
    InvalidCapacity(String),
}

/// Per-frame counters, reset at the start of every
/// [`LightRenderer::render_lights_and_fov`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub lights: u32,
    pub shadow_lights: u32,
    pub occluders: u32,
    pub faces: u32,
    pub lights_truncated: bool,
    pub occluders_truncated: bool,
}

pub struct LightRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: GpuCapabilities,
    config: LightingConfig,
    pool: TargetPool,
    occlusion: OcclusionGeometry,
    depth: DepthRenderer,
    culler: LightCuller,
    compositor: LightCompositor,
    post: PostProcessor,
    readback: ReadbackQueue,
    stats: FrameStats,
    enabled: bool,
    initialized: bool,
}

impl LightRenderer {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        caps: GpuCapabilities,
        config: LightingConfig,
    ) -> Result<Self> {
        let config = config.sanitized();
        let index_mode = if caps.strip_indices {
            IndexMode::Strip
        } else {
            IndexMode::List
        };

        let occlusion = OcclusionGeometry::new(config.max_occluders, index_mode);
        let depth = DepthRenderer::new(
            &device,
            &caps,
            config.max_shadowcasting_lights as u32,
            index_mode,
        );
        let culler = LightCuller::new(config.max_lights, config.max_shadowcasting_lights);
        let compositor = LightCompositor::new(&device, &queue, &caps, config.max_lights);
        let post = PostProcessor::new(&device, caps.light_map_format());

        log::info!(
            "lighting initialized: {} lights / {} shadow rows / {} occluders, {:?} lightmap",
            config.max_lights,
            config.max_shadowcasting_lights,
            config.max_occluders,
            caps.light_map_format(),
        );

        Ok(Self {
            device,
            queue,
            caps,
            config,
            pool: TargetPool::new(),
            occlusion,
            depth,
            culler,
            compositor,
            post,
            readback: ReadbackQueue::new(),
            stats: FrameStats::default(),
            enabled: true,
            initialized: true,
        })
    }

    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    /// Applies a new configuration. Capacity-dependent resources are
    /// recreated as needed; viewport targets follow on their next frame via
    /// the resolution-scale check.
    pub fn set_config(&mut self, config: LightingConfig) {
        let config = config.sanitized();

        if config.max_occluders != self.config.max_occluders {
            let index_mode = self.occlusion.index_mode();
            self.occlusion = OcclusionGeometry::new(config.max_occluders, index_mode);
        }
        if config.max_shadowcasting_lights != self.config.max_shadowcasting_lights
            && self.initialized
        {
            self.depth
                .set_rows(&self.device, config.max_shadowcasting_lights as u32);
        }
        self.culler
            .set_limits(config.max_lights, config.max_shadowcasting_lights);

        self.config = config;
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.caps
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Disabling lighting keeps clearing the buffer to full-bright so the
    /// host compositor can keep sampling it unconditionally.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn target_pool_mut(&mut self) -> &mut TargetPool {
        &mut self.pool
    }

    /// Registers a light mask texture from raw RGBA8 data.
    pub fn load_mask_from_rgba(&mut self, data: &[u8], width: u32, height: u32) -> MaskHandle {
        self.compositor
            .load_mask_from_rgba(&self.device, &self.queue, data, width, height)
    }

    pub fn unload_mask(&mut self, handle: MaskHandle) {
        self.compositor.unload_mask(handle);
    }

    /// Changes the shadow depth row capacity at runtime. The depth atlas is
    /// recreated exactly once per effective change; requests above
    /// `max_lights` are clamped.
    pub fn set_max_shadowcasting_lights(&mut self, count: usize) -> Result<()> {
        if count > self.config.max_lights {
            return Err(LightingError::InvalidCapacity(format!(
                "{count} exceeds max lights {}",
                self.config.max_lights
            ))
            .into());
        }

        self.config.max_shadowcasting_lights = count;
        self.culler
            .set_limits(self.config.max_lights, self.config.max_shadowcasting_lights);
        if self.initialized {
            self.depth.set_rows(&self.device, count as u32);
        }
        Ok(())
    }

    /// Number of depth-atlas recreations since startup.
    pub fn depth_atlas_recreations(&self) -> u32 {
        self.depth.recreation_count()
    }

    /// Number of readbacks still in flight.
    pub fn pending_transfers(&self) -> usize {
        self.readback.in_flight()
    }

    /// Per-frame upkeep: finishes completed readbacks and reclaims disposed
    /// render targets. Call once per frame, before rendering.
    pub fn process_transfers(&mut self) {
        self.readback.poll(&self.device);
        self.pool.reclaim();
    }

    /// Full lighting pass for one viewport. All output lands in the
    /// viewport's light render target, which the host's compositing pass
    /// consumes afterwards.
    pub fn render_lights_and_fov(
        &mut self,
        viewport: &mut Viewport,
        eye: &Eye,
        scene: &dyn SceneQuery,
    ) -> Result<()> {
        self.stats = FrameStats::default();
        self.ensure_viewport_targets(viewport);

        let light_handle = viewport.light_target.ok_or(LightingError::DisposedTarget)?;
        let ds_handle = viewport
            .light_depth_stencil
            .ok_or(LightingError::DisposedTarget)?;

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("lighting-encoder"),
            });

        if !self.enabled {
            let light_entry = self
                .pool
                .get(light_handle)
                .ok_or(LightingError::DisposedTarget)?;
            clear_target(&mut encoder, &light_entry.view, wgpu::Color::WHITE);
            self.queue.submit(Some(encoder.finish()));
            return Ok(());
        }

        let view_bounds = view_bounds(eye, viewport.size, self.config.pixels_per_unit);
        let view_proj = view_projection(eye, viewport.size, self.config.pixels_per_unit);

        // Collect and prioritize lights, then rebuild occlusion geometry
        // against bounds expanded over the surviving lights: occluders
        // outside the view can still shadow a visible light.
        self.culler
            .collect(scene, eye.map, view_bounds, eye.position);
        self.culler.prioritize();
        let expanded_bounds = self.culler.expand_bounds(view_bounds);

        self.occlusion
            .rebuild(scene, eye.map, expanded_bounds, eye.position);
        self.occlusion.upload(&self.device, &self.queue);

        self.stats.lights = self.culler.lights().len() as u32;
        self.stats.shadow_lights = self.culler.shadow_caster_count() as u32;
        self.stats.occluders = self.occlusion.occluder_count as u32;
        self.stats.faces = self.occlusion.face_count as u32;
        self.stats.lights_truncated = self.culler.truncated;
        self.stats.occluders_truncated = self.occlusion.truncated;

        let max_fov_dist = viewport.size.0.max(viewport.size.1) as f32
            / (self.config.pixels_per_unit * eye.zoom.max(0.01));
        self.depth
            .render_fov(&self.queue, &mut encoder, &self.occlusion, eye.position, max_fov_dist);
        self.depth
            .render_shadows(&self.queue, &mut encoder, &self.occlusion, self.culler.lights());

        let light_entry = self
            .pool
            .get(light_handle)
            .ok_or(LightingError::DisposedTarget)?;
        let ds_entry = self.pool.get(ds_handle).ok_or(LightingError::DisposedTarget)?;

        self.compositor.composite(
            &self.device,
            &self.queue,
            &mut encoder,
            &light_entry.view,
            &ds_entry.view,
            self.depth.shadow_view(),
            self.depth.fov_view(),
            self.depth.rows(),
            self.culler.lights(),
            view_proj,
            eye.position,
            self.config.ambient_color,
            self.config.soft_shadows,
        );

        if self.config.blur_enabled && self.config.blur_factor > 0.0 {
            let blur_handles = viewport.blur_targets.ok_or(LightingError::DisposedTarget)?;
            let blur_a = self
                .pool
                .get(blur_handles[0])
                .ok_or(LightingError::DisposedTarget)?;
            let blur_b = self
                .pool
                .get(blur_handles[1])
                .ok_or(LightingError::DisposedTarget)?;
            self.post.blur_lights(
                &self.device,
                &self.queue,
                &mut encoder,
                &light_entry.view,
                [&blur_a.view, &blur_b.view],
                light_entry.size,
                self.config.blur_factor,
                eye.zoom,
            );
        }

        if self.config.soft_shadows {
            let bleed_handles = viewport.bleed_targets.ok_or(LightingError::DisposedTarget)?;
            let bleed_a = self
                .pool
                .get(bleed_handles[0])
                .ok_or(LightingError::DisposedTarget)?;
            let bleed_b = self
                .pool
                .get(bleed_handles[1])
                .ok_or(LightingError::DisposedTarget)?;
            self.post.wall_bleed(
                &self.device,
                &self.queue,
                &mut encoder,
                &light_entry.view,
                [&bleed_a.view, &bleed_b.view],
                &self.occlusion,
                bleed_a.size,
                view_proj,
                eye.zoom,
            );
        }

        self.queue.submit(Some(encoder.finish()));

        if eye.measure_brightness {
            self.sample_brightness(viewport, eye);
        }

        Ok(())
    }

    /// Enqueues a pixel-region capture of a render target. The callback
    /// fires exactly once, possibly several frames later on the async path
    /// or within this frame on the synchronous fallback.
    pub fn request_screenshot(
        &mut self,
        target: TargetHandle,
        region: Option<PixelRegion>,
        callback: ScreenshotCallback,
    ) -> Result<()> {
        let entry = self.pool.get(target).ok_or(LightingError::DisposedTarget)?;
        self.readback.request(
            &self.device,
            &self.queue,
            &entry.texture,
            entry.size,
            entry.format,
            region,
            TransferKind::Screenshot(callback),
            self.caps.async_readback,
        )
    }

    /// Samples the lighting buffer around the eye and asynchronously (or
    /// synchronously, capability-depending) updates `eye.last_brightness`.
    pub fn sample_brightness(&mut self, viewport: &Viewport, eye: &Eye) {
        let Some(handle) = viewport.light_target else {
            return;
        };
        let Some(entry) = self.pool.get(handle) else {
            return;
        };

        let region = PixelRegion::new(entry.size.0 / 2, entry.size.1 / 2, 1, 1);
        let result = self.readback.request(
            &self.device,
            &self.queue,
            &entry.texture,
            entry.size,
            entry.format,
            Some(region),
            TransferKind::Brightness(eye.brightness_sink()),
            self.caps.async_readback,
        );
        if let Err(err) = result {
            log::warn!("brightness sample failed: {err}");
        }
    }

    /// (Re)creates the viewport's render targets when its size or the
    /// configured resolution scale changed.
    fn ensure_viewport_targets(&mut self, viewport: &mut Viewport) {
        let scale = self.config.resolution_scale;
        let key = (viewport.size, scale);
        if viewport.allocated_for == Some(key) {
            return;
        }

        for handle in viewport
            .light_target
            .into_iter()
            .chain(viewport.light_depth_stencil)
            .chain(viewport.blur_targets.into_iter().flatten())
            .chain(viewport.bleed_targets.into_iter().flatten())
        {
            self.pool.dispose(handle);
        }

        let scaled = scaled_size(viewport.size, scale);
        let quarter = (scaled.0.div_ceil(4).max(1), scaled.1.div_ceil(4).max(1));
        let format = self.caps.light_map_format();

        viewport.light_target = Some(self.pool.create(
            &self.device,
            &TargetDesc {
                label: "light-map",
                size: scaled,
                format,
                usage: TextureUsages::RENDER_ATTACHMENT
                    | TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_SRC,
            },
        ));
        viewport.light_depth_stencil = Some(self.pool.create(
            &self.device,
            &TargetDesc {
                label: "light-map-depth-stencil",
                size: scaled,
                format: LIGHT_DEPTH_STENCIL_FORMAT,
                usage: TextureUsages::RENDER_ATTACHMENT,
            },
        ));
        viewport.blur_targets = Some([
            self.pool.create(
                &self.device,
                &TargetDesc {
                    label: "light-blur-scratch-a",
                    size: scaled,
                    format,
                    usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                },
            ),
            self.pool.create(
                &self.device,
                &TargetDesc {
                    label: "light-blur-scratch-b",
                    size: scaled,
                    format,
                    usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                },
            ),
        ]);
        viewport.bleed_targets = Some([
            self.pool.create(
                &self.device,
                &TargetDesc {
                    label: "wall-bleed-a",
                    size: quarter,
                    format,
                    usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                },
            ),
            self.pool.create(
                &self.device,
                &TargetDesc {
                    label: "wall-bleed-b",
                    size: quarter,
                    format,
                    usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                },
            ),
        ]);

        viewport.allocated_for = Some(key);
    }
}

fn clear_target(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, color: wgpu::Color) {
    let _pass = encoder.begin_render_pass(&RenderPassDescriptor {
        label: Some("light-clear-pass"),
        color_attachments: &[Some(RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Clear(color),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        multiview_mask: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
}

/// Lighting-buffer size for a viewport under the configured scale.
pub(crate) fn scaled_size(size: (u32, u32), scale: f32) -> (u32, u32) {
    (
        ((size.0 as f32 * scale).ceil() as u32).max(1),
        ((size.1 as f32 * scale).ceil() as u32).max(1),
    )
}

/// World-space view/projection matrix for the eye.
pub(crate) fn view_projection(eye: &Eye, size: (u32, u32), pixels_per_unit: f32) -> Mat4 {
    let half_w = size.0 as f32 / (pixels_per_unit * eye.zoom.max(0.01)) * 0.5;
    let half_h = size.1 as f32 / (pixels_per_unit * eye.zoom.max(0.01)) * 0.5;
    let proj = Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, -1.0, 1.0);
    let view = Mat4::from_rotation_z(-eye.rotation)
        * Mat4::from_translation(Vec3::new(-eye.position.x, -eye.position.y, 0.0));
    proj * view
}

/// Conservative world-space AABB of the (possibly rotated) view.
pub(crate) fn view_bounds(eye: &Eye, size: (u32, u32), pixels_per_unit: f32) -> Box2 {
    let half = Vec2::new(size.0 as f32, size.1 as f32)
        / (pixels_per_unit * eye.zoom.max(0.01))
        * 0.5;
    let (sin, cos) = eye.rotation.sin_cos();
    let extent = Vec2::new(
        cos.abs() * half.x + sin.abs() * half.y,
        sin.abs() * half.x + cos.abs() * half.y,
    );
    Box2::centered(eye.position, extent * 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MapId;

    #[test]
    fn scaled_size_rounds_up_and_clamps() {
        assert_eq!(scaled_size((1920, 1080), 0.5), (960, 540));
        assert_eq!(scaled_size((3, 3), 0.05), (1, 1));
        assert_eq!(scaled_size((1921, 1081), 0.5), (961, 541));
    }

    #[test]
    fn view_bounds_centered_on_eye() {
        let eye = Eye::new(MapId(0), Vec2::new(10.0, -4.0));
        let bounds = view_bounds(&eye, (640, 320), 32.0);
        assert_eq!(bounds.center(), Vec2::new(10.0, -4.0));
        assert_eq!(bounds.size(), Vec2::new(20.0, 10.0));
    }

    #[test]
    fn rotated_view_bounds_swap_extents() {
        let mut eye = Eye::new(MapId(0), Vec2::ZERO);
        eye.rotation = std::f32::consts::FRAC_PI_2;
        let bounds = view_bounds(&eye, (640, 320), 32.0);
        let size = bounds.size();
        assert!((size.x - 10.0).abs() < 1e-3);
        assert!((size.y - 20.0).abs() < 1e-3);
    }

    #[test]
    fn zoom_shrinks_view_bounds() {
        let mut eye = Eye::new(MapId(0), Vec2::ZERO);
        eye.zoom = 2.0;
        let bounds = view_bounds(&eye, (640, 320), 32.0);
        assert_eq!(bounds.size(), Vec2::new(10.0, 5.0));
    }
}
