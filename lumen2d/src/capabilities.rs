//! Device capability probing.
//!
//! Capabilities are detected once at device-init time and threaded through
//! every component that branches on them. Missing capabilities are never
//! errors; each dependent code path has a slower fallback.

use wgpu::TextureFormat;

/// Snapshot of the device features this subsystem branches on.
#[derive(Clone, Copy, Debug)]
pub struct GpuCapabilities {
    /// Float32 textures can be sampled with linear filtering. Without it
    /// the shadow depth rows are sampled nearest, hardening shadow edges.
    pub float32_filterable: bool,
    /// `Rg11b10Ufloat` is renderable, allowing an HDR lighting buffer at
    /// 32 bits per pixel. Falls back to `Rgba16Float`.
    pub rg11b10_renderable: bool,
    /// Occlusion indices use triangle strips with 0xFFFF restart. On the
    /// GL family restart handling is driver-dependent, so plain triangle
    /// pairs are used there instead.
    pub strip_indices: bool,
    /// Readbacks go through the non-blocking staging-buffer path. When
    /// disabled every readback stalls the frame; degraded but correct.
    pub async_readback: bool,
}

impl GpuCapabilities {
    /// Probes the adapter once. Call at device init and keep the result.
    pub fn detect(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Self {
        let features = device.features();
        let backend = adapter.get_info().backend;
        let gl_family = matches!(backend, wgpu::Backend::Gl);

        let caps = Self {
            float32_filterable: features.contains(wgpu::Features::FLOAT32_FILTERABLE),
            rg11b10_renderable: features.contains(wgpu::Features::RG11B10UFLOAT_RENDERABLE),
            strip_indices: !gl_family,
            async_readback: !gl_family,
        };

        log::info!(
            "lighting capabilities ({:?}): float32_filterable={} rg11b10_renderable={} \
             strip_indices={} async_readback={}",
            backend,
            caps.float32_filterable,
            caps.rg11b10_renderable,
            caps.strip_indices,
            caps.async_readback,
        );

        caps
    }

    /// Everything on; useful for tests and for hosts that already verified
    /// their device.
    pub fn all() -> Self {
        Self {
            float32_filterable: true,
            rg11b10_renderable: true,
            strip_indices: true,
            async_readback: true,
        }
    }

    /// Forces the synchronous readback path regardless of detection.
    #[must_use]
    pub fn with_async_readback(mut self, enabled: bool) -> Self {
        self.async_readback = enabled;
        self
    }

    /// Format of the lighting accumulation buffer.
    pub fn light_map_format(&self) -> TextureFormat {
        if self.rg11b10_renderable {
            TextureFormat::Rg11b10Ufloat
        } else {
            TextureFormat::Rgba16Float
        }
    }

    /// Format of the shadow/FOV depth atlases. Distance values need full
    /// float range; R32Float is universally renderable.
    pub fn depth_atlas_format(&self) -> TextureFormat {
        TextureFormat::R32Float
    }

    /// Filter mode for sampling the depth atlases.
    pub fn atlas_filter(&self) -> wgpu::FilterMode {
        if self.float32_filterable {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_map_format_falls_back_without_rg11b10() {
        let caps = GpuCapabilities {
            rg11b10_renderable: false,
            ..GpuCapabilities::all()
        };
        assert_eq!(caps.light_map_format(), TextureFormat::Rgba16Float);
        assert_eq!(
            GpuCapabilities::all().light_map_format(),
            TextureFormat::Rg11b10Ufloat
        );
    }

    #[test]
    fn atlas_filter_degrades_to_nearest() {
        let caps = GpuCapabilities {
            float32_filterable: false,
            ..GpuCapabilities::all()
        };
        assert_eq!(caps.atlas_filter(), wgpu::FilterMode::Nearest);
    }
}
