//! Runtime configuration for the lighting subsystem.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Hard floor for the occluder capacity; smaller values would make even
/// modest maps degrade visibly.
pub const MIN_OCCLUDERS: usize = 1024;

/// Smallest permitted lighting-buffer resolution scale.
pub const MIN_RESOLUTION_SCALE: f32 = 0.05;

/// Configuration values consumed by [`crate::LightRenderer`].
///
/// Values are sanitized on use; out-of-range settings are clamped rather
/// than rejected, so a bad config file degrades quality instead of failing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Scale applied to the viewport size when allocating the lighting
    /// buffer. 1.0 = full resolution, 0.5 = half, etc.
    pub resolution_scale: f32,
    /// Maximum number of lights rendered per frame.
    pub max_lights: usize,
    /// Maximum number of occluders contributing geometry per frame.
    pub max_occluders: usize,
    /// Maximum number of lights that get a shadow depth row. Must not
    /// exceed `max_lights`.
    pub max_shadowcasting_lights: usize,
    /// Whether light softness produces blurred penumbrae.
    pub soft_shadows: bool,
    /// Whether the lighting buffer is blurred after compositing.
    pub blur_enabled: bool,
    /// Blur strength; scaled by viewport size and zoom so the visual
    /// radius is resolution-invariant.
    pub blur_factor: f32,
    /// Color the lighting buffer is cleared to before lights accumulate.
    pub ambient_color: [f32; 3],
    /// World-unit to pixel ratio of the surrounding renderer.
    pub pixels_per_unit: f32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            resolution_scale: 1.0,
            max_lights: 2048,
            max_occluders: 2048,
            max_shadowcasting_lights: 128,
            soft_shadows: true,
            blur_enabled: true,
            blur_factor: 0.001,
            ambient_color: [0.1, 0.1, 0.1],
            pixels_per_unit: 32.0,
        }
    }
}

impl LightingConfig {
    /// Returns a copy with every value clamped into its valid range.
    pub fn sanitized(&self) -> Self {
        let mut cfg = self.clone();

        if cfg.resolution_scale < MIN_RESOLUTION_SCALE {
            log::warn!(
                "lighting resolution scale {} below minimum, clamping to {}",
                cfg.resolution_scale,
                MIN_RESOLUTION_SCALE
            );
            cfg.resolution_scale = MIN_RESOLUTION_SCALE;
        }

        if cfg.max_occluders < MIN_OCCLUDERS {
            log::warn!(
                "max occluders {} below floor, clamping to {}",
                cfg.max_occluders,
                MIN_OCCLUDERS
            );
            cfg.max_occluders = MIN_OCCLUDERS;
        }

        if cfg.max_shadowcasting_lights > cfg.max_lights {
            log::warn!(
                "max shadow-casting lights {} exceeds max lights {}, clamping",
                cfg.max_shadowcasting_lights,
                cfg.max_lights
            );
            cfg.max_shadowcasting_lights = cfg.max_lights;
        }

        if cfg.pixels_per_unit <= 0.0 {
            cfg.pixels_per_unit = 32.0;
        }

        if !cfg.blur_factor.is_finite() || cfg.blur_factor < 0.0 {
            cfg.blur_factor = 0.0;
        }

        cfg
    }

    /// Parses a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the config to a pretty-printed JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_resolution_scale() {
        let cfg = LightingConfig {
            resolution_scale: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.sanitized().resolution_scale, MIN_RESOLUTION_SCALE);
    }

    #[test]
    fn sanitize_enforces_occluder_floor() {
        let cfg = LightingConfig {
            max_occluders: 16,
            ..Default::default()
        };
        assert_eq!(cfg.sanitized().max_occluders, MIN_OCCLUDERS);
    }

    #[test]
    fn sanitize_caps_shadowcasters_to_max_lights() {
        let cfg = LightingConfig {
            max_lights: 64,
            max_shadowcasting_lights: 128,
            ..Default::default()
        };
        assert_eq!(cfg.sanitized().max_shadowcasting_lights, 64);
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let cfg = LightingConfig {
            blur_factor: 0.25,
            soft_shadows: false,
            ..Default::default()
        };
        let parsed = LightingConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed = LightingConfig::from_json("{\"max_lights\": 32}").unwrap();
        assert_eq!(parsed.max_lights, 32);
        assert_eq!(parsed.resolution_scale, 1.0);
    }
}
