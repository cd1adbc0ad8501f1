//! Lumen2D - dynamic 2D lighting, shadow casting, and occlusion for
//! tile/entity renderers.
//!
//! The host renderer supplies spatial queries and a wgpu device; this
//! crate turns occluder rectangles and point lights into a composited,
//! FOV-masked lighting buffer, and provides the asynchronous pixel
//! readback used for screenshots and exposure sampling.

pub mod capabilities;
pub mod config;
pub mod math;
pub mod render;
pub mod scene;

pub use crate::capabilities::GpuCapabilities;
pub use crate::config::LightingConfig;
pub use crate::math::{Box2, PixelRegion, Transform2D, Vec2};
pub use crate::render::{
    FrameStats, LightRenderer, LightingError, MaskHandle, ScreenshotCallback, TargetDesc,
    TargetHandle, TargetPool,
};
pub use crate::scene::{Eye, Light, MapId, Occluder, OccluderDir, SceneQuery, Viewport};
