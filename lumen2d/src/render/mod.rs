mod culler;
mod depth;
mod lights;
mod occlusion;
mod postprocess;
mod readback;
mod renderer;
pub mod targets;

pub use readback::ScreenshotCallback;
pub use renderer::{FrameStats, LightRenderer, LightingError};
pub use targets::{TargetDesc, TargetHandle, TargetPool};

/// Handle to a light mask texture registered with the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaskHandle(pub(crate) u32);
