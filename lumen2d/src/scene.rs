//! Scene-facing data types: occluders, lights, the eye, and the spatial
//! query contract the host renderer implements.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::math::{Box2, Transform2D, Vec2};
use crate::render::targets::TargetHandle;
use crate::render::MaskHandle;

/// Identifies one map/world the spatial trees are partitioned by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MapId(pub u32);

/// Which neighbor directions of an occluder are already covered by an
/// adjacent occluder. Faces toward covered directions are interior and
/// normally suppressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OccluderDir(u8);

impl OccluderDir {
    pub const NONE: Self = Self(0);
    pub const NORTH: Self = Self(1 << 0);
    pub const EAST: Self = Self(1 << 1);
    pub const SOUTH: Self = Self(1 << 2);
    pub const WEST: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    pub fn contains(self, dir: Self) -> bool {
        self.0 & dir.0 == dir.0
    }

    pub fn with(self, dir: Self) -> Self {
        Self(self.0 | dir.0)
    }
}

/// A light-blocking rectangle. Owned by the scene graph; this subsystem
/// reads it fresh every frame and never caches it.
#[derive(Clone, Copy, Debug)]
pub struct Occluder {
    /// Local-space bounds; the owner transform maps them into world space.
    pub bounds: Box2,
    pub enabled: bool,
    /// Neighbor coverage mask used to suppress interior faces.
    pub occluding: OccluderDir,
}

impl Occluder {
    pub fn new(bounds: Box2) -> Self {
        Self {
            bounds,
            enabled: true,
            occluding: OccluderDir::NONE,
        }
    }
}

/// A point light. Plain scene data; per-frame derived state (world
/// position, assigned depth row) lives in the culler's records.
#[derive(Clone, Debug)]
pub struct Light {
    /// Offset from the owner transform's origin.
    pub offset: Vec2,
    pub radius: f32,
    /// Intensity multiplier applied to the color.
    pub energy: f32,
    pub color: [f32; 3],
    pub enabled: bool,
    /// Whether this light competes for a shadow depth row.
    pub cast_shadows: bool,
    /// Optional mask texture restricting the light's shape.
    pub mask: Option<MaskHandle>,
    /// Fixed rotation of the mask in radians.
    pub mask_rotation: f32,
    /// When set, the owner's world rotation is added to the mask rotation.
    pub mask_auto_rotate: bool,
    /// Penumbra width for soft shadows; 0 = hard edges.
    pub softness: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            radius: 5.0,
            energy: 1.0,
            color: [1.0, 1.0, 1.0],
            enabled: true,
            cast_shadows: true,
            mask: None,
            mask_rotation: 0.0,
            mask_auto_rotate: false,
            softness: 1.0,
        }
    }
}

/// The viewer. Carries the camera pose plus the exposure-sampling hook.
#[derive(Clone, Debug)]
pub struct Eye {
    pub map: MapId,
    pub position: Vec2,
    /// View rotation in radians.
    pub rotation: f32,
    pub zoom: f32,
    /// When set, scene brightness around the eye is sampled once per frame
    /// and becomes readable through [`Eye::last_brightness`].
    pub measure_brightness: bool,
    brightness: Arc<AtomicU32>,
}

impl Eye {
    pub fn new(map: MapId, position: Vec2) -> Self {
        Self {
            map,
            position,
            rotation: 0.0,
            zoom: 1.0,
            measure_brightness: false,
            brightness: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    /// The most recently sampled scene brightness. Updated asynchronously;
    /// may lag the current frame by a few frames.
    pub fn last_brightness(&self) -> f32 {
        f32::from_bits(self.brightness.load(Ordering::Relaxed))
    }

    pub(crate) fn brightness_sink(&self) -> Arc<AtomicU32> {
        self.brightness.clone()
    }
}

/// Per-viewport state: output size plus the render targets owned by the
/// lighting pass. Targets are (re)created lazily whenever the size or the
/// configured resolution scale changes.
#[derive(Debug)]
pub struct Viewport {
    pub size: (u32, u32),
    pub(crate) light_target: Option<TargetHandle>,
    pub(crate) light_depth_stencil: Option<TargetHandle>,
    pub(crate) blur_targets: Option<[TargetHandle; 2]>,
    pub(crate) bleed_targets: Option<[TargetHandle; 2]>,
    /// Size/scale the current targets were allocated for.
    pub(crate) allocated_for: Option<((u32, u32), f32)>,
}

impl Viewport {
    pub fn new(size: (u32, u32)) -> Self {
        Self {
            size,
            light_target: None,
            light_depth_stencil: None,
            blur_targets: None,
            bleed_targets: None,
            allocated_for: None,
        }
    }

    /// The lighting accumulation buffer, once the first frame has rendered.
    /// Consumed by the host's final compositing pass.
    pub fn light_render_target(&self) -> Option<TargetHandle> {
        self.light_target
    }
}

/// Spatial queries answered by the host's entity/spatial-index systems.
///
/// Both queries yield owners intersecting `bounds`, each with the world
/// transform to apply to the component's local-space data. The light
/// visitor returns `false` to stop the query early (capacity reached).
pub trait SceneQuery {
    fn for_each_occluder_intersecting(
        &self,
        map: MapId,
        bounds: Box2,
        visit: &mut dyn FnMut(&Transform2D, &Occluder),
    );

    fn for_each_light_intersecting(
        &self,
        map: MapId,
        bounds: Box2,
        visit: &mut dyn FnMut(&Transform2D, &Light) -> bool,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occluder_dir_mask_ops() {
        let mask = OccluderDir::NORTH.with(OccluderDir::WEST);
        assert!(mask.contains(OccluderDir::NORTH));
        assert!(mask.contains(OccluderDir::WEST));
        assert!(!mask.contains(OccluderDir::SOUTH));
        assert!(OccluderDir::ALL.contains(mask));
    }

    #[test]
    fn eye_brightness_round_trips_through_sink() {
        let eye = Eye::new(MapId(0), Vec2::ZERO);
        eye.brightness_sink()
            .store(0.25f32.to_bits(), Ordering::Relaxed);
        assert_eq!(eye.last_brightness(), 0.25);
    }
}
