//! Light collection and prioritization.
//!
//! Lights intersecting the view are gathered into a fixed-capacity list.
//! When more lights want shadows than there are depth rows, the nearest
//! shadow casters keep their rows and the rest are dropped from the frame
//! entirely, so the result never flickers between shadowed and unshadowed
//! looks.

use crate::math::{Box2, Vec2};
use crate::scene::{Light, MapId, SceneQuery};
use crate::render::MaskHandle;

/// Per-frame record for a light that survived culling.
#[derive(Clone, Debug)]
pub(crate) struct CulledLight {
    pub world_pos: Vec2,
    /// Mask rotation with auto-rotate already folded in.
    pub rotation: f32,
    pub dist_sq: f32,
    pub radius: f32,
    pub energy: f32,
    pub color: [f32; 3],
    pub softness: f32,
    pub mask: Option<MaskHandle>,
    pub cast_shadows: bool,
    /// Row in the shadow depth atlas, assigned during prioritization.
    pub depth_row: Option<u32>,
}

pub(crate) struct LightCuller {
    lights: Vec<CulledLight>,
    max_lights: usize,
    max_shadowcasting: usize,
    pub truncated: bool,
}

impl LightCuller {
    pub fn new(max_lights: usize, max_shadowcasting: usize) -> Self {
        Self {
            lights: Vec::with_capacity(max_lights),
            max_lights,
            max_shadowcasting: max_shadowcasting.min(max_lights),
            truncated: false,
        }
    }

    pub fn set_limits(&mut self, max_lights: usize, max_shadowcasting: usize) {
        self.max_lights = max_lights;
        self.max_shadowcasting = max_shadowcasting.min(max_lights);
    }

    /// Queries lights overlapping `view_bounds` on `map` up to capacity.
    ///
    /// Culling is approximate (bounding circle vs. axis-aligned view box);
    /// callers must not assume exactness near screen edges under rotation.
    pub fn collect(
        &mut self,
        scene: &dyn SceneQuery,
        map: MapId,
        view_bounds: Box2,
        view_center: Vec2,
    ) {
        self.lights.clear();
        self.truncated = false;

        let lights = &mut self.lights;
        let max_lights = self.max_lights;
        let truncated = &mut self.truncated;

        scene.for_each_light_intersecting(map, view_bounds, &mut |transform, light| {
            if !light.enabled {
                return true;
            }

            let world_pos = transform.transform_point(light.offset);
            let light_bounds = Box2::centered(world_pos, Vec2::ONE * (light.radius * 2.0));
            if !light_bounds.intersects(&view_bounds) {
                return true;
            }

            if lights.len() >= max_lights {
                *truncated = true;
                // Short-circuit the spatial query; appending would overflow.
                return false;
            }

            let mut rotation = light.mask_rotation;
            if light.mask_auto_rotate {
                rotation += transform.rotation;
            }

            lights.push(CulledLight {
                world_pos,
                rotation,
                dist_sq: world_pos.distance_squared(view_center),
                radius: light.radius,
                energy: light.energy,
                color: light.color,
                softness: light.softness,
                mask: light.mask,
                cast_shadows: light.cast_shadows,
                depth_row: None,
            });
            true
        });
    }

    /// Resolves the shadow-row competition and assigns depth rows.
    ///
    /// Shadow casters are moved to the tail of the list (stable two-way
    /// partition), the tail is sorted by squared distance to the view
    /// center, and casters past the row capacity are removed outright.
    pub fn prioritize(&mut self) {
        let caster_count = self.lights.iter().filter(|l| l.cast_shadows).count();

        if caster_count > self.max_shadowcasting {
            let mut partitioned = Vec::with_capacity(self.lights.len());
            partitioned.extend(self.lights.iter().filter(|l| !l.cast_shadows).cloned());
            let tail_start = partitioned.len();
            partitioned.extend(self.lights.iter().filter(|l| l.cast_shadows).cloned());
            self.lights = partitioned;

            // Stable sort keeps original order between equidistant lights.
            self.lights[tail_start..]
                .sort_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq));
            self.lights.truncate(tail_start + self.max_shadowcasting);

            log::trace!(
                "shadow-casting lights {} exceed capacity {}, dropping {}",
                caster_count,
                self.max_shadowcasting,
                caster_count - self.max_shadowcasting
            );
        }

        let mut next_row = 0u32;
        for light in &mut self.lights {
            if light.cast_shadows {
                light.depth_row = Some(next_row);
                next_row += 1;
            }
        }
    }

    /// Expands the view bounds to include every surviving light's center.
    /// An occluder outside the view can still shadow a visible light, so
    /// the occlusion query runs against this expanded box. Idempotent.
    pub fn expand_bounds(&self, bounds: Box2) -> Box2 {
        self.lights
            .iter()
            .fold(bounds, |acc, light| acc.extended_to_contain(light.world_pos))
    }

    pub fn lights(&self) -> &[CulledLight] {
        &self.lights
    }

    pub fn shadow_caster_count(&self) -> usize {
        self.lights.iter().filter(|l| l.cast_shadows).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform2D;
    use crate::scene::Occluder;

    struct LightScene {
        lights: Vec<(Transform2D, Light)>,
    }

    impl SceneQuery for LightScene {
        fn for_each_occluder_intersecting(
            &self,
            _map: MapId,
            _bounds: Box2,
            _visit: &mut dyn FnMut(&Transform2D, &Occluder),
        ) {
        }

        fn for_each_light_intersecting(
            &self,
            _map: MapId,
            _bounds: Box2,
            visit: &mut dyn FnMut(&Transform2D, &Light) -> bool,
        ) {
            for (transform, light) in &self.lights {
                if !visit(transform, light) {
                    return;
                }
            }
        }
    }

    fn light_at(x: f32, y: f32, cast_shadows: bool) -> (Transform2D, Light) {
        (
            Transform2D::new(Vec2::new(x, y), Vec2::ONE, 0.0),
            Light {
                cast_shadows,
                ..Default::default()
            },
        )
    }

    fn view() -> Box2 {
        Box2::new(Vec2::new(-100.0, -100.0), Vec2::new(100.0, 100.0))
    }

    #[test]
    fn collect_respects_max_lights() {
        let scene = LightScene {
            lights: (0..10).map(|i| light_at(i as f32, 0.0, false)).collect(),
        };
        let mut culler = LightCuller::new(4, 4);
        culler.collect(&scene, MapId(0), view(), Vec2::ZERO);
        assert_eq!(culler.lights().len(), 4);
        assert!(culler.truncated);
    }

    #[test]
    fn nearest_shadow_casters_keep_their_rows() {
        let scene = LightScene {
            lights: vec![
                light_at(50.0, 0.0, true),
                light_at(5.0, 0.0, true),
                light_at(20.0, 0.0, true),
                light_at(1.0, 0.0, false),
            ],
        };
        let mut culler = LightCuller::new(16, 2);
        culler.collect(&scene, MapId(0), view(), Vec2::ZERO);
        culler.prioritize();

        // The far caster at x=50 is dropped entirely.
        assert_eq!(culler.lights().len(), 3);
        assert_eq!(culler.shadow_caster_count(), 2);
        let casters: Vec<f32> = culler
            .lights()
            .iter()
            .filter(|l| l.cast_shadows)
            .map(|l| l.world_pos.x)
            .collect();
        assert_eq!(casters, vec![5.0, 20.0]);
    }

    #[test]
    fn equidistant_casters_tie_break_by_original_order() {
        let scene = LightScene {
            lights: vec![
                light_at(0.0, 10.0, true),
                light_at(10.0, 0.0, true),
                light_at(0.0, -10.0, true),
            ],
        };
        let mut culler = LightCuller::new(16, 2);
        culler.collect(&scene, MapId(0), view(), Vec2::ZERO);
        culler.prioritize();

        let kept: Vec<Vec2> = culler.lights().iter().map(|l| l.world_pos).collect();
        assert_eq!(kept, vec![Vec2::new(0.0, 10.0), Vec2::new(10.0, 0.0)]);
    }

    #[test]
    fn depth_rows_are_dense_from_zero() {
        let scene = LightScene {
            lights: vec![
                light_at(1.0, 0.0, false),
                light_at(2.0, 0.0, true),
                light_at(3.0, 0.0, true),
            ],
        };
        let mut culler = LightCuller::new(16, 8);
        culler.collect(&scene, MapId(0), view(), Vec2::ZERO);
        culler.prioritize();

        let rows: Vec<Option<u32>> = culler.lights().iter().map(|l| l.depth_row).collect();
        assert_eq!(rows, vec![None, Some(0), Some(1)]);
    }

    #[test]
    fn under_capacity_keeps_original_order() {
        let scene = LightScene {
            lights: vec![
                light_at(9.0, 0.0, true),
                light_at(1.0, 0.0, false),
                light_at(4.0, 0.0, true),
            ],
        };
        let mut culler = LightCuller::new(16, 8);
        culler.collect(&scene, MapId(0), view(), Vec2::ZERO);
        culler.prioritize();

        let xs: Vec<f32> = culler.lights().iter().map(|l| l.world_pos.x).collect();
        assert_eq!(xs, vec![9.0, 1.0, 4.0]);
    }

    #[test]
    fn expand_bounds_is_idempotent() {
        let scene = LightScene {
            lights: vec![light_at(150.0, 0.0, false), light_at(-20.0, 30.0, true)],
        };
        let mut culler = LightCuller::new(16, 8);
        // Wide query bounds so the distant light is collected.
        let wide = Box2::new(Vec2::new(-200.0, -200.0), Vec2::new(200.0, 200.0));
        culler.collect(&scene, MapId(0), wide, Vec2::ZERO);

        let expanded = culler.expand_bounds(view());
        assert!(expanded.contains(Vec2::new(150.0, 0.0)));
        assert_eq!(culler.expand_bounds(expanded), expanded);
    }

    #[test]
    fn lights_outside_view_are_skipped() {
        let scene = LightScene {
            lights: vec![light_at(500.0, 500.0, true)],
        };
        let mut culler = LightCuller::new(16, 8);
        culler.collect(&scene, MapId(0), view(), Vec2::ZERO);
        assert!(culler.lights().is_empty());
    }
}
