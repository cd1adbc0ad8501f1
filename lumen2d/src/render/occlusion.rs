//! Per-frame occlusion geometry.
//!
//! Occluder rectangles become directional face quads consumed by the depth
//! renderer, plus a flat outline mesh used as the wall-bleed mask. Both are
//! rebuilt from the spatial query every frame into pooled scratch vectors
//! and uploaded once.

use bytemuck::{Pod, Zeroable};
use wgpu::BufferUsages;

use crate::math::{Box2, Transform2D, Vec2};
use crate::scene::{MapId, Occluder, OccluderDir, SceneQuery};

/// Index value that restarts a triangle strip.
pub(crate) const STRIP_RESTART: u16 = u16::MAX;

/// Hard capacity ceiling imposed by 16-bit indices: 16 face vertices per
/// occluder.
pub(crate) const MAX_OCCLUDER_CAPACITY: usize = (u16::MAX as usize - 1) / 16;

/// One corner of a face quad. `opposite` carries the other endpoint of the
/// face segment so the depth shader can unwrap faces that cross the radial
/// seam. `flags` = [endpoint side, row height].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct OccluderVertex {
    pub position: [f32; 2],
    pub opposite: [f32; 2],
    pub flags: [u8; 2],
    pub _pad: [u8; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct OutlineVertex {
    pub position: [f32; 2],
}

/// Whether emitted faces use one quad strip per face (with restart) or
/// plain triangle pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IndexMode {
    Strip,
    List,
}

struct GpuBuffers {
    face_vbo: wgpu::Buffer,
    face_ibo: wgpu::Buffer,
    outline_vbo: wgpu::Buffer,
    outline_ibo: wgpu::Buffer,
}

/// Builder plus GPU residency for the frame's occlusion geometry.
pub(crate) struct OcclusionGeometry {
    capacity: usize,
    index_mode: IndexMode,
    face_vertices: Vec<OccluderVertex>,
    face_indices: Vec<u16>,
    outline_vertices: Vec<OutlineVertex>,
    outline_indices: Vec<u16>,
    pub occluder_count: usize,
    pub face_count: usize,
    pub truncated: bool,
    gpu: Option<GpuBuffers>,
}

impl OcclusionGeometry {
    pub fn new(capacity: usize, index_mode: IndexMode) -> Self {
        let capacity = capacity.min(MAX_OCCLUDER_CAPACITY);
        Self {
            capacity,
            index_mode,
            // Scratch is allocated once at capacity and reused every frame.
            face_vertices: Vec::with_capacity(capacity * 16),
            face_indices: Vec::with_capacity(capacity * 24),
            outline_vertices: Vec::with_capacity(capacity * 4),
            outline_indices: Vec::with_capacity(capacity * 6),
            occluder_count: 0,
            face_count: 0,
            truncated: false,
            gpu: None,
        }
    }

    pub fn index_mode(&self) -> IndexMode {
        self.index_mode
    }

    pub fn face_index_count(&self) -> u32 {
        self.face_indices.len() as u32
    }

    pub fn outline_index_count(&self) -> u32 {
        self.outline_indices.len() as u32
    }

    /// Rebuilds the geometry from every enabled occluder intersecting
    /// `bounds`. Exceeding the capacity truncates the set for this frame.
    pub fn rebuild(&mut self, scene: &dyn SceneQuery, map: MapId, bounds: Box2, eye: Vec2) {
        self.face_vertices.clear();
        self.face_indices.clear();
        self.outline_vertices.clear();
        self.outline_indices.clear();
        self.occluder_count = 0;
        self.face_count = 0;
        self.truncated = false;

        scene.for_each_occluder_intersecting(map, bounds, &mut |transform, occluder| {
            if !occluder.enabled {
                return;
            }
            if self.occluder_count >= self.capacity {
                self.truncated = true;
                return;
            }
            self.push_occluder(transform, occluder, eye);
        });

        if self.truncated {
            log::trace!(
                "occluder capacity {} exceeded, truncating frame set",
                self.capacity
            );
        }
    }

    fn push_occluder(&mut self, transform: &Transform2D, occluder: &Occluder, eye: Vec2) {
        let local = occluder.bounds.corners();
        let corners = [
            transform.transform_point(local[0]),
            transform.transform_point(local[1]),
            transform.transform_point(local[2]),
            transform.transform_point(local[3]),
        ];

        let emit = face_emission(&corners, eye, occluder.occluding);
        let [bl, br, tr, tl] = corners;
        // Endpoint order puts the viewer-facing side in clockwise winding.
        let faces = [(tl, tr), (tr, br), (br, bl), (bl, tl)];

        for (dir, &(a, b)) in faces.iter().enumerate() {
            if emit[dir] {
                self.push_face(a, b);
            }
        }

        let base = self.outline_vertices.len() as u16;
        for corner in corners {
            self.outline_vertices.push(OutlineVertex {
                position: [corner.x, corner.y],
            });
        }
        self.outline_indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);

        self.occluder_count += 1;
    }

    fn push_face(&mut self, a: Vec2, b: Vec2) {
        let base = self.face_vertices.len() as u16;
        for (side, pos, opp) in [(0u8, a, b), (1u8, b, a)] {
            for height in 0u8..2 {
                self.face_vertices.push(OccluderVertex {
                    position: [pos.x, pos.y],
                    opposite: [opp.x, opp.y],
                    flags: [side, height],
                    _pad: [0; 2],
                });
            }
        }

        match self.index_mode {
            IndexMode::Strip => {
                self.face_indices
                    .extend_from_slice(&[base, base + 1, base + 2, base + 3, STRIP_RESTART]);
            }
            IndexMode::List => {
                self.face_indices.extend_from_slice(&[
                    base,
                    base + 1,
                    base + 2,
                    base + 2,
                    base + 1,
                    base + 3,
                ]);
            }
        }

        self.face_count += 1;
    }

    /// Uploads the frame's geometry. Buffers are allocated once at capacity
    /// and rewritten in place.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let capacity = self.capacity as u64;
        let gpu = self.gpu.get_or_insert_with(|| {
            let face_vbo = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("occlusion-face-vertices"),
                size: capacity * 16 * std::mem::size_of::<OccluderVertex>() as u64,
                usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let face_ibo = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("occlusion-face-indices"),
                size: capacity * 24 * std::mem::size_of::<u16>() as u64,
                usage: BufferUsages::INDEX | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let outline_vbo = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("occlusion-outline-vertices"),
                size: capacity * 4 * std::mem::size_of::<OutlineVertex>() as u64,
                usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let outline_ibo = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("occlusion-outline-indices"),
                size: capacity * 6 * std::mem::size_of::<u16>() as u64,
                usage: BufferUsages::INDEX | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            GpuBuffers {
                face_vbo,
                face_ibo,
                outline_vbo,
                outline_ibo,
            }
        });

        if !self.face_vertices.is_empty() {
            queue.write_buffer(&gpu.face_vbo, 0, bytemuck::cast_slice(&self.face_vertices));
            queue.write_buffer(&gpu.face_ibo, 0, bytemuck::cast_slice(&self.face_indices));
        }
        if !self.outline_vertices.is_empty() {
            queue.write_buffer(
                &gpu.outline_vbo,
                0,
                bytemuck::cast_slice(&self.outline_vertices),
            );
            queue.write_buffer(
                &gpu.outline_ibo,
                0,
                bytemuck::cast_slice(&self.outline_indices),
            );
        }
    }

    pub fn face_buffers(&self) -> Option<(&wgpu::Buffer, &wgpu::Buffer)> {
        self.gpu.as_ref().map(|g| (&g.face_vbo, &g.face_ibo))
    }

    pub fn outline_buffers(&self) -> Option<(&wgpu::Buffer, &wgpu::Buffer)> {
        self.gpu.as_ref().map(|g| (&g.outline_vbo, &g.outline_ibo))
    }

    /// Vertex buffer layout of the face mesh.
    pub fn face_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
            wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Uint8x2];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<OccluderVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }

    /// Vertex buffer layout of the outline mesh.
    pub fn outline_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<OutlineVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// Decides which of the four faces (N, E, S, W) to emit.
///
/// A face toward an uncovered direction is always emitted. A face toward a
/// covered direction is only emitted when one of its corners sits on the
/// silhouette as seen from `eye`: the corner's other adjacent face must be
/// uncovered and front-facing. Front-facing is a cross-product sign test on
/// the viewer-relative endpoints, which stays exact under rotated
/// transforms.
pub(crate) fn face_emission(corners: &[Vec2; 4], eye: Vec2, occluding: OccluderDir) -> [bool; 4] {
    let [bl, br, tr, tl] = *corners;

    let front = |a: Vec2, b: Vec2| (a - eye).cross(b - eye) > 0.0;
    let front_n = front(tl, tr);
    let front_e = front(tr, br);
    let front_s = front(br, bl);
    let front_w = front(bl, tl);

    let clear_n = !occluding.contains(OccluderDir::NORTH);
    let clear_e = !occluding.contains(OccluderDir::EAST);
    let clear_s = !occluding.contains(OccluderDir::SOUTH);
    let clear_w = !occluding.contains(OccluderDir::WEST);

    let vis_tl = (clear_n && front_n) || (clear_w && front_w);
    let vis_tr = (clear_n && front_n) || (clear_e && front_e);
    let vis_br = (clear_e && front_e) || (clear_s && front_s);
    let vis_bl = (clear_s && front_s) || (clear_w && front_w);

    [
        clear_n || vis_tl || vis_tr,
        clear_e || vis_tr || vis_br,
        clear_s || vis_br || vis_bl,
        clear_w || vis_bl || vis_tl,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Light;

    fn corners_array() -> [Vec2; 4] {
        Box2::new(Vec2::ZERO, Vec2::ONE).corners()
    }

    #[test]
    fn uncovered_occluder_emits_all_faces() {
        let emitted = face_emission(&corners_array(), Vec2::new(0.5, 3.0), OccluderDir::NONE);
        assert_eq!(emitted, [true; 4]);
    }

    #[test]
    fn fully_surrounded_occluder_emits_nothing() {
        for eye in [
            Vec2::new(0.5, 3.0),
            Vec2::new(-2.0, 0.5),
            Vec2::new(0.5, 0.5),
            Vec2::new(10.0, -10.0),
        ] {
            let emitted = face_emission(&corners_array(), eye, OccluderDir::ALL);
            assert_eq!(emitted, [false; 4], "eye at {eye:?}");
        }
    }

    #[test]
    fn covered_face_emitted_when_silhouette_corner_visible() {
        // North covered, viewer to the north-east: the east face is exposed
        // and front-facing, so the shared top-right corner keeps the north
        // face alive.
        let emitted = face_emission(
            &corners_array(),
            Vec2::new(3.0, 3.0),
            OccluderDir::NORTH,
        );
        assert!(emitted[0]);
        // Same mask but viewer due south: no exposed front-facing face is
        // adjacent to the north corners.
        let emitted = face_emission(
            &corners_array(),
            Vec2::new(0.5, -3.0),
            OccluderDir::NORTH,
        );
        assert!(!emitted[0]);
    }

    struct OneBoxScene {
        occluders: Vec<(Transform2D, Occluder)>,
    }

    impl SceneQuery for OneBoxScene {
        fn for_each_occluder_intersecting(
            &self,
            _map: MapId,
            bounds: Box2,
            visit: &mut dyn FnMut(&Transform2D, &Occluder),
        ) {
            for (transform, occluder) in &self.occluders {
                let world = Box2::new(
                    transform.transform_point(occluder.bounds.min),
                    transform.transform_point(occluder.bounds.max),
                );
                if world.intersects(&bounds) {
                    visit(transform, occluder);
                }
            }
        }

        fn for_each_light_intersecting(
            &self,
            _map: MapId,
            _bounds: Box2,
            _visit: &mut dyn FnMut(&Transform2D, &Light) -> bool,
        ) {
        }
    }

    fn occluder_at(x: f32, y: f32) -> (Transform2D, Occluder) {
        (
            Transform2D::new(Vec2::new(x, y), Vec2::ONE, 0.0),
            Occluder::new(Box2::new(Vec2::ZERO, Vec2::ONE)),
        )
    }

    #[test]
    fn rebuild_emits_expected_counts() {
        let scene = OneBoxScene {
            occluders: vec![occluder_at(0.0, 0.0)],
        };
        let mut geometry = OcclusionGeometry::new(64, IndexMode::Strip);
        geometry.rebuild(
            &scene,
            MapId(0),
            Box2::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0)),
            Vec2::new(5.0, 5.0),
        );

        assert_eq!(geometry.occluder_count, 1);
        assert_eq!(geometry.face_count, 4);
        assert_eq!(geometry.face_vertices.len(), 16);
        assert_eq!(geometry.face_indices.len(), 20);
        assert_eq!(geometry.outline_vertices.len(), 4);
        assert_eq!(geometry.outline_indices.len(), 6);
        assert!(!geometry.truncated);
    }

    #[test]
    fn list_mode_emits_triangle_pairs() {
        let scene = OneBoxScene {
            occluders: vec![occluder_at(0.0, 0.0)],
        };
        let mut geometry = OcclusionGeometry::new(64, IndexMode::List);
        geometry.rebuild(
            &scene,
            MapId(0),
            Box2::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0)),
            Vec2::new(5.0, 5.0),
        );
        assert_eq!(geometry.face_indices.len(), 24);
        assert!(!geometry.face_indices.contains(&STRIP_RESTART));
    }

    #[test]
    fn capacity_overflow_truncates_deterministically() {
        let scene = OneBoxScene {
            occluders: vec![
                occluder_at(0.0, 0.0),
                occluder_at(2.0, 0.0),
                occluder_at(4.0, 0.0),
            ],
        };
        // MAX_OCCLUDER_CAPACITY still bounds this, but the configured
        // capacity is what bites here.
        let mut geometry = OcclusionGeometry::new(2, IndexMode::Strip);
        geometry.rebuild(
            &scene,
            MapId(0),
            Box2::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0)),
            Vec2::new(5.0, 5.0),
        );
        assert_eq!(geometry.occluder_count, 2);
        assert!(geometry.truncated);

        // Same input, same result.
        geometry.rebuild(
            &scene,
            MapId(0),
            Box2::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0)),
            Vec2::new(5.0, 5.0),
        );
        assert_eq!(geometry.occluder_count, 2);
        assert!(geometry.truncated);
    }

    #[test]
    fn disabled_occluders_are_skipped() {
        let (transform, mut occluder) = occluder_at(0.0, 0.0);
        occluder.enabled = false;
        let scene = OneBoxScene {
            occluders: vec![(transform, occluder)],
        };
        let mut geometry = OcclusionGeometry::new(64, IndexMode::Strip);
        geometry.rebuild(
            &scene,
            MapId(0),
            Box2::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0)),
            Vec2::ZERO,
        );
        assert_eq!(geometry.occluder_count, 0);
        assert_eq!(geometry.face_count, 0);
    }
}
