//! Render-target ownership.
//!
//! Targets are held in a slot table addressed by generation-checked
//! handles. Disposal only marks a slot; the GPU objects of freed slots are
//! reclaimed by the render thread once per frame, so no cross-thread
//! disposal queue is needed.

use wgpu::{
    Extent3d, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    TextureView, TextureViewDescriptor,
};

/// Handle to a render target owned by a [`TargetPool`].
///
/// Handles are cheap copies; using a handle after disposal is caught by the
/// generation check (debug assertion in debug builds, `None` in release).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetHandle {
    index: u32,
    generation: u32,
}

/// Parameters for creating a render target.
#[derive(Clone, Debug)]
pub struct TargetDesc {
    pub label: &'static str,
    pub size: (u32, u32),
    pub format: TextureFormat,
    pub usage: TextureUsages,
}

pub(crate) struct TargetEntry {
    pub texture: Texture,
    pub view: TextureView,
    pub size: (u32, u32),
    pub format: TextureFormat,
}

struct Slot {
    generation: u32,
    entry: Option<TargetEntry>,
}

/// Slot table of render targets, owned by the render thread.
#[derive(Default)]
pub struct TargetPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Slots disposed this frame; their GPU objects are dropped on the next
    /// `reclaim` call.
    pending_free: Vec<u32>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            generation: 0,
            entry: None,
        }
    }
}

impl TargetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a color (or depth/stencil) target of the given size and
    /// format. Sizes are clamped to at least 1x1.
    pub fn create(&mut self, device: &wgpu::Device, desc: &TargetDesc) -> TargetHandle {
        let size = (desc.size.0.max(1), desc.size.1.max(1));

        let texture = device.create_texture(&TextureDescriptor {
            label: Some(desc.label),
            size: Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());

        let entry = TargetEntry {
            texture,
            view,
            size,
            format: desc.format,
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);

        log::debug!(
            "created render target '{}' {}x{} {:?}",
            desc.label,
            size.0,
            size.1,
            desc.format
        );

        TargetHandle {
            index,
            generation: slot.generation,
        }
    }

    /// Looks up a live target. A stale handle trips a debug assertion and
    /// returns `None` in release builds.
    pub(crate) fn get(&self, handle: TargetHandle) -> Option<&TargetEntry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            debug_assert!(
                false,
                "render target handle used after disposal (index {})",
                handle.index
            );
            return None;
        }
        slot.entry.as_ref()
    }

    /// Marks a target for disposal. The slot's generation advances
    /// immediately so stale handles stop resolving; the GPU objects are
    /// released on the next `reclaim`.
    pub fn dispose(&mut self, handle: TargetHandle) {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return;
        };
        if slot.generation != handle.generation || slot.entry.is_none() {
            return;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.pending_free.push(handle.index);
    }

    /// Releases the GPU objects of all slots disposed since the previous
    /// call. Call once per frame from the render thread.
    pub fn reclaim(&mut self) {
        for index in self.pending_free.drain(..) {
            let slot = &mut self.slots[index as usize];
            slot.entry = None;
            self.free.push(index);
        }
    }

    /// Number of live targets; used by stats and tests.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_handle(index: u32, generation: u32) -> TargetHandle {
        TargetHandle { index, generation }
    }

    #[test]
    fn stale_generation_does_not_resolve() {
        // Exercise the bookkeeping without a device: disposal of an unknown
        // handle is a no-op, and generation mismatches return None.
        let pool = TargetPool::new();
        assert!(pool.get(fake_handle(0, 0)).is_none());
    }

    #[test]
    fn dispose_unknown_handle_is_noop() {
        let mut pool = TargetPool::new();
        pool.dispose(fake_handle(3, 7));
        pool.reclaim();
        assert_eq!(pool.live_count(), 0);
    }
}
