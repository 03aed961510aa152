//! Generational resource pool for pipeline buffers
//!
//! Every buffer the pipeline wires between passes lives in a [`ResourcePool`]
//! slot and is referred to by a [`ResourceId`]. The id doubles as the
//! reference identity the wiring invariants are stated in: two tables point
//! at the same buffer exactly when they hold equal ids. Slots are reused
//! after removal, with a generation counter so a stale id can never silently
//! alias a newer resource.

use crate::target::TargetSpec;

/// Handle to a pooled resource: slot index plus generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

/// Which texture of a render target a binding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSlot {
    /// A color attachment by index (index 0 for single-attachment targets)
    Color(u32),
    /// The dedicated depth texture of the target
    Depth,
}

/// A texture handle derived from a pooled render target
///
/// This is how a G-buffer attachment or the shared depth texture is handed
/// to a pass input: the buffer identity plus the attachment to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    /// The render target resource the texture belongs to
    pub resource: ResourceId,
    /// The attachment to sample from that target
    pub slot: AttachmentSlot,
}

impl TextureBinding {
    /// Binding to color attachment 0 of a target
    pub fn color(resource: ResourceId) -> Self {
        Self { resource, slot: AttachmentSlot::Color(0) }
    }

    /// Binding to the depth texture of a target
    pub fn depth(resource: ResourceId) -> Self {
        Self { resource, slot: AttachmentSlot::Depth }
    }
}

/// A pooled resource: a named handle to a GPU-visible buffer
///
/// The buffer value is optional; a resource can exist before any buffer has
/// been assigned to it. The version is bumped on every reassignment so
/// renderers can detect that a realized texture is out of date.
#[derive(Debug)]
pub struct Resource {
    name: String,
    spec: Option<TargetSpec>,
    version: u64,
}

impl Resource {
    /// The debug name this resource was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current buffer description, if one has been assigned
    pub fn spec(&self) -> Option<&TargetSpec> {
        self.spec.as_ref()
    }

    /// Counter bumped on every buffer (re)assignment
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Resource>,
}

/// Pool of pipeline buffer resources with generational ids
#[derive(Debug, Default)]
pub struct ResourcePool {
    slots: Vec<Slot>,
}

impl ResourcePool {
    /// Creates an empty pool
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Inserts a resource, reusing a freed slot when one exists
    pub fn insert(&mut self, name: impl Into<String>, spec: Option<TargetSpec>) -> ResourceId {
        let entry = Resource { name: name.into(), spec, version: 0 };

        // Reuse the first free slot; its generation was already bumped on
        // removal, so stale ids pointing here can no longer resolve.
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.is_none() {
                slot.entry = Some(entry);
                return ResourceId { index: index as u32, generation: slot.generation };
            }
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, entry: Some(entry) });
        ResourceId { index, generation: 0 }
    }

    /// Removes a resource, invalidating its id
    pub fn remove(&mut self, id: ResourceId) -> Option<Resource> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take();
        if entry.is_some() {
            slot.generation += 1;
        }
        entry
    }

    /// Looks up a live resource
    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Whether the id refers to a live resource
    pub fn contains(&self, id: ResourceId) -> bool {
        self.get(id).is_some()
    }

    /// Shorthand for the buffer description of a live resource
    pub fn spec(&self, id: ResourceId) -> Option<&TargetSpec> {
        self.get(id).and_then(Resource::spec)
    }

    /// Assigns a buffer description, bumping the version if it changed
    ///
    /// Returns false when the id is stale.
    pub fn set_spec(&mut self, id: ResourceId, spec: Option<TargetSpec>) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation {
            return false;
        }
        let Some(entry) = slot.entry.as_mut() else {
            return false;
        };
        if entry.spec != spec {
            entry.spec = spec;
            entry.version += 1;
        }
        true
    }

    /// Mutates the buffer description in place, bumping the version if the
    /// closure reports a change
    pub fn update_spec(&mut self, id: ResourceId, f: impl FnOnce(&mut TargetSpec) -> bool) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation {
            return false;
        }
        let Some(entry) = slot.entry.as_mut() else {
            return false;
        };
        let Some(spec) = entry.spec.as_mut() else {
            return false;
        };
        if f(spec) {
            entry.version += 1;
        }
        true
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// Whether the pool holds no live resources
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::FORMAT_LOW_PRECISION;

    #[test]
    fn test_insert_and_lookup() {
        let mut pool = ResourcePool::new();
        let id = pool.insert("buffer", Some(TargetSpec::color("buffer", FORMAT_LOW_PRECISION)));

        assert!(pool.contains(id));
        assert_eq!(pool.get(id).unwrap().name(), "buffer");
        assert_eq!(pool.get(id).unwrap().version(), 0);
    }

    #[test]
    fn test_stale_id_after_removal() {
        let mut pool = ResourcePool::new();
        let id = pool.insert("a", None);
        assert!(pool.remove(id).is_some());

        // Slot reuse must not resurrect the old id
        let reused = pool.insert("b", None);
        assert!(!pool.contains(id));
        assert!(pool.contains(reused));
        assert_ne!(id, reused);
        assert!(pool.remove(id).is_none());
    }

    #[test]
    fn test_set_spec_bumps_version_only_on_change() {
        let mut pool = ResourcePool::new();
        let spec = TargetSpec::color("buffer", FORMAT_LOW_PRECISION);
        let id = pool.insert("buffer", Some(spec.clone()));

        assert!(pool.set_spec(id, Some(spec.clone())));
        assert_eq!(pool.get(id).unwrap().version(), 0);

        let mut changed = spec;
        changed.width = 1920;
        assert!(pool.set_spec(id, Some(changed)));
        assert_eq!(pool.get(id).unwrap().version(), 1);
    }

    #[test]
    fn test_update_spec_resizes_in_place() {
        let mut pool = ResourcePool::new();
        let id = pool.insert("buffer", Some(TargetSpec::color("buffer", FORMAT_LOW_PRECISION)));

        assert!(pool.update_spec(id, |spec| spec.apply_size(1280, 720)));
        assert_eq!(pool.spec(id).unwrap().width, 1280);
        assert_eq!(pool.get(id).unwrap().version(), 1);

        // Same size again is not a change
        assert!(pool.update_spec(id, |spec| spec.apply_size(1280, 720)));
        assert_eq!(pool.get(id).unwrap().version(), 1);
    }

    #[test]
    fn test_len_counts_live_entries() {
        let mut pool = ResourcePool::new();
        let a = pool.insert("a", None);
        let _b = pool.insert("b", None);
        assert_eq!(pool.len(), 2);

        pool.remove(a);
        assert_eq!(pool.len(), 1);
    }
}
