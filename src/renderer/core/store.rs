//! Resource Store
//!
//! Handle-indexed storage for any number of GPU object types behind one
//! container.
//!
//! # Design
//!
//! Each concrete type gets its own arena, found through its [`TypeId`]. The
//! arena's value type is recovered at the call site by downcasting with the
//! same key used on insertion, so the store never needs to know the set of
//! resource kinds up front. Within an arena, objects are kept sorted by their
//! embedded id.
//!
//! Resolving a handle that is not in the store is a programming error and
//! panics; [`ResourceStore::try_get_resource`] exists for code that genuinely
//! probes.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::renderer::core::handle::{GpuResource, Handle};
use crate::renderer::device::RenderDevice;

/// Type-erased view of one per-type arena.
trait ErasedArena: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    fn release_all(&mut self, device: &mut dyn RenderDevice) -> usize;
    fn type_name(&self) -> &'static str;
}

struct Arena<T> {
    items: BTreeMap<u32, T>,
}

impl<T: GpuResource> ErasedArena for Arena<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn release_all(&mut self, device: &mut dyn RenderDevice) -> usize {
        let items = std::mem::take(&mut self.items);
        let count = items.len();
        for (_, item) in items {
            item.release(device);
        }
        count
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Owns every instance of every stored resource type.
#[derive(Default)]
pub struct ResourceStore {
    arenas: FxHashMap<TypeId, Box<dyn ErasedArena>>,
}

impl ResourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn arena<T: GpuResource>(&self) -> Option<&Arena<T>> {
        self.arenas
            .get(&TypeId::of::<T>())
            .and_then(|arena| arena.as_any().downcast_ref::<Arena<T>>())
    }

    fn arena_mut<T: GpuResource>(&mut self) -> Option<&mut Arena<T>> {
        self.arenas
            .get_mut(&TypeId::of::<T>())
            .and_then(|arena| arena.as_any_mut().downcast_mut::<Arena<T>>())
    }

    /// Moves `value` into the store and returns a reference to its stored
    /// location.
    pub fn create_resource<T: GpuResource>(&mut self, value: T) -> &mut T {
        let id = value.res_id();
        let arena = self
            .arenas
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                Box::new(Arena::<T> {
                    items: BTreeMap::new(),
                })
            })
            .as_any_mut()
            .downcast_mut::<Arena<T>>()
            .unwrap_or_else(|| unreachable!("arena keyed by TypeId"));

        assert!(
            !arena.items.contains_key(&id),
            "resource id {id} inserted twice into the {} arena",
            std::any::type_name::<T>()
        );
        arena.items.entry(id).or_insert(value)
    }

    /// Resolves a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live object.
    #[must_use]
    pub fn get_resource<T: GpuResource>(&self, handle: Handle<T>) -> &T {
        self.try_get_resource(handle)
            .unwrap_or_else(|| invalid_handle(handle))
    }

    /// Resolves a handle for mutation.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live object.
    pub fn get_resource_mut<T: GpuResource>(&mut self, handle: Handle<T>) -> &mut T {
        match self.try_get_resource_mut(handle) {
            Some(item) => item,
            None => invalid_handle(handle),
        }
    }

    #[must_use]
    pub fn try_get_resource<T: GpuResource>(&self, handle: Handle<T>) -> Option<&T> {
        self.arena::<T>()?.items.get(&handle.id())
    }

    pub fn try_get_resource_mut<T: GpuResource>(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.arena_mut::<T>()?.items.get_mut(&handle.id())
    }

    #[must_use]
    pub fn contains<T: GpuResource>(&self, handle: Handle<T>) -> bool {
        self.try_get_resource(handle).is_some()
    }

    /// Number of live objects of type `T`.
    #[must_use]
    pub fn len_of<T: GpuResource>(&self) -> usize {
        self.arena::<T>().map_or(0, |arena| arena.items.len())
    }

    /// Total number of live objects across all types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arenas.values().map(|arena| arena.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates objects of type `T` in id order.
    pub fn iter<T: GpuResource>(&self) -> impl Iterator<Item = &T> {
        self.arena::<T>()
            .into_iter()
            .flat_map(|arena| arena.items.values())
    }

    /// Removes one object and destroys its device objects.
    ///
    /// Returns `false` if the handle was already gone.
    pub fn destroy_resource<T: GpuResource>(
        &mut self,
        device: &mut dyn RenderDevice,
        handle: Handle<T>,
    ) -> bool {
        let removed = self
            .arena_mut::<T>()
            .and_then(|arena| arena.items.remove(&handle.id()));
        match removed {
            Some(item) => {
                item.release(device);
                true
            }
            None => false,
        }
    }

    /// Destroys every object of every type exactly once and empties the store.
    pub fn release_all(&mut self, device: &mut dyn RenderDevice) {
        for arena in self.arenas.values_mut() {
            let count = arena.release_all(device);
            if count > 0 {
                log::debug!("Released {count} x {}", arena.type_name());
            }
        }
        self.arenas.clear();
    }
}

#[cold]
fn invalid_handle<T>(handle: Handle<T>) -> ! {
    log::error!("Unresolvable resource handle {handle:?}");
    panic!("invalid resource handle {handle:?}");
}
