//! Typed Resource Handles
//!
//! A [`Handle<T>`] is a small, copyable identity for an object owned by a
//! [`ResourceStore`](super::store::ResourceStore). It carries only a 32-bit id
//! and a type tag; holding one never keeps the object alive, and the id stays
//! valid across any reallocation of the object's native device object.
//!
//! Ids come from one process-wide monotonic counter, so two live objects never
//! share an id and a destroyed id is never handed out again.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::renderer::device::RenderDevice;

static NEXT_RESOURCE_ID: AtomicU32 = AtomicU32::new(1);

/// Generates a new resource id. `0` is never returned.
#[inline]
#[must_use]
pub fn generate_resource_id() -> u32 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Weak, type-tagged reference to a stored resource.
pub struct Handle<T> {
    id: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }
}

// Manual impls: deriving would put bounds on `T`.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = std::any::type_name::<T>();
        let short = full.rsplit("::").next().unwrap_or(full);
        write!(f, "Handle<{short}>({})", self.id)
    }
}

/// An object that carries its own resource id.
pub trait IdResource: 'static {
    fn res_id(&self) -> u32;

    #[inline]
    fn res_handle(&self) -> Handle<Self>
    where
        Self: Sized,
    {
        Handle::from_raw(self.res_id())
    }
}

/// An object that owns native device objects.
///
/// `release` is called exactly once when the owning store drops the object.
pub trait GpuResource: IdResource {
    fn release(self, device: &mut dyn RenderDevice);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let a = generate_resource_id();
        let b = generate_resource_id();
        assert_ne!(a, 0);
        assert!(b > a);
    }

    #[test]
    fn handles_compare_by_id_only() {
        let a: Handle<Dummy> = Handle::from_raw(7);
        let b: Handle<Dummy> = Handle::from_raw(7);
        let c: Handle<Dummy> = Handle::from_raw(9);
        assert_eq!(a, b);
        assert!(a < c);
        assert_eq!(format!("{a:?}"), "Handle<Dummy>(7)");
    }
}
