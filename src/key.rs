//! Stable type-identity keys used to index values inside a [`crate::Context`].
//!
//! A [`Context`](crate::Context) indexes published values by *type identity*, not by
//! structural equality: two distinct types that happen to derive equal `PartialEq`
//! impls must never collide. `TypeId` is the only primitive that gives us that
//! guarantee, so `TypeKey` wraps it directly rather than hashing or comparing any
//! part of the value itself.

use std::any::TypeId;

/// A stable fingerprint for a concrete Rust type, used as the key type in a
/// [`Context`](crate::Context)'s value map.
///
/// # Examples
///
/// ```rust
/// use modtree::TypeKey;
///
/// let a = TypeKey::of::<u32>();
/// let b = TypeKey::of::<u32>();
/// let c = TypeKey::of::<i32>();
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Build the key for `T`.
    #[inline(always)]
    pub fn of<T: 'static>() -> Self {
        TypeKey {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The human-readable type name, for diagnostics only — never compared on.
    pub fn display_name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

// Hot path: compare TypeId only. The name exists for diagnostics, not identity.
impl PartialEq for TypeKey {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    #[inline(always)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
