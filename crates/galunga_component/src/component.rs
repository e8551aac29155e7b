//! Core [`Component`] trait and associated metadata.
//!
//! Every piece of data stored in a scene must implement [`Component`]. The
//! trait requires `Serialize + Deserialize` so components can be replicated
//! between client and server.
//!
//! ## Stable type identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash algorithm, so client and server agree on it without
//! sharing a `TypeId`.

use serde::{Deserialize, Serialize};

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Hash a name with FNV-1a 64-bit.
///
/// ```text
/// hash = 0xcbf29ce484222325
/// for each byte in name.as_bytes():
///     hash = hash XOR byte
///     hash = hash * 0x00000100000001b3
/// ```
#[must_use]
pub const fn fnv1a_64(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// A unique identifier for a component type, derived from its string name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// Compute the id from a component's string name.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a_64(name))
    }

    /// Compute the id for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::from_name(T::type_name())
    }
}

/// The core component trait.
///
/// # Examples
///
/// ```rust
/// use serde::{Serialize, Deserialize};
/// use galunga_component::Component;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component: 'static + Serialize + for<'de> Deserialize<'de> {
    /// A human-readable name for this component type.
    fn type_name() -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::type_name())
    }
}
