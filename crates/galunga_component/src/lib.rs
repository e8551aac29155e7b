//! # galunga_component
//!
//! The "E" and "C" in ECS. Defines what an entity and a component are and
//! how component values are stored.
//!
//! This crate provides:
//!
//! - [`Entity`]: generational `u32` slot identifiers.
//! - [`EntityAllocator`]: hands out ids and never reissues a live one.
//! - [`Component`] trait: the contract all scene data must satisfy.
//! - [`ComponentStorage`]: sparse-set storage for one component type.

pub mod component;
pub mod entity;
pub mod storage;

pub use component::{Component, ComponentTypeId, fnv1a_64};
pub use entity::{Entity, EntityAllocator};
pub use storage::{ComponentStorage, ErasedStorage, NamedStorage};
