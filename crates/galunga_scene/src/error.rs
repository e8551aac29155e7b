//! Scene error types.

use galunga_component::Entity;

/// Errors raised by structural scene operations.
///
/// These signal programming errors (operating on an entity that no longer
/// exists) and are meant to be propagated, not silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// The entity was never created or has already been destroyed.
    #[error("entity {0} does not exist")]
    NoSuchEntity(Entity),
}
