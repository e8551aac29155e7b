//! System configuration.

use serde::{Deserialize, Serialize};

/// When the collision system reports an overlapping pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPolicy {
    /// Report once when a pair starts overlapping.
    #[default]
    OnEnter,
    /// Report every tick while a pair overlaps.
    Continuous,
}

/// Configuration for the [`CollisionSystem`](crate::CollisionSystem).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Re-report policy for persisting contacts.
    pub policy: ContactPolicy,
}

impl CollisionConfig {
    /// Override the contact policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ContactPolicy) -> Self {
        self.policy = policy;
        self
    }
}
