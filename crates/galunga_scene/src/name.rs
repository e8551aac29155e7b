//! Entity name component.

use galunga_component::Component;
use serde::{Deserialize, Serialize};

/// A human-readable name, attached to every entity at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Name {
    /// The entity's display name.
    pub value: String,
}

impl Name {
    /// Create a new name component.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { value: name.into() }
    }
}

impl Component for Name {
    fn type_name() -> &'static str {
        "Name"
    }
}
