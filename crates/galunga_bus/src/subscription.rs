//! Subscriber identities and the owning [`Subscription`] token.

use std::fmt;
use std::rc::Weak;

use crate::bus::Registry;

/// Identifies one subscriber; all of its handlers share this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl SubscriberId {
    /// Returns the raw id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Owning handle for a subscriber.
///
/// Dropping the token unsubscribes every handler registered under it. The
/// token only holds a weak reference to the bus, so it may outlive it.
#[must_use = "dropping a Subscription immediately unsubscribes its handlers"]
pub struct Subscription {
    pub(crate) id: SubscriberId,
    pub(crate) registry: Weak<Registry>,
}

impl Subscription {
    /// Returns the subscriber id shared by all handlers of this token.
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("bus_alive", &(self.registry.strong_count() > 0))
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_subscriber(self.id);
        }
    }
}
