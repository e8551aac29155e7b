//! Wire messages and the registry that turns them back into bus events.
//!
//! A message travels as its [`MessageTypeId`] tag plus a MessagePack
//! payload. The receiving side keeps a [`MessageRegistry`] mapping tags to
//! decoders; a decoded message becomes exactly one bus publication.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use galunga_bus::EventBus;
use galunga_component::fnv1a_64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::NetError;

/// Stable identifier for a message type, derived from its name with FNV-1a.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageTypeId(pub u64);

impl MessageTypeId {
    /// Compute the id for a type name.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a_64(name))
    }

    /// The id of message type `M`.
    #[must_use]
    pub fn of<M: Message>() -> Self {
        M::message_type_id()
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// A value that can cross the wire.
///
/// ```rust
/// use galunga_net::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Chat { text: String }
///
/// impl Message for Chat {
///     fn type_name() -> &'static str { "Chat" }
/// }
/// ```
pub trait Message: 'static + Serialize + DeserializeOwned {
    /// A name unique among registered messages; hashed into the wire tag.
    fn type_name() -> &'static str;

    /// The wire tag for this type.
    fn message_type_id() -> MessageTypeId {
        MessageTypeId::from_name(Self::type_name())
    }
}

type Decoder<C> = Box<dyn Fn(&C, &[u8], &EventBus) -> Result<(), NetError>>;

struct Entry<C> {
    name: &'static str,
    type_id: TypeId,
    decode: Decoder<C>,
}

/// Maps wire tags to decoders that publish onto the bus.
///
/// `C` is the per-delivery context handed to the publisher (the sending
/// peer on the server, nothing on the client).
pub struct MessageRegistry<C> {
    entries: HashMap<MessageTypeId, Entry<C>>,
}

impl<C> MessageRegistry<C> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `M`; `publish` turns each decoded message into a bus event.
    /// Registering the same type again replaces its publisher.
    ///
    /// # Panics
    ///
    /// Panics if a different type already registered the same tag.
    pub fn insert<M: Message>(&mut self, publish: impl Fn(&C, M, &EventBus) + 'static) {
        let tag = M::message_type_id();
        if let Some(existing) = self.entries.get(&tag) {
            assert!(
                existing.type_id == TypeId::of::<M>(),
                "message `{}` collides with `{}` on tag {tag}",
                M::type_name(),
                existing.name
            );
        }
        self.entries.insert(
            tag,
            Entry {
                name: M::type_name(),
                type_id: TypeId::of::<M>(),
                decode: Box::new(move |ctx, payload, bus| {
                    let message: M = codec::decode(payload)?;
                    publish(ctx, message, bus);
                    Ok(())
                }),
            },
        );
    }

    /// Returns `true` if `tag` has a decoder.
    #[must_use]
    pub fn contains(&self, tag: MessageTypeId) -> bool {
        self.entries.contains_key(&tag)
    }

    /// The registered name for `tag`.
    #[must_use]
    pub fn name(&self, tag: MessageTypeId) -> Option<&'static str> {
        self.entries.get(&tag).map(|e| e.name)
    }

    /// Number of registered message types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no message type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode `payload` and publish it. Returns `Ok(false)` for an
    /// unregistered tag, publishing nothing.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Decode`] if the payload does not decode as the
    /// registered type.
    pub fn dispatch(
        &self,
        ctx: &C,
        tag: MessageTypeId,
        payload: &[u8],
        bus: &EventBus,
    ) -> Result<bool, NetError> {
        match self.entries.get(&tag) {
            Some(entry) => (entry.decode)(ctx, payload, bus).map(|()| true),
            None => Ok(false),
        }
    }
}

impl<C> Default for MessageRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for MessageRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.values().map(|e| e.name))
            .finish()
    }
}
