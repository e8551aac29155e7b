//! Outgoing message queue.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use galunga_bus::{EventBus, Subscription};
use tracing::warn;

use crate::codec;
use crate::error::NetError;
use crate::message::{Message, MessageTypeId};
use crate::packet::Channel;
use crate::peer::PeerId;

/// Who an outgoing message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One peer (server side).
    Peer(PeerId),
    /// Every connected remote; on the client, the server.
    All,
}

/// An encoded message waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub target: Target,
    pub channel: Channel,
    pub tag: MessageTypeId,
    pub payload: Vec<u8>,
}

/// Clonable handle for queueing messages from anywhere on the simulation
/// thread, including bus handlers. Queued messages go out at the end of the
/// owner's next `poll`.
#[derive(Clone, Default)]
pub struct Outbox {
    queue: Rc<RefCell<Vec<Outgoing>>>,
}

impl Outbox {
    /// An empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `message` for one peer.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if the message cannot be encoded.
    pub fn send_to<M: Message>(
        &self,
        peer: PeerId,
        channel: Channel,
        message: &M,
    ) -> Result<(), NetError> {
        self.push(Target::Peer(peer), channel, message)
    }

    /// Queue `message` for every connected remote.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if the message cannot be encoded.
    pub fn broadcast<M: Message>(&self, channel: Channel, message: &M) -> Result<(), NetError> {
        self.push(Target::All, channel, message)
    }

    /// Broadcast every `M` published on `bus` until the returned
    /// subscription is dropped.
    pub fn replicate<M: Message>(&self, bus: &EventBus, channel: Channel) -> Subscription {
        let outbox = self.clone();
        bus.subscribe(move |message: &M| {
            if let Err(e) = outbox.broadcast(channel, message) {
                warn!(message = M::type_name(), error = %e, "failed to replicate message");
            }
        })
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Take every queued message.
    pub(crate) fn drain(&self) -> Vec<Outgoing> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    fn push<M: Message>(&self, target: Target, channel: Channel, message: &M) -> Result<(), NetError> {
        let payload = codec::encode(message)?;
        self.queue.borrow_mut().push(Outgoing {
            target,
            channel,
            tag: M::message_type_id(),
            payload,
        });
        Ok(())
    }
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox").field("pending", &self.len()).finish()
    }
}
