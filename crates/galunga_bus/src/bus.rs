//! The [`EventBus`] and its shared registry.

use std::any::{Any, TypeId, type_name};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use anyhow::Result;
use tracing::{error, trace};

use crate::handler::{Adapter, ErasedHandler};
use crate::subscription::{SubscriberId, Subscription};

#[derive(Clone)]
struct Registration {
    subscriber: SubscriberId,
    handler: Rc<RefCell<dyn ErasedHandler>>,
}

/// Handler lists keyed by event type. Shared by the bus handle and, weakly,
/// by every [`Subscription`].
#[derive(Default)]
pub(crate) struct Registry {
    next_subscriber: Cell<u64>,
    handlers: RefCell<HashMap<TypeId, Vec<Registration>>>,
}

impl Registry {
    fn allocate_subscriber(&self) -> SubscriberId {
        let id = self.next_subscriber.get() + 1;
        self.next_subscriber.set(id);
        SubscriberId(id)
    }

    /// Remove every registration of `subscriber`. Returns how many were removed.
    pub(crate) fn remove_subscriber(&self, subscriber: SubscriberId) -> usize {
        let mut handlers = self.handlers.borrow_mut();
        let mut removed = 0;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.subscriber != subscriber);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }
}

/// Outcome of one [`EventBus::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Handlers that ran to completion.
    pub delivered: usize,
    /// Handlers that returned an error, panicked, or were re-entered.
    pub failed: usize,
}

/// Typed publish/subscribe hub.
///
/// `EventBus` is a cheap handle: clones share the same subscribers. It is
/// constructed once by the process entry point and passed to every component
/// that publishes or subscribes.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Rc<Registry>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a subscriber identity with no handlers yet. Attach handlers
    /// with [`EventBus::subscribe_as`] / [`EventBus::try_subscribe_as`].
    pub fn subscriber(&self) -> Subscription {
        Subscription {
            id: self.registry.allocate_subscriber(),
            registry: Rc::downgrade(&self.registry),
        }
    }

    /// Register an infallible handler for events of type `E` under a new
    /// subscriber.
    pub fn subscribe<E, F>(&self, mut handler: F) -> Subscription
    where
        E: 'static,
        F: FnMut(&E) + 'static,
    {
        self.try_subscribe(move |event: &E| -> Result<()> {
            handler(event);
            Ok(())
        })
    }

    /// Register a fallible handler for events of type `E` under a new
    /// subscriber. Errors are reported by the bus, never by the publisher.
    pub fn try_subscribe<E, F>(&self, handler: F) -> Subscription
    where
        E: 'static,
        F: FnMut(&E) -> Result<()> + 'static,
    {
        let subscription = self.subscriber();
        self.try_subscribe_as(&subscription, handler);
        subscription
    }

    /// Add an infallible handler to an existing subscriber.
    pub fn subscribe_as<E, F>(&self, subscription: &Subscription, mut handler: F)
    where
        E: 'static,
        F: FnMut(&E) + 'static,
    {
        self.try_subscribe_as(subscription, move |event: &E| -> Result<()> {
            handler(event);
            Ok(())
        });
    }

    /// Add a fallible handler to an existing subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `subscription` was issued by a different bus.
    pub fn try_subscribe_as<E, F>(&self, subscription: &Subscription, handler: F)
    where
        E: 'static,
        F: FnMut(&E) -> Result<()> + 'static,
    {
        assert!(
            std::ptr::eq(subscription.registry.as_ptr(), Rc::as_ptr(&self.registry)),
            "{} belongs to a different event bus",
            subscription.id
        );
        let handler: Rc<RefCell<dyn ErasedHandler>> =
            Rc::new(RefCell::new(Adapter::<E, F>::new(handler)));
        self.registry
            .handlers
            .borrow_mut()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Registration {
                subscriber: subscription.id,
                handler,
            });
        trace!(subscriber = %subscription.id, event = type_name::<E>(), "subscribed");
    }

    /// Remove every handler registered by `subscriber`. Returns how many
    /// handlers were removed.
    pub fn unsubscribe(&self, subscriber: SubscriberId) -> usize {
        self.registry.remove_subscriber(subscriber)
    }

    /// Deliver `event` to every handler registered for `E` when this call
    /// starts, in subscription order.
    ///
    /// Handlers may subscribe, unsubscribe, or publish while running. Those
    /// changes take effect for later publications; this one still reaches
    /// exactly the handlers present at its start, each once.
    pub fn publish<E: 'static>(&self, event: E) -> Dispatch {
        let snapshot: Vec<Registration> = {
            let handlers = self.registry.handlers.borrow();
            match handlers.get(&TypeId::of::<E>()) {
                Some(list) => list.clone(),
                None => return Dispatch::default(),
            }
        };

        let mut dispatch = Dispatch::default();
        let payload: &dyn Any = &event;
        for registration in snapshot {
            let Ok(mut handler) = registration.handler.try_borrow_mut() else {
                error!(
                    event = type_name::<E>(),
                    subscriber = %registration.subscriber,
                    "handler re-entered by a nested publish; skipped"
                );
                dispatch.failed += 1;
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| handler.handle(payload))) {
                Ok(Ok(())) => dispatch.delivered += 1,
                Ok(Err(err)) => {
                    error!(
                        event = type_name::<E>(),
                        subscriber = %registration.subscriber,
                        error = %err,
                        "event handler failed"
                    );
                    dispatch.failed += 1;
                }
                Err(panic) => {
                    error!(
                        event = type_name::<E>(),
                        subscriber = %registration.subscriber,
                        panic = panic_message(panic.as_ref()),
                        "event handler panicked"
                    );
                    dispatch.failed += 1;
                }
            }
        }
        dispatch
    }

    /// Returns the number of handlers currently registered for `E`.
    #[must_use]
    pub fn subscriber_count<E: 'static>(&self) -> usize {
        self.registry
            .handlers
            .borrow()
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    /// Returns `true` if at least one handler is registered for `E`.
    #[must_use]
    pub fn has_subscribers<E: 'static>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.registry.handlers.borrow();
        f.debug_struct("EventBus")
            .field("event_types", &handlers.len())
            .field("handlers", &handlers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
