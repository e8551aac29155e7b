//! # galunga_bus
//!
//! A typed publish/subscribe hub that lets systems react to each other's
//! events without knowing about each other.
//!
//! - Handlers are registered per event type and invoked synchronously, in
//!   subscription order, by [`EventBus::publish`].
//! - Subscribing returns a [`Subscription`] token; dropping it removes every
//!   handler registered under that subscriber.
//! - A failing or panicking handler is reported and skipped; the remaining
//!   subscribers still receive the event.
//!
//! The bus is `!Send`: it lives on the simulation thread and is passed
//! explicitly to whoever needs it.
//!
//! ```rust
//! use galunga_bus::EventBus;
//!
//! struct Scored(u32);
//!
//! let bus = EventBus::new();
//! let total = std::rc::Rc::new(std::cell::Cell::new(0));
//! let sink = total.clone();
//! let _sub = bus.subscribe(move |e: &Scored| sink.set(sink.get() + e.0));
//! bus.publish(Scored(3));
//! assert_eq!(total.get(), 3);
//! ```

mod bus;
mod handler;
mod subscription;

pub use bus::{Dispatch, EventBus};
pub use subscription::{SubscriberId, Subscription};
