//! Type-erased handler wrappers.

use std::any::{Any, type_name};
use std::marker::PhantomData;

use anyhow::{Result, anyhow};

/// A handler that accepts an opaque event payload.
pub(crate) trait ErasedHandler {
    fn handle(&mut self, event: &dyn Any) -> Result<()>;
}

/// Adapts a typed `FnMut(&E)` into an [`ErasedHandler`] by downcasting.
pub(crate) struct Adapter<E, F> {
    handler: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> Adapter<E, F> {
    /// Wrap `handler`.
    pub(crate) fn new(handler: F) -> Self {
        Self {
            handler,
            _event: PhantomData,
        }
    }
}

impl<E, F> ErasedHandler for Adapter<E, F>
where
    E: 'static,
    F: FnMut(&E) -> Result<()>,
{
    fn handle(&mut self, event: &dyn Any) -> Result<()> {
        let event = event
            .downcast_ref::<E>()
            .ok_or_else(|| anyhow!("payload is not a {}", type_name::<E>()))?;
        (self.handler)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_downcasts_matching_payload() {
        let mut seen = 0;
        {
            let mut adapter = Adapter::<u32, _>::new(|v: &u32| -> Result<()> {
                seen += *v;
                Ok(())
            });
            adapter.handle(&7_u32).unwrap();
        }
        assert_eq!(seen, 7);
    }

    #[test]
    fn test_adapter_rejects_wrong_payload() {
        let mut adapter = Adapter::<u32, _>::new(|_: &u32| -> Result<()> { Ok(()) });
        assert!(adapter.handle(&"nope").is_err());
    }
}
