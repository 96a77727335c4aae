//! Post-processing hooks fired once per stored event.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::store::{Event, EventGroup};

/// What a hook sees after an event has been stored and counted.
#[derive(Debug, Clone, Copy)]
pub struct ProcessedEvent<'a> {
    pub event: &'a Event,
    /// The group after this occurrence was counted.
    pub group: &'a EventGroup,
    /// This event created the group.
    pub is_new_group: bool,
    /// This event reopened a resolved group.
    pub is_regression: bool,
}

/// A post-processing hook.
///
/// Hooks run synchronously on the worker. A hook that panics is logged and
/// skipped; the remaining hooks still run and the event is still acked.
pub trait EventHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_event(&self, processed: &ProcessedEvent<'_>);
}

impl<F> EventHook for F
where
    F: Fn(&ProcessedEvent<'_>) + Send + Sync,
{
    fn on_event(&self, processed: &ProcessedEvent<'_>) {
        self(processed);
    }
}

/// Ordered set of hooks shared by all workers.
#[derive(Clone, Default)]
pub struct Callbacks {
    hooks: Vec<Arc<dyn EventHook>>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook. Hooks fire in registration order.
    pub fn register(&mut self, hook: impl EventHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook, isolating panics. Returns the number that panicked.
    pub fn fire(&self, processed: &ProcessedEvent<'_>) -> usize {
        let mut failures = 0;

        for hook in &self.hooks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| hook.on_event(processed)));
            if let Err(payload) = result {
                failures += 1;
                error!(
                    hook = hook.name(),
                    event_id = %processed.event.event_id,
                    group_id = processed.group.id,
                    panic = %panic_message(payload.as_ref()),
                    "Event hook panicked"
                );
            }
        }

        failures
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
