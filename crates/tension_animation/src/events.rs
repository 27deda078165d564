//! Lifecycle events
//!
//! Per animation the order is always `on_animate` → `on_start` →
//! `on_change`* → `on_rest`. Handlers registered on a spring ("base"
//! handlers) run first, then the spring's owner (a controller) is notified,
//! then the handlers passed with a single update. The layers are folded into
//! one [`DispatchTable`] when the request is built.
//!
//! Events raised while the clock is locked are collected into [`Effects`] and
//! delivered only after the lock is released, so any handler may call back
//! into springs and controllers.

use crate::clock::SpringId;
use crate::completion::CompletionSource;
use crate::error::AnimationError;
use crate::props::AnimationRequest;
use smallvec::SmallVec;
use std::sync::Arc;
use tension_core::AnimatableValue;

/// Snapshot passed to `on_start`, `on_change` and `on_rest`
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationResult {
    pub value: AnimatableValue,
    /// The goal was reached
    pub finished: bool,
    /// The animation was stopped before reaching its goal
    pub cancelled: bool,
}

impl AnimationResult {
    /// An in-flight snapshot
    pub fn moving(value: AnimatableValue) -> Self {
        Self {
            value,
            finished: false,
            cancelled: false,
        }
    }

    pub fn finished(value: AnimatableValue) -> Self {
        Self {
            value,
            finished: true,
            cancelled: false,
        }
    }

    pub fn cancelled(value: AnimatableValue) -> Self {
        Self {
            value,
            finished: false,
            cancelled: true,
        }
    }
}

/// Handler for `on_start`, `on_change` and `on_rest`
pub type EventHandler = Arc<dyn Fn(&AnimationResult) + Send + Sync>;

/// Pre-flight handler; may rewrite the request before it is queued
pub type AnimateHandler = Arc<dyn Fn(&mut AnimationRequest) + Send + Sync>;

/// Receives errors raised while the clock ticks
pub type ErrorHandler = Arc<dyn Fn(SpringId, &AnimationError) + Send + Sync>;

/// Optional handler slots for one spring or one update
#[derive(Clone, Default)]
pub struct Handlers {
    pub on_animate: Option<AnimateHandler>,
    pub on_start: Option<EventHandler>,
    pub on_change: Option<EventHandler>,
    pub on_rest: Option<EventHandler>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("on_animate", &self.on_animate.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_rest", &self.on_rest.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventKind {
    Start,
    Change,
    Rest,
}

type Slot = SmallVec<[EventHandler; 2]>;

/// Handlers resolved for one animation, base handlers first
#[derive(Clone, Default)]
pub(crate) struct DispatchTable {
    start: Slot,
    change: Slot,
    rest: Slot,
}

impl DispatchTable {
    /// Fold handler layers into one table, earlier layers running first
    pub(crate) fn resolve(layers: &[&Handlers]) -> Self {
        let mut table = Self::default();
        for layer in layers {
            table.start.extend(layer.on_start.iter().cloned());
            table.change.extend(layer.on_change.iter().cloned());
            table.rest.extend(layer.on_rest.iter().cloned());
        }
        table
    }

    fn slot(&self, kind: EventKind) -> &Slot {
        match kind {
            EventKind::Start => &self.start,
            EventKind::Change => &self.change,
            EventKind::Rest => &self.rest,
        }
    }
}

enum Effect {
    Event {
        handlers: Slot,
        result: AnimationResult,
    },
    Resolve {
        source: CompletionSource<AnimationResult>,
        result: AnimationResult,
    },
    Error {
        spring: SpringId,
        error: AnimationError,
    },
}

/// Side effects collected under the clock lock, run in order afterwards
#[derive(Default)]
pub(crate) struct Effects {
    queue: Vec<Effect>,
    /// Tables of ended animations; their handlers may own springs, so they
    /// are dropped only once the lock is gone
    retired: Vec<DispatchTable>,
}

impl Effects {
    pub(crate) fn emit(&mut self, table: &DispatchTable, kind: EventKind, result: AnimationResult) {
        let handlers = table.slot(kind);
        if handlers.is_empty() {
            return;
        }
        self.queue.push(Effect::Event {
            handlers: handlers.clone(),
            result,
        });
    }

    pub(crate) fn resolve(
        &mut self,
        source: CompletionSource<AnimationResult>,
        result: AnimationResult,
    ) {
        self.queue.push(Effect::Resolve { source, result });
    }

    pub(crate) fn error(&mut self, spring: SpringId, error: AnimationError) {
        tracing::warn!("spring {:?}: {}", spring, error);
        self.queue.push(Effect::Error { spring, error });
    }

    pub(crate) fn retire(&mut self, table: DispatchTable) {
        self.retired.push(table);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.retired.is_empty()
    }

    /// Deliver everything; must be called without the clock lock held
    pub(crate) fn dispatch(self, error_handler: Option<&ErrorHandler>) {
        for effect in self.queue {
            match effect {
                Effect::Event { handlers, result } => {
                    for handler in &handlers {
                        handler(&result);
                    }
                }
                Effect::Resolve { source, result } => {
                    source.resolve(result);
                }
                Effect::Error { spring, error } => {
                    if let Some(handler) = error_handler {
                        handler(spring, &error);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> EventHandler {
        let log = Arc::clone(log);
        Arc::new(move |_: &AnimationResult| log.lock().unwrap().push(name.to_string()))
    }

    #[test]
    fn test_base_handlers_run_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base = Handlers {
            on_rest: Some(recorder(&log, "base")),
            ..Handlers::default()
        };
        let request = Handlers {
            on_rest: Some(recorder(&log, "request")),
            ..Handlers::default()
        };

        let owner = Handlers {
            on_rest: Some(recorder(&log, "owner")),
            ..Handlers::default()
        };

        let table = DispatchTable::resolve(&[&base, &owner, &request]);
        let mut effects = Effects::default();
        let result = AnimationResult::finished(AnimatableValue::Scalar(1.0));
        effects.emit(&table, EventKind::Rest, result.clone());
        effects.emit(&table, EventKind::Start, result);
        effects.dispatch(None);

        assert_eq!(*log.lock().unwrap(), vec!["base", "owner", "request"]);
    }

    #[test]
    fn test_empty_slots_queue_nothing() {
        let table = DispatchTable::default();
        let mut effects = Effects::default();
        let result = AnimationResult::moving(AnimatableValue::Scalar(0.0));
        effects.emit(&table, EventKind::Change, result);
        assert!(effects.is_empty());
    }
}
