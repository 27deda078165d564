//! Controllers
//!
//! A [`Controller`] groups named springs that are updated and observed
//! together. Keys keep their insertion order, which is also the order in which
//! a [`ControllerProps`] update is fanned out.
//!
//! `start` returns one aggregate [`Completion`] that resolves once every
//! targeted spring has settled, been interrupted or been cancelled. The
//! aggregate is `finished` only if every key finished and `cancelled` if any
//! key was cancelled.
//!
//! Controller handlers are installed apart from each spring's own handlers,
//! so `controller.get(key).on_change(..)` does not silence `on_change` on the
//! controller.
//!
//! # Example
//!
//! ```
//! use tension_animation::{Clock, Controller, ControllerProps};
//!
//! let clock = Clock::new();
//! let mut controller = Controller::new(&clock.handle());
//!
//! let done = controller
//!     .start(ControllerProps::new().from("x", 0.0).to("x", 100.0).to("y", 5.0))
//!     .unwrap();
//! while clock.advance(16.0) {}
//!
//! assert!(done.result().unwrap().finished);
//! assert_eq!(controller.keys().collect::<Vec<_>>(), ["x", "y"]);
//! ```

use crate::clock::{ClockHandle, FrameHookId, SpringId};
use crate::completion::{self, Completion, CompletionSource, Observer};
use crate::error::{AnimationError, Result};
use crate::events::AnimationResult;
use crate::lock;
use crate::props::{ControllerProps, Target};
use crate::spring_value::SpringValue;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, Weak};
use tension_core::AnimatableValue;

/// Values of every key, in key order
pub type ValueMap = IndexMap<String, AnimatableValue>;

/// Per-key handler: `(key, result)`
pub type KeyedHandler = Arc<dyn Fn(&str, &AnimationResult) + Send + Sync>;

/// Receives the values of every key
pub type ValuesHandler = Arc<dyn Fn(&ValueMap) + Send + Sync>;

/// Receives the aggregate result of one `start`
pub type ControllerRestHandler = Arc<dyn Fn(&ControllerResult) + Send + Sync>;

/// Aggregate outcome of a controller update
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerResult {
    pub values: ValueMap,
    /// Every targeted key finished
    pub finished: bool,
    /// At least one targeted key was cancelled
    pub cancelled: bool,
}

/// State shared with the bridges installed on each spring
struct ControllerShared {
    clock: ClockHandle,
    keys: Mutex<IndexMap<String, SpringId>>,
    on_start: Mutex<Option<KeyedHandler>>,
    on_change: Mutex<Option<ValuesHandler>>,
    on_rest: Mutex<Option<ControllerRestHandler>>,
    on_frame: Mutex<Option<ValuesHandler>>,
    frame_hook: Mutex<Option<FrameHookId>>,
}

impl ControllerShared {
    fn snapshot(&self) -> ValueMap {
        let keys = lock(&self.keys).clone();
        let ids: Vec<SpringId> = keys.values().copied().collect();
        let Ok(values) = self.clock.values(&ids) else {
            return ValueMap::new();
        };
        keys.into_keys()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()
    }

    fn started(&self, key: &str, result: &AnimationResult) {
        let handler = lock(&self.on_start).clone();
        if let Some(handler) = handler {
            handler(key, result);
        }
    }

    fn changed(&self) {
        let handler = lock(&self.on_change).clone();
        if let Some(handler) = handler {
            handler(&self.snapshot());
        }
    }

    /// One clock frame stepped `stepped`; report if any key was among them
    fn framed(&self, stepped: &[SpringId]) {
        let Some(handler) = lock(&self.on_frame).clone() else {
            return;
        };
        let owned = {
            let keys = lock(&self.keys);
            keys.values().any(|id| stepped.contains(id))
        };
        if owned {
            handler(&self.snapshot());
        }
    }

    fn rested(&self, result: &ControllerResult) {
        let handler = lock(&self.on_rest).clone();
        if let Some(handler) = handler {
            handler(result);
        }
    }
}

/// Counts down the completions of one `start`
struct Join {
    state: Mutex<JoinState>,
    source: Mutex<Option<CompletionSource<ControllerResult>>>,
    shared: Weak<ControllerShared>,
}

struct JoinState {
    remaining: usize,
    finished: bool,
    cancelled: bool,
}

impl Join {
    /// Counts one key's result towards the aggregate
    fn observer(self: &Arc<Self>) -> Observer<AnimationResult> {
        let join = Arc::clone(self);
        Box::new(move |result: &AnimationResult| join.settle(result))
    }

    fn settle(&self, result: &AnimationResult) {
        let (finished, cancelled) = {
            let mut state = lock(&self.state);
            state.finished &= result.finished;
            state.cancelled |= result.cancelled;
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining > 0 {
                return;
            }
            (state.finished, state.cancelled)
        };
        self.complete(finished, cancelled);
    }

    fn complete(&self, finished: bool, cancelled: bool) {
        let shared = self.shared.upgrade();
        let result = ControllerResult {
            values: shared.as_ref().map(|s| s.snapshot()).unwrap_or_default(),
            finished,
            cancelled,
        };
        if let Some(shared) = shared {
            shared.rested(&result);
        }
        if let Some(source) = lock(&self.source).take() {
            source.resolve(result);
        }
    }
}

/// A keyed group of springs
pub struct Controller {
    clock: ClockHandle,
    springs: IndexMap<String, SpringValue>,
    shared: Arc<ControllerShared>,
}

impl Controller {
    pub fn new(clock: &ClockHandle) -> Self {
        Self {
            clock: clock.clone(),
            springs: IndexMap::new(),
            shared: Arc::new(ControllerShared {
                clock: clock.clone(),
                keys: Mutex::new(IndexMap::new()),
                on_start: Mutex::new(None),
                on_change: Mutex::new(None),
                on_rest: Mutex::new(None),
                on_frame: Mutex::new(None),
                frame_hook: Mutex::new(None),
            }),
        }
    }

    /// Add a spring under `key`, resting at `initial`
    ///
    /// Returns the existing spring unchanged if the key is already present.
    pub fn add(
        &mut self,
        key: impl Into<String>,
        initial: impl Into<AnimatableValue>,
    ) -> Result<&SpringValue> {
        let key = key.into();
        if !self.springs.contains_key(&key) {
            let spring = SpringValue::new(&self.clock, initial)?;

            let on_start = Arc::downgrade(&self.shared);
            let on_change = Arc::downgrade(&self.shared);
            let start_key = key.clone();
            spring.bridge(move |handlers| {
                handlers.on_start = Some(Arc::new(move |result: &AnimationResult| {
                    if let Some(shared) = on_start.upgrade() {
                        shared.started(&start_key, result);
                    }
                }));
                handlers.on_change = Some(Arc::new(move |_: &AnimationResult| {
                    if let Some(shared) = on_change.upgrade() {
                        shared.changed();
                    }
                }));
            });

            lock(&self.shared.keys).insert(key.clone(), spring.id());
            tracing::debug!("controller: added key {:?}", key);
            self.springs.insert(key.clone(), spring);
        }
        self.springs.get(&key).ok_or(AnimationError::UnknownKey(key))
    }

    pub fn get(&self, key: &str) -> Option<&SpringValue> {
        self.springs.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.springs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.springs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.springs.is_empty()
    }

    /// Current value of every key
    pub fn values(&self) -> ValueMap {
        self.shared.snapshot()
    }

    /// Write values without animating; missing keys are created
    pub fn set<I, K, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AnimatableValue>,
    {
        for (key, value) in values {
            let key = key.into();
            let value = value.into();
            match self.springs.get(&key) {
                Some(spring) => spring.set(value)?,
                None => {
                    self.add(key, value)?;
                }
            }
        }
        Ok(())
    }

    /// Fan `props` out to every key it targets
    ///
    /// Keys named in `from`/`to` that do not exist yet are created from their
    /// starting value. Every targeted key is checked before any of them is
    /// updated: on a configuration error nothing animates and keys created by
    /// this call are removed again.
    pub fn start(&mut self, props: ControllerProps) -> Result<Completion<ControllerResult>> {
        let mut created = Vec::new();
        let new_keys: Vec<String> = props
            .from
            .keys()
            .chain(props.to.keys())
            .filter(|key| !self.springs.contains_key(*key))
            .cloned()
            .collect();
        for key in new_keys {
            if self.springs.contains_key(&key) {
                continue;
            }
            let added = self
                .initial_value(&props, &key)
                .and_then(|initial| self.add(key.clone(), initial).map(|_| ()));
            if let Err(error) = added {
                self.remove_keys(created);
                return Err(error);
            }
            created.push(key);
        }

        let mut prepared = Vec::new();
        let mut rejected = None;
        for (key, spring) in &self.springs {
            if !props.targets(key) {
                continue;
            }
            let checked = spring
                .prepare(props.for_key(key))
                .and_then(|request| spring.check(&request).map(|_| request));
            match checked {
                Ok(request) => prepared.push((key.clone(), request)),
                Err(error) => {
                    rejected = Some((key.clone(), error));
                    break;
                }
            }
        }
        if let Some((key, error)) = rejected {
            tracing::debug!("controller: key {:?} rejected: {}", key, error);
            self.remove_keys(created);
            return Err(error);
        }

        let (source, completion) = completion::channel();
        let join = Arc::new(Join {
            state: Mutex::new(JoinState {
                remaining: prepared.len(),
                finished: true,
                cancelled: false,
            }),
            source: Mutex::new(Some(source)),
            shared: Arc::downgrade(&self.shared),
        });

        if prepared.is_empty() {
            join.complete(true, false);
        }
        for (key, request) in prepared {
            let spring = self
                .springs
                .get(&key)
                .ok_or_else(|| AnimationError::UnknownKey(key.clone()))?;
            spring.apply(request, Some(join.observer()))?;
        }
        Ok(completion)
    }

    /// Drop keys added by a `start` that was rejected
    fn remove_keys(&mut self, keys: Vec<String>) {
        for key in keys {
            lock(&self.shared.keys).shift_remove(&key);
            if let Some(spring) = self.springs.shift_remove(&key) {
                spring.dispose();
            }
        }
    }

    /// Starting value for a key created by `props`
    fn initial_value(&self, props: &ControllerProps, key: &str) -> Result<AnimatableValue> {
        let (from, to) = if props.reverse {
            (props.to.get(key), props.from.get(key))
        } else {
            (props.from.get(key), props.to.get(key))
        };
        match from.or(to) {
            Some(Target::Value(value)) => Ok(value.clone()),
            Some(Target::Follow(source)) => self
                .clock
                .values(&[*source])?
                .pop()
                .flatten()
                .ok_or(AnimationError::DependencyDisposed),
            None => Err(AnimationError::UnknownKey(key.to_string())),
        }
    }

    /// Cancel the given keys, or every key when `keys` is None
    pub fn stop(&self, keys: Option<&[&str]>) -> Result<()> {
        match keys {
            None => {
                for spring in self.springs.values() {
                    spring.stop()?;
                }
            }
            Some(keys) => {
                for key in keys {
                    self.springs
                        .get(*key)
                        .ok_or_else(|| AnimationError::UnknownKey(key.to_string()))?
                        .stop()?;
                }
            }
        }
        Ok(())
    }

    /// Dispose every spring; the controller is left empty
    pub fn dispose(&mut self) {
        lock(&self.shared.keys).clear();
        for (key, spring) in self.springs.drain(..) {
            tracing::debug!("controller: disposing key {:?}", key);
            spring.dispose();
        }
    }

    /// Called with the key when any spring starts
    pub fn on_start<F>(&self, f: F)
    where
        F: Fn(&str, &AnimationResult) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_start) = Some(Arc::new(f));
    }

    /// Called with every key's value when any spring changes
    pub fn on_change<F>(&self, f: F)
    where
        F: Fn(&ValueMap) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_change) = Some(Arc::new(f));
    }

    /// Called with the aggregate result of each `start`
    pub fn on_rest<F>(&self, f: F)
    where
        F: Fn(&ControllerResult) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_rest) = Some(Arc::new(f));
    }

    /// Called once per clock frame with every key's value, while any key is
    /// subscribed to the clock
    pub fn on_frame<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&ValueMap) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_frame) = Some(Arc::new(f));

        let mut hook = lock(&self.shared.frame_hook);
        if hook.is_none() {
            let weak = Arc::downgrade(&self.shared);
            let id = self.clock.add_frame_hook(Arc::new(move |stepped: &[SpringId]| {
                if let Some(shared) = weak.upgrade() {
                    shared.framed(stepped);
                }
            }))?;
            *hook = Some(id);
        }
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(id) = lock(&self.shared.frame_hook).take() {
            self.clock.remove_frame_hook(id);
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("keys", &self.springs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::props::Cancel;
    use crate::spring_value::Phase;

    fn settle(clock: &Clock) {
        let mut frames = 0;
        while clock.advance(16.0) {
            frames += 1;
            assert!(frames < 2000, "clock never went idle");
        }
    }

    #[test]
    fn test_keys_keep_insertion_order() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        controller.add("b", 0.0).unwrap();
        controller.add("a", 1.0).unwrap();
        controller.add("b", 5.0).unwrap();

        assert_eq!(controller.keys().collect::<Vec<_>>(), ["b", "a"]);
        let values = controller.values();
        assert_eq!(values["b"], AnimatableValue::Scalar(0.0));
        assert_eq!(values["a"], AnimatableValue::Scalar(1.0));
    }

    #[test]
    fn test_set_is_eager() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        controller.start(ControllerProps::new().from("x", 0.0).to("x", 10.0)).unwrap();
        clock.advance(16.0);

        controller.set([("x", 3.0), ("y", 4.0)]).unwrap();
        assert_eq!(controller.values()["x"], AnimatableValue::Scalar(3.0));
        assert_eq!(controller.values()["y"], AnimatableValue::Scalar(4.0));
        assert_eq!(controller.get("x").unwrap().phase(), Phase::Idle);
        assert!(!clock.has_active());
    }

    #[test]
    fn test_empty_start_resolves_immediately() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        let done = controller.start(ControllerProps::new()).unwrap();
        let result = done.result().unwrap();
        assert!(result.finished);
        assert!(!result.cancelled);
    }

    #[test]
    fn test_stop_unknown_key() {
        let clock = Clock::new();
        let controller = Controller::new(&clock.handle());
        assert_eq!(
            controller.stop(Some(&["nope"])).unwrap_err(),
            AnimationError::UnknownKey("nope".to_string())
        );
    }

    #[test]
    fn test_cancel_prop_cancels_matching_keys() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        let first = controller
            .start(ControllerProps::new().from("x", 0.0).to("x", 10.0).to("y", 10.0))
            .unwrap();
        clock.advance(16.0);

        let cancel = controller
            .start(ControllerProps::new().cancel(Cancel::Keys(vec!["x".into()])))
            .unwrap();
        assert!(cancel.result().unwrap().cancelled);

        // y started at its goal, so x was the last key outstanding
        let result = first.result().unwrap();
        assert!(result.cancelled);
        assert!(!result.finished);
        assert_eq!(result.values["y"], AnimatableValue::Scalar(10.0));
    }

    #[test]
    fn test_controller_handlers() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        let started = Arc::new(Mutex::new(Vec::new()));
        let changes = Arc::new(Mutex::new(0usize));
        let rests = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&started);
        controller.on_start(move |key, _| s.lock().unwrap().push(key.to_string()));
        let c = Arc::clone(&changes);
        controller.on_change(move |values| {
            assert_eq!(values.len(), 2);
            *c.lock().unwrap() += 1;
        });
        let r = Arc::clone(&rests);
        controller.on_rest(move |result| r.lock().unwrap().push(result.finished));

        controller.add("x", 0.0).unwrap();
        controller.add("y", 0.0).unwrap();
        controller.start(ControllerProps::new().to("x", 1.0).to("y", 2.0)).unwrap();
        settle(&clock);

        assert_eq!(*started.lock().unwrap(), ["x", "y"]);
        assert!(*changes.lock().unwrap() > 0);
        assert_eq!(*rests.lock().unwrap(), [true]);
    }

    #[test]
    fn test_spring_handlers_do_not_replace_controller_handlers() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        let snapshots = Arc::new(Mutex::new(0usize));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&snapshots);
        controller.on_change(move |_| *c.lock().unwrap() += 1);
        let s = Arc::clone(&starts);
        controller.on_start(move |key, _| s.lock().unwrap().push(key.to_string()));

        controller.add("x", 0.0).unwrap();
        let own_changes = Arc::new(Mutex::new(0usize));
        let o = Arc::clone(&own_changes);
        let x = controller.get("x").unwrap();
        x.on_change(move |_| *o.lock().unwrap() += 1);
        x.on_start(|_| {});

        controller.start(ControllerProps::new().to("x", 1.0)).unwrap();
        settle(&clock);

        assert!(*snapshots.lock().unwrap() > 0);
        assert_eq!(*snapshots.lock().unwrap(), *own_changes.lock().unwrap());
        assert_eq!(*starts.lock().unwrap(), ["x"]);
    }

    #[test]
    fn test_rejected_start_leaves_every_key_untouched() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        controller.set([("x", AnimatableValue::from(0.0)), ("y", [0.0, 0.0].into())]).unwrap();

        let err = controller
            .start(ControllerProps::new().to("x", 10.0).to("y", 5.0))
            .unwrap_err();
        assert!(matches!(err, AnimationError::ShapeMismatch { .. }));
        assert_eq!(controller.get("x").unwrap().phase(), Phase::Idle);
        assert_eq!(controller.values()["x"], AnimatableValue::Scalar(0.0));
        assert!(!clock.has_active());
    }

    #[test]
    fn test_rejected_start_removes_created_keys() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        controller.add("x", 0.0).unwrap();

        let err = controller
            .start(ControllerProps::new().to("x", 1.0).from("z", [0.0, 1.0]).to("z", 2.0))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(controller.keys().collect::<Vec<_>>(), ["x"]);
        assert!(!controller.values().contains_key("z"));
        assert_eq!(clock.spring_count(), 1);
        assert!(!clock.has_active());
    }

    #[test]
    fn test_on_frame_once_per_advance() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        let frames = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&frames);
        controller
            .on_frame(move |values| f.lock().unwrap().push(values["x"].clone()))
            .unwrap();
        controller.set([("x", 0.0), ("y", 0.0)]).unwrap();

        let outsider = SpringValue::new(&clock.handle(), 0.0).unwrap();
        outsider.start(1.0).unwrap();
        clock.advance(16.0);
        outsider.stop().unwrap();
        assert!(frames.lock().unwrap().is_empty());

        controller.start(ControllerProps::new().to("x", 1.0).to("y", 1.0)).unwrap();
        let mut advances = 0;
        while clock.advance(16.0) {
            advances += 1;
        }
        advances += 1;

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), advances);
        assert_eq!(frames.last(), Some(&AnimatableValue::Scalar(1.0)));
    }

    #[test]
    fn test_on_frame_hook_removed_on_drop() {
        let clock = Clock::new();
        let controller = Controller::new(&clock.handle());
        controller.on_frame(|_| {}).unwrap();
        controller.on_frame(|_| {}).unwrap();
        assert_eq!(clock.frame_hook_count(), 1);

        drop(controller);
        assert_eq!(clock.frame_hook_count(), 0);
    }

    #[test]
    fn test_dispose_removes_springs() {
        let clock = Clock::new();
        let mut controller = Controller::new(&clock.handle());
        controller.start(ControllerProps::new().from("x", 0.0).to("x", 1.0)).unwrap();
        assert_eq!(clock.spring_count(), 1);

        controller.dispose();
        assert!(controller.is_empty());
        assert_eq!(clock.spring_count(), 0);
        assert!(controller.values().is_empty());
        assert!(!clock.has_active());
    }
}
