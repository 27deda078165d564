//! Spring values
//!
//! A [`SpringValue`] is one animated number (or fixed-size list of numbers)
//! with its own request queue and lifecycle:
//!
//! - **Idle**: at rest on its goal
//! - **Pending**: a delayed request is waiting for clock time to pass
//! - **Animating**: subscribed to the clock and integrating every frame
//! - **Disposed**: removed from the clock; every request fails
//!
//! # Interruption
//!
//! A new request replaces the active one and continues from the live position
//! and velocity, so the output never jumps. The replaced request rests with
//! `finished: false`. An update whose goal matches the current one is a no-op
//! unless `force` or `reset` is set: an idle spring resolves immediately, an
//! animating one hands back a completion joined to the running animation.
//!
//! Among delayed requests the latest wins. Older pending requests are
//! resolved as cancelled without ever starting, unless they were `force`d, in
//! which case the newer request queues behind them.
//!
//! # Dependencies
//!
//! A `to` of [`Target::Follow`] makes the spring chase another spring's live
//! output. The clock steps sources first, so a follower always sees the
//! source's output from the same frame.

use crate::clock::{ClockHandle, ClockInner, SpringId};
use crate::completion::{self, Completion, CompletionSource, Observer};
use crate::config::{Mode, SpringConfig};
use crate::error::{AnimationError, Result};
use crate::events::{AnimationResult, DispatchTable, Effects, EventKind, Handlers};
use crate::lock;
use crate::node::AnimatedNode;
use crate::props::{AnimationRequest, SpringProps, Target};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use tension_core::AnimatableValue;

/// Lifecycle state of a spring
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pending,
    Animating,
    Disposed,
}

/// The request currently driving a spring
pub(crate) struct ActiveAnimation {
    table: DispatchTable,
    /// None when the spring was re-armed by a moving source
    completion: Option<CompletionSource<AnimationResult>>,
    /// No-op updates that joined this animation
    joined: Vec<CompletionSource<AnimationResult>>,
    config: SpringConfig,
}

impl ActiveAnimation {
    /// Emit `on_rest` and resolve every completion waiting on this animation
    fn end(self, result: AnimationResult, effects: &mut Effects) {
        effects.emit(&self.table, EventKind::Rest, result.clone());
        for source in self.completion.into_iter().chain(self.joined) {
            effects.resolve(source, result.clone());
        }
        effects.retire(self.table);
    }
}

pub(crate) struct QueuedRequest {
    request: AnimationRequest,
    table: DispatchTable,
    completion: CompletionSource<AnimationResult>,
    due_ms: f64,
}

/// Per-spring state stored on the clock
pub(crate) struct SpringEntry {
    node: AnimatedNode,
    goal: AnimatableValue,
    config: SpringConfig,
    handlers: Handlers,
    /// Handlers installed by the owning controller
    bridge: Handlers,
    active: Option<ActiveAnimation>,
    pending: VecDeque<QueuedRequest>,
    /// Spring whose output is the goal, if any
    follow: Option<SpringId>,
    /// Some request has been activated; `from` then only applies on reset
    animated: bool,
}

impl SpringEntry {
    fn new(initial: AnimatableValue, config: SpringConfig) -> Self {
        Self {
            node: AnimatedNode::create(&initial),
            goal: initial,
            config,
            handlers: Handlers::default(),
            bridge: Handlers::default(),
            active: None,
            pending: VecDeque::new(),
            follow: None,
            animated: false,
        }
    }

    pub(crate) fn value(&self) -> AnimatableValue {
        self.node.value()
    }

    fn phase(&self) -> Phase {
        if self.active.is_some() {
            Phase::Animating
        } else if !self.pending.is_empty() {
            Phase::Pending
        } else {
            Phase::Idle
        }
    }

    fn base_table(&self) -> DispatchTable {
        DispatchTable::resolve(&[&self.handlers, &self.bridge])
    }

    fn handlers_mut(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    fn bridge_mut(&mut self) -> &mut Handlers {
        &mut self.bridge
    }
}

/// An update after its `on_animate` handlers ran
pub(crate) enum Prepared {
    Cancel,
    Request(AnimationRequest),
}

/// A request after its targets have been looked up and checked
struct Resolved {
    from: Option<AnimatableValue>,
    goal: AnimatableValue,
    follow: Option<SpringId>,
    apply_from: bool,
}

// ============================================================================
// State machine (runs under the clock lock)
// ============================================================================

impl ClockInner {
    pub(crate) fn insert_spring(&mut self, initial: AnimatableValue, config: SpringConfig) -> SpringId {
        let id = self.springs.insert(SpringEntry::new(initial, config));
        self.graph.insert(id);
        id
    }

    fn value_of(&self, id: SpringId) -> Result<AnimatableValue> {
        self.springs
            .get(id)
            .map(SpringEntry::value)
            .ok_or(AnimationError::DependencyDisposed)
    }

    fn target_value(&self, target: &Target) -> Result<AnimatableValue> {
        match target {
            Target::Value(value) => Ok(value.clone()),
            Target::Follow(source) => self.value_of(*source),
        }
    }

    /// Look up and validate a request without touching any state
    fn resolve(&self, id: SpringId, request: &AnimationRequest) -> Result<Resolved> {
        let entry = self.springs.get(id).ok_or(AnimationError::Disposed)?;
        request.config.validate()?;

        let sources = [&request.to, &request.from]
            .into_iter()
            .flatten()
            .filter_map(Target::follow_id);
        for source in sources {
            if !self.springs.contains_key(source) {
                return Err(AnimationError::DependencyDisposed);
            }
            if self.graph.would_cycle(id, source) {
                return Err(AnimationError::CyclicDependency);
            }
        }

        let from = request
            .from
            .as_ref()
            .map(|target| self.target_value(target))
            .transpose()?;
        let (goal, follow) = match &request.to {
            Some(target) => (self.target_value(target)?, target.follow_id()),
            None => match entry.follow {
                Some(source) => (self.value_of(source)?, Some(source)),
                None => (entry.goal.clone(), None),
            },
        };

        let apply_from = from.is_some() && (request.reset || !entry.animated);
        let shape = match (&from, apply_from) {
            (Some(from), true) => from.shape(),
            _ => entry.node.shape(),
        };
        for value in from.iter().chain(std::iter::once(&goal)) {
            if value.shape() != shape {
                return Err(AnimationError::ShapeMismatch {
                    expected: shape,
                    found: value.shape(),
                });
            }
        }

        Ok(Resolved {
            from,
            goal,
            follow,
            apply_from,
        })
    }

    /// Accept a request: queue it behind a delay or activate it right away
    pub(crate) fn submit(
        &mut self,
        id: SpringId,
        request: AnimationRequest,
        observer: Option<Observer<AnimationResult>>,
        effects: &mut Effects,
    ) -> Result<Completion<AnimationResult>> {
        let resolved = self.resolve(id, &request)?;
        let now = self.now_ms;
        let (source, completion) = completion::channel_observed(observer);

        let entry = self.springs.get_mut(id).ok_or(AnimationError::Disposed)?;
        let table = DispatchTable::resolve(&[&entry.handlers, &entry.bridge, &request.handlers]);

        // Latest wins among pending requests, forced ones excepted
        let (kept, replaced): (VecDeque<_>, VecDeque<_>) =
            entry.pending.drain(..).partition(|queued| queued.request.force);
        entry.pending = kept;
        if !replaced.is_empty() {
            tracing::debug!("spring {:?}: replaced {} pending request(s)", id, replaced.len());
        }
        let value = entry.node.value();
        for queued in replaced {
            effects.resolve(queued.completion, AnimationResult::cancelled(value.clone()));
            effects.retire(queued.table);
        }

        if request.delay_ms > 0.0 || !entry.pending.is_empty() {
            let due_ms = entry
                .pending
                .back()
                .map_or(now, |queued| queued.due_ms)
                .max(now + request.delay_ms);
            tracing::debug!("spring {:?}: pending until {}ms", id, due_ms);
            entry.pending.push_back(QueuedRequest {
                request,
                table,
                completion: source,
                due_ms,
            });
        } else {
            self.activate(id, &request, resolved, table, Some(source), effects)?;
        }

        self.refresh_subscription(id);
        Ok(completion)
    }

    fn activate(
        &mut self,
        id: SpringId,
        request: &AnimationRequest,
        resolved: Resolved,
        table: DispatchTable,
        completion: Option<CompletionSource<AnimationResult>>,
        effects: &mut Effects,
    ) -> Result<()> {
        let skip = self.globals.skip_animation;
        let entry = self.springs.get_mut(id).ok_or(AnimationError::Disposed)?;

        let unchanged = !request.force
            && !request.reset
            && resolved.goal == entry.goal
            && resolved.follow == entry.follow;
        if unchanged {
            match entry.active.as_mut() {
                None if entry.node.is_done() => {
                    if let Some(source) = completion {
                        effects.resolve(source, AnimationResult::finished(entry.node.value()));
                    }
                    effects.retire(table);
                    return Ok(());
                }
                Some(active) if active.config == request.config && !request.immediate => {
                    active.joined.extend(completion);
                    effects.retire(table);
                    return Ok(());
                }
                _ => {}
            }
        }

        if entry.follow != resolved.follow {
            if let Some(old) = entry.follow.take() {
                self.graph.detach(id, old);
            }
            if let Some(source) = resolved.follow {
                self.graph.attach(id, source)?;
            }
            entry.follow = resolved.follow;
        }

        if let Some(old) = entry.active.take() {
            tracing::debug!("spring {:?}: interrupted", id);
            old.end(AnimationResult::moving(entry.node.value()), effects);
        }

        if let (true, Some(from)) = (resolved.apply_from, &resolved.from) {
            if from.shape() == entry.node.shape() {
                entry.node.set_value(from)?;
            } else {
                entry.node = AnimatedNode::create(from);
            }
        }

        entry.goal = resolved.goal;
        entry.config = request.config;
        entry.animated = true;
        entry.node.begin(request.config.velocity);
        tracing::debug!("spring {:?}: animating toward {}", id, entry.goal);
        effects.emit(
            &table,
            EventKind::Start,
            AnimationResult::moving(entry.node.value()),
        );

        if request.immediate || skip {
            entry.node.snap(&entry.goal);
            let value = entry.node.value();
            effects.emit(&table, EventKind::Change, AnimationResult::moving(value.clone()));
            let result = AnimationResult::finished(value);
            effects.emit(&table, EventKind::Rest, result.clone());
            if let Some(source) = completion {
                effects.resolve(source, result);
            }
            effects.retire(table);
            self.wake_followers(id, effects);
        } else {
            entry.active = Some(ActiveAnimation {
                table,
                completion,
                joined: Vec::new(),
                config: request.config,
            });
        }

        self.refresh_subscription(id);
        Ok(())
    }

    /// Promote the oldest pending request
    fn activate_queued(&mut self, id: SpringId, effects: &mut Effects) {
        let Some(queued) = self.springs.get_mut(id).and_then(|e| e.pending.pop_front()) else {
            return;
        };
        let QueuedRequest {
            request,
            table,
            completion,
            ..
        } = queued;

        match self.resolve(id, &request) {
            Ok(resolved) => {
                if let Err(error) =
                    self.activate(id, &request, resolved, table, Some(completion), effects)
                {
                    effects.error(id, error);
                }
            }
            Err(error) => {
                effects.error(id, error);
                if let Some(entry) = self.springs.get(id) {
                    effects.resolve(completion, AnimationResult::cancelled(entry.value()));
                }
                effects.retire(table);
            }
        }
    }

    /// Advance one spring by a frame, promoting delayed requests on the way
    pub(crate) fn tick_spring(&mut self, id: SpringId, dt_ms: f64, effects: &mut Effects) {
        let now = self.now_ms;
        let mut cursor = now - dt_ms;

        loop {
            let due = match self.springs.get(id).and_then(|e| e.pending.front()) {
                Some(queued) if queued.due_ms <= now => queued.due_ms.max(cursor),
                _ => break,
            };
            if due > cursor {
                self.step_active(id, due - cursor, effects);
                cursor = due;
            }
            self.activate_queued(id, effects);
        }

        if now > cursor {
            self.step_active(id, now - cursor, effects);
        }
        self.refresh_subscription(id);
    }

    fn step_active(&mut self, id: SpringId, dt_ms: f64, effects: &mut Effects) {
        let substep_ms = self.globals.substep_ms;
        let Some(entry) = self.springs.get(id) else {
            return;
        };
        if entry.active.is_none() {
            return;
        }

        // Sources were stepped earlier this frame
        let mut source_moving = false;
        let mut followed = None;
        if let Some(source) = entry.follow {
            let Some(source_entry) = self.springs.get(source) else {
                self.freeze(id, AnimationError::DependencyDisposed, effects);
                return;
            };
            let goal = source_entry.value();
            if goal.shape() != entry.node.shape() {
                let error = AnimationError::ShapeMismatch {
                    expected: entry.node.shape(),
                    found: goal.shape(),
                };
                self.freeze(id, error, effects);
                return;
            }
            source_moving = self.active.contains(&source);
            followed = Some(goal);
        }

        let Some(entry) = self.springs.get_mut(id) else {
            return;
        };
        if let Some(goal) = followed {
            if goal != entry.goal {
                entry.node.retarget(&goal);
                entry.goal = goal;
            }
        }
        let Some(active) = entry.active.as_ref() else {
            return;
        };

        let config = active.config;
        let report = entry.node.step(&entry.goal, &config, dt_ms, substep_ms);
        if report.unstable {
            effects.error(id, AnimationError::Unstable);
        }
        if report.changed {
            effects.emit(
                &active.table,
                EventKind::Change,
                AnimationResult::moving(entry.node.value()),
            );
        }

        if report.done && !source_moving {
            if let Mode::Decay(_) = config.mode() {
                entry.goal = entry.node.value();
            }
            if let Some(active) = entry.active.take() {
                tracing::debug!("spring {:?}: at rest", id);
                active.end(AnimationResult::finished(entry.node.value()), effects);
            }
        }

        if report.changed {
            self.wake_followers(id, effects);
        }
    }

    /// Restart idle springs that follow `id` after its output moved
    fn wake_followers(&mut self, id: SpringId, effects: &mut Effects) {
        let dependents: SmallVec<[SpringId; 4]> = self.graph.dependents(id).iter().copied().collect();
        for dependent in dependents {
            let Some(entry) = self.springs.get_mut(dependent) else {
                continue;
            };
            if entry.follow != Some(id) || entry.active.is_some() || !entry.pending.is_empty() {
                continue;
            }

            entry.node.begin(None);
            let table = entry.base_table();
            effects.emit(
                &table,
                EventKind::Start,
                AnimationResult::moving(entry.node.value()),
            );
            entry.active = Some(ActiveAnimation {
                table,
                completion: None,
                joined: Vec::new(),
                config: entry.config,
            });
            tracing::trace!("spring {:?}: woken by source {:?}", dependent, id);
            self.subscribe(dependent);
        }
    }

    /// Stop following, hold the last value and report `error`
    fn freeze(&mut self, id: SpringId, error: AnimationError, effects: &mut Effects) {
        effects.error(id, error);
        if let Some(source) = self.springs.get(id).and_then(|e| e.follow) {
            self.graph.detach(id, source);
        }
        let Some(entry) = self.springs.get_mut(id) else {
            return;
        };
        entry.follow = None;
        entry.node.halt();
        entry.goal = entry.node.value();
        if let Some(active) = entry.active.take() {
            active.end(AnimationResult::cancelled(entry.goal.clone()), effects);
        }
        self.refresh_subscription(id);
    }

    /// Cancel the active and pending requests, holding the current value
    pub(crate) fn cancel(&mut self, id: SpringId, effects: &mut Effects) -> Result<AnimationResult> {
        if let Some(source) = self.springs.get(id).and_then(|e| e.follow) {
            self.graph.detach(id, source);
        }
        let entry = self.springs.get_mut(id).ok_or(AnimationError::Disposed)?;
        entry.follow = None;
        entry.node.halt();
        entry.goal = entry.node.value();

        let result = AnimationResult::cancelled(entry.goal.clone());
        if let Some(active) = entry.active.take() {
            tracing::debug!("spring {:?}: cancelled", id);
            active.end(result.clone(), effects);
        }
        for queued in entry.pending.drain(..) {
            effects.emit(&queued.table, EventKind::Rest, result.clone());
            effects.resolve(queued.completion, result.clone());
            effects.retire(queued.table);
        }

        self.refresh_subscription(id);
        Ok(result)
    }

    /// Write a value without animating
    pub(crate) fn set_value(
        &mut self,
        id: SpringId,
        value: AnimatableValue,
        effects: &mut Effects,
    ) -> Result<()> {
        self.cancel(id, effects)?;
        let entry = self.springs.get_mut(id).ok_or(AnimationError::Disposed)?;

        let changed = entry.node.value() != value;
        if value.shape() == entry.node.shape() {
            entry.node.set_value(&value)?;
        } else {
            entry.node = AnimatedNode::create(&value);
        }
        entry.goal = value;

        if changed {
            let table = entry.base_table();
            effects.emit(&table, EventKind::Change, AnimationResult::moving(entry.goal.clone()));
            effects.retire(table);
            self.wake_followers(id, effects);
        }
        Ok(())
    }

    /// Remove a spring; followers freeze with [`AnimationError::DependencyDisposed`]
    ///
    /// The removed entry is handed back so it can be dropped after the lock.
    pub(crate) fn dispose(&mut self, id: SpringId, effects: &mut Effects) -> Option<SpringEntry> {
        self.cancel(id, effects).ok()?;
        let entry = self.springs.remove(id)?;
        self.unsubscribe(id);

        for orphan in self.graph.remove(id) {
            if self.springs.get(orphan).is_some_and(|e| e.follow == Some(id)) {
                self.freeze(orphan, AnimationError::DependencyDisposed, effects);
            }
        }
        tracing::debug!("spring {:?}: disposed", id);
        Some(entry)
    }

    fn refresh_subscription(&mut self, id: SpringId) {
        let busy = self
            .springs
            .get(id)
            .is_some_and(|e| e.active.is_some() || !e.pending.is_empty());
        if busy {
            self.subscribe(id);
        } else {
            self.unsubscribe(id);
        }
    }
}

// ============================================================================
// Spring Value
// ============================================================================

/// An animated value registered on a clock
///
/// Not `Clone`: the value owns its clock entry and disposes it on drop.
///
/// # Example
///
/// ```
/// use tension_animation::{Clock, SpringProps, SpringValue};
///
/// let clock = Clock::new();
/// let opacity = SpringValue::new(&clock.handle(), 0.0).unwrap();
///
/// let done = opacity.update(SpringProps::new().to(1.0)).unwrap();
/// while clock.advance(16.0) {}
///
/// assert!(done.result().unwrap().finished);
/// assert_eq!(opacity.get().and_then(|v| v.as_scalar()), Some(1.0));
/// ```
pub struct SpringValue {
    id: SpringId,
    clock: ClockHandle,
}

impl SpringValue {
    /// Create a spring resting at `initial` with the default config
    pub fn new(clock: &ClockHandle, initial: impl Into<AnimatableValue>) -> Result<Self> {
        Self::with_config(clock, initial, SpringConfig::default())
    }

    pub fn with_config(
        clock: &ClockHandle,
        initial: impl Into<AnimatableValue>,
        config: SpringConfig,
    ) -> Result<Self> {
        config.validate()?;
        let shared = clock.upgrade()?;
        let id = lock(&shared.state).insert_spring(initial.into(), config);
        tracing::trace!("spring {:?}: registered", id);
        Ok(Self {
            id,
            clock: clock.clone(),
        })
    }

    pub fn id(&self) -> SpringId {
        self.id
    }

    fn read<R>(&self, f: impl FnOnce(&SpringEntry) -> R) -> Option<R> {
        let shared = self.clock.upgrade().ok()?;
        let inner = lock(&shared.state);
        inner.springs.get(self.id).map(f)
    }

    /// Current value (None once disposed)
    pub fn get(&self) -> Option<AnimatableValue> {
        self.read(SpringEntry::value)
    }

    pub fn goal(&self) -> Option<AnimatableValue> {
        self.read(|entry| entry.goal.clone())
    }

    /// Current velocity per lane, in units per second
    pub fn velocity(&self) -> Option<AnimatableValue> {
        self.read(|entry| entry.node.velocity())
    }

    pub fn config(&self) -> Option<SpringConfig> {
        self.read(|entry| entry.config)
    }

    pub fn phase(&self) -> Phase {
        self.read(SpringEntry::phase).unwrap_or(Phase::Disposed)
    }

    pub fn is_animating(&self) -> bool {
        self.phase() == Phase::Animating
    }

    /// Submit one update
    ///
    /// Configuration errors (cycles, shape mismatches, disposed dependencies,
    /// out-of-range config) are returned here and leave the spring untouched.
    /// Pre-flight `on_animate` handlers run before the request is queued, base
    /// handler first.
    pub fn update(&self, props: SpringProps) -> Result<Completion<AnimationResult>> {
        let prepared = self.prepare(props)?;
        self.apply(prepared, None)
    }

    /// Build the request for `props` and run the `on_animate` handlers on it
    pub(crate) fn prepare(&self, props: SpringProps) -> Result<Prepared> {
        if props.cancel {
            return Ok(Prepared::Cancel);
        }

        let (config, on_animate) = {
            let shared = self.clock.upgrade()?;
            let inner = lock(&shared.state);
            let entry = inner.springs.get(self.id).ok_or(AnimationError::Disposed)?;
            (entry.config, entry.handlers.on_animate.clone())
        };

        let mut request = props.into_request(&config);
        if let Some(handler) = on_animate {
            handler(&mut request);
        }
        if let Some(handler) = request.handlers.on_animate.clone() {
            handler(&mut request);
        }
        Ok(Prepared::Request(request))
    }

    /// Check a prepared request against the current state without applying it
    pub(crate) fn check(&self, prepared: &Prepared) -> Result<()> {
        let shared = self.clock.upgrade()?;
        let inner = lock(&shared.state);
        match prepared {
            Prepared::Cancel => inner
                .springs
                .contains_key(self.id)
                .then_some(())
                .ok_or(AnimationError::Disposed),
            Prepared::Request(request) => inner.resolve(self.id, request).map(|_| ()),
        }
    }

    /// Submit a prepared request; `observer` sees the result before any awaiter
    pub(crate) fn apply(
        &self,
        prepared: Prepared,
        observer: Option<Observer<AnimationResult>>,
    ) -> Result<Completion<AnimationResult>> {
        let shared = self.clock.upgrade()?;
        match prepared {
            Prepared::Cancel => {
                let result = shared.with_state(|inner, effects| inner.cancel(self.id, effects))?;
                let (source, completion) = completion::channel_observed(observer);
                source.resolve(result);
                Ok(completion)
            }
            Prepared::Request(request) => shared
                .with_state(|inner, effects| inner.submit(self.id, request, observer, effects)),
        }
    }

    /// Animate toward `target` with the current config
    pub fn start(&self, target: impl Into<Target>) -> Result<Completion<AnimationResult>> {
        self.update(SpringProps::new().to(target))
    }

    /// Write a value immediately, cancelling any animation
    ///
    /// Unlike an update, `set` may change the value's shape.
    pub fn set(&self, value: impl Into<AnimatableValue>) -> Result<()> {
        let value = value.into();
        self.clock
            .upgrade()?
            .with_state(|inner, effects| inner.set_value(self.id, value, effects))
    }

    /// Cancel the active and pending animations
    pub fn stop(&self) -> Result<()> {
        self.clock
            .upgrade()?
            .with_state(|inner, effects| inner.cancel(self.id, effects))
            .map(|_| ())
    }

    /// Remove the spring from its clock; later calls fail with `Disposed`
    pub fn dispose(&self) {
        let Ok(shared) = self.clock.upgrade() else {
            return;
        };
        let removed = shared.with_state(|inner, effects| inner.dispose(self.id, effects));
        drop(removed);
    }

    fn register(
        &self,
        slot: fn(&mut SpringEntry) -> &mut Handlers,
        f: impl FnOnce(&mut Handlers),
    ) {
        let Ok(shared) = self.clock.upgrade() else {
            return;
        };
        // Replaced handlers may own springs; drop them after the lock
        let previous = {
            let mut inner = lock(&shared.state);
            let Some(entry) = inner.springs.get_mut(self.id) else {
                return;
            };
            let slot = slot(entry);
            let mut handlers = slot.clone();
            f(&mut handlers);
            std::mem::replace(slot, handlers)
        };
        drop(previous);
    }

    /// Install the owner's handlers, kept apart from the base handlers
    pub(crate) fn bridge(&self, f: impl FnOnce(&mut Handlers)) {
        self.register(SpringEntry::bridge_mut, f);
    }

    /// Base pre-flight handler, run for every update before the update's own
    pub fn on_animate<F>(&self, f: F)
    where
        F: Fn(&mut AnimationRequest) + Send + Sync + 'static,
    {
        self.register(SpringEntry::handlers_mut, |handlers| {
            handlers.on_animate = Some(Arc::new(f))
        });
    }

    pub fn on_start<F>(&self, f: F)
    where
        F: Fn(&AnimationResult) + Send + Sync + 'static,
    {
        self.register(SpringEntry::handlers_mut, |handlers| {
            handlers.on_start = Some(Arc::new(f))
        });
    }

    pub fn on_change<F>(&self, f: F)
    where
        F: Fn(&AnimationResult) + Send + Sync + 'static,
    {
        self.register(SpringEntry::handlers_mut, |handlers| {
            handlers.on_change = Some(Arc::new(f))
        });
    }

    pub fn on_rest<F>(&self, f: F)
    where
        F: Fn(&AnimationResult) + Send + Sync + 'static,
    {
        self.register(SpringEntry::handlers_mut, |handlers| {
            handlers.on_rest = Some(Arc::new(f))
        });
    }
}

impl Drop for SpringValue {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SpringValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpringValue")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}

impl From<&SpringValue> for Target {
    fn from(spring: &SpringValue) -> Self {
        Target::Follow(spring.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::sync::Mutex;

    fn scalar(spring: &SpringValue) -> f64 {
        spring.get().and_then(|v| v.as_scalar()).unwrap()
    }

    fn settle(clock: &Clock) -> usize {
        let mut frames = 0;
        while clock.advance(16.0) {
            frames += 1;
            assert!(frames < 2000, "clock never went idle");
        }
        frames
    }

    #[test]
    fn test_phases() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        assert_eq!(spring.phase(), Phase::Idle);

        spring.update(SpringProps::new().to(1.0).delay(32.0)).unwrap();
        assert_eq!(spring.phase(), Phase::Pending);
        clock.advance(16.0);
        assert_eq!(spring.phase(), Phase::Pending);
        clock.advance(16.0);
        assert_eq!(spring.phase(), Phase::Animating);

        settle(&clock);
        assert_eq!(spring.phase(), Phase::Idle);

        spring.dispose();
        assert_eq!(spring.phase(), Phase::Disposed);
        assert_eq!(spring.get(), None);
        assert_eq!(spring.start(2.0).unwrap_err(), AnimationError::Disposed);
    }

    #[test]
    fn test_delay_counts_clock_time_only() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        spring.update(SpringProps::new().to(1.0).delay(100.0)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(120));
        assert_eq!(spring.phase(), Phase::Pending);

        clock.advance(90.0);
        assert_eq!(scalar(&spring), 0.0);
        clock.advance(20.0);
        // 10ms of the frame ran after activation
        assert!(scalar(&spring) > 0.0);
    }

    #[test]
    fn test_latest_pending_request_wins() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();

        let first = spring.update(SpringProps::new().to(10.0).delay(50.0)).unwrap();
        let second = spring.update(SpringProps::new().to(20.0).delay(50.0)).unwrap();

        let replaced = first.result().unwrap();
        assert!(replaced.cancelled);
        assert!(!second.is_resolved());

        settle(&clock);
        assert_eq!(scalar(&spring), 20.0);
        assert!(second.result().unwrap().finished);
    }

    #[test]
    fn test_forced_pending_request_is_kept() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();

        let forced = spring
            .update(SpringProps::new().to(10.0).delay(50.0).force())
            .unwrap();
        let later = spring.update(SpringProps::new().to(20.0)).unwrap();
        assert!(!forced.is_resolved());
        assert_eq!(spring.phase(), Phase::Pending);

        settle(&clock);
        // The forced request ran and was then interrupted by the queued one
        assert!(!forced.result().unwrap().cancelled);
        assert!(later.result().unwrap().finished);
        assert_eq!(scalar(&spring), 20.0);
    }

    #[test]
    fn test_immediate_is_synchronous() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (start, change, rest) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        let done = spring
            .update(
                SpringProps::new()
                    .to(5.0)
                    .immediate(true)
                    .on_start(move |_| start.lock().unwrap().push("start"))
                    .on_change(move |_| change.lock().unwrap().push("change"))
                    .on_rest(move |_| rest.lock().unwrap().push("rest")),
            )
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["start", "change", "rest"]);
        assert!(done.result().unwrap().finished);
        assert_eq!(scalar(&spring), 5.0);
        assert!(!clock.has_active());
    }

    #[test]
    fn test_skip_animation_global() {
        let clock = Clock::with_globals(crate::config::AnimationGlobals {
            skip_animation: true,
            ..Default::default()
        });
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        let done = spring.start(3.0).unwrap();
        assert!(done.is_resolved());
        assert_eq!(scalar(&spring), 3.0);
    }

    #[test]
    fn test_on_animate_rewrites_request() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        spring.on_animate(|request| request.immediate = true);

        spring
            .update(SpringProps::new().to(2.0).on_animate(|request| {
                assert!(request.immediate);
                request.to = Some(Target::from(4.0));
            }))
            .unwrap();
        assert_eq!(scalar(&spring), 4.0);
    }

    #[test]
    fn test_set_changes_shape_and_cancels() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        let done = spring.start(10.0).unwrap();
        clock.advance(16.0);

        spring.set([1.0, 2.0]).unwrap();
        assert!(done.result().unwrap().cancelled);
        assert_eq!(spring.get(), Some(AnimatableValue::from([1.0, 2.0])));
        assert_eq!(spring.phase(), Phase::Idle);

        let err = spring.start(1.0).unwrap_err();
        assert!(matches!(err, AnimationError::ShapeMismatch { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_array_spring_animates_all_lanes() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), [0.0, 0.0, 0.0]).unwrap();
        spring.start([1.0, 2.0, 3.0]).unwrap();
        settle(&clock);
        assert_eq!(spring.get(), Some(AnimatableValue::from([1.0, 2.0, 3.0])));
    }

    #[test]
    fn test_from_applies_only_when_fresh_or_reset() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();

        spring
            .update(SpringProps::new().from(5.0).to(5.0).immediate(true))
            .unwrap();
        assert_eq!(scalar(&spring), 5.0);

        spring
            .update(SpringProps::new().from(0.0).to(6.0).immediate(true))
            .unwrap();
        assert_eq!(scalar(&spring), 6.0);

        let log = Arc::new(Mutex::new(Vec::new()));
        let starts = Arc::clone(&log);
        spring
            .update(
                SpringProps::new()
                    .from(0.0)
                    .to(6.0)
                    .reset()
                    .on_start(move |r| starts.lock().unwrap().push(r.value.clone())),
            )
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec![AnimatableValue::Scalar(0.0)]);
    }

    #[test]
    fn test_duration_mode() {
        let clock = Clock::new();
        let spring = SpringValue::with_config(
            &clock.handle(),
            0.0,
            SpringConfig::default().with_duration(160.0),
        )
        .unwrap();
        spring.start(100.0).unwrap();

        clock.advance(80.0);
        assert!((scalar(&spring) - 50.0).abs() < 1e-9);
        assert_eq!(settle(&clock), 4);
        assert_eq!(scalar(&spring), 100.0);
    }

    #[test]
    fn test_decay_mode_ignores_goal() {
        let clock = Clock::new();
        let config = SpringConfig::default().decaying().with_velocity(1000.0);
        let spring = SpringValue::with_config(&clock.handle(), 0.0, config).unwrap();
        let done = spring.update(SpringProps::new().force()).unwrap();

        settle(&clock);
        let result = done.result().unwrap();
        assert!(result.finished);
        let position = result.value.as_scalar().unwrap();
        assert!((position - 500.0).abs() < 1.0);
        assert_eq!(spring.goal(), Some(AnimatableValue::Scalar(position)));
    }

    #[test]
    fn test_out_of_range_decay_is_rejected() {
        let clock = Clock::new();
        let endless = SpringConfig::default().with_decay(1.0).with_velocity(100.0);
        let err = SpringValue::with_config(&clock.handle(), 0.0, endless).unwrap_err();
        assert!(matches!(err, AnimationError::InvalidConfig(_)));

        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        let err = spring
            .update(
                SpringProps::new()
                    .config(SpringConfig::default().with_decay(1.5))
                    .force(),
            )
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(spring.phase(), Phase::Idle);
        assert_eq!(spring.config(), Some(SpringConfig::default()));
        assert!(!clock.has_active());
    }

    #[test]
    fn test_bridge_handlers_survive_base_registration() {
        let clock = Clock::new();
        let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let owner = Arc::clone(&log);
        spring.bridge(move |handlers| {
            handlers.on_rest = Some(Arc::new(move |_: &AnimationResult| {
                owner.lock().unwrap().push("owner")
            }));
        });
        let base = Arc::clone(&log);
        spring.on_rest(move |_| base.lock().unwrap().push("base"));
        let replaced = Arc::clone(&log);
        spring.on_rest(move |_| replaced.lock().unwrap().push("base again"));

        spring.update(SpringProps::new().to(1.0).immediate(true)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["base again", "owner"]);
    }

    #[test]
    fn test_drop_disposes() {
        let clock = Clock::new();
        {
            let spring = SpringValue::new(&clock.handle(), 0.0).unwrap();
            spring.start(1.0).unwrap();
            assert_eq!(clock.spring_count(), 1);
        }
        assert_eq!(clock.spring_count(), 0);
        assert!(!clock.has_active());
    }
}
