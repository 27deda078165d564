//! Frame clock
//!
//! The clock owns every spring's state and advances the active ones once per
//! rendered frame. It never ticks on its own unless a background driver is
//! started; hosts either call [`Clock::advance`] from their frame callback or
//! poll [`Clock::take_frame_request`].
//!
//! Springs register implicitly when a [`SpringValue`](crate::SpringValue) is
//! created and hold only a weak [`ClockHandle`].
//!
//! # Frame requests
//!
//! A frame is requested through the installed [`FrameRequester`] when the
//! first spring subscribes and after each advance that leaves springs active.
//! When the last spring goes idle the request is cancelled, so nothing ticks
//! while nothing moves.

use crate::config::AnimationGlobals;
use crate::error::{AnimationError, Result};
use crate::events::{AnimationResult, Effects, ErrorHandler};
use crate::lock;
use crate::spring_value::SpringEntry;
use rustc_hash::FxHashSet;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};
use tension_core::{AnimatableValue, DependencyGraph};

new_key_type! {
    /// Handle to a spring registered on a clock
    pub struct SpringId;

    pub(crate) struct FrameHookId;
}

/// Runs after each advance with the springs stepped in it, outside the lock
pub(crate) type FrameHook = Arc<dyn Fn(&[SpringId]) + Send + Sync>;

/// Host-side frame scheduling primitive
///
/// `request_frame` must eventually lead to one [`Clock::advance`] call with
/// the real elapsed time. Called without any clock lock held.
pub trait FrameRequester: Send + Sync {
    fn request_frame(&self);

    /// Nothing is animating any more; a pending frame may be dropped
    fn cancel_frame(&self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameSignal {
    Request,
    Cancel,
}

impl FrameSignal {
    fn transition(was_active: bool, now_active: bool) -> Option<Self> {
        match (was_active, now_active) {
            (false, true) => Some(FrameSignal::Request),
            (true, false) => Some(FrameSignal::Cancel),
            _ => None,
        }
    }
}

/// State guarded by the clock lock
pub(crate) struct ClockInner {
    pub(crate) springs: SlotMap<SpringId, SpringEntry>,
    pub(crate) graph: DependencyGraph<SpringId>,
    /// Springs that need ticks (animating or waiting on a delay)
    pub(crate) active: FxHashSet<SpringId>,
    pub(crate) now_ms: f64,
    pub(crate) globals: AnimationGlobals,
}

impl ClockInner {
    fn new(globals: AnimationGlobals) -> Self {
        Self {
            springs: SlotMap::with_key(),
            graph: DependencyGraph::new(),
            active: FxHashSet::default(),
            now_ms: 0.0,
            globals,
        }
    }

    pub(crate) fn subscribe(&mut self, id: SpringId) {
        if self.active.insert(id) {
            tracing::trace!("clock: subscribed {:?} ({} active)", id, self.active.len());
        }
    }

    pub(crate) fn unsubscribe(&mut self, id: SpringId) {
        if self.active.remove(&id) {
            tracing::trace!("clock: unsubscribed {:?} ({} active)", id, self.active.len());
        }
    }

    /// Step every active spring, sources before the springs that follow them
    fn advance(
        &mut self,
        dt_ms: f64,
        stepped: &mut Vec<SpringId>,
        effects: &mut Effects,
    ) -> bool {
        let dt_ms = if dt_ms.is_finite() {
            dt_ms.clamp(0.0, self.globals.max_frame_ms)
        } else {
            0.0
        };
        self.now_ms += dt_ms;

        let order = self.graph.order().to_vec();
        for id in order {
            if self.active.contains(&id) {
                self.tick_spring(id, dt_ms, effects);
                stepped.push(id);
            }
        }
        !self.active.is_empty()
    }
}

pub(crate) struct ClockShared {
    pub(crate) state: Mutex<ClockInner>,
    frame_requested: AtomicBool,
    requester: Mutex<Option<Arc<dyn FrameRequester>>>,
    error_handler: Mutex<Option<ErrorHandler>>,
    frame_hooks: Mutex<SlotMap<FrameHookId, FrameHook>>,
    /// Background driver thread, unparked when a frame is requested
    driver: Mutex<Option<Thread>>,
}

impl ClockShared {
    /// Run `op` under the lock, then deliver its frame signal and effects
    pub(crate) fn with_state<R>(&self, op: impl FnOnce(&mut ClockInner, &mut Effects) -> R) -> R {
        let mut effects = Effects::default();
        let (result, signal) = {
            let mut inner = lock(&self.state);
            let was_active = !inner.active.is_empty();
            let result = op(&mut *inner, &mut effects);
            let now_active = !inner.active.is_empty();
            (result, FrameSignal::transition(was_active, now_active))
        };
        self.signal(signal);
        self.flush(effects);
        result
    }

    fn advance(&self, dt_ms: f64) -> bool {
        let mut effects = Effects::default();
        let mut stepped = Vec::new();
        let (still_active, was_active) = {
            let mut inner = lock(&self.state);
            let was_active = !inner.active.is_empty();
            (inner.advance(dt_ms, &mut stepped, &mut effects), was_active)
        };

        let signal = if still_active {
            Some(FrameSignal::Request)
        } else if was_active {
            Some(FrameSignal::Cancel)
        } else {
            None
        };
        self.signal(signal);
        self.flush(effects);

        if !stepped.is_empty() {
            let hooks: SmallVec<[FrameHook; 2]> =
                lock(&self.frame_hooks).values().cloned().collect();
            for hook in hooks {
                hook(&stepped);
            }
        }

        // Handlers may have started new animations
        !lock(&self.state).active.is_empty()
    }

    fn signal(&self, signal: Option<FrameSignal>) {
        let Some(signal) = signal else {
            return;
        };
        let requester = lock(&self.requester).clone();
        match signal {
            FrameSignal::Request => {
                self.frame_requested.store(true, Ordering::Release);
                tracing::trace!("clock: frame requested");
                if let Some(requester) = requester {
                    requester.request_frame();
                }
                if let Some(driver) = lock(&self.driver).as_ref() {
                    driver.unpark();
                }
            }
            FrameSignal::Cancel => {
                self.frame_requested.store(false, Ordering::Release);
                tracing::trace!("clock: frame cancelled, nothing active");
                if let Some(requester) = requester {
                    requester.cancel_frame();
                }
            }
        }
    }

    fn flush(&self, effects: Effects) {
        if effects.is_empty() {
            return;
        }
        let handler = lock(&self.error_handler).clone();
        effects.dispatch(handler.as_ref());
    }

    /// Current values of `ids`, in order; disposed springs are skipped
    pub(crate) fn values(&self, ids: &[SpringId]) -> Vec<Option<AnimatableValue>> {
        let inner = lock(&self.state);
        ids.iter()
            .map(|id| inner.springs.get(*id).map(|entry| entry.value()))
            .collect()
    }
}

/// The animation clock
///
/// Owns all spring state. Hand out [`ClockHandle`]s to create springs.
///
/// # Background Thread Mode
///
/// [`Clock::start_background`] drives `advance` from a dedicated thread with
/// real elapsed time. The thread parks while no frame is requested.
pub struct Clock {
    shared: Arc<ClockShared>,
    /// Stop signal for the background thread
    stop_flag: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::with_globals(AnimationGlobals::default())
    }

    pub fn with_globals(globals: AnimationGlobals) -> Self {
        Self {
            shared: Arc::new(ClockShared {
                state: Mutex::new(ClockInner::new(globals)),
                frame_requested: AtomicBool::new(false),
                requester: Mutex::new(None),
                error_handler: Mutex::new(None),
                frame_hooks: Mutex::new(SlotMap::with_key()),
                driver: Mutex::new(None),
            }),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Get a weak handle for creating springs and controllers
    pub fn handle(&self) -> ClockHandle {
        ClockHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Advance time by `dt_ms` and step every active spring
    ///
    /// Returns true if springs are still active (another frame is needed).
    pub fn advance(&self, dt_ms: f64) -> bool {
        self.shared.advance(dt_ms)
    }

    pub fn has_active(&self) -> bool {
        !lock(&self.shared.state).active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.shared.state).active.len()
    }

    pub fn spring_count(&self) -> usize {
        lock(&self.shared.state).springs.len()
    }

    #[cfg(test)]
    pub(crate) fn frame_hook_count(&self) -> usize {
        lock(&self.shared.frame_hooks).len()
    }

    /// Clock time in milliseconds (sum of all advanced deltas)
    pub fn now_ms(&self) -> f64 {
        lock(&self.shared.state).now_ms
    }

    pub fn globals(&self) -> AnimationGlobals {
        lock(&self.shared.state).globals.clone()
    }

    pub fn set_globals(&self, globals: AnimationGlobals) {
        tracing::debug!("clock: globals updated {:?}", globals);
        lock(&self.shared.state).globals = globals;
    }

    pub fn set_frame_requester<R>(&self, requester: R)
    where
        R: FrameRequester + 'static,
    {
        *lock(&self.shared.requester) = Some(Arc::new(requester));
    }

    /// Receive errors raised during ticks (disposed dependencies, unstable
    /// integration, failed delayed activations)
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(SpringId, &AnimationError) + Send + Sync + 'static,
    {
        *lock(&self.shared.error_handler) = Some(Arc::new(handler));
    }

    /// Check and clear the "frame wanted" flag
    ///
    /// For hosts that poll instead of installing a [`FrameRequester`].
    pub fn take_frame_request(&self) -> bool {
        self.shared.frame_requested.swap(false, Ordering::AcqRel)
    }

    /// Drive the clock from a background thread at `fps`
    pub fn start_background(&mut self, fps: u32) {
        if self.thread_handle.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&self.stop_flag);
        let frame_duration = Duration::from_micros(1_000_000 / u64::from(fps.max(1)));

        let handle = thread::spawn(move || {
            let mut last_frame = Instant::now();
            while !stop_flag.load(Ordering::Acquire) {
                if !shared.frame_requested.load(Ordering::Acquire) {
                    thread::park_timeout(frame_duration);
                    last_frame = Instant::now();
                    continue;
                }

                let start = Instant::now();
                let dt_ms = (start - last_frame).as_secs_f64() * 1000.0;
                last_frame = start;
                shared.advance(dt_ms);

                let elapsed = start.elapsed();
                if elapsed < frame_duration {
                    thread::sleep(frame_duration - elapsed);
                }
            }
        });

        *lock(&self.shared.driver) = Some(handle.thread().clone());
        self.thread_handle = Some(handle);
        tracing::debug!("clock: background driver started at {} fps", fps);
    }

    pub fn stop_background(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        self.stop_flag.store(true, Ordering::Release);
        handle.thread().unpark();
        let _ = handle.join();
        *lock(&self.shared.driver) = None;
        self.stop_flag.store(false, Ordering::Release);
        tracing::debug!("clock: background driver stopped");
    }

    pub fn is_background_running(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop_background();
    }
}

/// A weak handle to a [`Clock`]
///
/// Does not keep the clock alive; operations through a dead handle fail with
/// [`AnimationError::ClockGone`].
#[derive(Clone)]
pub struct ClockHandle {
    shared: Weak<ClockShared>,
}

impl ClockHandle {
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Result<Arc<ClockShared>> {
        self.shared.upgrade().ok_or(AnimationError::ClockGone)
    }

    /// Current values of several springs at once (one lock)
    pub fn values(&self, ids: &[SpringId]) -> Result<Vec<Option<AnimatableValue>>> {
        Ok(self.upgrade()?.values(ids))
    }

    pub(crate) fn add_frame_hook(&self, hook: FrameHook) -> Result<FrameHookId> {
        let shared = self.upgrade()?;
        let id = lock(&shared.frame_hooks).insert(hook);
        tracing::trace!("clock: frame hook {:?} added", id);
        Ok(id)
    }

    pub(crate) fn remove_frame_hook(&self, id: FrameHookId) {
        if let Ok(shared) = self.upgrade() {
            let removed = lock(&shared.frame_hooks).remove(id);
            drop(removed);
        }
    }

    /// Cancel the animations of a spring by id
    pub fn stop(&self, id: SpringId) -> Result<AnimationResult> {
        self.upgrade()?
            .with_state(|inner, effects| inner.cancel(id, effects))
    }
}

impl std::fmt::Debug for ClockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
