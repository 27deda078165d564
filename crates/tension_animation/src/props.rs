//! Animation props
//!
//! [`SpringProps`] is what callers pass to one `update`; it is resolved into
//! an [`AnimationRequest`] against the spring's current config before any
//! handler sees it. [`ControllerProps`] fans per-key props out to the springs
//! of a controller.

use crate::clock::SpringId;
use crate::config::SpringConfig;
use crate::events::{AnimationResult, Handlers};
use indexmap::IndexMap;
use std::sync::Arc;
use tension_core::AnimatableValue;

/// Either a literal value or the live output of another spring
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Value(AnimatableValue),
    /// Re-resolved every tick, after the referenced spring has stepped
    Follow(SpringId),
}

impl Target {
    pub fn follow_id(&self) -> Option<SpringId> {
        match self {
            Target::Follow(id) => Some(*id),
            Target::Value(_) => None,
        }
    }
}

impl From<AnimatableValue> for Target {
    fn from(value: AnimatableValue) -> Self {
        Target::Value(value)
    }
}

impl From<f64> for Target {
    fn from(value: f64) -> Self {
        Target::Value(value.into())
    }
}

impl From<i32> for Target {
    fn from(value: i32) -> Self {
        Target::Value(value.into())
    }
}

impl<const N: usize> From<[f64; N]> for Target {
    fn from(values: [f64; N]) -> Self {
        Target::Value(values.into())
    }
}

impl From<Vec<f64>> for Target {
    fn from(values: Vec<f64>) -> Self {
        Target::Value(values.into())
    }
}

impl From<SpringId> for Target {
    fn from(id: SpringId) -> Self {
        Target::Follow(id)
    }
}

/// Props for a single spring update
#[derive(Clone, Debug, Default)]
pub struct SpringProps {
    pub to: Option<Target>,
    pub from: Option<Target>,
    /// Replaces the spring's config for this and later runs
    pub config: Option<SpringConfig>,
    pub delay_ms: f64,
    /// Jump to the goal without integrating
    pub immediate: bool,
    /// Stop the active and pending animations instead of starting one
    pub cancel: bool,
    /// Restart from `from` even if the spring has animated before
    pub reset: bool,
    /// Swap `to` and `from` before anything else
    pub reverse: bool,
    /// Never treat this update as a no-op, and never let a later one replace it while pending
    pub force: bool,
    pub handlers: Handlers,
}

impl SpringProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, target: impl Into<Target>) -> Self {
        self.to = Some(target.into());
        self
    }

    pub fn from(mut self, target: impl Into<Target>) -> Self {
        self.from = Some(target.into());
        self
    }

    pub fn config(mut self, config: SpringConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn delay(mut self, delay_ms: f64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn cancel(mut self) -> Self {
        self.cancel = true;
        self
    }

    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn on_animate<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut AnimationRequest) + Send + Sync + 'static,
    {
        self.handlers.on_animate = Some(Arc::new(f));
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&AnimationResult) + Send + Sync + 'static,
    {
        self.handlers.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&AnimationResult) + Send + Sync + 'static,
    {
        self.handlers.on_change = Some(Arc::new(f));
        self
    }

    pub fn on_rest<F>(mut self, f: F) -> Self
    where
        F: Fn(&AnimationResult) + Send + Sync + 'static,
    {
        self.handlers.on_rest = Some(Arc::new(f));
        self
    }

    /// Resolve against the spring's current config
    ///
    /// `reverse` is applied here, so nothing downstream ever sees it.
    pub(crate) fn into_request(self, current: &SpringConfig) -> AnimationRequest {
        let (to, from) = if self.reverse {
            (self.from, self.to)
        } else {
            (self.to, self.from)
        };
        AnimationRequest {
            to,
            from,
            config: self.config.unwrap_or(*current),
            delay_ms: self.delay_ms.max(0.0),
            immediate: self.immediate,
            reset: self.reset,
            force: self.force,
            handlers: self.handlers,
        }
    }
}

/// One update's resolved props, as seen by `on_animate` handlers
#[derive(Clone, Debug)]
pub struct AnimationRequest {
    pub to: Option<Target>,
    pub from: Option<Target>,
    pub config: SpringConfig,
    pub delay_ms: f64,
    pub immediate: bool,
    pub reset: bool,
    pub force: bool,
    pub(crate) handlers: Handlers,
}

/// A prop given either once for every key or per key
pub enum PerKey<T> {
    All(T),
    ByKey(Arc<dyn Fn(&str) -> T + Send + Sync>),
}

impl<T: Clone> PerKey<T> {
    pub fn resolve(&self, key: &str) -> T {
        match self {
            PerKey::All(value) => value.clone(),
            PerKey::ByKey(f) => f(key),
        }
    }
}

impl<T: Clone> Clone for PerKey<T> {
    fn clone(&self) -> Self {
        match self {
            PerKey::All(value) => PerKey::All(value.clone()),
            PerKey::ByKey(f) => PerKey::ByKey(Arc::clone(f)),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PerKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerKey::All(value) => f.debug_tuple("All").field(value).finish(),
            PerKey::ByKey(_) => f.write_str("ByKey(..)"),
        }
    }
}

/// Which keys a controller update cancels
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Cancel {
    #[default]
    None,
    All,
    Keys(Vec<String>),
}

impl Cancel {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Cancel::None => false,
            Cancel::All => true,
            Cancel::Keys(keys) => keys.iter().any(|k| k == key),
        }
    }
}

/// Props for a controller update, fanned out per key
#[derive(Clone, Debug, Default)]
pub struct ControllerProps {
    pub to: IndexMap<String, Target>,
    pub from: IndexMap<String, Target>,
    pub config: Option<PerKey<SpringConfig>>,
    pub delay_ms: Option<PerKey<f64>>,
    pub immediate: Option<PerKey<bool>>,
    pub cancel: Cancel,
    pub reset: bool,
    pub reverse: bool,
    pub force: bool,
}

impl ControllerProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, key: impl Into<String>, target: impl Into<Target>) -> Self {
        self.to.insert(key.into(), target.into());
        self
    }

    pub fn from(mut self, key: impl Into<String>, target: impl Into<Target>) -> Self {
        self.from.insert(key.into(), target.into());
        self
    }

    pub fn config(mut self, config: SpringConfig) -> Self {
        self.config = Some(PerKey::All(config));
        self
    }

    pub fn config_by_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> SpringConfig + Send + Sync + 'static,
    {
        self.config = Some(PerKey::ByKey(Arc::new(f)));
        self
    }

    pub fn delay(mut self, delay_ms: f64) -> Self {
        self.delay_ms = Some(PerKey::All(delay_ms));
        self
    }

    pub fn delay_by_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> f64 + Send + Sync + 'static,
    {
        self.delay_ms = Some(PerKey::ByKey(Arc::new(f)));
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(PerKey::All(immediate));
        self
    }

    pub fn immediate_by_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.immediate = Some(PerKey::ByKey(Arc::new(f)));
        self
    }

    pub fn cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Whether this update touches `key` at all
    pub fn targets(&self, key: &str) -> bool {
        self.to.contains_key(key) || self.from.contains_key(key) || self.cancel.matches(key)
    }

    /// Props for the spring under `key`
    pub fn for_key(&self, key: &str) -> SpringProps {
        SpringProps {
            to: self.to.get(key).cloned(),
            from: self.from.get(key).cloned(),
            config: self.config.as_ref().map(|c| c.resolve(key)),
            delay_ms: self.delay_ms.as_ref().map_or(0.0, |d| d.resolve(key)),
            immediate: self.immediate.as_ref().is_some_and(|i| i.resolve(key)),
            cancel: self.cancel.matches(key),
            reset: self.reset,
            reverse: self.reverse,
            force: self.force,
            handlers: Handlers::default(),
        }
    }
}
