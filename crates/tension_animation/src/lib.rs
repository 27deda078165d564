//! Tension Animation
//!
//! Physically based spring animation for interactive UIs.
//!
//! # Features
//!
//! - **Spring Physics**: sub-stepped semi-implicit Euler with mass, tension
//!   and friction, plus clamp and bounce
//! - **Duration and Decay Modes**: eased fixed-length runs and momentum decay
//! - **Interruptible**: a new goal continues from the live position and
//!   velocity, never from a snapshot
//! - **Dependencies**: a spring may chase another spring's live output,
//!   stepped after its source within the same frame
//! - **Controllers**: named groups of springs with one aggregate completion
//! - **Host-driven Clock**: ticks only while something moves; frames are
//!   requested through a [`FrameRequester`]
//!
//! # Example
//!
//! ```rust
//! use tension_animation::{Clock, SpringConfig, SpringProps, SpringValue};
//!
//! let clock = Clock::new();
//! let leader = SpringValue::new(&clock.handle(), 0.0).unwrap();
//! let follower =
//!     SpringValue::with_config(&clock.handle(), 0.0, SpringConfig::stiff()).unwrap();
//!
//! follower.update(SpringProps::new().to(&leader)).unwrap();
//! leader.start(100.0).unwrap();
//!
//! while clock.advance(16.0) {}
//! assert_eq!(follower.get(), leader.get());
//! ```

pub mod clock;
pub mod completion;
pub mod config;
pub mod controller;
pub mod easing;
pub mod error;
pub mod events;
pub mod integrator;
pub mod node;
pub mod props;
pub mod spring_value;

pub use clock::{Clock, ClockHandle, FrameRequester, SpringId};
pub use completion::Completion;
pub use config::{AnimationGlobals, Mode, SpringConfig, DEFAULT_DECAY};
pub use controller::{Controller, ControllerResult, ValueMap};
pub use easing::Easing;
pub use error::{AnimationError, Result};
pub use events::{AnimationResult, Handlers};
pub use props::{AnimationRequest, Cancel, ControllerProps, PerKey, SpringProps, Target};
pub use spring_value::{Phase, SpringValue};
pub use tension_core::{AnimatableValue, ValueShape};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a handler panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
