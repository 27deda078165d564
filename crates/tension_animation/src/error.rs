//! Animation error types

use tension_core::{GraphError, ValueShape};
use thiserror::Error;

/// Errors reported by springs, controllers and the clock
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimationError {
    /// A `to`/`from` reference would make a spring (transitively) follow itself
    #[error("dependency would form a cycle")]
    CyclicDependency,

    /// A value does not match the shape the spring was created with
    #[error("value shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        expected: ValueShape,
        found: ValueShape,
    },

    /// A referenced spring no longer exists
    #[error("dependency has been disposed")]
    DependencyDisposed,

    /// A config value outside the range its mode can run with
    #[error("invalid spring config: {0}")]
    InvalidConfig(&'static str),

    /// Integration produced a non-finite position or velocity
    #[error("integration became unstable (non-finite state)")]
    Unstable,

    /// The spring itself has been disposed
    #[error("spring value has been disposed")]
    Disposed,

    /// The clock behind a handle has been dropped
    #[error("animation clock is no longer alive")]
    ClockGone,

    #[error("unknown key: {0}")]
    UnknownKey(String),
}

impl AnimationError {
    /// Whether this error describes a malformed request or dependency setup
    ///
    /// Configuration errors never abort the clock; the offending request is
    /// discarded and every other spring keeps ticking.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AnimationError::CyclicDependency
                | AnimationError::ShapeMismatch { .. }
                | AnimationError::DependencyDisposed
                | AnimationError::InvalidConfig(_)
                | AnimationError::Unstable
        )
    }
}

impl From<GraphError> for AnimationError {
    fn from(error: GraphError) -> Self {
        match error {
            GraphError::Cycle => AnimationError::CyclicDependency,
            GraphError::UnknownNode => AnimationError::DependencyDisposed,
        }
    }
}

/// Result type for animation operations
pub type Result<T> = std::result::Result<T, AnimationError>;
