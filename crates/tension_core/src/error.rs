//! Core error types

use thiserror::Error;

/// Errors raised while editing a [`DependencyGraph`](crate::graph::DependencyGraph)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    /// The edge would make a node (transitively) read its own output
    #[error("dependency would form a cycle")]
    Cycle,

    /// One of the endpoints was never registered or has been removed
    #[error("node is not registered in the dependency graph")]
    UnknownNode,
}
