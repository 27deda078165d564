//! Tension Core
//!
//! Shape-agnostic primitives shared by the Tension animation crates:
//!
//! - **Values**: scalar and fixed-length array numbers, the only data the
//!   animation core ever moves
//! - **Dependency Graph**: "reads from" edges between animated values with
//!   cycle rejection and a lazily computed topological order
//!
//! # Example
//!
//! ```rust
//! use slotmap::{new_key_type, SlotMap};
//! use tension_core::DependencyGraph;
//!
//! new_key_type! { struct Id; }
//!
//! let mut ids: SlotMap<Id, ()> = SlotMap::with_key();
//! let (leader, follower) = (ids.insert(()), ids.insert(()));
//!
//! let mut graph = DependencyGraph::new();
//! graph.insert(follower);
//! graph.insert(leader);
//! graph.attach(follower, leader).unwrap();
//!
//! assert_eq!(graph.order(), &[leader, follower]);
//! assert!(graph.attach(leader, follower).is_err());
//! ```

pub mod error;
pub mod graph;
pub mod value;

pub use error::GraphError;
pub use graph::DependencyGraph;
pub use value::{AnimatableValue, Components, ValueShape};
