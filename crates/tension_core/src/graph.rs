//! Dependency ordering between animated values
//!
//! A node may follow the output of other nodes ("sources"). Each frame the
//! driver walks [`DependencyGraph::order`] so every source is stepped before
//! the nodes that read it. The order is computed lazily from node depths, the
//! same way derived values are ranked in a reactive graph, and is only
//! recomputed after an attach, detach, insert or remove.
//!
//! Cycles are rejected when an edge is attached, so the depth walk never
//! recurses forever.

use crate::error::GraphError;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{Key, SecondaryMap};
use smallvec::SmallVec;

/// Per-node edge storage
#[derive(Debug, Clone)]
struct GraphNode<K: Key> {
    /// Nodes whose output this node reads
    sources: SmallVec<[K; 2]>,
    /// Nodes reading this node's output
    dependents: SmallVec<[K; 4]>,
}

impl<K: Key> Default for GraphNode<K> {
    fn default() -> Self {
        Self {
            sources: SmallVec::new(),
            dependents: SmallVec::new(),
        }
    }
}

/// Directed acyclic graph of "reads from" relations, keyed by slotmap keys
#[derive(Debug, Clone)]
pub struct DependencyGraph<K: Key> {
    nodes: SecondaryMap<K, GraphNode<K>>,
    /// Registration order, used as the tie-breaker inside one depth level
    insertion: Vec<K>,
    /// Cached topological order (sources first)
    order: Vec<K>,
    dirty: bool,
}

impl<K: Key> DependencyGraph<K> {
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            insertion: Vec::new(),
            order: Vec::new(),
            dirty: false,
        }
    }

    /// Register a node. Registering twice is a no-op.
    pub fn insert(&mut self, key: K) {
        if self.nodes.contains_key(key) {
            return;
        }
        self.nodes.insert(key, GraphNode::default());
        self.insertion.push(key);
        self.dirty = true;
    }

    pub fn contains(&self, key: K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.insertion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insertion.is_empty()
    }

    /// Remove a node and every edge touching it
    ///
    /// Returns the nodes that were reading from the removed node. Their edges
    /// are gone; the caller decides what a lost source means for them.
    pub fn remove(&mut self, key: K) -> SmallVec<[K; 4]> {
        let Some(node) = self.nodes.remove(key) else {
            return SmallVec::new();
        };

        for source in &node.sources {
            if let Some(source_node) = self.nodes.get_mut(*source) {
                source_node.dependents.retain(|d| *d != key);
            }
        }
        for dependent in &node.dependents {
            if let Some(dependent_node) = self.nodes.get_mut(*dependent) {
                dependent_node.sources.retain(|s| *s != key);
            }
        }

        self.insertion.retain(|k| *k != key);
        self.dirty = true;
        node.dependents
    }

    /// Make `dependent` read from `source`
    ///
    /// Fails with [`GraphError::Cycle`] when `source` already (transitively)
    /// reads from `dependent`, including the self-edge case.
    pub fn attach(&mut self, dependent: K, source: K) -> Result<(), GraphError> {
        if !self.nodes.contains_key(dependent) || !self.nodes.contains_key(source) {
            return Err(GraphError::UnknownNode);
        }
        if self.would_cycle(dependent, source) {
            return Err(GraphError::Cycle);
        }

        let node = &mut self.nodes[dependent];
        if node.sources.contains(&source) {
            return Ok(());
        }
        node.sources.push(source);
        self.nodes[source].dependents.push(dependent);
        self.dirty = true;
        tracing::trace!("dependency graph: attached edge, {} nodes", self.len());
        Ok(())
    }

    /// Check whether `dependent -> source` would close a cycle
    pub fn would_cycle(&self, dependent: K, source: K) -> bool {
        dependent == source || self.depends_on(source, dependent)
    }

    /// Whether `node` transitively reads from `target`
    pub fn depends_on(&self, node: K, target: K) -> bool {
        let mut stack: SmallVec<[K; 8]> = SmallVec::new();
        let mut seen: FxHashSet<K> = FxHashSet::default();
        stack.push(node);

        while let Some(current) = stack.pop() {
            let Some(entry) = self.nodes.get(current) else {
                continue;
            };
            for &source in &entry.sources {
                if source == target {
                    return true;
                }
                if seen.insert(source) {
                    stack.push(source);
                }
            }
        }
        false
    }

    /// Remove the edge `dependent -> source` if present
    pub fn detach(&mut self, dependent: K, source: K) {
        let mut removed = false;
        if let Some(node) = self.nodes.get_mut(dependent) {
            let before = node.sources.len();
            node.sources.retain(|s| *s != source);
            removed = node.sources.len() != before;
        }
        if removed {
            if let Some(source_node) = self.nodes.get_mut(source) {
                source_node.dependents.retain(|d| *d != dependent);
            }
            self.dirty = true;
        }
    }

    pub fn sources(&self, key: K) -> &[K] {
        self.nodes
            .get(key)
            .map(|n| n.sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents(&self, key: K) -> &[K] {
        self.nodes
            .get(key)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// All nodes, sources before the nodes that read them
    ///
    /// Nodes at the same depth keep their registration order.
    pub fn order(&mut self) -> &[K] {
        if self.dirty {
            self.recompute_order();
        }
        &self.order
    }

    fn recompute_order(&mut self) {
        let mut depths: FxHashMap<K, u32> = FxHashMap::default();
        for &key in &self.insertion {
            self.depth_of(key, &mut depths);
        }

        let mut order = self.insertion.clone();
        // Stable sort keeps insertion order within a depth level
        order.sort_by_key(|k| depths.get(k).copied().unwrap_or(0));
        self.order = order;
        self.dirty = false;
        tracing::trace!("dependency graph: order recomputed for {} nodes", self.len());
    }

    fn depth_of(&self, key: K, depths: &mut FxHashMap<K, u32>) -> u32 {
        if let Some(depth) = depths.get(&key) {
            return *depth;
        }
        let depth = match self.nodes.get(key) {
            Some(node) => node
                .sources
                .iter()
                .map(|s| self.depth_of(*s, depths) + 1)
                .max()
                .unwrap_or(0),
            None => 0,
        };
        depths.insert(key, depth);
        depth
    }
}

impl<K: Key> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}
