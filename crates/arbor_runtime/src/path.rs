//! Candidate traces.
//!
//! A path is a handle to its last node. Paths that share a prefix share the
//! prefix's nodes, so cloning a path or extending it never copies a state.

use crate::node::PathNode;
use crate::semantics::{Semantics, UnitRef};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Sequence of nodes from a root to a leaf
pub struct Path<S: Semantics> {
    last: Arc<PathNode<S>>,
}

impl<S: Semantics> Path<S> {
    /// Path with a single root node
    #[must_use]
    pub fn root(unit: UnitRef<S>) -> Self {
        Self {
            last: PathNode::root(unit),
        }
    }

    /// Extend `prefix` by one node that starts from `prefix_outgoing`.
    ///
    /// Passing `None` makes the new node execute the prefix on demand.
    #[must_use]
    pub fn child(
        prefix: &Self,
        unit: UnitRef<S>,
        assertion: S::Expr,
        prefix_outgoing: Option<Arc<S::State>>,
    ) -> Self {
        Self {
            last: PathNode::child(prefix.last.clone(), unit, assertion, prefix_outgoing),
        }
    }

    /// Leaf node
    #[must_use]
    pub fn last_node(&self) -> &Arc<PathNode<S>> {
        &self.last
    }

    /// Root node
    #[must_use]
    pub fn first_node(&self) -> &Arc<PathNode<S>> {
        let mut node = &self.last;
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    /// Nodes from leaf to root
    pub fn ancestors(&self) -> Ancestors<'_, S> {
        Ancestors { next: Some(&self.last) }
    }

    /// Nodes from root to leaf
    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<PathNode<S>>> {
        let mut nodes: Vec<_> = self.ancestors().cloned().collect();
        nodes.reverse();
        nodes
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.last.depth() + 1
    }

    /// Number of nodes before the leaf
    #[must_use]
    pub fn depth(&self) -> usize {
        self.last.depth()
    }

    /// Always false; a path has at least its root
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Primitive steps along the whole path
    #[must_use]
    pub fn n_steps(&self) -> usize {
        self.last.total_steps()
    }

    /// Path condition, root first
    #[must_use]
    pub fn assertions(&self) -> Vec<S::Expr> {
        let mut chunks: Vec<&[S::Expr]> = self.ancestors().map(|node| node.assertions_ref()).collect();
        chunks.reverse();
        chunks.concat()
    }

    /// Whether the leaf failed to execute
    #[must_use]
    pub fn execution_failed(&self) -> bool {
        self.last.execution_failed()
    }

    /// Processing time summed over all nodes
    #[must_use]
    pub fn processing_time(&self) -> Duration {
        self.ancestors().map(|node| node.processing_time()).sum()
    }

    /// Unit names joined root first
    #[must_use]
    pub fn printable_name(&self) -> String {
        self.nodes()
            .iter()
            .map(|node| node.printable_name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl<S: Semantics> Clone for Path<S> {
    fn clone(&self) -> Self {
        Self {
            last: self.last.clone(),
        }
    }
}

impl<S: Semantics> PartialEq for Path<S> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.last, &other.last)
    }
}

impl<S: Semantics> Eq for Path<S> {}

impl<S: Semantics> fmt::Debug for Path<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("len", &self.len())
            .field("n_steps", &self.n_steps())
            .field("last", &self.last)
            .finish()
    }
}

/// Iterator from a path's leaf up to its root
pub struct Ancestors<'a, S: Semantics> {
    next: Option<&'a Arc<PathNode<S>>>,
}

impl<'a, S: Semantics> Iterator for Ancestors<'a, S> {
    type Item = &'a Arc<PathNode<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.parent();
        Some(node)
    }
}
