//! Stable node identity.
//!
//! Every state node is identified by the path of names from the statechart
//! root down to the node. The path is the node's only stable identity: it is
//! the key for ownership lookups, the unit of persisted configurations, and
//! the value printed in logs (`fetch.loading`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of a node path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// The statechart root, carrying the machine name.
    Root(String),
    /// A named descent into a child state.
    Named(String),
}

impl Segment {
    pub fn name(&self) -> &str {
        match self {
            Segment::Root(name) | Segment::Named(name) => name,
        }
    }
}

/// Path of a state node from the root.
///
/// Equality, ordering, and hashing are positional over the segments.
/// Document order between nodes is not derivable from the path alone; the
/// resolved graph assigns it from child-list order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Vec<Segment>);

impl NodeId {
    /// Root path for a machine.
    pub fn root(machine: impl Into<String>) -> Self {
        Self(vec![Segment::Root(machine.into())])
    }

    /// Path of a named child of this node.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Named(name.into()));
        Self(segments)
    }

    /// Path of the parent node, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Number of segments (root = 1).
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Last segment's name.
    pub fn name(&self) -> &str {
        self.0.last().map(Segment::name).unwrap_or_default()
    }

    /// True if `self` is an ancestor of `other` (not reflexive).
    pub fn is_ancestor_of(&self, other: &NodeId) -> bool {
        other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Builds a path by descending from this node through `names`.
    pub fn descend<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut id = self.clone();
        for name in names {
            id = id.child(name);
        }
        id
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment.name())?;
        }
        Ok(())
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let path = String::deserialize(deserializer)?;
        let mut parts = path.split('.');
        let root = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| {
            serde::de::Error::custom("node path must have at least a root segment")
        })?;
        Ok(NodeId::root(root).descend(parts.map(str::to_string)))
    }
}
