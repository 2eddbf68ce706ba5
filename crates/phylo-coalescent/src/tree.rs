//! Tree collaborator.
//!
//! The likelihood engine does not own tree storage; it works against the
//! [`Phylogeny`] trait: node heights above the youngest tip, child and
//! parent links, and the sampled deme carried by each tip. [`SampledTree`]
//! is a concrete implementation with a programmatic builder so hosts and
//! tests can assemble dated, bifurcating trees without an external store.

use phylo_core::{DemeId, Error, NodeId, Real, Result};

/// Read access to a dated, bifurcating genealogy.
pub trait Phylogeny {
    /// Total number of nodes (tips + internal).
    fn node_count(&self) -> usize;

    /// Number of tips.
    fn tip_count(&self) -> usize;

    /// The root node.
    fn root(&self) -> NodeId;

    /// Height of `node` above the youngest tip.
    fn height(&self, node: NodeId) -> Real;

    /// The two children of an internal node; `None` for tips.
    fn children(&self, node: NodeId) -> Option<(NodeId, NodeId)>;

    /// The parent of `node`; `None` at the root.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Whether `node` is a tip.
    fn is_leaf(&self, node: NodeId) -> bool {
        self.children(node).is_none()
    }

    /// The deme a tip was sampled from; `None` for internal nodes.
    fn tip_deme(&self, node: NodeId) -> Option<DemeId>;
}

#[derive(Debug, Clone)]
struct Node {
    height: Real,
    children: Option<(NodeId, NodeId)>,
    parent: Option<NodeId>,
    deme: Option<DemeId>,
    name: Option<String>,
}

/// A concrete dated, bifurcating tree with per-tip deme assignments.
#[derive(Debug, Clone)]
pub struct SampledTree {
    nodes: Vec<Node>,
    root: NodeId,
    n_tips: usize,
}

impl SampledTree {
    /// Start building a tree.
    pub fn builder() -> TreeBuilder {
        TreeBuilder { nodes: Vec::new() }
    }

    /// The name a tip was registered under.
    pub fn tip_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).and_then(|n| n.name.as_deref())
    }
}

impl Phylogeny for SampledTree {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn tip_count(&self) -> usize {
        self.n_tips
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn height(&self, node: NodeId) -> Real {
        self.nodes[node].height
    }

    fn children(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        self.nodes[node].children
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent
    }

    fn tip_deme(&self, node: NodeId) -> Option<DemeId> {
        self.nodes[node].deme
    }
}

/// Incremental [`SampledTree`] construction.
///
/// Register tips with [`tip`](Self::tip), merge subtrees bottom-up with
/// [`join`](Self::join), and finish with [`build`](Self::build). Node ids
/// are assigned in registration order.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    /// Add a tip sampled from `deme` at `height` above the youngest tip.
    pub fn tip(&mut self, name: &str, height: Real, deme: DemeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            height,
            children: None,
            parent: None,
            deme: Some(deme),
            name: Some(name.to_string()),
        });
        id
    }

    /// Join two parentless subtrees under a new internal node at `height`.
    pub fn join(&mut self, a: NodeId, b: NodeId, height: Real) -> Result<NodeId> {
        for &child in &[a, b] {
            let n = self.nodes.get(child).ok_or(Error::IndexOutOfRange {
                index: child,
                size: self.nodes.len(),
            })?;
            if n.parent.is_some() {
                return Err(Error::Invariant(format!(
                    "node {child} already has a parent"
                )));
            }
            if n.height > height {
                return Err(Error::Invariant(format!(
                    "parent at height {height} is below child {child} at {}",
                    n.height
                )));
            }
        }
        if a == b {
            return Err(Error::Invariant(format!("cannot join node {a} with itself")));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            height,
            children: Some((a, b)),
            parent: None,
            deme: None,
            name: None,
        });
        self.nodes[a].parent = Some(id);
        self.nodes[b].parent = Some(id);
        Ok(id)
    }

    /// Finish: exactly one parentless node must remain, and every tip
    /// height must be non-negative (a negative height would put a sample
    /// after the trajectory's end).
    pub fn build(self) -> Result<SampledTree> {
        let mut roots = self.nodes.iter().enumerate().filter(|(_, n)| n.parent.is_none());
        let root = match (roots.next(), roots.next()) {
            (Some((id, _)), None) => id,
            (None, _) => return Err(Error::Invariant("empty tree".into())),
            (Some(_), Some(_)) => {
                return Err(Error::Invariant("tree has more than one root".into()))
            }
        };
        let n_tips = self.nodes.iter().filter(|n| n.children.is_none()).count();
        if n_tips < 2 {
            return Err(Error::Invariant("tree needs at least two tips".into()));
        }
        for (id, n) in self.nodes.iter().enumerate() {
            if n.children.is_none() && n.height < 0.0 {
                return Err(Error::Config(format!(
                    "tip {id} has negative height {}",
                    n.height
                )));
            }
        }
        Ok(SampledTree {
            nodes: self.nodes,
            root,
            n_tips,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cherry() -> SampledTree {
        let mut b = SampledTree::builder();
        let t0 = b.tip("a", 0.0, 0);
        let t1 = b.tip("b", 0.0, 1);
        b.join(t0, t1, 0.5).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn basic_topology() {
        let tree = cherry();
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.tip_count(), 2);
        assert_eq!(tree.root(), 2);
        assert_eq!(tree.children(2), Some((0, 1)));
        assert_eq!(tree.parent(0), Some(2));
        assert_eq!(tree.parent(2), None);
        assert!(tree.is_leaf(0));
        assert!(!tree.is_leaf(2));
        assert_eq!(tree.tip_deme(1), Some(1));
        assert_eq!(tree.tip_deme(2), None);
        assert_eq!(tree.tip_name(0), Some("a"));
    }

    #[test]
    fn join_validates_heights_and_parents() {
        let mut b = SampledTree::builder();
        let t0 = b.tip("a", 1.0, 0);
        let t1 = b.tip("b", 0.0, 0);
        assert!(b.join(t0, t1, 0.5).is_err()); // below child a
        assert!(b.join(t0, t0, 2.0).is_err()); // self-join
        let p = b.join(t0, t1, 2.0).unwrap();
        let t2 = b.tip("c", 0.0, 0);
        assert!(b.join(t0, t2, 3.0).is_err()); // t0 already joined
        b.join(p, t2, 3.0).unwrap();
        assert!(b.build().is_ok());
    }

    #[test]
    fn build_rejects_forests_and_negative_tips() {
        let mut b = SampledTree::builder();
        b.tip("a", 0.0, 0);
        b.tip("b", 0.0, 0);
        assert!(b.build().is_err()); // two roots

        let mut b = SampledTree::builder();
        let t0 = b.tip("a", -0.5, 0);
        let t1 = b.tip("b", 0.0, 0);
        b.join(t0, t1, 1.0).unwrap();
        assert!(matches!(b.build(), Err(Error::Config(_))));
    }
}
