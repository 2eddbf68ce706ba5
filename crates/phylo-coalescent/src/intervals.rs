//! Tree intervals.
//!
//! A tree with `n` tips and `n − 1` internal nodes yields `2n − 1` events
//! sorted by height ascending, each terminating an interval whose duration
//! is the gap to the previous event (the first interval starts at height
//! zero, the youngest tip). Simultaneous events are ordered samples first,
//! then by node id ascending — a stable, documented order.

use crate::tree::Phylogeny;
use phylo_core::{ensure, NodeId, Real, Result};

/// What terminates an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A tip enters the extant set.
    Sample,
    /// Two extant lineages merge.
    Coalescent,
}

#[derive(Debug, Clone)]
struct IntervalEvent {
    height: Real,
    kind: EventKind,
    node: NodeId,
    duration: Real,
}

/// Ordered interval sequence of a tree. Rebuilt whenever the tree changes.
#[derive(Debug, Clone)]
pub struct TreeIntervals {
    events: Vec<IntervalEvent>,
}

impl TreeIntervals {
    /// Extract the interval sequence from `tree`.
    pub fn from_tree<T: Phylogeny + ?Sized>(tree: &T) -> Result<Self> {
        let n = tree.node_count();
        ensure!(n >= 3, "tree with {n} node(s) has no interval structure");
        for node in 0..n {
            ensure!(
                tree.height(node).is_finite(),
                "node {node} has non-finite height"
            );
        }
        let mut events: Vec<IntervalEvent> = (0..n)
            .map(|node| IntervalEvent {
                height: tree.height(node),
                kind: if tree.is_leaf(node) {
                    EventKind::Sample
                } else {
                    EventKind::Coalescent
                },
                node,
                duration: 0.0,
            })
            .collect();
        // Height ascending; ties put samples before coalescences, then
        // lower node ids first.
        events.sort_by(|a, b| {
            a.height
                .partial_cmp(&b.height)
                .expect("tree heights are finite")
                .then_with(|| {
                    let rank = |k: EventKind| match k {
                        EventKind::Sample => 0,
                        EventKind::Coalescent => 1,
                    };
                    rank(a.kind).cmp(&rank(b.kind))
                })
                .then_with(|| a.node.cmp(&b.node))
        });
        let mut prev = 0.0;
        for ev in &mut events {
            ev.duration = ev.height - prev;
            prev = ev.height;
        }
        Ok(Self { events })
    }

    /// Number of intervals (`2n − 1`).
    pub fn count(&self) -> usize {
        self.events.len()
    }

    /// Duration of interval `i`.
    pub fn duration(&self, i: usize) -> Real {
        self.events[i].duration
    }

    /// The event terminating interval `i`.
    pub fn event_kind(&self, i: usize) -> EventKind {
        self.events[i].kind
    }

    /// The node attached to interval `i`'s event.
    pub fn event_node(&self, i: usize) -> NodeId {
        self.events[i].node
    }

    /// Height of interval `i`'s terminating event.
    pub fn time_of(&self, i: usize) -> Real {
        self.events[i].height
    }

    /// Sum of all durations — the height of the root event.
    pub fn total_duration(&self) -> Real {
        self.events.last().map_or(0.0, |e| e.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SampledTree;
    use approx::assert_relative_eq;

    /// Four serially-sampled tips with a ladder topology.
    fn ladder() -> SampledTree {
        let mut b = SampledTree::builder();
        let t0 = b.tip("a", 0.0, 0);
        let t1 = b.tip("b", 0.1, 0);
        let t2 = b.tip("c", 0.3, 0);
        let t3 = b.tip("d", 0.0, 0);
        let c0 = b.join(t0, t1, 0.5).unwrap();
        let c1 = b.join(c0, t2, 0.9).unwrap();
        b.join(c1, t3, 1.4).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn event_order_and_durations() {
        let tree = ladder();
        let iv = TreeIntervals::from_tree(&tree).unwrap();
        assert_eq!(iv.count(), 7);

        // Heights: tips at 0, 0, 0.1, 0.3; coalescences at 0.5, 0.9, 1.4.
        let kinds: Vec<EventKind> = (0..7).map(|i| iv.event_kind(i)).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Sample,
                EventKind::Sample,
                EventKind::Sample,
                EventKind::Sample,
                EventKind::Coalescent,
                EventKind::Coalescent,
                EventKind::Coalescent,
            ]
        );
        // Tips at equal height 0 are ordered by node id.
        assert_eq!(iv.event_node(0), 0);
        assert_eq!(iv.event_node(1), 3);

        let total: Real = (0..7).map(|i| iv.duration(i)).sum();
        assert_relative_eq!(total, 1.4, epsilon = 1e-12);
        assert_relative_eq!(iv.total_duration(), 1.4, epsilon = 1e-12);
    }

    #[test]
    fn sample_precedes_coalescent_at_equal_height() {
        let mut b = SampledTree::builder();
        let t0 = b.tip("a", 0.0, 0);
        let t1 = b.tip("b", 0.0, 0);
        let t2 = b.tip("c", 0.5, 0);
        let c0 = b.join(t0, t1, 0.5).unwrap();
        b.join(c0, t2, 1.0).unwrap();
        let tree = b.build().unwrap();
        let iv = TreeIntervals::from_tree(&tree).unwrap();

        // At height 0.5 the sample (node 2) comes before the coalescence.
        assert_eq!(iv.time_of(2), 0.5);
        assert_eq!(iv.event_kind(2), EventKind::Sample);
        assert_eq!(iv.event_kind(3), EventKind::Coalescent);
        assert_eq!(iv.duration(3), 0.0);
    }

    #[test]
    fn too_small_tree_rejected() {
        struct TwoNode;
        impl Phylogeny for TwoNode {
            fn node_count(&self) -> usize {
                1
            }
            fn tip_count(&self) -> usize {
                1
            }
            fn root(&self) -> usize {
                0
            }
            fn height(&self, _: usize) -> Real {
                0.0
            }
            fn children(&self, _: usize) -> Option<(usize, usize)> {
                None
            }
            fn parent(&self, _: usize) -> Option<usize> {
                None
            }
            fn tip_deme(&self, _: usize) -> Option<usize> {
                Some(0)
            }
        }
        assert!(TreeIntervals::from_tree(&TwoNode).is_err());
    }
}
