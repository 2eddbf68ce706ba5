//! Per-lineage state-probability vectors.
//!
//! The extant set maps tree nodes to probability vectors over the `m`
//! demes. Vectors live in one dense contiguous buffer addressed through a
//! slot free-list plus a dense `nodeId → slot` table, so the per-step
//! vector arithmetic stays cache-friendly and insertion/removal causes no
//! small-allocation churn. The collapsed aggregates `A = Σ pᵢ` and
//! `Σ pᵢ²` are cached and invalidated on every mutation.

use phylo_core::{DemeId, Error, NodeId, Real, Result};
use phylo_math::{Array, Matrix};
use std::collections::HashMap;

/// Extant-lineage probability vectors plus the sparse ancestral store.
#[derive(Debug)]
pub struct StateProbabilities {
    m: usize,
    buf: Vec<Real>,
    slot_of: Vec<Option<usize>>,
    node_at: Vec<Option<NodeId>>,
    free: Vec<usize>,
    n_extant: usize,
    sum_cache: Option<Array>,
    sq_cache: Option<Array>,
    ancestral: HashMap<NodeId, Array>,
    scratch: Vec<Real>,
}

impl StateProbabilities {
    /// Create an empty set over `m` demes, pre-sized for `max_lineages`
    /// concurrently extant lineages and `max_nodes` distinct node ids.
    pub fn new(m: usize, max_lineages: usize, max_nodes: usize) -> Self {
        Self {
            m,
            buf: vec![0.0; m * max_lineages],
            slot_of: vec![None; max_nodes],
            node_at: vec![None; max_lineages],
            free: (0..max_lineages).rev().collect(),
            n_extant: 0,
            sum_cache: None,
            sq_cache: None,
            ancestral: HashMap::new(),
            scratch: vec![0.0; m],
        }
    }

    /// Number of demes.
    pub fn n_demes(&self) -> usize {
        self.m
    }

    /// Number of extant lineages.
    pub fn count(&self) -> usize {
        self.n_extant
    }

    /// Whether `node` is extant.
    pub fn contains(&self, node: NodeId) -> bool {
        self.slot_of.get(node).copied().flatten().is_some()
    }

    fn invalidate(&mut self) {
        self.sum_cache = None;
        self.sq_cache = None;
    }

    fn grow(&mut self) {
        let slot = self.node_at.len();
        self.buf.extend(std::iter::repeat(0.0).take(self.m));
        self.node_at.push(None);
        self.free.push(slot);
    }

    fn claim_slot(&mut self, node: NodeId) -> Result<usize> {
        if node >= self.slot_of.len() {
            self.slot_of.resize(node + 1, None);
        }
        if self.slot_of[node].is_some() {
            return Err(Error::Invariant(format!("lineage {node} already extant")));
        }
        if self.free.is_empty() {
            self.grow();
        }
        let slot = self.free.pop().expect("free list non-empty");
        self.slot_of[node] = Some(slot);
        self.node_at[slot] = Some(node);
        self.n_extant += 1;
        Ok(slot)
    }

    /// Insert lineage `node` as a fresh sample from deme `state`.
    ///
    /// With `min_p > 0` every entry is floored at `min_p` and the vector
    /// renormalised, so no deme starts at exactly zero probability.
    pub fn add_sample(&mut self, node: NodeId, state: DemeId, min_p: Real) -> Result<()> {
        if state >= self.m {
            return Err(Error::IndexOutOfRange {
                index: state,
                size: self.m,
            });
        }
        let slot = self.claim_slot(node)?;
        let row = &mut self.buf[slot * self.m..(slot + 1) * self.m];
        row.fill(0.0);
        row[state] = 1.0;
        if min_p > 0.0 {
            floor_and_renormalise(row, min_p);
        }
        self.invalidate();
        Ok(())
    }

    /// Insert lineage `node` with vector `p`, taking ownership.
    pub fn add_lineage(&mut self, node: NodeId, p: &Array) -> Result<()> {
        if p.size() != self.m {
            return Err(Error::Invariant(format!(
                "lineage vector has {} entries, expected {}",
                p.size(),
                self.m
            )));
        }
        let slot = self.claim_slot(node)?;
        self.buf[slot * self.m..(slot + 1) * self.m].copy_from_slice(p.as_slice());
        self.invalidate();
        Ok(())
    }

    /// Remove lineage `node`, returning its last-held vector.
    pub fn remove_lineage(&mut self, node: NodeId) -> Result<Array> {
        let slot = self
            .slot_of
            .get(node)
            .copied()
            .flatten()
            .ok_or_else(|| Error::Invariant(format!("lineage {node} not extant")))?;
        self.slot_of[node] = None;
        self.node_at[slot] = None;
        self.free.push(slot);
        self.n_extant -= 1;
        self.invalidate();
        Ok(Array::from_slice(
            &self.buf[slot * self.m..(slot + 1) * self.m],
        ))
    }

    /// Borrow the vector of an extant lineage.
    pub fn probs(&self, node: NodeId) -> Option<&[Real]> {
        let slot = self.slot_of.get(node).copied().flatten()?;
        Some(&self.buf[slot * self.m..(slot + 1) * self.m])
    }

    /// Borrow the vectors of a child pair, preserving order.
    pub fn pair_probs(&self, u: NodeId, v: NodeId) -> Result<(&[Real], &[Real])> {
        let missing = |n: NodeId| Error::Invariant(format!("lineage {n} not extant"));
        let su = self.slot_of.get(u).copied().flatten().ok_or_else(|| missing(u))?;
        let sv = self.slot_of.get(v).copied().flatten().ok_or_else(|| missing(v))?;
        Ok((
            &self.buf[su * self.m..(su + 1) * self.m],
            &self.buf[sv * self.m..(sv + 1) * self.m],
        ))
    }

    /// Node ids of all extant lineages, in slot order.
    pub fn extant_nodes(&self) -> Vec<NodeId> {
        self.node_at.iter().copied().flatten().collect()
    }

    /// Visit every extant vector mutably. Invalidates the aggregates.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(NodeId, &mut [Real])) {
        for slot in 0..self.node_at.len() {
            if let Some(node) = self.node_at[slot] {
                f(node, &mut self.buf[slot * self.m..(slot + 1) * self.m]);
            }
        }
        self.invalidate();
    }

    /// Aggregate `Aᵢ = Σ_ℓ p_ℓ,ᵢ`. Cached until the next mutation.
    pub fn lineage_state_sum(&mut self) -> &Array {
        if self.sum_cache.is_none() {
            let mut a = Array::zeros(self.m);
            for slot in 0..self.node_at.len() {
                if self.node_at[slot].is_some() {
                    for i in 0..self.m {
                        a[i] += self.buf[slot * self.m + i];
                    }
                }
            }
            self.sum_cache = Some(a);
        }
        self.sum_cache.as_ref().expect("just filled")
    }

    /// Aggregate `Σ_ℓ p_ℓ,ᵢ²`. Cached until the next mutation.
    pub fn lineage_sum_squares(&mut self) -> &Array {
        if self.sq_cache.is_none() {
            let mut s = Array::zeros(self.m);
            for slot in 0..self.node_at.len() {
                if self.node_at[slot].is_some() {
                    for i in 0..self.m {
                        let p = self.buf[slot * self.m + i];
                        s[i] += p * p;
                    }
                }
            }
            self.sq_cache = Some(s);
        }
        self.sq_cache.as_ref().expect("just filled")
    }

    /// In-place left-multiply every extant vector by `Qᵀ` (diffusion
    /// step); with `normalise`, each vector is rescaled to sum to one.
    pub fn mul_extant_probabilities(&mut self, q: &Matrix, normalise: bool) -> Result<()> {
        if q.rows() != self.m || q.cols() != self.m {
            return Err(Error::Invariant(format!(
                "diffusion matrix is {}×{}, expected {}×{}",
                q.rows(),
                q.cols(),
                self.m,
                self.m
            )));
        }
        for slot in 0..self.node_at.len() {
            if self.node_at[slot].is_none() {
                continue;
            }
            let row = &self.buf[slot * self.m..(slot + 1) * self.m];
            for j in 0..self.m {
                let mut acc = 0.0;
                for i in 0..self.m {
                    acc += q[(i, j)] * row[i];
                }
                self.scratch[j] = acc;
            }
            if normalise {
                let s: Real = self.scratch.iter().sum();
                if s != 0.0 && s.is_finite() {
                    for v in &mut self.scratch {
                        *v /= s;
                    }
                }
            }
            self.buf[slot * self.m..(slot + 1) * self.m].copy_from_slice(&self.scratch);
        }
        self.invalidate();
        Ok(())
    }

    /// The vector of the last surviving lineage, if exactly one remains.
    pub fn root_probs(&self) -> Option<Array> {
        if self.n_extant != 1 {
            return None;
        }
        let slot = self.node_at.iter().position(|n| n.is_some())?;
        Some(Array::from_slice(
            &self.buf[slot * self.m..(slot + 1) * self.m],
        ))
    }

    // ── Ancestral store ──────────────────────────────────────────────────

    /// Record `p` under `node` in the ancestral store.
    pub fn store_ancestral(&mut self, node: NodeId, p: Array) {
        self.ancestral.insert(node, p);
    }

    /// Record the current extant vector of `node` in the ancestral store.
    pub fn store_ancestral_current(&mut self, node: NodeId) -> Result<()> {
        let p = self
            .probs(node)
            .ok_or_else(|| Error::Invariant(format!("lineage {node} not extant")))?;
        let p = Array::from_slice(p);
        self.ancestral.insert(node, p);
        Ok(())
    }

    /// Look up a stored ancestral vector.
    pub fn ancestral(&self, node: NodeId) -> Option<&Array> {
        self.ancestral.get(&node)
    }

    /// Drop all stored ancestral vectors.
    pub fn clear_ancestral(&mut self) {
        self.ancestral.clear();
    }
}

/// Floor every entry at `min_p`, then renormalise to the simplex.
pub(crate) fn floor_and_renormalise(p: &mut [Real], min_p: Real) {
    let mut sum = 0.0;
    for v in p.iter_mut() {
        *v = v.max(min_p);
        sum += *v;
    }
    if sum != 0.0 && sum.is_finite() {
        for v in p.iter_mut() {
            *v /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fresh() -> StateProbabilities {
        StateProbabilities::new(2, 4, 8)
    }

    #[test]
    fn add_sample_one_hot_and_floored() {
        let mut sp = fresh();
        sp.add_sample(0, 1, 0.0).unwrap();
        assert_eq!(sp.probs(0).unwrap(), &[0.0, 1.0]);

        sp.add_sample(1, 0, 0.001).unwrap();
        let p = sp.probs(1).unwrap();
        assert!(p[1] > 0.0 && p[1] < 0.01);
        assert_relative_eq!(p[0] + p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sample_rejects_unknown_deme_and_duplicates() {
        let mut sp = fresh();
        assert!(matches!(
            sp.add_sample(0, 5, 0.0),
            Err(Error::IndexOutOfRange { .. })
        ));
        sp.add_sample(0, 0, 0.0).unwrap();
        assert!(sp.add_sample(0, 1, 0.0).is_err());
    }

    #[test]
    fn remove_returns_last_vector() {
        let mut sp = fresh();
        sp.add_lineage(3, &Array::from_slice(&[0.25, 0.75])).unwrap();
        assert_eq!(sp.count(), 1);
        let p = sp.remove_lineage(3).unwrap();
        assert_eq!(p.as_slice(), &[0.25, 0.75]);
        assert_eq!(sp.count(), 0);
        assert!(sp.remove_lineage(3).is_err());
    }

    #[test]
    fn slots_are_reused() {
        let mut sp = StateProbabilities::new(2, 1, 8);
        sp.add_sample(0, 0, 0.0).unwrap();
        sp.remove_lineage(0).unwrap();
        sp.add_sample(1, 1, 0.0).unwrap();
        // Capacity 1, two sequential lineages: same backing slot.
        assert_eq!(sp.probs(1).unwrap(), &[0.0, 1.0]);
        // Exceeding capacity grows the buffer rather than failing.
        sp.add_sample(2, 0, 0.0).unwrap();
        assert_eq!(sp.count(), 2);
    }

    #[test]
    fn aggregates_cached_and_invalidated() {
        let mut sp = fresh();
        sp.add_lineage(0, &Array::from_slice(&[0.5, 0.5])).unwrap();
        sp.add_lineage(1, &Array::from_slice(&[1.0, 0.0])).unwrap();

        assert_eq!(sp.lineage_state_sum().as_slice(), &[1.5, 0.5]);
        assert_eq!(sp.lineage_sum_squares().as_slice(), &[1.25, 0.25]);

        sp.remove_lineage(1).unwrap();
        assert_eq!(sp.lineage_state_sum().as_slice(), &[0.5, 0.5]);
        assert_eq!(sp.lineage_sum_squares().as_slice(), &[0.25, 0.25]);
    }

    #[test]
    fn diffusion_multiply() {
        let mut sp = fresh();
        sp.add_lineage(0, &Array::from_slice(&[1.0, 0.0])).unwrap();
        // Qᵀ moves 10% of deme-0 mass to deme 1.
        let q = Matrix::from_row_slice(2, 2, &[0.9, 0.1, 0.0, 1.0]);
        sp.mul_extant_probabilities(&q, false).unwrap();
        let p = sp.probs(0).unwrap();
        assert_relative_eq!(p[0], 0.9, epsilon = 1e-12);
        assert_relative_eq!(p[1], 0.1, epsilon = 1e-12);

        let bad = Matrix::zeros(3, 3);
        assert!(sp.mul_extant_probabilities(&bad, false).is_err());
    }

    #[test]
    fn diffusion_normalises_on_request() {
        let mut sp = fresh();
        sp.add_lineage(0, &Array::from_slice(&[0.5, 0.5])).unwrap();
        let q = Matrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        sp.mul_extant_probabilities(&q, true).unwrap();
        let p = sp.probs(0).unwrap();
        assert_relative_eq!(p[0] + p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn root_probs_only_for_singleton() {
        let mut sp = fresh();
        assert!(sp.root_probs().is_none());
        sp.add_lineage(0, &Array::from_slice(&[0.3, 0.7])).unwrap();
        assert_eq!(sp.root_probs().unwrap().as_slice(), &[0.3, 0.7]);
        sp.add_sample(1, 0, 0.0).unwrap();
        assert!(sp.root_probs().is_none());
    }

    proptest::proptest! {
        #[test]
        fn flooring_lands_on_simplex(
            mut v in proptest::collection::vec(0.0f64..1.0, 1..6),
            min_p in 1e-6f64..0.1,
        ) {
            floor_and_renormalise(&mut v, min_p);
            let sum: Real = v.iter().sum();
            proptest::prop_assert!((sum - 1.0).abs() < 1e-9);
            proptest::prop_assert!(v.iter().all(|&x| x >= 0.0));
        }
    }

    #[test]
    fn ancestral_store_roundtrip() {
        let mut sp = fresh();
        sp.add_sample(4, 0, 0.0).unwrap();
        sp.store_ancestral_current(4).unwrap();
        sp.store_ancestral(9, Array::from_slice(&[0.6, 0.4]));
        assert_eq!(sp.ancestral(4).unwrap().as_slice(), &[1.0, 0.0]);
        assert_eq!(sp.ancestral(9).unwrap().as_slice(), &[0.6, 0.4]);
        sp.clear_ancestral();
        assert!(sp.ancestral(4).is_none());
    }
}
