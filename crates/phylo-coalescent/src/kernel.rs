//! Likelihood kernels.
//!
//! The backward walk varies along two axes: whether the model is evaluated
//! at all (`isConstantLh` short-circuits every contribution to zero) and
//! how intervals contribute. Both are captured by the [`LikelihoodKernel`]
//! trait with two implementations selected at engine construction.

use crate::options::{IntervalContribution, LikelihoodOptions};
use crate::state_probs::{floor_and_renormalise, StateProbabilities};
use phylo_core::{DemeId, NodeId, Real, Result};
use phylo_math::{Array, Matrix};
use phylo_model::{Frame, TimeSeries};

/// Deme-size floor applied when `forgiveY` is off.
const Y_EPS: Real = 1e-12;

/// Mutable state of one backward walk over the intervals.
///
/// `(h, t, ts_point)` and the extant set form a state machine whose
/// transitions do not commute; every kernel call advances it in interval
/// order.
pub(crate) struct Walk<'a> {
    pub ts: &'a TimeSeries,
    pub opts: &'a LikelihoodOptions,
    pub diag_f: bool,
    pub probs: StateProbabilities,
    /// Current frame index, decreasing as `h` grows.
    pub ts_point: usize,
    /// Cumulative height walked from the youngest tip.
    pub h: Real,
    /// Forward time aligned with `h` (`t = t1 − h`).
    pub t: Real,
}

impl<'a> Walk<'a> {
    pub fn new(
        ts: &'a TimeSeries,
        opts: &'a LikelihoodOptions,
        diag_f: bool,
        probs: StateProbabilities,
    ) -> Self {
        Self {
            ts,
            opts,
            diag_f,
            probs,
            ts_point: ts.len() - 1,
            h: 0.0,
            t: ts.t1(),
        }
    }

    /// Advance `(h, t, ts_point)` across an interval of duration `d`.
    pub fn advance(&mut self, d: Real) {
        let t_end = self.t - d;
        self.ts_point = self.ts.frame_index_at_time(t_end, self.ts_point);
        self.t = t_end;
        self.h += d;
    }

    /// Clamped deme sizes at the current frame.
    pub fn clamped_y(&self, k: usize) -> Array {
        let mut y = self.ts.frame(k).y.clone();
        clamp_y(&mut y, self.opts.forgive_y);
        y
    }
}

/// Clamp deme sizes: at 1 under `forgiveY`, at `10⁻¹²` otherwise.
pub(crate) fn clamp_y(y: &mut Array, forgive_y: bool) {
    y.max_assign(if forgive_y { 1.0 } else { Y_EPS });
}

/// The per-event behaviour of the backward walk.
///
/// Each method returns its log-density contribution; a non-finite return
/// makes the engine collapse the evaluation to `-∞`.
pub(crate) trait LikelihoodKernel {
    /// Walk across an interval of duration `d`.
    fn on_interval(&self, w: &mut Walk<'_>, d: Real) -> Real;

    /// Insert a freshly sampled tip.
    fn on_sample(&self, w: &mut Walk<'_>, node: NodeId, deme: DemeId) -> Result<Real>;

    /// Merge children `(u, v)` into `parent`.
    fn on_coalescent(
        &self,
        w: &mut Walk<'_>,
        parent: NodeId,
        u: NodeId,
        v: NodeId,
    ) -> Result<Real>;
}

// ── ODE kernel ────────────────────────────────────────────────────────────────

/// The standard kernel: full coalescent-rate machinery over the frames.
pub(crate) struct OdeKernel;

impl LikelihoodKernel for OdeKernel {
    fn on_interval(&self, w: &mut Walk<'_>, d: Real) -> Real {
        match w.opts.interval_contribution {
            IntervalContribution::Stub => {
                // Intervals only move the walk state.
                w.advance(d);
                0.0
            }
            IntervalContribution::Full => {
                let mut lh = 0.0;
                let t_end = w.t - d;
                while w.ts_point > 0 && w.ts.frame(w.ts_point).t > t_end {
                    let k = w.ts_point;
                    let dt = w.t - w.ts.frame(k).t;
                    if dt > 0.0 {
                        lh += segment_contribution(w, k, dt);
                    }
                    w.t = w.ts.frame(k).t;
                    w.ts_point = k - 1;
                }
                let dt = w.t - t_end;
                if dt > 0.0 {
                    lh += segment_contribution(w, w.ts_point, dt);
                }
                w.t = t_end;
                w.h += d;
                lh
            }
        }
    }

    fn on_sample(&self, w: &mut Walk<'_>, node: NodeId, deme: DemeId) -> Result<Real> {
        w.probs.add_sample(node, deme, w.opts.min_p)?;
        if w.opts.ancestral {
            w.probs.store_ancestral_current(node)?;
        }
        Ok(0.0)
    }

    fn on_coalescent(
        &self,
        w: &mut Walk<'_>,
        parent: NodeId,
        u: NodeId,
        v: NodeId,
    ) -> Result<Real> {
        let y = w.clamped_y(w.ts_point);
        let a = {
            let f = &w.ts.frame(w.ts_point).f;
            let (pu, pv) = w.probs.pair_probs(u, v)?;
            pair_rate_vector(pu, pv, f, &y, w.diag_f)
        };
        w.probs.remove_lineage(u)?;
        w.probs.remove_lineage(v)?;
        let lambda = a.sum();
        if !lambda.is_finite() || lambda <= 0.0 {
            return Ok(Real::NEG_INFINITY);
        }
        let mut p_parent = a;
        p_parent.scale_assign(1.0 / lambda);
        w.probs.add_lineage(parent, &p_parent)?;
        if w.opts.ancestral {
            w.probs.store_ancestral(parent, p_parent.clone());
        }
        if w.opts.finite_size_corrections {
            finite_size_update(&mut w.probs, parent);
        }
        Ok(lambda.ln())
    }
}

/// `−λ_total · Δ` plus the mean-field diffusion over one sub-segment.
fn segment_contribution(w: &mut Walk<'_>, k: usize, dt: Real) -> Real {
    let lambda = {
        let frame = w.ts.frame(k);
        total_coal_rate(&mut w.probs, frame, w.opts, w.diag_f)
    };
    diffuse(w, k, dt);
    -lambda * dt
}

/// One Euler step of the per-lineage diffusion
/// `dp/dτ = (M − diag(λ_ℓ)) · p` with `M_ij = G(j,i)/Y_j` and
/// `λ_ℓ,i = (F · ((A − p_ℓ) ⊘ Y))_i / Y_i`.
fn diffuse(w: &mut Walk<'_>, k: usize, dt: Real) {
    let m = w.probs.n_demes();
    let y = w.clamped_y(k);
    let frame = w.ts.frame(k);
    let mut mig = Matrix::zeros(m, m);
    for i in 0..m {
        for j in 0..m {
            mig[(i, j)] = frame.g[(j, i)] / y[j];
        }
    }
    let a_vec = w.probs.lineage_state_sum().clone();
    let min_p = w.opts.min_p;
    let f = &frame.f;
    let mut others = vec![0.0; m];
    let mut rate = vec![0.0; m];
    let mut dp = vec![0.0; m];
    w.probs.for_each_mut(|_, p| {
        for i in 0..m {
            others[i] = (a_vec[i] - p[i]).max(0.0) / y[i];
        }
        for i in 0..m {
            let mut acc = 0.0;
            for j in 0..m {
                acc += f[(i, j)] * others[j];
            }
            rate[i] = acc / y[i];
        }
        for i in 0..m {
            let mut acc = 0.0;
            for j in 0..m {
                acc += mig[(i, j)] * p[j];
            }
            dp[i] = acc - rate[i] * p[i];
        }
        for i in 0..m {
            p[i] += dt * dp[i];
        }
        floor_and_renormalise(p, min_p);
    });
}

// ── Constant kernel ───────────────────────────────────────────────────────────

/// Kernel selected under `isConstantLh`: every contribution is zero, the
/// extant set is still maintained so the walk stays structurally valid.
pub(crate) struct ConstantLhKernel;

impl LikelihoodKernel for ConstantLhKernel {
    fn on_interval(&self, w: &mut Walk<'_>, d: Real) -> Real {
        w.advance(d);
        0.0
    }

    fn on_sample(&self, w: &mut Walk<'_>, node: NodeId, deme: DemeId) -> Result<Real> {
        w.probs.add_sample(node, deme, w.opts.min_p)?;
        if w.opts.ancestral {
            w.probs.store_ancestral_current(node)?;
        }
        Ok(0.0)
    }

    fn on_coalescent(
        &self,
        w: &mut Walk<'_>,
        parent: NodeId,
        u: NodeId,
        v: NodeId,
    ) -> Result<Real> {
        let pu = w.probs.remove_lineage(u)?;
        let pv = w.probs.remove_lineage(v)?;
        let mut p = &pu + &pv;
        p.normalise();
        w.probs.add_lineage(parent, &p)?;
        if w.opts.ancestral {
            w.probs.store_ancestral(parent, p);
        }
        Ok(0.0)
    }
}

// ── Shared rate math ──────────────────────────────────────────────────────────

/// Un-normalised per-deme coalescence intensity of a child pair.
///
/// Diagonal fast path: `aᵢ = 2 · p_u,ᵢ · p_v,ᵢ · F_ii / Yᵢ²`. General:
/// `a = x ⊙ (F·y) + y ⊙ (F·x)` with `x = p_u ⊘ Y`, `y = p_v ⊘ Y`.
pub(crate) fn pair_rate_vector(
    pu: &[Real],
    pv: &[Real],
    f: &Matrix,
    y: &Array,
    diag_f: bool,
) -> Array {
    let m = y.size();
    let mut a = Array::zeros(m);
    if diag_f {
        for i in 0..m {
            a[i] = 2.0 * pu[i] * pv[i] * f[(i, i)] / (y[i] * y[i]);
        }
        return a;
    }
    let x: Vec<Real> = (0..m).map(|i| pu[i] / y[i]).collect();
    let z: Vec<Real> = (0..m).map(|i| pv[i] / y[i]).collect();
    for i in 0..m {
        let mut fz = 0.0;
        let mut fx = 0.0;
        for j in 0..m {
            fz += f[(i, j)] * z[j];
            fx += f[(i, j)] * x[j];
        }
        a[i] = x[i] * fz + z[i] * fx;
    }
    a
}

/// Aggregate coalescence rate `λ_total` over the whole extant set.
pub(crate) fn total_coal_rate(
    probs: &mut StateProbabilities,
    frame: &Frame,
    opts: &LikelihoodOptions,
    diag_f: bool,
) -> Real {
    let m = probs.n_demes();
    let mut y = frame.y.clone();
    clamp_y(&mut y, opts.forgive_y);

    if opts.approx_lambda {
        let mut x = probs.lineage_state_sum().clone();
        x.div_assign_elem(&y);
        return frame.f.bilinear(&x, &x);
    }
    if diag_f {
        let a = probs.lineage_state_sum().clone();
        let s = probs.lineage_sum_squares();
        return (0..m)
            .map(|i| (a[i] * a[i] - s[i]) * frame.f[(i, i)] / (y[i] * y[i]))
            .sum();
    }
    // Exact bilinear form summed over all unordered pairs.
    let nodes = probs.extant_nodes();
    let scaled: Vec<Array> = nodes
        .iter()
        .map(|&n| {
            let mut x = Array::from_slice(probs.probs(n).expect("extant"));
            x.div_assign_elem(&y);
            x
        })
        .collect();
    let mut total = 0.0;
    for a in 0..scaled.len() {
        for b in a + 1..scaled.len() {
            total += frame.f.bilinear(&scaled[a], &scaled[b])
                + frame.f.bilinear(&scaled[b], &scaled[a]);
        }
    }
    total
}

/// Finite-size posterior correction after a coalescence produced `alpha`.
///
/// For every other extant lineage `u`: `B = A − p_u` (floored at 10⁻¹²),
/// `r = p_α ⊘ B`, `ρ = A ⊘ B`, `L = ρ · p_α`, `w = max(L − r, 0)`,
/// `p_u ← (p_u ⊙ w) / (p_u · w)` when that denominator is positive.
pub(crate) fn finite_size_update(probs: &mut StateProbabilities, alpha: NodeId) {
    let p_alpha = Array::from_slice(probs.probs(alpha).expect("parent extant"));
    let a_vec = probs.lineage_state_sum().clone();
    let m = a_vec.size();
    let mut weight = vec![0.0; m];
    probs.for_each_mut(|node, p| {
        if node == alpha {
            return;
        }
        let mut big_l = 0.0;
        for i in 0..m {
            let b = (a_vec[i] - p[i]).max(1e-12);
            big_l += (a_vec[i] / b) * p_alpha[i];
            weight[i] = p_alpha[i] / b;
        }
        let mut s = 0.0;
        for i in 0..m {
            weight[i] = (big_l - weight[i]).max(0.0);
            s += p[i] * weight[i];
        }
        if s > 0.0 {
            for i in 0..m {
                p[i] = p[i] * weight[i] / s;
            }
        }
    });
}
