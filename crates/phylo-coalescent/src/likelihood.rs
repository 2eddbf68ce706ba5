//! The structured-coalescent likelihood engine.
//!
//! One evaluation walks the tree's intervals in increasing height
//! (decreasing forward time), maintaining per-lineage state-probability
//! vectors and accumulating log-density contributions from coalescent
//! events, with the `A > Y` guard between intervals and a constant-size
//! coalescent tail for the portion of the tree older than the integrated
//! trajectory.
//!
//! Numerical failure never surfaces as an error: an evaluation either
//! returns a finite `logP` or `-∞`. Errors are reserved for structural
//! bugs — malformed trees, inconsistent configuration.

use crate::ancestral;
use crate::intervals::{EventKind, TreeIntervals};
use crate::kernel::{total_coal_rate, ConstantLhKernel, LikelihoodKernel, OdeKernel, Walk};
use crate::options::{Config, LikelihoodOptions};
use crate::state_probs::StateProbabilities;
use crate::tree::{Phylogeny, SampledTree};
use log::{debug, warn};
use phylo_core::{DirtyFlag, Error, Parameters, Real, Result};
use phylo_core::ensure_config;
use phylo_math::Array;
use phylo_model::{PopModel, TimeSeries, TrajectoryParameters};

/// Result of one backward walk.
struct WalkOutcome {
    log_p: Real,
    /// `false` when the walk stopped at the trajectory's start and the
    /// remaining intervals were handled by the constant-size tail.
    completed: bool,
}

/// Marginal likelihood of a dated tree under an ODE-driven structured
/// coalescent.
///
/// The engine caches `logP` and recomputes only when the parameter store
/// or the tree has been marked dirty.
pub struct CoalescentLikelihood<T: Phylogeny = SampledTree> {
    model: PopModel,
    params: Parameters,
    trajectory: TrajectoryParameters,
    opts: LikelihoodOptions,
    tree: T,
    kernel: Box<dyn LikelihoodKernel>,

    ts: Option<TimeSeries>,
    intervals: Option<TreeIntervals>,
    probs: Option<StateProbabilities>,
    root: Option<Array>,
    cached: Option<Real>,
    tree_dirty: DirtyFlag,
}

impl<T: Phylogeny> std::fmt::Debug for CoalescentLikelihood<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescentLikelihood")
            .field("cached", &self.cached)
            .field("tree_dirty", &self.tree_dirty)
            .finish()
    }
}

impl<T: Phylogeny> CoalescentLikelihood<T> {
    /// Build an engine from a validated configuration and a tree whose
    /// tips carry deme assignments.
    pub fn new(config: Config, tree: T) -> Result<Self> {
        config.validate()?;
        let params = Parameters::from_pairs(config.model_parameters.clone())?;
        let model = PopModel::new(&config.model, &params, &config.trajectory.initial_values)?;

        for node in 0..tree.node_count() {
            if tree.is_leaf(node) {
                let deme = tree.tip_deme(node).ok_or_else(|| {
                    Error::Config(format!("tip {node} carries no deme assignment"))
                })?;
                ensure_config!(
                    deme < model.n_demes(),
                    "tip {node} is assigned to deme {deme}, model has {} demes",
                    model.n_demes()
                );
            }
        }

        let kernel: Box<dyn LikelihoodKernel> = if config.options.is_constant_lh {
            Box::new(ConstantLhKernel)
        } else {
            Box::new(OdeKernel)
        };

        Ok(Self {
            model,
            params,
            trajectory: config.trajectory,
            opts: config.options,
            tree,
            kernel,
            ts: None,
            intervals: None,
            probs: None,
            root: None,
            cached: None,
            tree_dirty: DirtyFlag::new(),
        })
    }

    /// The parameter store. Mutations through [`set_parameter`]
    /// automatically mark it dirty.
    ///
    /// [`set_parameter`]: Self::set_parameter
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Rebind one model parameter, invalidating the cached `logP`.
    pub fn set_parameter(&mut self, name: &str, value: Real) -> Result<()> {
        self.params.set(name, value)
    }

    /// Rebind one initial value, invalidating the cached `logP`.
    pub fn set_initial_value(&mut self, name: &str, value: Real) -> Result<()> {
        self.model.set_initial_value(name, value)?;
        let slot = self
            .trajectory
            .initial_values
            .iter_mut()
            .find(|(n, _)| n == name);
        if let Some((_, v)) = slot {
            *v = value;
        }
        self.params.mark_dirty();
        Ok(())
    }

    /// The injected tree.
    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// The engine options.
    pub fn options(&self) -> &LikelihoodOptions {
        &self.opts
    }

    /// The most recently integrated trajectory, if any.
    pub fn time_series(&self) -> Option<&TimeSeries> {
        self.ts.as_ref()
    }

    /// Mark every bound parameter and initial value as changed.
    pub fn mark_parameters_dirty(&self) {
        self.params.mark_dirty();
    }

    /// Mark the tree topology or node heights as changed.
    pub fn mark_tree_dirty(&self) {
        self.tree_dirty.mark();
    }

    /// The enclosing driver rolled back without telling us what changed:
    /// force a full recomputation on the next evaluation.
    pub fn restore(&self) {
        self.params.mark_dirty();
        self.tree_dirty.mark();
    }

    /// State probabilities of the last evaluation (extant remnants plus
    /// the ancestral store when reconstruction is enabled).
    pub fn state_probabilities(&self) -> Option<&StateProbabilities> {
        self.probs.as_ref()
    }

    /// State probabilities of the last surviving lineage of the last
    /// evaluation, if the walk reduced the extant set to one.
    pub fn root_probs(&self) -> Option<Array> {
        self.root.clone()
    }

    /// Compute (or return the cached) `log P(tree | model)`.
    ///
    /// Returns `-∞` whenever the model is numerically ill-posed for the
    /// current parameters; `Err` is reserved for structural problems.
    pub fn calculate_log_p(&mut self) -> Result<Real> {
        let params_dirty = self.params.take_dirty();
        let tree_dirty = self.tree_dirty.take();
        if !params_dirty && !tree_dirty {
            if let Some(cached) = self.cached {
                return Ok(cached);
            }
        }

        if params_dirty || self.ts.is_none() {
            self.model.bind_params(self.params.values());
            match TimeSeries::integrate(&mut self.model, &self.trajectory) {
                Ok(ts) => self.ts = Some(ts),
                Err(Error::Integration(msg)) => {
                    warn!("trajectory integration failed ({msg}); logP = -inf");
                    self.ts = None;
                    self.probs = None;
                    self.root = None;
                    self.cached = Some(Real::NEG_INFINITY);
                    return Ok(Real::NEG_INFINITY);
                }
                Err(e) => return Err(e),
            }
        }
        if tree_dirty || self.intervals.is_none() {
            self.intervals = Some(TreeIntervals::from_tree(&self.tree)?);
        }

        let log_p = self.evaluate()?;
        self.cached = Some(log_p);
        Ok(log_p)
    }

    fn evaluate(&mut self) -> Result<Real> {
        let ts = self.ts.as_ref().expect("trajectory integrated");
        let intervals = self.intervals.as_ref().expect("intervals extracted");
        let probs = StateProbabilities::new(
            self.model.n_demes(),
            self.tree.tip_count(),
            self.tree.node_count(),
        );
        let mut w = Walk::new(ts, &self.opts, self.model.is_diag_f(), probs);

        let outcome = self.run_walk(intervals, &mut w)?;

        self.root = if outcome.log_p.is_finite() {
            w.probs.root_probs()
        } else {
            None
        };
        if self.opts.ancestral && outcome.completed && outcome.log_p.is_finite() {
            let posteriors = ancestral::reconstruct(&self.tree, intervals, ts, &w.probs)?;
            for (node, p) in posteriors {
                w.probs.store_ancestral(node, p);
            }
        }
        self.probs = Some(w.probs);
        Ok(outcome.log_p)
    }

    fn run_walk(&self, intervals: &TreeIntervals, w: &mut Walk<'_>) -> Result<WalkOutcome> {
        let traj_duration = w.ts.duration();
        let n_tips = self.tree.tip_count() as Real;
        let count = intervals.count();
        let mut lh = 0.0;
        let mut tail_from = None;

        for i in 0..count {
            let d = intervals.duration(i);
            if traj_duration < w.h + d {
                // The root predates the trajectory's start; the remaining
                // intervals fall to the constant-size tail.
                tail_from = Some(i);
                break;
            }
            lh += self.kernel.on_interval(w, d);

            if !self.opts.is_constant_lh {
                let a = w.probs.count() as Real;
                let y_sum = w.ts.frame(w.ts_point).y.sum();
                if y_sum - a < 0.0 {
                    if a / n_tips > self.opts.forgive_a_gt_y {
                        debug!(
                            "rejecting: {a} extant lineages exceed total deme size {y_sum} \
                             at interval {i}"
                        );
                        return Ok(WalkOutcome {
                            log_p: Real::NEG_INFINITY,
                            completed: false,
                        });
                    }
                    lh += lh * (y_sum - a).abs() * self.opts.penalty_a_gt_y;
                }
            }

            let node = intervals.event_node(i);
            let contribution = match intervals.event_kind(i) {
                EventKind::Sample => {
                    let deme = self.tree.tip_deme(node).ok_or_else(|| {
                        Error::Invariant(format!("sample event at internal node {node}"))
                    })?;
                    self.kernel.on_sample(w, node, deme)?
                }
                EventKind::Coalescent => {
                    let (u, v) = self.tree.children(node).ok_or_else(|| {
                        Error::Invariant(format!("coalescent event at tip {node}"))
                    })?;
                    self.kernel.on_coalescent(w, node, u, v)?
                }
            };
            lh += contribution;

            if lh.is_nan() || lh == Real::NEG_INFINITY {
                warn!(
                    "numerical collapse at interval {i} (t = {}, h = {}); logP = -inf",
                    w.t, w.h
                );
                return Ok(WalkOutcome {
                    log_p: Real::NEG_INFINITY,
                    completed: false,
                });
            }
        }

        if let Some(from) = tail_from {
            if !self.opts.forgive_t0 {
                debug!("root predates t0 and forgiveT0 is off; logP = -inf");
                return Ok(WalkOutcome {
                    log_p: Real::NEG_INFINITY,
                    completed: false,
                });
            }
            lh += self.tail_contribution(intervals, w, from);
            if lh.is_nan() || lh == Real::NEG_INFINITY {
                warn!("numerical collapse in the pre-trajectory tail; logP = -inf");
                return Ok(WalkOutcome {
                    log_p: Real::NEG_INFINITY,
                    completed: false,
                });
            }
        }

        Ok(WalkOutcome {
            log_p: lh,
            completed: tail_from.is_none(),
        })
    }

    /// Constant-population coalescent over the intervals older than `t0`.
    ///
    /// Without a user-supplied `Nₑ`, an effective size is derived so the
    /// Kingman pair rate over the current extant set matches the model's
    /// aggregate rate at the current frame. Every remaining interval uses
    /// the full event count as its lineage count.
    fn tail_contribution(
        &self,
        intervals: &TreeIntervals,
        w: &mut Walk<'_>,
        from: usize,
    ) -> Real {
        let ne = match self.opts.ne {
            Some(ne) if ne > 0.0 => ne,
            _ => {
                let frame = w.ts.frame(w.ts_point);
                let lambda = total_coal_rate(&mut w.probs, frame, w.opts, w.diag_f);
                let n = w.probs.count() as Real;
                let pairs = n * (n - 1.0) / 2.0;
                if lambda > 0.0 && pairs > 0.0 {
                    let ne = pairs / lambda;
                    debug!("derived tail Ne = {ne} from aggregate rate {lambda}");
                    ne
                } else {
                    return Real::NEG_INFINITY;
                }
            }
        };
        let num_lineages = intervals.count() as Real;
        let mut lh = 0.0;
        for i in from..intervals.count() {
            let d = intervals.duration(i);
            lh += (1.0 / ne).ln() - num_lineages * (num_lineages - 1.0) / ne * d;
        }
        lh
    }
}
