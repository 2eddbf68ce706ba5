//! Likelihood options and the declarative configuration document.

use phylo_core::{Real, Result};
use phylo_core::ensure_config;
use phylo_model::{PopModelDef, TrajectoryParameters};

/// Per-segment interval contribution mode.
///
/// Under `Stub` — the default — intervals between events contribute
/// nothing to the log-density; only coalescences do. `Full` is the
/// explicit opt-in that accumulates `−∫ λ_total dτ` over every
/// sub-segment and applies the mean-field diffusion to every extant
/// lineage vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntervalContribution {
    /// Intervals contribute 0 (the default).
    #[default]
    Stub,
    /// Accumulate the integrated pair-coalescence rate and diffuse lineage
    /// vectors across each sub-segment.
    Full,
}

/// Tunable behaviour of the likelihood engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LikelihoodOptions {
    /// Apply the finite-size posterior correction to the remaining extant
    /// lineages after every coalescence.
    pub finite_size_corrections: bool,
    /// Use the aggregate bilinear approximation for the total coalescence
    /// rate instead of the exact pairwise sum.
    pub approx_lambda: bool,
    /// When `Σ Y < A`, reject with `-∞` once `A / n_tips` exceeds this
    /// fraction; below it, amplify instead.
    pub forgive_a_gt_y: Real,
    /// Amplification factor applied when `Σ Y < A` is forgiven.
    pub penalty_a_gt_y: Real,
    /// Clamp deme sizes at 1 (instead of 10⁻¹²) inside event rates.
    pub forgive_y: bool,
    /// Probability floor applied to sampled lineage vectors; must lie in
    /// `(0, 0.1]`.
    pub min_p: Real,
    /// Accepted for configuration compatibility; has no effect.
    pub gc: u32,
    /// Short-circuit every evaluation to `logP = 0`.
    pub is_constant_lh: bool,
    /// Run the forward ancestral-state reconstruction after each
    /// successful evaluation.
    pub ancestral: bool,
    /// Effective population size for the portion of the tree older than
    /// the integrated trajectory; derived from the aggregate coalescence
    /// rate when absent.
    pub ne: Option<Real>,
    /// Fall back to a constant-size coalescent when the root predates
    /// `t0`; when `false`, such trees evaluate to `-∞`.
    pub forgive_t0: bool,
    /// Per-segment contribution mode.
    pub interval_contribution: IntervalContribution,
}

impl Default for LikelihoodOptions {
    fn default() -> Self {
        Self {
            finite_size_corrections: false,
            approx_lambda: false,
            forgive_a_gt_y: 1.0,
            penalty_a_gt_y: 1.0,
            forgive_y: true,
            min_p: 0.0001,
            gc: 0,
            is_constant_lh: false,
            ancestral: false,
            ne: None,
            forgive_t0: true,
            interval_contribution: IntervalContribution::Stub,
        }
    }
}

impl LikelihoodOptions {
    /// Range-check every option.
    pub fn validate(&self) -> Result<()> {
        ensure_config!(
            (0.0..=1.0).contains(&self.forgive_a_gt_y),
            "forgiveAgtY must lie in [0, 1], got {}",
            self.forgive_a_gt_y
        );
        ensure_config!(
            self.min_p > 0.0 && self.min_p <= 0.1,
            "minP must lie in (0, 0.1], got {}",
            self.min_p
        );
        if let Some(ne) = self.ne {
            ensure_config!(ne > 0.0, "Ne must be positive, got {ne}");
        }
        Ok(())
    }
}

/// The full declarative input of one likelihood instance.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Population model definition.
    pub model: PopModelDef,
    /// `(pname, pvalue)` bindings for every parameter the equations use.
    pub model_parameters: Vec<(String, Real)>,
    /// Integration scheme, grid, span, and initial values.
    pub trajectory: TrajectoryParameters,
    /// Engine options.
    pub options: LikelihoodOptions,
}

impl Config {
    /// Validate everything that can be checked without a tree.
    pub fn validate(&self) -> Result<()> {
        self.trajectory.validate()?;
        self.options.validate()
    }
}
