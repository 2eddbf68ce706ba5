//! Integrated demographic trajectory.
//!
//! Integrating a [`PopModel`](crate::PopModel) over `[t0, t1]` on a fixed
//! grid yields a [`TimeSeries`] of frames `(t, Y, F, G, aux)`. Grid times
//! increase in forward time; the coalescent engine consumes them in
//! reverse, which is what the hinted downward scan in
//! [`TimeSeries::frame_index_at_time`] is shaped for.

use crate::pop_model::PopModel;
use phylo_core::{Error, Real, Result, Time};
use phylo_math::ode::{FixedStepSolver, Method, OdeSystem, StepScratch};
use phylo_math::{Array, Matrix};

/// Trajectory configuration: scheme, grid, time span, initial values.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrajectoryParameters {
    /// Integration scheme.
    pub method: Method,
    /// Number of fixed steps; the series holds `integration_steps + 1` frames.
    pub integration_steps: usize,
    /// Start of the integrated span (forward time).
    pub t0: Time,
    /// End of the integrated span; sampling times are measured back from here.
    pub t1: Time,
    /// Initial value for every deme and every auxiliary variable.
    pub initial_values: Vec<(String, Real)>,
}

impl TrajectoryParameters {
    /// Check the span and grid are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.t1 > self.t0) {
            return Err(Error::Config(format!(
                "trajectory span is empty: t0 = {}, t1 = {}",
                self.t0, self.t1
            )));
        }
        if self.integration_steps == 0 {
            return Err(Error::Config("integrationSteps must be positive".into()));
        }
        Ok(())
    }
}

/// One grid point of the integrated trajectory.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Forward time of this frame.
    pub t: Time,
    /// Effective population size per deme, clamped non-negative.
    pub y: Array,
    /// Auxiliary (non-demic) state.
    pub aux: Array,
    /// Birth-rate matrix instantiated at this frame's state.
    pub f: Matrix,
    /// Migration-rate matrix instantiated at this frame's state.
    pub g: Matrix,
}

/// Immutable, indexed sequence of trajectory frames.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    frames: Vec<Frame>,
    t0: Time,
    t1: Time,
}

impl TimeSeries {
    /// Integrate `model` under `traj`, producing
    /// `traj.integration_steps + 1` frames.
    ///
    /// Deme entries are clamped to `max(0, yᵢ)` after every accepted step.
    /// Fails with [`Error::Integration`] if any frame holds a NaN or
    /// infinite value.
    pub fn integrate(model: &mut PopModel, traj: &TrajectoryParameters) -> Result<Self> {
        traj.validate()?;
        let m = model.n_demes();
        let dim = model.dim();
        let solver = FixedStepSolver::new(traj.method, traj.integration_steps)?;
        let h = solver.step_size(traj.t0, traj.t1);
        let mut scratch = StepScratch::new(dim);

        let mut y = model.initial_state().to_vec();
        let mut next = vec![0.0; dim];
        let mut frames = Vec::with_capacity(traj.integration_steps + 1);

        for k in 0..=traj.integration_steps {
            let t = traj.t0 + h * k as Real;
            let frame = capture_frame(model, t, &y, m)?;
            frames.push(frame);
            if k < traj.integration_steps {
                solver.step(model, t, &y, h, &mut next, &mut scratch);
                // Deme sizes stay non-negative on the grid.
                for v in next.iter_mut().take(m) {
                    *v = v.max(0.0);
                }
                std::mem::swap(&mut y, &mut next);
            }
        }

        Ok(Self {
            frames,
            t0: traj.t0,
            t1: traj.t1,
        })
    }

    /// Number of frames (`integration_steps + 1`).
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the series holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at grid index `k`.
    pub fn frame(&self, k: usize) -> &Frame {
        &self.frames[k]
    }

    /// Start of the integrated span.
    pub fn t0(&self) -> Time {
        self.t0
    }

    /// End of the integrated span.
    pub fn t1(&self) -> Time {
        self.t1
    }

    /// Total integrated duration `t1 − t0`.
    pub fn duration(&self) -> Real {
        self.t1 - self.t0
    }

    /// Largest `k` with `t_k ≤ t_query`, scanning downward from `hint`.
    ///
    /// The hint is the index returned by the previous query; a
    /// monotonically decreasing sequence of queries then costs `O(N + E)`
    /// overall instead of `O(N · E)`.
    pub fn frame_index_at_time(&self, t_query: Time, hint: usize) -> usize {
        let mut k = hint.min(self.frames.len() - 1);
        while k > 0 && self.frames[k].t > t_query {
            k -= 1;
        }
        k
    }
}

fn capture_frame(model: &mut PopModel, t: Time, y: &[Real], m: usize) -> Result<Frame> {
    if y.iter().any(|v| !v.is_finite()) {
        return Err(Error::Integration(format!(
            "non-finite state in trajectory at t = {t}"
        )));
    }
    let (f, g) = model.frame_at(t, y);
    let (f, g) = (f.clone(), g.clone());
    if !f.is_finite() || !g.is_finite() {
        return Err(Error::Integration(format!(
            "non-finite rate matrix at t = {t}"
        )));
    }
    Ok(Frame {
        t,
        y: Array::from_slice(&y[..m]),
        aux: Array::from_slice(&y[m..]),
        f,
        g,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::parse_equations;
    use crate::pop_model::PopModelDef;
    use approx::assert_relative_eq;
    use phylo_core::Parameters;

    fn growth_model() -> (PopModel, TrajectoryParameters) {
        // dI/dt = F(I,I) − D(I) = (beta − gamma) · I: exponential growth.
        let def = PopModelDef {
            name: "growth".into(),
            definitions: vec![],
            equations: parse_equations("F(I, I) = beta * I; D(I) = gamma * I;").unwrap(),
        };
        let params = Parameters::from_pairs([("beta", 1.5), ("gamma", 0.5)]).unwrap();
        let model = PopModel::new(&def, &params, &[("I".into(), 1.0)]).unwrap();
        let traj = TrajectoryParameters {
            method: Method::ClassicRk4,
            integration_steps: 200,
            t0: 0.0,
            t1: 2.0,
            initial_values: vec![("I".into(), 1.0)],
        };
        (model, traj)
    }

    #[test]
    fn frame_count_and_endpoints() {
        let (mut model, traj) = growth_model();
        let ts = TimeSeries::integrate(&mut model, &traj).unwrap();
        assert_eq!(ts.len(), 201);
        assert_eq!(ts.frame(0).t, 0.0);
        assert_relative_eq!(ts.frame(200).t, 2.0, epsilon = 1e-12);
        assert_relative_eq!(ts.duration(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn matches_exponential_solution() {
        let (mut model, traj) = growth_model();
        let ts = TimeSeries::integrate(&mut model, &traj).unwrap();
        // y(t) = e^{t}; RK4 on this grid is accurate to ~1e-10.
        assert_relative_eq!(ts.frame(200).y[0], (2.0_f64).exp(), epsilon = 1e-8);
        // Frames carry the instantiated birth matrix.
        assert_relative_eq!(
            ts.frame(100).f[(0, 0)],
            1.5 * ts.frame(100).y[0],
            epsilon = 1e-10
        );
    }

    #[test]
    fn demes_clamped_non_negative() {
        let def = PopModelDef {
            name: "drain".into(),
            definitions: vec![],
            equations: parse_equations("F(I, I) = 0; D(I) = 5;").unwrap(),
        };
        let params = Parameters::new();
        let mut model = PopModel::new(&def, &params, &[("I".into(), 1.0)]).unwrap();
        let traj = TrajectoryParameters {
            method: Method::Euler,
            integration_steps: 10,
            t0: 0.0,
            t1: 10.0,
            initial_values: vec![("I".into(), 1.0)],
        };
        let ts = TimeSeries::integrate(&mut model, &traj).unwrap();
        assert!(ts.frame(10).y[0] >= 0.0);
    }

    #[test]
    fn invalid_span_rejected() {
        let (mut model, mut traj) = growth_model();
        traj.t1 = traj.t0;
        assert!(TimeSeries::integrate(&mut model, &traj).is_err());
    }

    #[test]
    fn hinted_lookup_matches_linear_scan() {
        let (mut model, traj) = growth_model();
        let ts = TimeSeries::integrate(&mut model, &traj).unwrap();
        let linear = |t: f64| {
            (0..ts.len())
                .rev()
                .find(|&k| ts.frame(k).t <= t)
                .unwrap_or(0)
        };
        let mut hint = ts.len() - 1;
        for &t in &[2.0, 1.77, 1.3001, 0.5, 0.004999, 0.0, -0.2] {
            let k = ts.frame_index_at_time(t, hint);
            assert_eq!(k, linear(t), "t = {t}");
            hint = k;
        }
    }
}
