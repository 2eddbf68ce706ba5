//! Fixed-step ODE integrators.
//!
//! The demographic trajectory is integrated on a fixed grid so that the
//! resulting frames can be indexed in O(1) by the reverse-time likelihood
//! walk. Three single-step schemes are provided: forward Euler, the
//! explicit midpoint rule, and the classical fourth-order Runge-Kutta.

use phylo_core::{Error, Real, Result};
use std::str::FromStr;

/// Single-step integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Method {
    /// Forward Euler.
    Euler,
    /// Explicit midpoint rule (second order).
    Midpoint,
    /// Classical fourth-order Runge-Kutta.
    #[default]
    ClassicRk4,
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "euler" => Ok(Self::Euler),
            "midpoint" => Ok(Self::Midpoint),
            "classicrk" => Ok(Self::ClassicRk4),
            other => Err(Error::Config(format!(
                "unknown integration method `{other}` (expected euler, midpoint, or classicrk)"
            ))),
        }
    }
}

/// A system `dy/dt = f(t, y)` evaluated in place.
///
/// `rhs` takes `&mut self` so implementors can reuse internal scratch
/// buffers (compiled-expression register files, environment vectors).
pub trait OdeSystem {
    /// Dimension of the state vector.
    fn dim(&self) -> usize;

    /// Write `dy/dt` at `(t, y)` into `dydt`.
    fn rhs(&mut self, t: Real, y: &[Real], dydt: &mut [Real]);
}

/// Adapter turning a closure into an [`OdeSystem`].
pub struct FnSystem<F> {
    dim: usize,
    f: F,
}

/// Wrap `f(t, y, dydt)` as an [`OdeSystem`] of dimension `dim`.
pub fn system<F: FnMut(Real, &[Real], &mut [Real])>(dim: usize, f: F) -> FnSystem<F> {
    FnSystem { dim, f }
}

impl<F: FnMut(Real, &[Real], &mut [Real])> OdeSystem for FnSystem<F> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn rhs(&mut self, t: Real, y: &[Real], dydt: &mut [Real]) {
        (self.f)(t, y, dydt)
    }
}

/// Reusable stage buffers for a single step.
#[derive(Debug)]
pub struct StepScratch {
    k1: Vec<Real>,
    k2: Vec<Real>,
    k3: Vec<Real>,
    k4: Vec<Real>,
    tmp: Vec<Real>,
}

impl StepScratch {
    /// Allocate buffers for a system of dimension `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

/// Fixed-step driver: `steps` equal steps of the chosen method.
#[derive(Debug, Clone, Copy)]
pub struct FixedStepSolver {
    method: Method,
    steps: usize,
}

impl FixedStepSolver {
    /// Create a solver. `steps` must be positive.
    pub fn new(method: Method, steps: usize) -> Result<Self> {
        if steps == 0 {
            return Err(Error::Config("integrationSteps must be positive".into()));
        }
        Ok(Self { method, steps })
    }

    /// The configured scheme.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The configured step count.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Step size over `[t0, t1]`.
    pub fn step_size(&self, t0: Real, t1: Real) -> Real {
        (t1 - t0) / self.steps as Real
    }

    /// Advance one step of size `h` from `(t, y)`, writing `y(t + h)` into
    /// `out`. `out` may not alias `y`.
    pub fn step<S: OdeSystem>(
        &self,
        sys: &mut S,
        t: Real,
        y: &[Real],
        h: Real,
        out: &mut [Real],
        s: &mut StepScratch,
    ) {
        let n = y.len();
        match self.method {
            Method::Euler => {
                sys.rhs(t, y, &mut s.k1);
                for i in 0..n {
                    out[i] = y[i] + h * s.k1[i];
                }
            }
            Method::Midpoint => {
                sys.rhs(t, y, &mut s.k1);
                for i in 0..n {
                    s.tmp[i] = y[i] + 0.5 * h * s.k1[i];
                }
                sys.rhs(t + 0.5 * h, &s.tmp, &mut s.k2);
                for i in 0..n {
                    out[i] = y[i] + h * s.k2[i];
                }
            }
            Method::ClassicRk4 => {
                sys.rhs(t, y, &mut s.k1);
                for i in 0..n {
                    s.tmp[i] = y[i] + 0.5 * h * s.k1[i];
                }
                sys.rhs(t + 0.5 * h, &s.tmp, &mut s.k2);
                for i in 0..n {
                    s.tmp[i] = y[i] + 0.5 * h * s.k2[i];
                }
                sys.rhs(t + 0.5 * h, &s.tmp, &mut s.k3);
                for i in 0..n {
                    s.tmp[i] = y[i] + h * s.k3[i];
                }
                sys.rhs(t + h, &s.tmp, &mut s.k4);
                for i in 0..n {
                    out[i] =
                        y[i] + h / 6.0 * (s.k1[i] + 2.0 * s.k2[i] + 2.0 * s.k3[i] + s.k4[i]);
                }
            }
        }
    }

    /// Integrate from `t0` to `t1`, returning the state at every grid point
    /// (`steps + 1` entries including both endpoints).
    pub fn integrate<S: OdeSystem>(
        &self,
        sys: &mut S,
        t0: Real,
        y0: &[Real],
        t1: Real,
    ) -> Result<Vec<(Real, Vec<Real>)>> {
        let h = self.step_size(t0, t1);
        let mut scratch = StepScratch::new(sys.dim());
        let mut path = Vec::with_capacity(self.steps + 1);
        let mut y = y0.to_vec();
        let mut next = vec![0.0; y0.len()];
        path.push((t0, y.clone()));
        for k in 0..self.steps {
            let t = t0 + h * k as Real;
            self.step(sys, t, &y, h, &mut next, &mut scratch);
            if next.iter().any(|v| !v.is_finite()) {
                return Err(Error::Integration(format!(
                    "non-finite state at t = {}",
                    t + h
                )));
            }
            std::mem::swap(&mut y, &mut next);
            path.push((t0 + h * (k + 1) as Real, y.clone()));
        }
        Ok(path)
    }
}
