//! # phylo-math
//!
//! Mathematical building blocks for phylodyn: `Array`/`Matrix` newtypes
//! (over nalgebra) with the in-place element-wise operations the likelihood
//! engine leans on, floating-point comparison helpers, the rate-expression
//! compiler, and fixed-step ODE integrators.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod array;
pub mod comparison;
pub mod expr;
pub mod matrix;
pub mod ode;

pub use array::Array;
pub use expr::{compile, parse, Program};
pub use matrix::Matrix;
pub use ode::{FixedStepSolver, Method, OdeSystem, StepScratch};
