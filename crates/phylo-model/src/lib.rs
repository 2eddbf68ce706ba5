//! # phylo-model
//!
//! The demographic side of phylodyn: symbolic matrix equations
//! (`F`/`G`/`D`/`dot(·)`) compiled into an ODE right-hand side, and the
//! fixed-grid trajectory of `(t, Y, F, G)` frames the coalescent engine
//! consumes in reverse time.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod equations;
pub mod pop_model;
pub mod trajectory;

pub use equations::{parse_definitions, parse_equations, EquationLhs, RawEquation};
pub use pop_model::{PopModel, PopModelDef};
pub use trajectory::{Frame, TimeSeries, TrajectoryParameters};
