//! # phylodyn
//!
//! Structured-coalescent phylodynamic likelihoods driven by ODE population
//! models.
//!
//! This crate is a **façade** that re-exports the public items of the
//! underlying workspace crates. Application code should depend on this
//! crate rather than the individual `phylo-*` crates.
//!
//! ## Quick start
//!
//! ```rust
//! use phylodyn::coalescent::{Config, CoalescentLikelihood, SampledTree};
//! use phylodyn::model::{parse_equations, PopModelDef, TrajectoryParameters};
//! use phylodyn::math::ode::Method;
//!
//! let model = PopModelDef {
//!     name: "logistic".into(),
//!     definitions: vec![],
//!     equations: parse_equations("F(I, I) = beta * I * (1 - I / K); D(I) = gamma * I;")
//!         .unwrap(),
//! };
//! let config = Config {
//!     model,
//!     model_parameters: vec![
//!         ("beta".into(), 1.5),
//!         ("gamma".into(), 0.5),
//!         ("K".into(), 100.0),
//!     ],
//!     trajectory: TrajectoryParameters {
//!         method: Method::ClassicRk4,
//!         integration_steps: 500,
//!         t0: 0.0,
//!         t1: 10.0,
//!         initial_values: vec![("I".into(), 1.0)],
//!     },
//!     options: Default::default(),
//! };
//!
//! let mut b = SampledTree::builder();
//! let t0 = b.tip("a", 0.0, 0);
//! let t1 = b.tip("b", 0.0, 0);
//! b.join(t0, t1, 1.0).unwrap();
//! let tree = b.build().unwrap();
//!
//! let mut engine = CoalescentLikelihood::new(config, tree).unwrap();
//! let log_p = engine.calculate_log_p().unwrap();
//! assert!(log_p.is_finite());
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Core types, aliases, and error definitions.
pub use phylo_core as core;

/// Vector/matrix newtypes, the rate-expression compiler, ODE integrators.
pub use phylo_math as math;

/// Population models and integrated demographic trajectories.
pub use phylo_model as model;

/// The structured-coalescent likelihood engine.
pub use phylo_coalescent as coalescent;
