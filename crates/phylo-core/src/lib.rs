//! # phylo-core
//!
//! Core types, the error hierarchy, and small shared primitives for the
//! phylodyn workspace: type aliases, a single `thiserror`-derived error
//! enum with the `ensure!` / `fail!` convenience macros, the dirty-flag
//! caching primitive, and the named-parameter store.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod errors;
pub mod lazy;
pub mod parameters;

pub use errors::{Error, Result};
pub use lazy::DirtyFlag;
pub use parameters::Parameters;

/// Floating-point type used throughout the library.
pub type Real = f64;

/// A point on the forward (calendar) time axis of a trajectory.
pub type Time = Real;

/// Identifier of a tree node. Tips and internal nodes share one id space.
pub type NodeId = usize;

/// Index of a deme within a population model's fixed deme set.
pub type DemeId = usize;
