//! # phylo-coalescent
//!
//! The structured-coalescent side of phylodyn: the tree abstraction,
//! interval extraction, per-lineage state probabilities, the backward
//! likelihood walk over an integrated demographic trajectory, and the
//! forward ancestral-state reconstruction.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod ancestral;
pub mod intervals;
mod kernel;
pub mod likelihood;
pub mod options;
pub mod root_logger;
pub mod state_probs;
pub mod tree;

pub use intervals::{EventKind, TreeIntervals};
pub use likelihood::CoalescentLikelihood;
pub use options::{Config, IntervalContribution, LikelihoodOptions};
pub use root_logger::RootProbsLogger;
pub use state_probs::StateProbabilities;
pub use tree::{Phylogeny, SampledTree, TreeBuilder};
