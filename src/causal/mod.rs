//! Causal structure discovery and graph queries.

pub mod graph;
pub mod independence;
pub mod pc;

pub use graph::{CausalEdge, CausalGraph, MarkovBlanket};
pub use pc::{PcAlgorithm, StructureLearner};
