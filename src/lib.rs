//! TCARP Backend Library
//!
//! Sequential decision rollout and causal explainability engine, exposed to
//! the `tcarp` binary and to integration tests.

pub mod api;
pub mod causal;
pub mod decision;
pub mod error;
pub mod explain;
pub mod market;
pub mod models;
pub mod service;
pub mod store;

pub use error::{EngineError, EngineResult};
pub use service::DecisionService;
