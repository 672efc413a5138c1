//! Explainability: feature attribution and counterfactual sensitivity.

pub mod attribution;
pub mod counterfactual;
pub mod pipeline;

pub use attribution::{
    AttributionConfig, AttributionEstimator, ClassAttributions, SamplingShapleyEstimator,
};
pub use counterfactual::{
    simulate, sweep, CounterfactualResult, SensitivityPoint, SensitivityReport,
    DEFAULT_SWEEP_DELTAS,
};
pub use pipeline::{global_importance, per_decision, Contributions, DecisionAttribution};
