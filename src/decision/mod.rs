//! Sequential asset-selection decisions.
//!
//! ```text
//! ReturnMatrix ──▶ DecisionProcess ──▶ rollout() ──▶ ActionTrace
//!                        │                 ▲
//!                        ▼                 │
//!                  PolicyTrainer ──▶ PolicyModel (impl Policy)
//! ```

pub mod policy;
pub mod process;
pub mod rollout;
pub mod trainer;

pub use policy::{Policy, PolicyModel};
pub use process::{DecisionProcess, ProcessState, Transition};
pub use rollout::{clamp_action, rollout, ActionTrace};
pub use trainer::{PolicyTrainer, ReinforceTrainer, TrainedPolicy, TrainerConfig, TrainingSummary};
