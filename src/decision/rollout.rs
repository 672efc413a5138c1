//! Deterministic rollout driver.
//!
//! The one routine that answers "what does this policy do on this data".
//! Prediction, per-decision explanation and counterfactual simulation all go
//! through [`rollout`] unmodified.

use super::policy::Policy;
use super::process::DecisionProcess;
use crate::error::{EngineError, EngineResult};
use crate::market::ReturnMatrix;
use serde::{Deserialize, Serialize};

/// Chosen symbol (plus clamped index and reward) for each non-terminal step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionTrace {
    pub actions: Vec<String>,
    pub indices: Vec<usize>,
    pub rewards: Vec<f64>,
}

impl ActionTrace {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().sum()
    }

    /// Step indices where the two traces chose different symbols.
    pub fn difference_indices(&self, other: &ActionTrace) -> Vec<usize> {
        self.actions
            .iter()
            .zip(&other.actions)
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Clamp a raw policy output into `[0, n - 1]`. `n` must be non-zero.
#[inline]
pub fn clamp_action(raw: i64, n: usize) -> usize {
    if raw <= 0 {
        0
    } else {
        (raw as u64).min(n as u64 - 1) as usize
    }
}

pub fn rollout(
    policy: &dyn Policy,
    returns: &ReturnMatrix,
    symbols: &[String],
) -> EngineResult<ActionTrace> {
    if symbols.is_empty() {
        return Err(EngineError::Validation(
            "rollout needs at least one symbol".to_string(),
        ));
    }

    let process = DecisionProcess::new(returns);
    let horizon = process.horizon();
    let mut trace = ActionTrace {
        actions: Vec::with_capacity(horizon),
        indices: Vec::with_capacity(horizon),
        rewards: Vec::with_capacity(horizon),
    };

    let mut state = process.initial_state();
    while !process.is_terminal(state) {
        let raw = policy.act(process.observation(state));
        let idx = clamp_action(raw, symbols.len());
        let transition = process.step(state, idx);
        trace.actions.push(symbols[idx].clone());
        trace.indices.push(idx);
        trace.rewards.push(transition.reward);
        state = transition.next;
    }

    Ok(trace)
}
