//! Counterfactual Analysis
//!
//! "What if" questions against a trained policy: scale one feature's return
//! series by `1 + delta`, re-run the same rollout, and report where the chosen
//! actions diverge.
//!
//! A sweep repeats this for several deltas and summarises each point by the
//! fraction of decisions that flipped.

use crate::decision::{rollout, ActionTrace, Policy};
use crate::error::{EngineError, EngineResult};
use crate::market::ReturnMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// SINGLE PERTURBATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualResult {
    pub original_actions: Vec<String>,
    pub counterfactual_actions: Vec<String>,
    pub difference_indices: Vec<usize>,
}

fn perturbed(returns: &ReturnMatrix, feature: &str, delta: f64) -> EngineResult<ReturnMatrix> {
    if !delta.is_finite() {
        return Err(EngineError::Validation(format!(
            "delta must be finite, got {}",
            delta
        )));
    }
    let j = returns
        .column_index(feature)
        .ok_or_else(|| EngineError::UnknownFeature(feature.to_string()))?;
    Ok(returns.with_scaled_column(j, 1.0 + delta))
}

pub fn simulate(
    policy: &dyn Policy,
    returns: &ReturnMatrix,
    symbols: &[String],
    feature: &str,
    delta: f64,
) -> EngineResult<CounterfactualResult> {
    let cf_returns = perturbed(returns, feature, delta)?;
    let original = rollout(policy, returns, symbols)?;
    let counterfactual = rollout(policy, &cf_returns, symbols)?;
    let difference_indices = original.difference_indices(&counterfactual);

    debug!(
        feature,
        delta,
        changed = difference_indices.len(),
        steps = original.len(),
        "Counterfactual rollout"
    );

    Ok(CounterfactualResult {
        original_actions: original.actions,
        counterfactual_actions: counterfactual.actions,
        difference_indices,
    })
}

// =============================================================================
// SENSITIVITY SWEEP
// =============================================================================

/// Deltas used when a sweep request does not name any.
pub const DEFAULT_SWEEP_DELTAS: [f64; 6] = [-0.5, -0.25, -0.1, 0.1, 0.25, 0.5];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub delta: f64,
    pub changed_steps: usize,
    /// `changed_steps / steps`
    pub flip_rate: f64,
    pub difference_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub feature: String,
    pub steps: usize,
    pub original_actions: Vec<String>,
    pub points: Vec<SensitivityPoint>,
}

impl SensitivityReport {
    /// Smallest |delta| that changed at least one decision.
    pub fn flip_threshold(&self) -> Option<f64> {
        self.points
            .iter()
            .filter(|p| p.changed_steps > 0)
            .map(|p| p.delta.abs())
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn max_flip_rate(&self) -> f64 {
        self.points.iter().map(|p| p.flip_rate).fold(0.0, f64::max)
    }
}

pub fn sweep(
    policy: &dyn Policy,
    returns: &ReturnMatrix,
    symbols: &[String],
    feature: &str,
    deltas: &[f64],
) -> EngineResult<SensitivityReport> {
    if deltas.is_empty() {
        return Err(EngineError::Validation(
            "sensitivity sweep needs at least one delta".to_string(),
        ));
    }

    let original = rollout(policy, returns, symbols)?;
    let steps = original.len();
    let mut points = Vec::with_capacity(deltas.len());

    for &delta in deltas {
        let cf_returns = perturbed(returns, feature, delta)?;
        let counterfactual: ActionTrace = rollout(policy, &cf_returns, symbols)?;
        let difference_indices = original.difference_indices(&counterfactual);
        let changed_steps = difference_indices.len();
        points.push(SensitivityPoint {
            delta,
            changed_steps,
            flip_rate: if steps == 0 {
                0.0
            } else {
                changed_steps as f64 / steps as f64
            },
            difference_indices,
        });
    }

    debug!(feature, points = points.len(), "Sensitivity sweep complete");

    Ok(SensitivityReport {
        feature: feature.to_string(),
        steps,
        original_actions: original.actions,
        points,
    })
}
