//! Per-decision and global attribution of a policy's choices.

use super::attribution::AttributionEstimator;
use crate::decision::{clamp_action, Policy};
use crate::error::{EngineError, EngineResult};
use crate::market::ReturnMatrix;
use serde::ser::{Serialize, Serializer};
use tracing::info;

/// Leading rows of the return matrix used as the attribution background.
pub const BACKGROUND_ROWS: usize = 100;

/// Symbol-keyed scores that serialize as a JSON object in request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Contributions(Vec<(String, f64)>);

impl Contributions {
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.0.iter().find(|(s, _)| s == symbol).map(|(_, v)| *v)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(s, _)| s.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for Contributions {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for Contributions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionAttribution {
    pub step: usize,
    pub action: String,
    pub contributions: Contributions,
}

/// Attribute every decision step `i in [0, T-2]` to the input features.
pub fn per_decision(
    policy: &dyn Policy,
    returns: &ReturnMatrix,
    symbols: &[String],
    estimator: &dyn AttributionEstimator,
) -> EngineResult<Vec<DecisionAttribution>> {
    let n = symbols.len();
    if n == 0 {
        return Err(EngineError::Validation(
            "attribution needs at least one symbol".to_string(),
        ));
    }
    if n != returns.width() {
        return Err(EngineError::Validation(format!(
            "{} symbols for a return matrix of width {}",
            n,
            returns.width()
        )));
    }

    let decide = |obs: &[f64]| clamp_action(policy.act(obs), n);
    let rows = returns.rows();
    let background = &rows[..BACKGROUND_ROWS.min(rows.len())];
    let attributions = estimator.attribute(&decide, n, background, rows)?;

    let steps = returns.len() - 1;
    let mut records = Vec::with_capacity(steps);
    for i in 0..steps {
        let action = decide(returns.row(i));
        let class_rows = attributions
            .get(action)
            .ok_or(EngineError::AttributionShortfall { rows: 0, step: i })?;
        let row = class_rows.get(i).ok_or(EngineError::AttributionShortfall {
            rows: class_rows.len(),
            step: i,
        })?;
        if row.len() != n {
            return Err(EngineError::Internal(format!(
                "attribution row {} has {} features, expected {}",
                i,
                row.len(),
                n
            )));
        }

        records.push(DecisionAttribution {
            step: i,
            action: symbols[action].clone(),
            contributions: symbols.iter().cloned().zip(row.iter().copied()).collect(),
        });
    }

    info!(decisions = records.len(), features = n, "Per-decision attribution complete");
    Ok(records)
}

/// Mean absolute contribution per symbol across decisions, in request order.
pub fn global_importance(records: &[DecisionAttribution], symbols: &[String]) -> Contributions {
    let mut totals = vec![0.0; symbols.len()];
    for record in records {
        for (total, symbol) in totals.iter_mut().zip(symbols) {
            *total += record.contributions.get(symbol).unwrap_or(0.0).abs();
        }
    }
    let count = records.len().max(1) as f64;
    symbols
        .iter()
        .cloned()
        .zip(totals.into_iter().map(|t| t / count))
        .collect()
}
