//! Policy capability and the linear softmax policy model.

use crate::market::ReturnMatrix;
use crate::store::StoreError;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const LINEAR_SOFTMAX_VERSION: &str = "linear-softmax-v1";

/// Maps an observation to a discrete action index.
///
/// `act` is the deterministic query. Implementations may return indices outside
/// `[0, N)`; callers are expected to clamp.
pub trait Policy: Send + Sync {
    fn act(&self, observation: &[f64]) -> i64;
}

/// `logits = W * standardize(obs) + b`, softmax over actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyModel {
    pub version: String,
    pub feature_mean: Vec<f64>,
    pub feature_std: Vec<f64>,
    /// `action_dim x input_dim`
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl PolicyModel {
    /// Zero-initialised policy with standardisation fitted on `returns`.
    pub fn for_returns(returns: &ReturnMatrix) -> Self {
        let n = returns.width();
        let t = returns.len() as f64;
        let mut mean = vec![0.0; n];
        let mut std = vec![1.0; n];
        for j in 0..n {
            let col = returns.column(j);
            let m = col.iter().sum::<f64>() / t;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / t;
            mean[j] = m;
            let s = var.sqrt();
            if s > 1e-12 {
                std[j] = s;
            }
        }
        Self {
            version: LINEAR_SOFTMAX_VERSION.to_string(),
            feature_mean: mean,
            feature_std: std,
            weights: vec![vec![0.0; n]; n],
            bias: vec![0.0; n],
        }
    }

    pub fn input_dim(&self) -> usize {
        self.feature_mean.len()
    }

    pub fn action_dim(&self) -> usize {
        self.bias.len()
    }

    pub fn standardize(&self, observation: &[f64]) -> Vec<f64> {
        self.feature_mean
            .iter()
            .zip(&self.feature_std)
            .enumerate()
            .map(|(j, (m, s))| (observation.get(j).copied().unwrap_or(0.0) - m) / s)
            .collect()
    }

    pub fn logits(&self, observation: &[f64]) -> Vec<f64> {
        let z = self.standardize(observation);
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(&z).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }

    pub fn probabilities(&self, observation: &[f64]) -> Vec<f64> {
        softmax(&self.logits(observation))
    }

    /// Stochastic action used during training.
    pub fn sample<R: Rng + ?Sized>(&self, observation: &[f64], rng: &mut R) -> usize {
        let probs = self.probabilities(observation);
        let u: f64 = rng.gen();
        let mut acc = 0.0;
        for (i, p) in probs.iter().enumerate() {
            acc += p;
            if u < acc {
                return i;
            }
        }
        probs.len().saturating_sub(1)
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a stored blob. Unknown versions and inconsistent shapes are `Corrupt`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let model: Self = serde_json::from_slice(bytes)?;
        model.check_shape().map_err(StoreError::Corrupt)?;
        Ok(model)
    }

    fn check_shape(&self) -> Result<(), String> {
        if self.version != LINEAR_SOFTMAX_VERSION {
            return Err(format!("unsupported policy version {:?}", self.version));
        }
        let inputs = self.input_dim();
        if self.feature_std.len() != inputs {
            return Err(format!(
                "{} feature means but {} feature stds",
                inputs,
                self.feature_std.len()
            ));
        }
        if self.weights.len() != self.action_dim() {
            return Err(format!(
                "{} weight rows for {} bias terms",
                self.weights.len(),
                self.action_dim()
            ));
        }
        if let Some(row) = self.weights.iter().find(|row| row.len() != inputs) {
            return Err(format!("weight row of width {}, expected {}", row.len(), inputs));
        }
        Ok(())
    }
}

impl Policy for PolicyModel {
    fn act(&self, observation: &[f64]) -> i64 {
        argmax(&self.logits(observation)) as i64
    }
}

/// Index of the largest value; ties and NaNs resolve to the lowest index.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return vec![1.0 / logits.len() as f64; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}
