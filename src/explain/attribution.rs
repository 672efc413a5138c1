//! Feature attribution estimators.
//!
//! An estimator explains a black-box classifier `f: observation -> class` over a
//! set of input rows, relative to a background sample. The result holds one
//! `[rows x features]` matrix per class.

use crate::error::{EngineError, EngineResult};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// `attributions[class][row][feature]`
pub type ClassAttributions = Vec<Vec<Vec<f64>>>;

pub trait AttributionEstimator: Send + Sync {
    fn attribute(
        &self,
        f: &dyn Fn(&[f64]) -> usize,
        classes: usize,
        background: &[Vec<f64>],
        inputs: &[Vec<f64>],
    ) -> EngineResult<ClassAttributions>;
}

#[derive(Debug, Clone)]
pub struct AttributionConfig {
    /// Feature permutations sampled per input row
    pub permutations: usize,
    pub seed: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            permutations: 64,
            seed: 7,
        }
    }
}

impl AttributionConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("ATTRIBUTION_PERMUTATIONS") {
            if let Ok(p) = v.parse::<usize>() {
                if p > 0 {
                    config.permutations = p;
                }
            }
        }
        if let Ok(v) = std::env::var("ATTRIBUTION_SEED") {
            if let Ok(seed) = v.parse() {
                config.seed = seed;
            }
        }

        config
    }
}

/// Monte-Carlo permutation estimate of Shapley values for the class-indicator
/// outputs `1[f(x) == c]`.
///
/// For every sampled permutation a background row is drawn, then features are
/// switched to the input's values one at a time in permutation order; the
/// change in each class indicator is credited to the feature just switched.
/// Per row, contributions summed over features equal
/// `1[f(x) == c] - 1[f(z) == c]` averaged over the drawn backgrounds `z`.
pub struct SamplingShapleyEstimator {
    config: AttributionConfig,
}

impl SamplingShapleyEstimator {
    pub fn new(config: AttributionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }
}

impl AttributionEstimator for SamplingShapleyEstimator {
    fn attribute(
        &self,
        f: &dyn Fn(&[f64]) -> usize,
        classes: usize,
        background: &[Vec<f64>],
        inputs: &[Vec<f64>],
    ) -> EngineResult<ClassAttributions> {
        if classes == 0 {
            return Err(EngineError::Validation(
                "attribution needs at least one class".to_string(),
            ));
        }
        if background.is_empty() {
            return Err(EngineError::Validation(
                "attribution needs a non-empty background sample".to_string(),
            ));
        }
        let width = background[0].len();
        if background.iter().chain(inputs).any(|row| row.len() != width) {
            return Err(EngineError::Validation(
                "attribution rows must share one width".to_string(),
            ));
        }

        let permutations = self.config.permutations.max(1);
        let scale = 1.0 / permutations as f64;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..width).collect();
        let mut out = vec![vec![vec![0.0; width]; inputs.len()]; classes];

        for (r, x) in inputs.iter().enumerate() {
            for _ in 0..permutations {
                order.shuffle(&mut rng);
                let mut hybrid = background[rng.gen_range(0..background.len())].clone();
                let mut prev = f(&hybrid).min(classes - 1);

                for &j in &order {
                    hybrid[j] = x[j];
                    let next = f(&hybrid).min(classes - 1);
                    if next != prev {
                        out[prev][r][j] -= scale;
                        out[next][r][j] += scale;
                        prev = next;
                    }
                }
            }
        }

        debug!(
            rows = inputs.len(),
            features = width,
            classes,
            permutations,
            "Sampled Shapley attributions"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> SamplingShapleyEstimator {
        SamplingShapleyEstimator::new(AttributionConfig {
            permutations: 32,
            seed: 1,
        })
    }

    #[test]
    fn test_only_relevant_feature_gets_credit() {
        // Class depends on feature 0 alone
        let f = |x: &[f64]| if x[0] > 0.0 { 1 } else { 0 };
        let background = vec![vec![-1.0, 5.0], vec![-2.0, -5.0]];
        let inputs = vec![vec![1.0, 0.0]];
        let out = estimator().attribute(&f, 2, &background, &inputs).unwrap();

        assert!((out[1][0][0] - 1.0).abs() < 1e-12);
        assert!((out[0][0][0] + 1.0).abs() < 1e-12);
        assert_eq!(out[1][0][1], 0.0);
        assert_eq!(out[0][0][1], 0.0);
    }

    #[test]
    fn test_efficiency_per_row() {
        let f = |x: &[f64]| if x[0] + x[1] > 0.0 { 1 } else { 0 };
        let background = vec![vec![-1.0, -1.0]];
        let inputs = vec![vec![2.0, 2.0], vec![-3.0, -3.0]];
        let out = estimator().attribute(&f, 2, &background, &inputs).unwrap();

        let row0: f64 = out[1][0].iter().sum();
        assert!((row0 - 1.0).abs() < 1e-9);
        let row1: f64 = out[1][1].iter().sum();
        assert!(row1.abs() < 1e-12);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 2);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let f = |x: &[f64]| if x[0] > x[1] { 0 } else { 1 };
        let background = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.4]];
        let inputs = vec![vec![0.3, 0.2], vec![0.1, 0.9]];
        let a = estimator().attribute(&f, 2, &background, &inputs).unwrap();
        let b = estimator().attribute(&f, 2, &background, &inputs).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_background() {
        let f = |_: &[f64]| 0;
        assert!(estimator().attribute(&f, 1, &[], &[vec![1.0]]).is_err());
    }
}
