//! Policy training.
//!
//! The engine only relies on the [`PolicyTrainer`] contract: a blocking,
//! one-shot call that traverses the process and hands back a policy that can
//! be queried deterministically. [`ReinforceTrainer`] is the default
//! implementation (Monte-Carlo policy gradient on a linear softmax policy).

use super::policy::PolicyModel;
use super::process::DecisionProcess;
use crate::error::{EngineError, EngineResult};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const LOG_EVERY_EPISODES: u64 = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub algorithm: String,
    pub episodes: u64,
    pub timesteps: u64,
    pub mean_episode_reward: f64,
    pub last_episode_reward: f64,
    pub best_episode_reward: f64,
}

#[derive(Debug, Clone)]
pub struct TrainedPolicy {
    pub policy: PolicyModel,
    pub summary: TrainingSummary,
}

pub trait PolicyTrainer: Send + Sync {
    fn train(&self, process: &DecisionProcess<'_>, timesteps: u64) -> EngineResult<TrainedPolicy>;
}

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    /// Discount applied to returns-to-go
    pub gamma: f64,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            gamma: 0.99,
            seed: 42,
        }
    }
}

impl TrainerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("TRAINER_LEARNING_RATE") {
            if let Ok(lr) = v.parse::<f64>() {
                if lr > 0.0 {
                    config.learning_rate = lr;
                }
            }
        }
        if let Ok(v) = std::env::var("TRAINER_GAMMA") {
            if let Ok(g) = v.parse::<f64>() {
                config.gamma = g.clamp(0.0, 1.0);
            }
        }
        if let Ok(v) = std::env::var("TRAINER_SEED") {
            if let Ok(seed) = v.parse() {
                config.seed = seed;
            }
        }

        config
    }
}

pub struct ReinforceTrainer {
    config: TrainerConfig,
}

struct StepRecord {
    observation: Vec<f64>,
    action: usize,
    reward: f64,
}

impl ReinforceTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn run_episode(
        &self,
        process: &DecisionProcess<'_>,
        policy: &PolicyModel,
        budget: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<StepRecord> {
        let mut steps = Vec::with_capacity(budget);
        let mut state = process.initial_state();
        while !process.is_terminal(state) && steps.len() < budget {
            let observation = process.observation(state);
            let action = policy.sample(observation, rng);
            let transition = process.step(state, action);
            steps.push(StepRecord {
                observation: observation.to_vec(),
                action,
                reward: transition.reward,
            });
            state = transition.next;
        }
        steps
    }

    fn advantages(&self, steps: &[StepRecord]) -> Vec<f64> {
        let mut returns = vec![0.0; steps.len()];
        let mut running = 0.0;
        for (i, step) in steps.iter().enumerate().rev() {
            running = step.reward + self.config.gamma * running;
            returns[i] = running;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let std = (returns.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n).sqrt();
        let scale = if returns.len() > 1 && std > 1e-12 { std } else { 1.0 };
        returns.iter().map(|g| (g - mean) / scale).collect()
    }

    fn update(&self, policy: &mut PolicyModel, steps: &[StepRecord], advantages: &[f64]) {
        let actions = policy.action_dim();
        let inputs = policy.input_dim();
        let mut grad_w = vec![vec![0.0; inputs]; actions];
        let mut grad_b = vec![0.0; actions];
        let n = steps.len() as f64;

        for (step, adv) in steps.iter().zip(advantages) {
            let z = policy.standardize(&step.observation);
            let probs = policy.probabilities(&step.observation);
            for k in 0..actions {
                let indicator = if k == step.action { 1.0 } else { 0.0 };
                let coef = (indicator - probs[k]) * adv / n;
                grad_b[k] += coef;
                for (g, x) in grad_w[k].iter_mut().zip(&z) {
                    *g += coef * x;
                }
            }
        }

        let lr = self.config.learning_rate;
        for k in 0..actions {
            policy.bias[k] += lr * grad_b[k];
            for (w, g) in policy.weights[k].iter_mut().zip(&grad_w[k]) {
                *w += lr * g;
            }
        }
    }
}

impl PolicyTrainer for ReinforceTrainer {
    fn train(&self, process: &DecisionProcess<'_>, timesteps: u64) -> EngineResult<TrainedPolicy> {
        if timesteps == 0 {
            return Err(EngineError::Validation(
                "total_timesteps must be positive".to_string(),
            ));
        }
        let horizon = process.horizon();
        if horizon == 0 {
            return Err(EngineError::InsufficientData(
                "decision process has no non-terminal steps".to_string(),
            ));
        }

        let mut policy = PolicyModel::for_returns(process.returns());
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let mut consumed: u64 = 0;
        let mut episodes: u64 = 0;
        let mut reward_sum = 0.0;
        let mut last_reward = 0.0;
        let mut best_reward = f64::NEG_INFINITY;

        while consumed < timesteps {
            let budget = (timesteps - consumed).min(horizon as u64) as usize;
            let steps = self.run_episode(process, &policy, budget, &mut rng);
            let advantages = self.advantages(&steps);
            self.update(&mut policy, &steps, &advantages);

            consumed += steps.len() as u64;
            episodes += 1;
            last_reward = steps.iter().map(|s| s.reward).sum();
            reward_sum += last_reward;
            best_reward = best_reward.max(last_reward);

            if episodes % LOG_EVERY_EPISODES == 0 {
                debug!(
                    episodes,
                    consumed,
                    mean_reward = reward_sum / episodes as f64,
                    "Training progress"
                );
            }
        }

        let summary = TrainingSummary {
            algorithm: "reinforce".to_string(),
            episodes,
            timesteps: consumed,
            mean_episode_reward: reward_sum / episodes as f64,
            last_episode_reward: last_reward,
            best_episode_reward: best_reward,
        };

        info!(
            episodes = summary.episodes,
            timesteps = summary.timesteps,
            mean_reward = summary.mean_episode_reward,
            "Policy training complete"
        );

        Ok(TrainedPolicy { policy, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::rollout::rollout;
    use crate::market::ReturnMatrix;

    fn syms() -> Vec<String> {
        vec!["sym0".into(), "sym1".into(), "sym2".into()]
    }

    fn dominant_first(rows: usize) -> ReturnMatrix {
        ReturnMatrix::new(syms(), vec![vec![0.05, -0.05, -0.05]; rows]).unwrap()
    }

    fn bandit_trainer() -> ReinforceTrainer {
        ReinforceTrainer::new(TrainerConfig {
            learning_rate: 0.1,
            gamma: 0.0,
            seed: 11,
        })
    }

    #[test]
    fn test_learns_dominant_asset() {
        let m = dominant_first(20);
        let process = DecisionProcess::new(&m);
        let trained = bandit_trainer().train(&process, 2_000).unwrap();

        let trace = rollout(&trained.policy, &m, &syms()).unwrap();
        assert_eq!(trace.actions, vec!["sym0"; 19]);
        assert!(trained.policy.bias[0] > trained.policy.bias[1]);
        assert!(trained.policy.bias[0] > trained.policy.bias[2]);
    }

    #[test]
    fn test_budget_is_respected() {
        let m = dominant_first(10);
        let process = DecisionProcess::new(&m);
        let trained = bandit_trainer().train(&process, 40).unwrap();
        assert_eq!(trained.summary.timesteps, 40);
        // 9 steps per full episode: 4 full + 1 truncated
        assert_eq!(trained.summary.episodes, 5);
    }

    #[test]
    fn test_training_is_deterministic_for_seed() {
        let m = dominant_first(8);
        let process = DecisionProcess::new(&m);
        let a = bandit_trainer().train(&process, 300).unwrap();
        let b = bandit_trainer().train(&process, 300).unwrap();
        assert_eq!(a.policy, b.policy);
        assert_eq!(a.summary, b.summary);
    }

    #[test]
    fn test_zero_timesteps_rejected() {
        let m = dominant_first(4);
        let process = DecisionProcess::new(&m);
        let err = bandit_trainer().train(&process, 0).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_training_leaves_process_untouched() {
        let m = dominant_first(5);
        let before = m.clone();
        let process = DecisionProcess::new(&m);
        bandit_trainer().train(&process, 50).unwrap();
        assert_eq!(m, before);
    }
}
