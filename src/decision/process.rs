//! Asset-selection decision process.
//!
//! A finite-horizon MDP over a fixed `ReturnMatrix`: state is a row index,
//! the observation is that row, and choosing asset `a` earns the row's return
//! for `a`. Transitions are a pure function of `(state, action)` so concurrent
//! rollouts over the same matrix never share a cursor.

use crate::market::ReturnMatrix;

/// Step index into the return matrix. Terminal at `T - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessState {
    pub t: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: ProcessState,
    pub reward: f64,
    /// Row at `next`, or a zero vector when `next` is terminal.
    pub observation: Vec<f64>,
    pub done: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionProcess<'a> {
    returns: &'a ReturnMatrix,
}

impl<'a> DecisionProcess<'a> {
    pub fn new(returns: &'a ReturnMatrix) -> Self {
        Self { returns }
    }

    pub fn returns(&self) -> &'a ReturnMatrix {
        self.returns
    }

    pub fn initial_state(&self) -> ProcessState {
        ProcessState { t: 0 }
    }

    pub fn action_count(&self) -> usize {
        self.returns.width()
    }

    /// Number of decisions in one full traversal (`T - 1`).
    pub fn horizon(&self) -> usize {
        self.returns.len().saturating_sub(1)
    }

    pub fn is_terminal(&self, state: ProcessState) -> bool {
        state.t + 1 >= self.returns.len()
    }

    pub fn observation(&self, state: ProcessState) -> &'a [f64] {
        self.returns.row(state.t)
    }

    /// Apply `action` at `state`. Actions are not range-checked here: an index
    /// past the last column earns zero reward. Stepping a terminal state is a
    /// no-op with zero reward.
    pub fn step(&self, state: ProcessState, action: usize) -> Transition {
        if self.is_terminal(state) {
            return Transition {
                next: state,
                reward: 0.0,
                observation: vec![0.0; self.action_count()],
                done: true,
            };
        }

        let reward = self.returns.row(state.t).get(action).copied().unwrap_or(0.0);
        let next = ProcessState { t: state.t + 1 };
        let done = self.is_terminal(next);
        let observation = if done {
            vec![0.0; self.action_count()]
        } else {
            self.returns.row(next.t).to_vec()
        };

        Transition {
            next,
            reward,
            observation,
            done,
        }
    }
}
