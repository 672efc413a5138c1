//! PC-stable structure learning.
//!
//! 1. Skeleton: start from the complete undirected graph and, for growing
//!    conditioning-set sizes, drop `i - j` when some subset of `i`'s neighbours
//!    (frozen at the start of the level) makes them independent. The subset is
//!    kept as the separating set.
//! 2. Colliders: for unshielded `i - k - j` with `k` outside `sepset(i, j)`,
//!    orient `i -> k <- j`. An edge already pointing the other way is left alone.
//! 3. Meek rules R1-R3 until nothing changes.

use super::graph::CausalGraph;
use super::independence::FisherZ;
use crate::error::{EngineError, EngineResult};
use crate::market::ReturnMatrix;
use std::collections::HashMap;
use tracing::{debug, info};

/// Learns a causal graph over the columns of a return matrix.
pub trait StructureLearner: Send + Sync {
    fn discover(
        &self,
        returns: &ReturnMatrix,
        alpha: f64,
        labels: &[String],
    ) -> EngineResult<CausalGraph>;
}

#[derive(Debug, Clone, Default)]
pub struct PcAlgorithm {
    /// Cap on conditioning-set size; `None` lets the data decide.
    pub max_depth: Option<usize>,
}

impl PcAlgorithm {
    pub fn new() -> Self {
        Self::default()
    }

    fn skeleton(
        &self,
        test: &FisherZ,
        n: usize,
        alpha: f64,
    ) -> EngineResult<(Vec<Vec<bool>>, HashMap<(usize, usize), Vec<usize>>)> {
        let mut adj = vec![vec![true; n]; n];
        for (i, row) in adj.iter_mut().enumerate() {
            row[i] = false;
        }
        let mut sepsets = HashMap::new();

        let depth_limit = match self.max_depth {
            Some(d) => d.min(test.max_conditioning()),
            None => test.max_conditioning(),
        };

        let mut depth = 0;
        while depth <= depth_limit {
            let frozen: Vec<Vec<usize>> = (0..n)
                .map(|i| (0..n).filter(|&j| adj[i][j]).collect())
                .collect();
            let mut testable = false;
            let mut removed = 0usize;

            for i in 0..n {
                for &j in &frozen[i] {
                    if !adj[i][j] {
                        continue;
                    }
                    let candidates: Vec<usize> =
                        frozen[i].iter().copied().filter(|&k| k != j).collect();
                    if candidates.len() < depth {
                        continue;
                    }
                    testable = true;

                    for cond in combinations(&candidates, depth) {
                        let p = test.p_value(i, j, &cond)?;
                        if p > alpha {
                            adj[i][j] = false;
                            adj[j][i] = false;
                            sepsets.insert(pair(i, j), cond);
                            removed += 1;
                            break;
                        }
                    }
                }
            }

            debug!(depth, removed, "PC skeleton level complete");
            if !testable {
                break;
            }
            depth += 1;
        }

        Ok((adj, sepsets))
    }
}

impl StructureLearner for PcAlgorithm {
    fn discover(
        &self,
        returns: &ReturnMatrix,
        alpha: f64,
        labels: &[String],
    ) -> EngineResult<CausalGraph> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(EngineError::Validation(format!(
                "alpha must lie in (0, 1), got {}",
                alpha
            )));
        }
        let n = returns.width();
        if labels.len() != n {
            return Err(EngineError::Validation(format!(
                "{} labels for {} columns",
                labels.len(),
                n
            )));
        }

        let test = FisherZ::new(returns)?;
        let (skeleton, sepsets) = self.skeleton(&test, n, alpha)?;

        // g[i][j] && g[j][i] is undirected; g[i][j] alone is i -> j
        let mut g = skeleton.clone();
        orient_colliders(&mut g, &skeleton, &sepsets);
        apply_meek_rules(&mut g);

        let corr = test.correlation();
        let weights = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| g[i][j].then(|| corr[(i, j)]))
                    .collect()
            })
            .collect();

        let graph = CausalGraph::from_weights(labels.to_vec(), weights);
        info!(
            nodes = n,
            edges = graph.edges().len(),
            rows = returns.len(),
            alpha,
            "Causal discovery complete"
        );
        Ok(graph)
    }
}

fn pair(i: usize, j: usize) -> (usize, usize) {
    if i < j {
        (i, j)
    } else {
        (j, i)
    }
}

fn adjacent(g: &[Vec<bool>], a: usize, b: usize) -> bool {
    g[a][b] || g[b][a]
}

fn undirected(g: &[Vec<bool>], a: usize, b: usize) -> bool {
    g[a][b] && g[b][a]
}

fn directed(g: &[Vec<bool>], a: usize, b: usize) -> bool {
    g[a][b] && !g[b][a]
}

/// Turn `a - b` into `a -> b`; no-op unless the edge is currently undirected.
fn orient(g: &mut [Vec<bool>], a: usize, b: usize) -> bool {
    if undirected(g, a, b) {
        g[b][a] = false;
        true
    } else {
        false
    }
}

fn orient_colliders(
    g: &mut [Vec<bool>],
    skeleton: &[Vec<bool>],
    sepsets: &HashMap<(usize, usize), Vec<usize>>,
) {
    let n = skeleton.len();
    for i in 0..n {
        for j in (i + 1)..n {
            if skeleton[i][j] {
                continue;
            }
            let Some(sepset) = sepsets.get(&(i, j)) else {
                continue;
            };
            for k in 0..n {
                if k == i || k == j || !skeleton[i][k] || !skeleton[j][k] {
                    continue;
                }
                if !sepset.contains(&k) {
                    orient(g, i, k);
                    orient(g, j, k);
                }
            }
        }
    }
}

fn apply_meek_rules(g: &mut [Vec<bool>]) {
    let n = g.len();
    loop {
        let mut changed = false;
        for a in 0..n {
            for b in 0..n {
                if a == b || !undirected(g, a, b) {
                    continue;
                }
                if meek_r1(g, a, b) || meek_r2(g, a, b) || meek_r3(g, a, b) {
                    changed |= orient(g, a, b);
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// R1: `c -> a - b`, `c` and `b` not adjacent.
fn meek_r1(g: &[Vec<bool>], a: usize, b: usize) -> bool {
    (0..g.len()).any(|c| c != b && directed(g, c, a) && !adjacent(g, c, b))
}

/// R2: `a -> c -> b` with `a - b`.
fn meek_r2(g: &[Vec<bool>], a: usize, b: usize) -> bool {
    (0..g.len()).any(|c| directed(g, a, c) && directed(g, c, b))
}

/// R3: `a - c -> b`, `a - d -> b`, `c` and `d` not adjacent.
fn meek_r3(g: &[Vec<bool>], a: usize, b: usize) -> bool {
    let n = g.len();
    let feeders: Vec<usize> = (0..n)
        .filter(|&c| c != a && c != b && undirected(g, a, c) && directed(g, c, b))
        .collect();
    feeders.iter().enumerate().any(|(x, &c)| {
        feeders[x + 1..]
            .iter()
            .any(|&d| !adjacent(g, c, d))
    })
}

/// Subsets of `items` with exactly `k` elements, in lexicographic index order.
fn combinations(items: &[usize], k: usize) -> Vec<Vec<usize>> {
    let n = items.len();
    if k > n {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.iter().map(|&i| items[i]).collect());
        let mut pos = k;
        loop {
            if pos == 0 {
                return out;
            }
            pos -= 1;
            if idx[pos] != pos + n - k {
                break;
            }
            if pos == 0 {
                return out;
            }
        }
        idx[pos] += 1;
        for p in (pos + 1)..k {
            idx[p] = idx[p - 1] + 1;
        }
    }
}
