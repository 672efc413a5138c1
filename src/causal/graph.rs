//! Causal graph and the queries derived from it.
//!
//! Convention: entry `(i, j)` of the adjacency matrix is an edge `i -> j`.
//! An undirected edge from structure learning appears as both `i -> j` and
//! `j -> i`. Graphs are immutable once built.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEdge {
    pub source: String,
    pub target: String,
    #[serde(default = "default_edge_weight")]
    pub weight: f64,
}

fn default_edge_weight() -> f64 {
    1.0
}

/// Upper bound on the paths one `simple_paths` call may return.
pub const MAX_SIMPLE_PATHS: usize = 10_000;
/// Upper bound on edge expansions one `simple_paths` call may make.
pub const MAX_PATH_SEARCH_STEPS: usize = 1_000_000;

struct PathSearch {
    paths: Vec<Vec<String>>,
    steps: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkovBlanket {
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub spouses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CausalGraph {
    nodes: Vec<String>,
    /// `weights[i][j] = Some(w)` iff edge `i -> j`
    weights: Vec<Vec<Option<f64>>>,
}

impl CausalGraph {
    /// Build from a square matrix where a nonzero entry `(i, j)` is an edge `i -> j`.
    pub fn from_adjacency(nodes: Vec<String>, adjacency: Vec<Vec<f64>>) -> EngineResult<Self> {
        check_unique(&nodes)?;
        let n = nodes.len();
        if adjacency.len() != n {
            return Err(EngineError::Validation(format!(
                "adjacency has {} rows for {} nodes",
                adjacency.len(),
                n
            )));
        }

        let mut weights = vec![vec![None; n]; n];
        for (i, row) in adjacency.iter().enumerate() {
            if row.len() != n {
                return Err(EngineError::Validation(format!(
                    "adjacency row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    n
                )));
            }
            for (j, &w) in row.iter().enumerate() {
                if !w.is_finite() {
                    return Err(EngineError::Validation(format!(
                        "adjacency entry ({}, {}) is not finite",
                        i, j
                    )));
                }
                if w != 0.0 {
                    if i == j {
                        return Err(EngineError::Validation(format!(
                            "self-loop on node {}",
                            nodes[i]
                        )));
                    }
                    weights[i][j] = Some(w);
                }
            }
        }

        Ok(Self { nodes, weights })
    }

    /// Build from labelled edges. Edge endpoints missing from `nodes` are
    /// appended in first-seen order.
    pub fn from_edges(nodes: Vec<String>, edges: &[CausalEdge]) -> EngineResult<Self> {
        check_unique(&nodes)?;
        let mut nodes = nodes;
        let mut index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        for edge in edges {
            if edge.source == edge.target {
                return Err(EngineError::Validation(format!(
                    "self-loop on node {}",
                    edge.source
                )));
            }
            if !edge.weight.is_finite() {
                return Err(EngineError::Validation(format!(
                    "edge {} -> {} has a non-finite weight",
                    edge.source, edge.target
                )));
            }
            for endpoint in [&edge.source, &edge.target] {
                if !index.contains_key(endpoint) {
                    index.insert(endpoint.clone(), nodes.len());
                    nodes.push(endpoint.clone());
                }
            }
        }

        let n = nodes.len();
        let mut weights = vec![vec![None; n]; n];
        for edge in edges {
            let i = index[&edge.source];
            let j = index[&edge.target];
            let w = if edge.weight == 0.0 { 1.0 } else { edge.weight };
            weights[i][j] = Some(w);
        }

        Ok(Self { nodes, weights })
    }

    /// Used by structure learners, which guarantee shape and an empty diagonal.
    pub(crate) fn from_weights(nodes: Vec<String>, weights: Vec<Vec<Option<f64>>>) -> Self {
        Self { nodes, weights }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, node: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == node)
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.weights[from][to].is_some()
    }

    /// Dense matrix view; edges whose weight is zero are reported as 1.
    pub fn adjacency(&self) -> Vec<Vec<f64>> {
        self.weights
            .iter()
            .map(|row| {
                row.iter()
                    .map(|w| match w {
                        Some(w) if *w != 0.0 => *w,
                        Some(_) => 1.0,
                        None => 0.0,
                    })
                    .collect()
            })
            .collect()
    }

    /// All edges, ordered by source then target index.
    pub fn edges(&self) -> Vec<CausalEdge> {
        let mut edges = Vec::new();
        for (i, row) in self.weights.iter().enumerate() {
            for (j, w) in row.iter().enumerate() {
                if let Some(w) = w {
                    edges.push(CausalEdge {
                        source: self.nodes[i].clone(),
                        target: self.nodes[j].clone(),
                        weight: *w,
                    });
                }
            }
        }
        edges
    }

    pub fn parents(&self, target: &str) -> EngineResult<Vec<String>> {
        let t = self.require(target)?;
        Ok(self.labels(self.parent_indices(t)))
    }

    pub fn children(&self, target: &str) -> EngineResult<Vec<String>> {
        let t = self.require(target)?;
        Ok(self.labels(self.child_indices(t)))
    }

    /// Other parents of the target's children. Never contains the target.
    pub fn spouses(&self, target: &str) -> EngineResult<Vec<String>> {
        let t = self.require(target)?;
        Ok(self.labels(self.spouse_indices(t)))
    }

    pub fn markov_blanket(&self, target: &str) -> EngineResult<MarkovBlanket> {
        let t = self.require(target)?;
        Ok(MarkovBlanket {
            parents: self.labels(self.parent_indices(t)),
            children: self.labels(self.child_indices(t)),
            spouses: self.labels(self.spouse_indices(t)),
        })
    }

    /// Every simple directed path from `source` to each node of `targets`
    /// (skipping `source` itself), grouped by target in the order given.
    /// Unknown or unreachable targets contribute nothing. Dense graphs that
    /// exceed [`MAX_SIMPLE_PATHS`] or [`MAX_PATH_SEARCH_STEPS`] are rejected.
    pub fn simple_paths(&self, source: &str, targets: &[String]) -> EngineResult<Vec<Vec<String>>> {
        let s = self.require(source)?;
        let mut search = PathSearch {
            paths: Vec::new(),
            steps: 0,
        };
        for target in targets {
            if target == source {
                continue;
            }
            let Some(t) = self.index_of(target) else {
                continue;
            };
            let mut visited = vec![false; self.len()];
            let mut stack = vec![s];
            visited[s] = true;
            self.collect_paths(s, t, &mut visited, &mut stack, &mut search)?;
        }
        Ok(search.paths)
    }

    fn collect_paths(
        &self,
        at: usize,
        target: usize,
        visited: &mut [bool],
        stack: &mut Vec<usize>,
        search: &mut PathSearch,
    ) -> EngineResult<()> {
        for next in self.child_indices(at) {
            if visited[next] {
                continue;
            }
            search.steps += 1;
            if search.steps > MAX_PATH_SEARCH_STEPS {
                return Err(EngineError::Validation(format!(
                    "path search from {} exceeded {} steps",
                    self.nodes[stack[0]], MAX_PATH_SEARCH_STEPS
                )));
            }
            stack.push(next);
            if next == target {
                if search.paths.len() == MAX_SIMPLE_PATHS {
                    return Err(EngineError::Validation(format!(
                        "more than {} simple paths from {}",
                        MAX_SIMPLE_PATHS, self.nodes[stack[0]]
                    )));
                }
                search.paths.push(stack.iter().map(|&i| self.nodes[i].clone()).collect());
            } else {
                visited[next] = true;
                self.collect_paths(next, target, visited, stack, search)?;
                visited[next] = false;
            }
            stack.pop();
        }
        Ok(())
    }

    fn require(&self, node: &str) -> EngineResult<usize> {
        self.index_of(node)
            .ok_or_else(|| EngineError::Validation(format!("{} is not a node of the graph", node)))
    }

    fn parent_indices(&self, t: usize) -> BTreeSet<usize> {
        (0..self.len()).filter(|&i| self.has_edge(i, t)).collect()
    }

    fn child_indices(&self, t: usize) -> BTreeSet<usize> {
        (0..self.len()).filter(|&j| self.has_edge(t, j)).collect()
    }

    fn spouse_indices(&self, t: usize) -> BTreeSet<usize> {
        let mut spouses = BTreeSet::new();
        for child in self.child_indices(t) {
            spouses.extend(self.parent_indices(child));
        }
        spouses.remove(&t);
        spouses
    }

    fn labels(&self, indices: BTreeSet<usize>) -> Vec<String> {
        indices.into_iter().map(|i| self.nodes[i].clone()).collect()
    }
}

fn check_unique(nodes: &[String]) -> EngineResult<()> {
    let mut seen = BTreeSet::new();
    for node in nodes {
        if !seen.insert(node.as_str()) {
            return Err(EngineError::Validation(format!("duplicate node {}", node)));
        }
    }
    Ok(())
}
