// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for splitting tests across two buckets with near-equal total duration.
//!
//! This is the balanced partition problem, solved as a 0/1 knapsack: every test is an item whose
//! weight is its duration in whole milliseconds, and the knapsack capacity is half the total
//! weight, rounded down. The items that best fill the knapsack form bucket 1 and the rest form
//! bucket 2.

use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

/// The knapsack solver used for a category.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    /// Exact depth-first branch-and-bound search, for smaller item sets.
    BranchAndBound,

    /// Subset-sum dynamic programming over all reachable totals, for larger item sets.
    DynamicProgramming,
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BranchAndBound => f.write_str("branch-and-bound"),
            Self::DynamicProgramming => f.write_str("dynamic-programming"),
        }
    }
}

/// A builder for creating `KnapsackSolver` instances.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionerBuilder {
    solver: SolverKind,
    max_search_nodes: u64,
}

impl PartitionerBuilder {
    /// The default number of nodes a branch-and-bound search may visit.
    pub const DEFAULT_MAX_SEARCH_NODES: u64 = 10_000_000;

    /// Creates a new builder for the given solver.
    pub fn new(solver: SolverKind) -> Self {
        Self {
            solver,
            max_search_nodes: Self::DEFAULT_MAX_SEARCH_NODES,
        }
    }

    /// Sets the number of nodes a branch-and-bound search may visit before settling for the best
    /// subset found so far. Ignored by other solvers.
    pub fn set_max_search_nodes(&mut self, max_search_nodes: u64) -> &mut Self {
        self.max_search_nodes = max_search_nodes;
        self
    }

    /// Returns the solver kind.
    pub fn solver(&self) -> SolverKind {
        self.solver
    }

    /// Creates a new `KnapsackSolver` from this builder.
    pub fn build(&self) -> Box<dyn KnapsackSolver> {
        match self.solver {
            SolverKind::BranchAndBound => Box::new(BranchAndBound {
                max_nodes: self.max_search_nodes,
            }),
            SolverKind::DynamicProgramming => Box::new(DynamicProgramming),
        }
    }

    /// Splits the given `(name, duration in milliseconds)` items into two buckets.
    ///
    /// Bucket order follows input order. An empty input produces two empty buckets without
    /// invoking a solver.
    pub fn split<'a>(&self, items: impl IntoIterator<Item = (&'a str, f64)>) -> BucketSplit {
        let (names, weights): (Vec<&str>, Vec<u64>) = items
            .into_iter()
            .map(|(name, msecs)| (name, weight_for(msecs)))
            .unzip();

        if names.is_empty() {
            return BucketSplit::default();
        }

        let total = weights.iter().try_fold(0u64, |sum, &w| sum.checked_add(w));
        let (capacity, selected) = match total {
            Some(total) => {
                let capacity = total / 2;
                (capacity, self.build().solve(&weights, capacity))
            }
            None => {
                warn!(
                    solver = %self.solver,
                    "total test duration overflows, leaving bucket 1 empty"
                );
                (0, vec![false; weights.len()])
            }
        };

        let mut split = BucketSplit::default();
        for ((name, weight), selected) in names.into_iter().zip(weights).zip(selected) {
            if selected {
                split.bucket1.push(name.to_owned());
                split.bucket1_msecs = split.bucket1_msecs.saturating_add(weight);
            } else {
                split.bucket2.push(name.to_owned());
                split.bucket2_msecs = split.bucket2_msecs.saturating_add(weight);
            }
        }
        debug!(
            solver = %self.solver,
            capacity,
            bucket1_msecs = split.bucket1_msecs,
            bucket2_msecs = split.bucket2_msecs,
            "split tests into buckets"
        );

        split
    }
}

fn weight_for(msecs: f64) -> u64 {
    // Negative and NaN durations saturate to 0.
    msecs.round() as u64
}

/// The result of splitting a set of tests into two buckets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BucketSplit {
    /// The tests selected by the solver.
    pub bucket1: Vec<String>,

    /// The remaining tests.
    pub bucket2: Vec<String>,

    /// The total weight of bucket 1, in milliseconds.
    pub bucket1_msecs: u64,

    /// The total weight of bucket 2, in milliseconds.
    pub bucket2_msecs: u64,
}

impl BucketSplit {
    /// Returns the number of tests across both buckets.
    pub fn len(&self) -> usize {
        self.bucket1.len() + self.bucket2.len()
    }

    /// Returns true if both buckets are empty.
    pub fn is_empty(&self) -> bool {
        self.bucket1.is_empty() && self.bucket2.is_empty()
    }
}

/// Solves a single-dimension 0/1 knapsack.
pub trait KnapsackSolver: fmt::Debug {
    /// Returns, for each item, whether it is part of the subset with the largest total weight that
    /// does not exceed `capacity`. The returned vector has the same length as `weights`.
    fn solve(&mut self, weights: &[u64], capacity: u64) -> Vec<bool>;
}

#[derive(Clone, Debug)]
struct BranchAndBound {
    max_nodes: u64,
}

impl KnapsackSolver for BranchAndBound {
    fn solve(&mut self, weights: &[u64], capacity: u64) -> Vec<bool> {
        // Heaviest first, so that good solutions are found early and the bound prunes hard.
        // Zero-weight items never improve a solution and items heavier than the capacity never
        // fit, so neither is searched.
        let mut order: Vec<usize> = (0..weights.len())
            .filter(|&i| weights[i] > 0 && weights[i] <= capacity)
            .collect();
        order.sort_by(|&a, &b| weights[b].cmp(&weights[a]));

        let ordered: Vec<u64> = order.iter().map(|&i| weights[i]).collect();
        let mut remaining = vec![0u64; ordered.len() + 1];
        for k in (0..ordered.len()).rev() {
            remaining[k] = remaining[k + 1].saturating_add(ordered[k]);
        }

        let mut search = Search {
            weights: &ordered,
            remaining: &remaining,
            capacity,
            current: vec![false; ordered.len()],
            best: vec![false; ordered.len()],
            best_total: 0,
            nodes: 0,
            max_nodes: self.max_nodes,
            exhausted: false,
        };
        search.visit(0, 0);

        if search.exhausted {
            warn!(
                max_nodes = self.max_nodes,
                best_total = search.best_total,
                capacity,
                "branch-and-bound search budget exhausted, using best split found so far"
            );
        }

        let mut selected = vec![false; weights.len()];
        for (k, &i) in order.iter().enumerate() {
            selected[i] = search.best[k];
        }
        selected
    }
}

struct Search<'a> {
    weights: &'a [u64],
    // remaining[k] is the total weight of items k.. in search order.
    remaining: &'a [u64],
    capacity: u64,
    current: Vec<bool>,
    best: Vec<bool>,
    best_total: u64,
    nodes: u64,
    max_nodes: u64,
    exhausted: bool,
}

impl Search<'_> {
    fn is_done(&self) -> bool {
        self.exhausted || self.best_total == self.capacity
    }

    fn visit(&mut self, k: usize, total: u64) {
        if self.is_done() {
            return;
        }
        if self.nodes >= self.max_nodes {
            self.exhausted = true;
            return;
        }
        self.nodes += 1;

        if total > self.best_total {
            self.best_total = total;
            self.best.clone_from(&self.current);
            if self.is_done() {
                return;
            }
        }
        if k == self.weights.len() || total.saturating_add(self.remaining[k]) <= self.best_total {
            return;
        }

        // total <= capacity, so this cannot underflow.
        let weight = self.weights[k];
        if weight <= self.capacity - total {
            self.current[k] = true;
            self.visit(k + 1, total + weight);
            self.current[k] = false;
        }
        self.visit(k + 1, total);
    }
}

#[derive(Clone, Debug)]
struct DynamicProgramming;

const UNREACHED: u32 = u32::MAX;
const ORIGIN: u32 = u32::MAX - 1;

/// Allocates an all-unreached table with one slot per total in `0..=capacity`, or returns `None`
/// if it cannot be allocated.
fn reachability_table(capacity: u64) -> Option<Vec<u32>> {
    let len = usize::try_from(capacity).ok()?.checked_add(1)?;
    let mut table = Vec::new();
    table.try_reserve_exact(len).ok()?;
    table.resize(len, UNREACHED);
    Some(table)
}

impl KnapsackSolver for DynamicProgramming {
    fn solve(&mut self, weights: &[u64], capacity: u64) -> Vec<bool> {
        let mut selected = vec![false; weights.len()];
        let Some(mut via) = reachability_table(capacity) else {
            warn!(capacity, "knapsack capacity does not fit in memory, leaving bucket 1 empty");
            return selected;
        };
        let cap = via.len() - 1;

        // via[s] is the item that first made the total s reachable. Sums are visited in
        // descending order per item, so via[s - weight] always names an earlier item.
        via[0] = ORIGIN;

        for (i, &weight) in weights.iter().enumerate() {
            if weight == 0 || weight > capacity {
                continue;
            }
            let weight = weight as usize;
            for s in (weight..=cap).rev() {
                if via[s] == UNREACHED && via[s - weight] != UNREACHED {
                    via[s] = i as u32;
                }
            }
            if via[cap] != UNREACHED {
                break;
            }
        }

        let mut s = (0..=cap).rev().find(|&s| via[s] != UNREACHED).unwrap_or(0);
        while s > 0 {
            let i = via[s] as usize;
            selected[i] = true;
            s -= weights[i] as usize;
        }
        selected
    }
}
