//! Cross-fitting fold assignment.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sd_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// How rows are partitioned into folds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStrategy {
    /// Global shuffle, then round-robin.
    Random,
    /// Round-robin within each country after a within-country shuffle, from
    /// a random starting fold per country.
    #[default]
    Stratified,
    /// Whole countries per fold, balancing row counts.
    Grouped,
}

/// Partition of `n` rows into `k` disjoint folds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldAssignment {
    k: usize,
    fold_of: Vec<usize>,
}

impl FoldAssignment {
    /// Build from an explicit fold label per row.
    pub fn from_labels(k: usize, fold_of: Vec<usize>) -> Result<Self> {
        if let Some(bad) = fold_of.iter().find(|&&f| f >= k) {
            return Err(Error::Validation(format!("fold label {bad} out of range for k={k}")));
        }
        Ok(Self { k, fold_of })
    }

    /// Number of folds.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of rows.
    pub fn n(&self) -> usize {
        self.fold_of.len()
    }

    /// Fold label of every row.
    pub fn labels(&self) -> &[usize] {
        &self.fold_of
    }

    /// Rows held out in fold `k`.
    pub fn test_rows(&self, k: usize) -> Vec<usize> {
        (0..self.n()).filter(|&i| self.fold_of[i] == k).collect()
    }

    /// Rows used to train the models for fold `k`.
    pub fn train_rows(&self, k: usize) -> Vec<usize> {
        (0..self.n()).filter(|&i| self.fold_of[i] != k).collect()
    }

    /// Rows per fold.
    pub fn sizes(&self) -> Vec<usize> {
        let mut s = vec![0; self.k];
        for &f in &self.fold_of {
            s[f] += 1;
        }
        s
    }
}

/// Assign `groups.len()` rows to `k` folds. `groups` carries the country id
/// of every row (used by the stratified and grouped strategies).
pub fn assign_folds(groups: &[u64], k: usize, strategy: FoldStrategy, seed: u64) -> Result<FoldAssignment> {
    let n = groups.len();
    if k < 2 {
        return Err(Error::Validation(format!("need at least 2 folds, got {k}")));
    }
    if n < k {
        return Err(Error::Validation(format!("cannot split {n} rows into {k} folds")));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fold_of = vec![0usize; n];

    let mut members: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (i, &g) in groups.iter().enumerate() {
        members.entry(g).or_default().push(i);
    }

    match strategy {
        FoldStrategy::Random => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);
            for (pos, &i) in order.iter().enumerate() {
                fold_of[i] = pos % k;
            }
        }
        FoldStrategy::Stratified => {
            for rows in members.values_mut() {
                rows.shuffle(&mut rng);
                let offset = rng.random_range(0..k);
                for (j, &i) in rows.iter().enumerate() {
                    fold_of[i] = (offset + j) % k;
                }
            }
        }
        FoldStrategy::Grouped => {
            if members.len() < k {
                return Err(Error::Validation(format!(
                    "grouped folds need at least {k} countries, got {}",
                    members.len()
                )));
            }
            let mut order: Vec<&Vec<usize>> = members.values().collect();
            order.shuffle(&mut rng);
            // Largest first; the stable sort keeps the shuffled order among ties.
            order.sort_by(|a, b| b.len().cmp(&a.len()));
            let mut load = vec![0usize; k];
            for rows in order {
                let target = (0..k).min_by_key(|&f| (load[f], f)).unwrap_or(0);
                load[target] += rows.len();
                for &i in rows {
                    fold_of[i] = target;
                }
            }
        }
    }
    let assignment = FoldAssignment { k, fold_of };
    tracing::debug!(k, strategy = ?strategy, sizes = ?assignment.sizes(), "folds assigned");
    Ok(assignment)
}
