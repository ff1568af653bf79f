//! Случайный лес: бэггинг CART-деревьев linfa-tree с голосованием большинством

#![allow(non_snake_case)]

use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa_tree::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::models::classifier::Classifier;

struct ForestTree {
    tree: DecisionTree<f64, usize>,
    /// Индексы исходных признаков, на которых обучено дерево
    features: Vec<usize>,
}

pub struct RandomForest {
    n_estimators: usize,
    max_depth: Option<usize>,
    max_features: Option<usize>,
    seed: u64,
    n_features: usize,
    /// Фактический размер подпространства после `fit`
    features_per_tree: usize,
    trees: Vec<ForestTree>,
}

impl RandomForest {
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            max_depth: None,
            max_features: None,
            seed,
            n_features: 0,
            features_per_tree: 0,
            trees: Vec::new(),
        }
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Число признаков в случайном подпространстве каждого дерева.
    /// `None` - округленный квадратный корень из числа признаков.
    pub fn max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn features_per_tree(&self) -> usize {
        self.features_per_tree
    }
}

fn default_subspace(n_features: usize) -> usize {
    ((n_features as f64).sqrt().round() as usize).max(1)
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(50, 42)
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, X: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        let n_samples = X.nrows();
        if n_samples == 0 || X.ncols() == 0 {
            return Err(Error::EmptyInput("cannot fit forest on empty data".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let n_features = X.ncols();
        let subspace = self
            .max_features
            .map(|m| m.clamp(1, n_features))
            .unwrap_or_else(|| default_subspace(n_features));

        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            // Bootstrap-выборка строк
            let rows: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();

            let features: Vec<usize> = if subspace < n_features {
                let mut picked = rand::seq::index::sample(&mut rng, n_features, subspace).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n_features).collect()
            };

            let records = X.select(Axis(0), &rows).select(Axis(1), &features);
            let targets = y.select(Axis(0), &rows);
            let dataset = Dataset::new(records, targets);

            let tree = DecisionTree::<f64, usize>::params()
                .split_quality(SplitQuality::Gini)
                .max_depth(self.max_depth)
                .fit(&dataset)
                .map_err(Error::model)?;

            trees.push(ForestTree { tree, features });
        }

        self.trees = trees;
        self.n_features = n_features;
        self.features_per_tree = subspace;
        Ok(())
    }

    fn predict(&self, X: &Array2<f64>) -> Result<Array1<usize>> {
        if self.trees.is_empty() {
            return Err(Error::Model("forest not trained".to_string()));
        }
        if X.ncols() != self.n_features {
            return Err(Error::RowWidth {
                expected: self.n_features,
                got: X.ncols(),
            });
        }

        let mut votes: Vec<BTreeMap<usize, usize>> = vec![BTreeMap::new(); X.nrows()];
        for forest_tree in &self.trees {
            let records = X.select(Axis(1), &forest_tree.features);
            let predictions: Array1<usize> = forest_tree.tree.predict(&records);
            for (row_votes, &label) in votes.iter_mut().zip(predictions.iter()) {
                *row_votes.entry(label).or_insert(0) += 1;
            }
        }

        // При равенстве голосов побеждает меньшая метка
        Ok(votes
            .iter()
            .map(|row_votes| {
                row_votes
                    .iter()
                    .fold((0usize, 0usize), |best, (&label, &count)| {
                        if count > best.1 {
                            (label, count)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect())
    }

    /// Средняя по деревьям важность (уменьшение примеси), нормированная к 1
    fn feature_importances(&self) -> Option<Vec<f64>> {
        if self.trees.is_empty() {
            return None;
        }

        let mut importances = vec![0.0; self.n_features];
        for forest_tree in &self.trees {
            for (&feature, importance) in forest_tree
                .features
                .iter()
                .zip(forest_tree.tree.feature_importance())
            {
                // У дерева из одного листа важности не определены
                if importance.is_finite() {
                    importances[feature] += importance;
                }
            }
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in importances.iter_mut() {
                *value /= total;
            }
        }
        Some(importances)
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": "random_forest",
            "n_estimators": self.n_estimators,
            "max_depth": self.max_depth,
            "max_features": self.max_features,
            "features_per_tree": self.features_per_tree,
            "seed": self.seed,
            "n_features": self.n_features,
            "feature_importances": self.feature_importances(),
        })
    }
}
