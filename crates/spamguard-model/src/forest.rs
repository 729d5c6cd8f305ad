//! Extremely-randomized-trees classifier.
//!
//! The ensemble grows `n_trees` independent trees over the full training
//! set. At every node a random subset of `sqrt(d)` features is drawn and a
//! single uniformly random threshold is tried per candidate feature; the
//! split with the largest weighted Gini decrease wins. This is the concrete
//! induction algorithm chosen for the randomized-forest design; exact metric
//! parity with other tree libraries is not a goal.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use spamguard_core::{ForestConfig, Label, Result, SpamGuardError};

use crate::vectorizer::SparseVector;

/// A node in the flattened tree arena. The root is node 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    /// Terminal node carrying the weighted spam fraction of its samples.
    Leaf { p_spam: f64 },
    /// Binary split: `value <= threshold` goes left, otherwise right.
    Split {
        feature: u32,
        threshold: f64,
        left: u32,
        right: u32,
    },
}

/// One randomized decision tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn predict_spam(&self, vector: &SparseVector) -> f64 {
        let mut node = 0usize;
        loop {
            match &self.nodes[node] {
                TreeNode::Leaf { p_spam } => return *p_spam,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if vector.get(*feature) <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
            }
        }
    }
}

/// Fitted ensemble state: trees plus normalized feature importances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedForest {
    trees: Vec<DecisionTree>,
    n_features: u32,
    importances: Vec<f64>,
}

/// Ensemble of extremely-randomized decision trees for binary spam/ham
/// classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraTreesClassifier {
    config: ForestConfig,
    fitted: Option<FittedForest>,
}

impl ExtraTreesClassifier {
    /// Create an unfitted classifier.
    #[must_use]
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    /// Whether `fit` has completed.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Train the ensemble on vectorized samples.
    ///
    /// With `balanced_class_weight`, each sample is weighted by
    /// `n / (2 * class_count)` so the minority class contributes equally to
    /// the split criterion.
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::Config`] on empty or mismatched inputs.
    pub fn fit(
        &mut self,
        rows: &[SparseVector],
        labels: &[Label],
        n_features: usize,
    ) -> Result<()> {
        if rows.is_empty() {
            return Err(SpamGuardError::Config(
                "cannot fit classifier on an empty training set".to_string(),
            ));
        }
        if rows.len() != labels.len() {
            return Err(SpamGuardError::Config(format!(
                "rows/labels length mismatch: {} vs {}",
                rows.len(),
                labels.len()
            )));
        }

        let n = rows.len();
        let spam_count = labels.iter().filter(|l| l.is_spam()).count();
        let ham_count = n - spam_count;
        let (w_ham, w_spam) = if self.config.balanced_class_weight {
            (
                if ham_count > 0 {
                    n as f64 / (2.0 * ham_count as f64)
                } else {
                    1.0
                },
                if spam_count > 0 {
                    n as f64 / (2.0 * spam_count as f64)
                } else {
                    1.0
                },
            )
        } else {
            (1.0, 1.0)
        };
        let sample_weights: Vec<f64> = labels
            .iter()
            .map(|l| if l.is_spam() { w_spam } else { w_ham })
            .collect();

        let n_candidates = ((n_features as f64).sqrt().ceil() as usize)
            .max(1)
            .min(n_features);

        let mut trees = Vec::with_capacity(self.config.n_trees);
        let mut importances = vec![0.0; n_features];
        for tree_index in 0..self.config.n_trees {
            let mut rng =
                ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(tree_index as u64));
            let mut builder = TreeBuilder {
                rows,
                labels,
                weights: &sample_weights,
                n_features: n_features as u32,
                n_candidates,
                max_depth: self.config.max_depth,
                min_samples_split: self.config.min_samples_split.max(2),
                nodes: Vec::new(),
                importances: vec![0.0; n_features],
            };
            let all: Vec<usize> = (0..n).collect();
            builder.build(&all, 0, &mut rng);

            // Per-tree normalization before averaging across the ensemble.
            let total: f64 = builder.importances.iter().sum();
            if total > 0.0 {
                for (acc, imp) in importances.iter_mut().zip(builder.importances.iter()) {
                    *acc += imp / total;
                }
            }
            trees.push(DecisionTree {
                nodes: builder.nodes,
            });
        }

        for imp in &mut importances {
            *imp /= self.config.n_trees as f64;
        }

        self.fitted = Some(FittedForest {
            trees,
            n_features: n_features as u32,
            importances,
        });
        Ok(())
    }

    /// Class probabilities `(p_ham, p_spam)`; the pair sums to 1.
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::NotFitted`] before [`Self::fit`].
    pub fn predict_proba(&self, vector: &SparseVector) -> Result<(f64, f64)> {
        let fitted = self.fitted.as_ref().ok_or(SpamGuardError::NotFitted)?;
        let p_spam = fitted
            .trees
            .iter()
            .map(|t| t.predict_spam(vector))
            .sum::<f64>()
            / fitted.trees.len() as f64;
        Ok((1.0 - p_spam, p_spam))
    }

    /// Predicted label at the default 0.5 operating point.
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::NotFitted`] before [`Self::fit`].
    pub fn predict(&self, vector: &SparseVector) -> Result<Label> {
        let (p_ham, p_spam) = self.predict_proba(vector)?;
        Ok(if p_spam > p_ham {
            Label::Spam
        } else {
            Label::Ham
        })
    }

    /// Normalized per-feature importances (impurity decrease).
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::NotFitted`] before [`Self::fit`].
    pub fn feature_importances(&self) -> Result<&[f64]> {
        self.fitted
            .as_ref()
            .map(|f| f.importances.as_slice())
            .ok_or(SpamGuardError::NotFitted)
    }

    /// Feature dimensionality the forest was trained on.
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::NotFitted`] before [`Self::fit`].
    pub fn n_features(&self) -> Result<u32> {
        self.fitted
            .as_ref()
            .map(|f| f.n_features)
            .ok_or(SpamGuardError::NotFitted)
    }
}

/// Weighted class totals for a set of samples.
fn class_weights(indices: &[usize], labels: &[Label], weights: &[f64]) -> (f64, f64) {
    let mut w_ham = 0.0;
    let mut w_spam = 0.0;
    for &i in indices {
        if labels[i].is_spam() {
            w_spam += weights[i];
        } else {
            w_ham += weights[i];
        }
    }
    (w_ham, w_spam)
}

/// Gini impurity of a weighted two-class node.
fn gini(w_ham: f64, w_spam: f64) -> f64 {
    let total = w_ham + w_spam;
    if total <= 0.0 {
        return 0.0;
    }
    let p_ham = w_ham / total;
    let p_spam = w_spam / total;
    1.0 - p_ham * p_ham - p_spam * p_spam
}

struct TreeBuilder<'a> {
    rows: &'a [SparseVector],
    labels: &'a [Label],
    weights: &'a [f64],
    n_features: u32,
    n_candidates: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    nodes: Vec<TreeNode>,
    importances: Vec<f64>,
}

impl TreeBuilder<'_> {
    /// Grow a subtree for `indices`, returning its node id.
    fn build(&mut self, indices: &[usize], depth: usize, rng: &mut ChaCha8Rng) -> u32 {
        let (w_ham, w_spam) = class_weights(indices, self.labels, self.weights);
        let node_weight = w_ham + w_spam;
        let node_gini = gini(w_ham, w_spam);

        let depth_exhausted = self.max_depth.is_some_and(|d| depth >= d);
        if node_gini == 0.0 || indices.len() < self.min_samples_split || depth_exhausted {
            return self.push_leaf(w_ham, w_spam);
        }

        let Some((feature, threshold, decrease)) =
            self.best_random_split(indices, node_gini, node_weight, rng)
        else {
            return self.push_leaf(w_ham, w_spam);
        };

        let (left_set, right_set): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| self.rows[i].get(feature) <= threshold);

        self.importances[feature as usize] += decrease;

        let id = self.nodes.len() as u32;
        // Placeholder; patched once both children exist.
        self.nodes.push(TreeNode::Leaf { p_spam: 0.0 });
        let left = self.build(&left_set, depth + 1, rng);
        let right = self.build(&right_set, depth + 1, rng);
        self.nodes[id as usize] = TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn push_leaf(&mut self, w_ham: f64, w_spam: f64) -> u32 {
        let total = w_ham + w_spam;
        let p_spam = if total > 0.0 { w_spam / total } else { 0.5 };
        let id = self.nodes.len() as u32;
        self.nodes.push(TreeNode::Leaf { p_spam });
        id
    }

    /// Draw `n_candidates` random features, one uniform threshold each, and
    /// return the split with the largest weighted impurity decrease.
    fn best_random_split(
        &self,
        indices: &[usize],
        node_gini: f64,
        node_weight: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<(u32, f64, f64)> {
        let mut best: Option<(u32, f64, f64)> = None;

        let candidates =
            rand::seq::index::sample(rng, self.n_features as usize, self.n_candidates);
        for feature in candidates.iter().map(|f| f as u32) {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &i in indices {
                let v = self.rows[i].get(feature);
                min = min.min(v);
                max = max.max(v);
            }
            if !(max > min) {
                continue;
            }
            let threshold = rng.gen_range(min..max);

            let mut left_ham = 0.0;
            let mut left_spam = 0.0;
            let mut right_ham = 0.0;
            let mut right_spam = 0.0;
            for &i in indices {
                let w = self.weights[i];
                let goes_left = self.rows[i].get(feature) <= threshold;
                match (goes_left, self.labels[i].is_spam()) {
                    (true, true) => left_spam += w,
                    (true, false) => left_ham += w,
                    (false, true) => right_spam += w,
                    (false, false) => right_ham += w,
                }
            }
            let left_weight = left_ham + left_spam;
            let right_weight = right_ham + right_spam;
            if left_weight <= 0.0 || right_weight <= 0.0 {
                continue;
            }

            let child_gini = (left_weight * gini(left_ham, left_spam)
                + right_weight * gini(right_ham, right_spam))
                / node_weight;
            let decrease = node_weight * (node_gini - child_gini);
            if decrease > 0.0 && best.map_or(true, |(_, _, d)| decrease > d) {
                best = Some((feature, threshold, decrease));
            }
        }
        best
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
