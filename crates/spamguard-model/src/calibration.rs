//! Cross-validated probability calibration.
//!
//! Raw ensemble vote fractions are poorly calibrated, so the training path
//! wraps the pipeline in K-fold isotonic calibration: each fold fits a fresh
//! pipeline on the other folds and learns a monotonic mapping from raw spam
//! score to observed outcome frequency on the held-out fold. Inference
//! averages the K calibrated probabilities.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use spamguard_core::{
    CalibrationConfig, ForestConfig, Label, Result, SpamGuardError, VectorizerConfig,
};
use tracing::info;

use crate::dataset::Dataset;
use crate::pipeline::SpamPipeline;

/// Monotonic step-function mapping from raw score to calibrated probability,
/// fit with the pool-adjacent-violators algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsotonicRegression {
    /// Sorted raw-score breakpoints (ascending).
    breakpoints: Vec<f64>,
    /// Calibrated probability per interval (non-decreasing, in [0, 1]).
    values: Vec<f64>,
}

impl IsotonicRegression {
    /// Fit from raw scores and binary outcomes (1.0 = spam).
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::Config`] on empty or mismatched inputs.
    pub fn fit(scores: &[f64], outcomes: &[f64]) -> Result<Self> {
        if scores.is_empty() || scores.len() != outcomes.len() {
            return Err(SpamGuardError::Config(format!(
                "isotonic fit needs matching non-empty inputs, got {} scores and {} outcomes",
                scores.len(),
                outcomes.len()
            )));
        }

        let mut pairs: Vec<(f64, f64)> = scores
            .iter()
            .copied()
            .zip(outcomes.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Pool adjacent violators: each block is (label sum, count, score).
        let mut blocks: Vec<(f64, usize, f64)> =
            pairs.iter().map(|&(s, y)| (y, 1, s)).collect();
        let mut i = 0;
        while i + 1 < blocks.len() {
            let mean_i = blocks[i].0 / blocks[i].1 as f64;
            let mean_next = blocks[i + 1].0 / blocks[i + 1].1 as f64;
            if mean_i > mean_next {
                blocks[i].0 += blocks[i + 1].0;
                blocks[i].1 += blocks[i + 1].1;
                blocks[i].2 = (blocks[i].2 + blocks[i + 1].2) / 2.0;
                blocks.remove(i + 1);
                i = i.saturating_sub(1);
            } else {
                i += 1;
            }
        }

        Ok(Self {
            breakpoints: blocks.iter().map(|b| b.2).collect(),
            values: blocks
                .iter()
                .map(|b| (b.0 / b.1 as f64).clamp(0.0, 1.0))
                .collect(),
        })
    }

    /// Map a raw score to its calibrated probability.
    ///
    /// Scores below the first breakpoint take the first value; scores at or
    /// above the last take the last. Non-finite input maps to 0.
    #[must_use]
    pub fn calibrate(&self, raw_score: f64) -> f64 {
        if !raw_score.is_finite() || self.breakpoints.is_empty() {
            return 0.0;
        }
        match self
            .breakpoints
            .binary_search_by(|bp| bp.total_cmp(&raw_score))
        {
            Ok(idx) => self.values[idx],
            Err(0) => self.values[0],
            Err(idx) if idx >= self.breakpoints.len() => *self.values.last().unwrap_or(&0.0),
            Err(idx) => self.values[idx - 1],
        }
    }
}

/// One calibration fold: the pipeline fit on the other folds plus the
/// monotonic mapping learned on this fold's held-out scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalibrationFold {
    pipeline: SpamPipeline,
    mapping: IsotonicRegression,
}

/// The production pipeline: K fold pipelines whose calibrated spam
/// probabilities are averaged at inference time.
///
/// Opaque and immutable once fit; persisted as a single unit so vocabulary,
/// trees, and calibration mappings always travel together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedPipeline {
    folds: Vec<CalibrationFold>,
}

impl CalibratedPipeline {
    /// Fit the calibrated pipeline on the training partition.
    ///
    /// Fold assignment is stratified and fixed by `calibration.seed`, so the
    /// same inputs always produce the same calibrated model.
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::Config`] when the training set is too small
    /// to populate every fold with both classes.
    pub fn fit(
        vectorizer: &VectorizerConfig,
        forest: &ForestConfig,
        calibration: &CalibrationConfig,
        train: &Dataset,
    ) -> Result<Self> {
        let assignments = stratified_fold_assignments(train, calibration.folds, calibration.seed)?;

        let mut folds = Vec::with_capacity(calibration.folds);
        for fold in 0..calibration.folds {
            let mut fit_texts: Vec<&str> = Vec::new();
            let mut fit_labels: Vec<Label> = Vec::new();
            let mut held_out: Vec<usize> = Vec::new();
            for (i, record) in train.records.iter().enumerate() {
                if assignments[i] == fold {
                    held_out.push(i);
                } else {
                    fit_texts.push(&record.text);
                    fit_labels.push(record.label);
                }
            }
            if fit_texts.is_empty() || held_out.is_empty() {
                return Err(SpamGuardError::Config(format!(
                    "training set too small for {} calibration folds",
                    calibration.folds
                )));
            }

            let pipeline = SpamPipeline::fit(vectorizer, forest, &fit_texts, &fit_labels)?;
            let mut scores = Vec::with_capacity(held_out.len());
            let mut outcomes = Vec::with_capacity(held_out.len());
            for &i in &held_out {
                scores.push(pipeline.spam_score(&train.records[i].text)?);
                outcomes.push(if train.records[i].label.is_spam() {
                    1.0
                } else {
                    0.0
                });
            }
            let mapping = IsotonicRegression::fit(&scores, &outcomes)?;
            info!(fold, held_out = held_out.len(), "calibration fold fitted");
            folds.push(CalibrationFold { pipeline, mapping });
        }

        Ok(Self { folds })
    }

    /// Calibrated class probabilities `(p_ham, p_spam)`.
    ///
    /// # Errors
    ///
    /// Propagates [`SpamGuardError::NotFitted`] from a fold pipeline.
    pub fn predict_proba(&self, text: &str) -> Result<(f64, f64)> {
        let mut sum = 0.0;
        for fold in &self.folds {
            sum += fold.mapping.calibrate(fold.pipeline.spam_score(text)?);
        }
        let p_spam = (sum / self.folds.len() as f64).clamp(0.0, 1.0);
        Ok((1.0 - p_spam, p_spam))
    }

    /// Calibrated spam probability.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::predict_proba`].
    pub fn spam_score(&self, text: &str) -> Result<f64> {
        Ok(self.predict_proba(text)?.1)
    }

    /// Predicted label at the default 0.5 operating point.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::predict_proba`].
    pub fn predict(&self, text: &str) -> Result<Label> {
        let (p_ham, p_spam) = self.predict_proba(text)?;
        Ok(if p_spam > p_ham {
            Label::Spam
        } else {
            Label::Ham
        })
    }

    /// Number of calibration folds.
    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.folds.len()
    }

    /// Vocabulary size of the largest fold pipeline, for diagnostics.
    #[must_use]
    pub fn vocabulary_size(&self) -> usize {
        self.folds
            .iter()
            .map(|f| f.pipeline.vocabulary().len())
            .max()
            .unwrap_or(0)
    }
}

/// Assign each record to one of `folds` stratified folds.
pub(crate) fn stratified_fold_assignments(
    dataset: &Dataset,
    folds: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    if folds < 2 {
        return Err(SpamGuardError::Config(format!(
            "calibration requires at least 2 folds, got {folds}"
        )));
    }
    if dataset.len() < folds * 2 {
        return Err(SpamGuardError::Config(format!(
            "training set of {} records cannot populate {} folds",
            dataset.len(),
            folds
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut assignments = vec![0usize; dataset.len()];
    for class in [false, true] {
        let mut indices: Vec<usize> = dataset
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.label.is_spam() == class)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(&mut rng);
        for (pos, &i) in indices.iter().enumerate() {
            assignments[i] = pos % folds;
        }
    }
    Ok(assignments)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use spamguard_core::MessageRecord;

    fn training_dataset() -> Dataset {
        let mut records = Vec::new();
        for i in 0..30 {
            records.push(MessageRecord::new(
                format!("WIN a FREE prize now click here {i}"),
                Label::Spam,
            ));
            records.push(MessageRecord::new(
                format!("hello friend lunch tomorrow {i}"),
                Label::Ham,
            ));
        }
        Dataset::new(records)
    }

    fn configs() -> (VectorizerConfig, ForestConfig, CalibrationConfig) {
        (
            VectorizerConfig {
                min_df: 1,
                ..VectorizerConfig::default()
            },
            ForestConfig {
                n_trees: 10,
                ..ForestConfig::default()
            },
            CalibrationConfig { folds: 3, seed: 42 },
        )
    }

    #[test]
    fn isotonic_fit_is_monotonic() {
        let scores = [0.1, 0.2, 0.3, 0.4, 0.6, 0.7, 0.8, 0.9];
        let outcomes = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let iso = IsotonicRegression::fit(&scores, &outcomes).unwrap();

        let mut last = 0.0;
        for step in 0..=20 {
            let p = iso.calibrate(step as f64 / 20.0);
            assert!((0.0..=1.0).contains(&p));
            assert!(p >= last, "calibrated output must be non-decreasing");
            last = p;
        }
    }

    #[test]
    fn isotonic_handles_constant_outcomes() {
        let iso = IsotonicRegression::fit(&[0.2, 0.5, 0.8], &[1.0, 1.0, 1.0]).unwrap();
        assert!((iso.calibrate(0.0) - 1.0).abs() < 1e-9);
        assert!((iso.calibrate(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn isotonic_rejects_empty_input() {
        assert!(IsotonicRegression::fit(&[], &[]).is_err());
        assert!(IsotonicRegression::fit(&[0.5], &[]).is_err());
    }

    #[test]
    fn isotonic_non_finite_scores_map_to_zero() {
        let iso = IsotonicRegression::fit(&[0.2, 0.8], &[0.0, 1.0]).unwrap();
        assert!(iso.calibrate(f64::NAN).abs() < f64::EPSILON);
    }

    #[test]
    fn calibrated_pipeline_separates_classes() {
        let (vec_cfg, forest_cfg, calib_cfg) = configs();
        let pipeline =
            CalibratedPipeline::fit(&vec_cfg, &forest_cfg, &calib_cfg, &training_dataset())
                .unwrap();

        assert_eq!(pipeline.n_folds(), 3);
        assert_eq!(
            pipeline.predict("WIN a FREE prize now!!!").unwrap(),
            Label::Spam
        );
        assert_eq!(pipeline.predict("hello friend").unwrap(), Label::Ham);
    }

    #[test]
    fn calibrated_probabilities_sum_to_one() {
        let (vec_cfg, forest_cfg, calib_cfg) = configs();
        let pipeline =
            CalibratedPipeline::fit(&vec_cfg, &forest_cfg, &calib_cfg, &training_dataset())
                .unwrap();

        for text in ["free prize now", "lunch tomorrow", "unrelated words"] {
            let (p_ham, p_spam) = pipeline.predict_proba(text).unwrap();
            assert!((p_ham + p_spam - 1.0).abs() < 1e-6);
            assert!((0.0..=1.0).contains(&p_spam));
        }
    }

    #[test]
    fn fold_assignment_is_deterministic_and_stratified() {
        let dataset = training_dataset();
        let a = stratified_fold_assignments(&dataset, 3, 42).unwrap();
        let b = stratified_fold_assignments(&dataset, 3, 42).unwrap();
        assert_eq!(a, b);

        // Every fold holds both classes.
        for fold in 0..3 {
            let spam = dataset
                .records
                .iter()
                .zip(&a)
                .filter(|(r, &f)| f == fold && r.label.is_spam())
                .count();
            let ham = dataset
                .records
                .iter()
                .zip(&a)
                .filter(|(r, &f)| f == fold && !r.label.is_spam())
                .count();
            assert!(spam > 0 && ham > 0);
        }
    }

    #[test]
    fn fit_rejects_tiny_training_sets() {
        let (vec_cfg, forest_cfg, calib_cfg) = configs();
        let tiny = Dataset::new(vec![
            MessageRecord::new("free prize", Label::Spam),
            MessageRecord::new("hello there", Label::Ham),
        ]);
        assert!(CalibratedPipeline::fit(&vec_cfg, &forest_cfg, &calib_cfg, &tiny).is_err());
    }
}
