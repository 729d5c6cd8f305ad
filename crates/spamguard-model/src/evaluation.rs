//! Model evaluation: confusion matrix, cross-validation, curves, threshold
//! sweeps, robustness under obfuscation, and feature-importance ranking.
//!
//! Everything here is a pure function of fitted pipelines and datasets.
//! Zero-denominator rates yield 0.0 rather than an error; that sentinel
//! policy is deliberate and shared with the metadata record.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use spamguard_core::{ForestConfig, Label, Result, TrainingConfig, VectorizerConfig};
use tracing::info;

use crate::calibration::{stratified_fold_assignments, CalibratedPipeline};
use crate::dataset::Dataset;
use crate::pipeline::SpamPipeline;

// ---------------------------------------------------------------------------
// Confusion matrix
// ---------------------------------------------------------------------------

/// Confusion-matrix counts for the binary spam/ham problem.
///
/// Class 0 = ham (negative), class 1 = spam (positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Ham classified as ham.
    pub tn: usize,
    /// Ham classified as spam.
    pub fp: usize,
    /// Spam classified as ham.
    pub fn_count: usize,
    /// Spam classified as spam.
    pub tp: usize,
}

impl ConfusionMatrix {
    /// Count outcomes for spam scores thresholded at `threshold`
    /// (`score >= threshold` predicts spam).
    #[must_use]
    pub fn from_scores(scores: &[f64], labels: &[Label], threshold: f64) -> Self {
        let mut cm = Self {
            tn: 0,
            fp: 0,
            fn_count: 0,
            tp: 0,
        };
        for (&score, &label) in scores.iter().zip(labels.iter()) {
            let predicted_spam = score >= threshold;
            match (predicted_spam, label.is_spam()) {
                (true, true) => cm.tp += 1,
                (true, false) => cm.fp += 1,
                (false, false) => cm.tn += 1,
                (false, true) => cm.fn_count += 1,
            }
        }
        cm
    }

    /// Total number of samples counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_count + self.tp
    }

    /// Counts as `[tn, fp, fn, tp]` for the metadata record.
    #[must_use]
    pub fn as_array(&self) -> [usize; 4] {
        [self.tn, self.fp, self.fn_count, self.tp]
    }

    fn ratio(numerator: usize, denominator: usize) -> f64 {
        if denominator == 0 {
            0.0
        } else {
            numerator as f64 / denominator as f64
        }
    }

    /// `(tp + tn) / total`.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        Self::ratio(self.tp + self.tn, self.total())
    }

    /// `tp / (tp + fp)`.
    #[must_use]
    pub fn precision(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fp)
    }

    /// Sensitivity: `tp / (tp + fn)`.
    #[must_use]
    pub fn recall(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fn_count)
    }

    /// `tn / (tn + fp)`.
    #[must_use]
    pub fn specificity(&self) -> f64 {
        Self::ratio(self.tn, self.tn + self.fp)
    }

    /// False-positive rate: `fp / (fp + tn)`.
    #[must_use]
    pub fn fpr(&self) -> f64 {
        Self::ratio(self.fp, self.fp + self.tn)
    }

    /// False-negative rate: `fn / (fn + tp)`.
    #[must_use]
    pub fn fnr(&self) -> f64 {
        Self::ratio(self.fn_count, self.fn_count + self.tp)
    }

    /// `2·tp / (2·tp + fp + fn)`.
    #[must_use]
    pub fn f1(&self) -> f64 {
        Self::ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_count)
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tn={} fp={} fn={} tp={} (acc={:.4} prec={:.4} rec={:.4} f1={:.4})",
            self.tn,
            self.fp,
            self.fn_count,
            self.tp,
            self.accuracy(),
            self.precision(),
            self.recall(),
            self.f1(),
        )
    }
}

// ---------------------------------------------------------------------------
// Rank-based ROC-AUC
// ---------------------------------------------------------------------------

/// Area under the ROC curve via the rank statistic, with tie-averaged ranks.
///
/// Returns 0.0 when either class is absent (sentinel, consistent with the
/// zero-denominator policy).
#[must_use]
pub fn roc_auc(scores: &[f64], labels: &[Label]) -> f64 {
    let positives = labels.iter().filter(|l| l.is_spam()).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0_f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = average_rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(l, _)| l.is_spam())
        .map(|(_, &r)| r)
        .sum();
    let u = positive_rank_sum - (positives * (positives + 1)) as f64 / 2.0;
    u / (positives as f64 * negatives as f64)
}

// ---------------------------------------------------------------------------
// Precision-recall curve
// ---------------------------------------------------------------------------

/// One point on the precision-recall curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrPoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
}

/// Sweep every distinct predicted probability as a threshold, producing one
/// (precision, recall) pair per threshold, highest threshold first.
#[must_use]
pub fn precision_recall_curve(scores: &[f64], labels: &[Label]) -> Vec<PrPoint> {
    let mut thresholds: Vec<f64> = scores.to_vec();
    thresholds.sort_by(|a, b| b.total_cmp(a));
    thresholds.dedup();

    thresholds
        .into_iter()
        .map(|threshold| {
            let cm = ConfusionMatrix::from_scores(scores, labels, threshold);
            PrPoint {
                threshold,
                precision: cm.precision(),
                recall: cm.recall(),
            }
        })
        .collect()
}

/// Trapezoidal area under the precision-recall curve, integrated over
/// recall-sorted points with the (recall 0, precision 1) endpoint included.
#[must_use]
pub fn pr_auc(points: &[PrPoint]) -> f64 {
    let mut sorted: Vec<(f64, f64)> = points.iter().map(|p| (p.recall, p.precision)).collect();
    sorted.push((0.0, 1.0));
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    sorted
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
        .sum()
}

// ---------------------------------------------------------------------------
// Threshold sweep
// ---------------------------------------------------------------------------

/// Metrics at one fixed decision threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub fpr: f64,
}

/// Evaluate a fixed, reproducible set of thresholds.
#[must_use]
pub fn threshold_sweep(scores: &[f64], labels: &[Label], thresholds: &[f64]) -> Vec<ThresholdRow> {
    thresholds
        .iter()
        .map(|&threshold| {
            let cm = ConfusionMatrix::from_scores(scores, labels, threshold);
            ThresholdRow {
                threshold,
                precision: cm.precision(),
                recall: cm.recall(),
                f1: cm.f1(),
                fpr: cm.fpr(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Cross-validation
// ---------------------------------------------------------------------------

/// Mean and population standard deviation of a per-fold metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
}

impl MetricSummary {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { mean: 0.0, std: 0.0 };
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
        Self {
            mean,
            std: variance.sqrt(),
        }
    }
}

impl std::fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4} ± {:.4}", self.mean, self.std)
    }
}

/// K-fold cross-validated stability report over the training partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationSummary {
    pub folds: usize,
    pub accuracy: MetricSummary,
    pub precision: MetricSummary,
    pub recall: MetricSummary,
    pub f1: MetricSummary,
    pub roc_auc: MetricSummary,
}

/// Repeatedly fit the base pipeline on K-1 folds and evaluate on the held-out
/// fold, reporting mean ± std per metric as a stability signal.
///
/// # Errors
///
/// Returns a configuration error when the training set cannot populate the
/// requested folds, and propagates fit failures.
pub fn cross_validate(
    vectorizer: &VectorizerConfig,
    forest: &ForestConfig,
    folds: usize,
    seed: u64,
    train: &Dataset,
) -> Result<CrossValidationSummary> {
    let assignments = stratified_fold_assignments(train, folds, seed)?;

    let mut accuracy = Vec::with_capacity(folds);
    let mut precision = Vec::with_capacity(folds);
    let mut recall = Vec::with_capacity(folds);
    let mut f1 = Vec::with_capacity(folds);
    let mut auc = Vec::with_capacity(folds);

    for fold in 0..folds {
        let mut fit_texts: Vec<&str> = Vec::new();
        let mut fit_labels: Vec<Label> = Vec::new();
        let mut held_scores: Vec<f64> = Vec::new();
        let mut held_labels: Vec<Label> = Vec::new();

        for (i, record) in train.records.iter().enumerate() {
            if assignments[i] != fold {
                fit_texts.push(&record.text);
                fit_labels.push(record.label);
            }
        }
        let pipeline = SpamPipeline::fit(vectorizer, forest, &fit_texts, &fit_labels)?;
        for (i, record) in train.records.iter().enumerate() {
            if assignments[i] == fold {
                held_scores.push(pipeline.spam_score(&record.text)?);
                held_labels.push(record.label);
            }
        }

        let cm = ConfusionMatrix::from_scores(&held_scores, &held_labels, 0.5);
        accuracy.push(cm.accuracy());
        precision.push(cm.precision());
        recall.push(cm.recall());
        f1.push(cm.f1());
        auc.push(roc_auc(&held_scores, &held_labels));
        info!(fold, "cross-validation fold scored");
    }

    Ok(CrossValidationSummary {
        folds,
        accuracy: MetricSummary::from_values(&accuracy),
        precision: MetricSummary::from_values(&precision),
        recall: MetricSummary::from_values(&recall),
        f1: MetricSummary::from_values(&f1),
        roc_auc: MetricSummary::from_values(&auc),
    })
}

// ---------------------------------------------------------------------------
// Robustness under obfuscation
// ---------------------------------------------------------------------------

/// Controlled text perturbations emulating common spam obfuscations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perturbation {
    /// No change; the baseline condition.
    Original,
    /// Leet-style substitution of the first applicable letter class
    /// (o→0, i→1, e→3, a→@).
    Typo,
    /// A space between every character.
    Spaces,
    /// Each character upper- or lower-cased at random.
    Case,
}

impl Perturbation {
    /// All conditions in report order.
    #[must_use]
    pub fn all() -> [Self; 4] {
        [Self::Original, Self::Typo, Self::Spaces, Self::Case]
    }

    /// Condition name used in report rows.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Typo => "typo",
            Self::Spaces => "spaces",
            Self::Case => "case",
        }
    }

    /// Apply the perturbation to a message.
    #[must_use]
    pub fn apply(self, text: &str, rng: &mut ChaCha8Rng) -> String {
        match self {
            Self::Original => text.to_string(),
            Self::Typo => {
                for (from, to) in [('o', '0'), ('i', '1'), ('e', '3'), ('a', '@')] {
                    if text.to_lowercase().contains(from) {
                        return text.replace(from, &to.to_string());
                    }
                }
                text.to_string()
            }
            Self::Spaces => {
                let mut out = String::with_capacity(text.len() * 2);
                for (i, c) in text.chars().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push(c);
                }
                out
            }
            Self::Case => text
                .chars()
                .flat_map(|c| {
                    if rng.gen_bool(0.5) {
                        c.to_uppercase().collect::<Vec<_>>()
                    } else {
                        c.to_lowercase().collect::<Vec<_>>()
                    }
                })
                .collect(),
        }
    }
}

/// Recall on spam test messages under one perturbation condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustnessRow {
    pub condition: String,
    pub recall: f64,
    pub caught: usize,
    pub total: usize,
}

/// Measure spam recall under each obfuscation, using the unperturbed model.
///
/// This quantifies sensitivity to adversarial obfuscation; nothing is
/// retrained.
///
/// # Errors
///
/// Propagates scoring failures from `spam_score`.
pub fn robustness_check<F>(spam_score: F, test: &Dataset, seed: u64) -> Result<Vec<RobustnessRow>>
where
    F: Fn(&str) -> Result<f64>,
{
    let spam_messages: Vec<&str> = test
        .records
        .iter()
        .filter(|r| r.label.is_spam())
        .map(|r| r.text.as_str())
        .collect();

    let mut rows = Vec::new();
    for perturbation in Perturbation::all() {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut caught = 0usize;
        for message in &spam_messages {
            let perturbed = perturbation.apply(message, &mut rng);
            if spam_score(&perturbed)? >= 0.5 {
                caught += 1;
            }
        }
        let total = spam_messages.len();
        rows.push(RobustnessRow {
            condition: perturbation.name().to_string(),
            recall: if total == 0 {
                0.0
            } else {
                caught as f64 / total as f64
            },
            caught,
            total,
        });
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Feature importance
// ---------------------------------------------------------------------------

/// One (token, importance) pair from the ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportanceRow {
    pub token: String,
    pub importance: f64,
}

/// Top-K features of a fitted base pipeline, sorted by descending
/// impurity-decrease importance.
///
/// # Errors
///
/// Returns [`spamguard_core::SpamGuardError::NotFitted`] for an unfitted
/// classifier.
pub fn top_features(pipeline: &SpamPipeline, k: usize) -> Result<Vec<FeatureImportanceRow>> {
    let importances = pipeline.classifier().feature_importances()?;
    let mut indexed: Vec<(u32, f64)> = importances
        .iter()
        .enumerate()
        .map(|(i, &imp)| (i as u32, imp))
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);

    Ok(indexed
        .into_iter()
        .filter_map(|(idx, importance)| {
            pipeline.vocabulary().token(idx).map(|token| FeatureImportanceRow {
                token: token.to_string(),
                importance,
            })
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Full report
// ---------------------------------------------------------------------------

/// Raw vs. calibrated accuracy on the test partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationComparison {
    pub raw_accuracy: f64,
    pub calibrated_accuracy: f64,
}

/// The complete evaluation report produced once per training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Confusion matrix of the calibrated pipeline at threshold 0.5.
    pub confusion: ConfusionMatrix,
    pub specificity: f64,
    pub roc_auc: f64,
    pub pr_auc: f64,
    pub cross_validation: CrossValidationSummary,
    pub threshold_sweep: Vec<ThresholdRow>,
    pub robustness: Vec<RobustnessRow>,
    pub top_features: Vec<FeatureImportanceRow>,
    pub calibration: CalibrationComparison,
}

/// Run the full evaluation suite.
///
/// `base` is the uncalibrated pipeline fit on the whole training partition
/// (used for robustness and feature importances, and the raw side of the
/// calibration comparison); `calibrated` is the production pipeline.
///
/// # Errors
///
/// Propagates scoring and cross-validation failures.
pub fn evaluate(
    base: &SpamPipeline,
    calibrated: &CalibratedPipeline,
    train: &Dataset,
    test: &Dataset,
    config: &TrainingConfig,
) -> Result<EvaluationReport> {
    let mut calibrated_scores = Vec::with_capacity(test.len());
    let mut raw_scores = Vec::with_capacity(test.len());
    for record in &test.records {
        calibrated_scores.push(calibrated.spam_score(&record.text)?);
        raw_scores.push(base.spam_score(&record.text)?);
    }
    let labels = test.labels();

    let confusion = ConfusionMatrix::from_scores(&calibrated_scores, &labels, 0.5);
    let raw_confusion = ConfusionMatrix::from_scores(&raw_scores, &labels, 0.5);
    let pr_points = precision_recall_curve(&calibrated_scores, &labels);

    let cross_validation = cross_validate(
        &config.vectorizer,
        &config.forest,
        config.cv_folds,
        config.seed,
        train,
    )?;

    let robustness = robustness_check(|text| base.spam_score(text), test, config.seed)?;
    let top = top_features(base, config.top_features)?;

    Ok(EvaluationReport {
        confusion,
        specificity: confusion.specificity(),
        roc_auc: roc_auc(&calibrated_scores, &labels),
        pr_auc: pr_auc(&pr_points),
        cross_validation,
        threshold_sweep: threshold_sweep(&calibrated_scores, &labels, &config.sweep_thresholds),
        robustness,
        top_features: top,
        calibration: CalibrationComparison {
            raw_accuracy: raw_confusion.accuracy(),
            calibrated_accuracy: confusion.accuracy(),
        },
    })
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "confusion matrix @0.5: {}", self.confusion)?;
        writeln!(
            f,
            "  specificity={:.4} fpr={:.4} fnr={:.4}",
            self.specificity,
            self.confusion.fpr(),
            self.confusion.fnr(),
        )?;
        writeln!(
            f,
            "roc_auc={:.4} pr_auc={:.4}",
            self.roc_auc, self.pr_auc
        )?;
        writeln!(f, "{}-fold cross-validation:", self.cross_validation.folds)?;
        writeln!(f, "  accuracy : {}", self.cross_validation.accuracy)?;
        writeln!(f, "  precision: {}", self.cross_validation.precision)?;
        writeln!(f, "  recall   : {}", self.cross_validation.recall)?;
        writeln!(f, "  f1       : {}", self.cross_validation.f1)?;
        writeln!(f, "  roc_auc  : {}", self.cross_validation.roc_auc)?;
        writeln!(f, "threshold | precision | recall | f1     | fpr")?;
        for row in &self.threshold_sweep {
            writeln!(
                f,
                "   {:>4.2}   |  {:.4}   | {:.4} | {:.4} | {:.4}",
                row.threshold, row.precision, row.recall, row.f1, row.fpr,
            )?;
        }
        writeln!(f, "robustness (spam recall under obfuscation):")?;
        for row in &self.robustness {
            writeln!(
                f,
                "  {:<10} {:>6.1}% ({}/{})",
                row.condition,
                row.recall * 100.0,
                row.caught,
                row.total,
            )?;
        }
        writeln!(f, "top features:")?;
        for (rank, row) in self.top_features.iter().enumerate() {
            writeln!(
                f,
                "  {:>2}. {:<25} {:.6}",
                rank + 1,
                row.token,
                row.importance,
            )?;
        }
        write!(
            f,
            "calibration: raw accuracy {:.4} vs calibrated {:.4}",
            self.calibration.raw_accuracy, self.calibration.calibrated_accuracy,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
