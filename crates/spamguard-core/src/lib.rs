//! Core types, traits, and errors for SpamGuard
//!
//! This crate contains foundational types shared across all SpamGuard
//! components: the message/label data model, configuration sections for
//! training and serving, and the common error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Label & message types
// ---------------------------------------------------------------------------

/// Ground-truth class of a message.
///
/// `Ham` is a legitimate message (class 0), `Spam` is an unsolicited one
/// (class 1). The numeric encoding is fixed and shared by the dataset
/// loader, the classifier, and the persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Legitimate message (class 0).
    Ham,
    /// Unsolicited / abusive message (class 1).
    Spam,
}

impl Label {
    /// Numeric class index (0 = ham, 1 = spam).
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Ham => 0,
            Self::Spam => 1,
        }
    }

    /// Construct from a numeric class index.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            Self::Ham
        } else {
            Self::Spam
        }
    }

    /// Whether this is the positive (spam) class.
    #[must_use]
    pub fn is_spam(self) -> bool {
        matches!(self, Self::Spam)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ham => write!(f, "ham"),
            Self::Spam => write!(f, "spam"),
        }
    }
}

impl std::str::FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ham" => Ok(Self::Ham),
            "spam" => Ok(Self::Spam),
            other => Err(format!("unrecognized label: {other:?}")),
        }
    }
}

/// A single labeled message, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Raw message text.
    pub text: String,
    /// Ground-truth label.
    pub label: Label,
}

impl MessageRecord {
    /// Create a new record.
    pub fn new(text: impl Into<String>, label: Label) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// Text vectorization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizerConfig {
    /// Maximum vocabulary size.
    pub max_features: usize,
    /// Minimum document count for a token to be retained.
    pub min_df: usize,
    /// Maximum document-frequency fraction for a token to be retained.
    pub max_df: f64,
    /// Include bigrams in addition to unigrams.
    pub bigrams: bool,
    /// Scale term frequency logarithmically (`1 + ln(tf)`).
    pub sublinear_tf: bool,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            max_features: 3000,
            min_df: 2,
            max_df: 0.95,
            bigrams: true,
            sublinear_tf: true,
        }
    }
}

/// Extremely-randomized-trees classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees in the ensemble.
    pub n_trees: usize,
    /// Maximum tree depth (`None` grows trees until pure).
    pub max_depth: Option<usize>,
    /// Minimum number of samples required to attempt a split.
    pub min_samples_split: usize,
    /// Reweight classes inversely to their frequency.
    pub balanced_class_weight: bool,
    /// Seed for per-tree randomization.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            balanced_class_weight: true,
            seed: 42,
        }
    }
}

/// Cross-validated probability calibration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Number of calibration folds.
    pub folds: usize,
    /// Seed for fold assignment.
    pub seed: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { folds: 5, seed: 42 }
    }
}

/// End-to-end training pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of the dataset held out for testing. Must be in (0, 1).
    pub test_fraction: f64,
    /// Seed for the stratified train/test split.
    pub seed: u64,
    /// Collapse exact duplicate texts before splitting.
    pub dedup: bool,
    /// Number of cross-validation folds for the stability report.
    pub cv_folds: usize,
    /// Decision thresholds reported in the sweep table.
    #[serde(default = "default_sweep_thresholds")]
    pub sweep_thresholds: Vec<f64>,
    /// Number of top-ranked features reported.
    pub top_features: usize,
    /// Vectorizer section.
    #[serde(default)]
    pub vectorizer: VectorizerConfig,
    /// Classifier section.
    #[serde(default)]
    pub forest: ForestConfig,
    /// Calibration section.
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

fn default_sweep_thresholds() -> Vec<f64> {
    vec![0.3, 0.5, 0.7, 0.9]
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.3,
            seed: 42,
            dedup: true,
            cv_folds: 5,
            sweep_thresholds: default_sweep_thresholds(),
            top_features: 15,
            vectorizer: VectorizerConfig::default(),
            forest: ForestConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Validate cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::Config`] when a field is out of range.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(SpamGuardError::Config(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.cv_folds < 2 {
            return Err(SpamGuardError::Config(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if self.calibration.folds < 2 {
            return Err(SpamGuardError::Config(format!(
                "calibration.folds must be at least 2, got {}",
                self.calibration.folds
            )));
        }
        if self.forest.n_trees == 0 {
            return Err(SpamGuardError::Config(
                "forest.n_trees must be positive".to_string(),
            ));
        }
        if self.vectorizer.max_features == 0 {
            return Err(SpamGuardError::Config(
                "vectorizer.max_features must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rate limiting configuration for the serving endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,
    /// Maximum requests per client per window.
    pub max_requests: usize,
    /// Window length in seconds.
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 15,
            window_seconds: 60,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration for the serving endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address and port to bind.
    pub listen_addr: String,
    /// Path of the persisted calibrated pipeline artifact.
    pub artifact_path: String,
    /// Maximum accepted message length in characters.
    pub max_message_chars: usize,
    /// Rate limiting section.
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    /// Logging section.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            artifact_path: "models/spam_pipeline.json".to_string(),
            max_message_chars: 5000,
            rate_limiting: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata record
// ---------------------------------------------------------------------------

/// Scalar metrics captured in the metadata record at save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub fp_rate: f64,
}

/// Write-once record persisted alongside the trained pipeline.
///
/// Carries enough information to audit which pipeline version produced
/// which reported metrics, and to detect schema drift at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Artifact schema version this metadata describes.
    pub schema_version: u32,
    /// Scalar test-set metrics at save time.
    pub metrics: MetadataMetrics,
    /// Confusion matrix counts as `[tn, fp, fn, tp]`.
    pub confusion_matrix: [usize; 4],
    /// Hyperparameters of the saved pipeline.
    pub training: TrainingConfig,
    /// Number of training samples after deduplication and splitting.
    pub training_samples: usize,
    /// Number of held-out test samples.
    pub test_samples: usize,
    /// Unique messages after deduplication.
    pub unique_messages: usize,
    /// When the pipeline was trained.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error taxonomy shared by training and serving.
#[derive(thiserror::Error, Debug)]
pub enum SpamGuardError {
    /// Input dataset file is missing.
    #[error("dataset not found: {path}")]
    DataNotFound {
        /// Path that was probed.
        path: String,
    },

    /// A dataset row could not be parsed or carries an unrecognized label.
    #[error("malformed row at line {line}: {reason}")]
    MalformedRow {
        /// 1-based line number in the source file.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// Inference attempted before training.
    #[error("model used before fit")]
    NotFitted,

    /// Persisted pipeline artifact is missing.
    #[error("artifact not found: {path}")]
    ArtifactNotFound {
        /// Path that was probed.
        path: String,
    },

    /// Persisted artifact predates or postdates the supported schema.
    #[error("artifact schema {found} is incompatible with expected {expected}")]
    ArtifactIncompatible {
        /// Version found in the artifact.
        found: u32,
        /// Version this build supports.
        expected: u32,
    },

    /// Recoverable request validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Client exceeded the request budget for the current window.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Unexpected failure; reported to callers without internals.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `std::result::Result<T, SpamGuardError>`.
pub type Result<T> = std::result::Result<T, SpamGuardError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
