//! Training, evaluation, and artifact layer for SpamGuard
//!
//! This crate implements the reproducible core of the spam classifier:
//! dataset preparation and loading, the stratified train/test split, TF-IDF
//! vectorization, the extremely-randomized-trees ensemble, cross-validated
//! isotonic calibration, the evaluation suite, and the versioned on-disk
//! artifact.
//!
//! # Modules
//!
//! - [`dataset`] — raw file preparation, CSV loading, dedup, stratified split
//! - [`vectorizer`] — TF-IDF vocabulary fitting and sparse transformation
//! - [`forest`] — extra-trees classifier with feature importances
//! - [`calibration`] — isotonic regression and the K-fold calibrated pipeline
//! - [`pipeline`] — vectorizer + classifier composition
//! - [`evaluation`] — confusion matrix, CV, PR curve, sweeps, robustness
//! - [`artifact`] — atomic persistence of the calibrated pipeline + metadata

pub mod artifact;
pub mod calibration;
pub mod dataset;
pub mod evaluation;
pub mod forest;
pub mod pipeline;
pub mod vectorizer;

pub use artifact::{load_artifact, save_artifact, SpamArtifact, ARTIFACT_SCHEMA_VERSION};
pub use calibration::{CalibratedPipeline, IsotonicRegression};
pub use dataset::{load_dataset, prepare_raw_dataset, stratified_split, Dataset};
pub use evaluation::{ConfusionMatrix, EvaluationReport};
pub use forest::ExtraTreesClassifier;
pub use pipeline::SpamPipeline;
pub use vectorizer::{SparseVector, TfidfVectorizer, Vocabulary};
