//! SpamGuard training CLI.
//!
//! `prepare` converts the raw tab-separated corpus into the processed CSV;
//! `train` runs the full pipeline — load, dedup, stratified split, fit,
//! calibrate, evaluate — prints the evaluation report, and persists the
//! calibrated artifact plus its metadata record.
//!
//! Usage:
//!   spamguard-trainer prepare --raw data/spam_raw.txt --out data/spam.csv
//!   spamguard-trainer train --data data/spam.csv --out-dir models

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use spamguard_core::{MetadataMetrics, ModelMetadata, TrainingConfig};
use spamguard_model::evaluation::evaluate;
use spamguard_model::{
    load_dataset, prepare_raw_dataset, save_artifact, stratified_split, CalibratedPipeline,
    SpamArtifact, SpamPipeline, ARTIFACT_SCHEMA_VERSION,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "spamguard-trainer", about = "SpamGuard training pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert the raw tab-separated corpus into the processed CSV.
    Prepare {
        /// Path to the raw file (`label<TAB>message`, no header).
        #[arg(long)]
        raw: PathBuf,
        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,
    },
    /// Train, calibrate, evaluate, and persist the pipeline.
    Train {
        /// Path to the processed CSV dataset.
        #[arg(long)]
        data: PathBuf,
        /// Directory for the artifact and metadata files.
        #[arg(long, default_value = "models")]
        out_dir: PathBuf,
        /// Optional training configuration YAML; defaults apply otherwise.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Command::Prepare { raw, out } => {
            let rows = prepare_raw_dataset(&raw, &out)?;
            println!("Prepared {rows} rows into {}", out.display());
            Ok(())
        }
        Command::Train {
            data,
            out_dir,
            config,
        } => run_training(&data, &out_dir, config.as_deref()),
    }
}

fn load_training_config(path: Option<&Path>) -> anyhow::Result<TrainingConfig> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading training configuration");
            let contents = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse training config YAML: {e}"))?
        }
        None => TrainingConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn run_training(data: &Path, out_dir: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_training_config(config_path)?;

    info!(path = %data.display(), "[1/4] Loading and preparing data");
    let dataset = load_dataset(data)?;
    println!("Total samples: {}", dataset.len());
    println!(
        "Spam: {} | Legitimate: {}",
        dataset.spam_count(),
        dataset.ham_count()
    );

    let unique = if config.dedup {
        let unique = dataset.dedup_exact();
        println!("After removing duplicates: {} unique messages", unique.len());
        unique
    } else {
        dataset
    };

    let (train, test) = stratified_split(&unique, config.test_fraction, config.seed)?;
    println!("Training set: {} | Test set: {}", train.len(), test.len());

    info!("[2/4] Fitting base pipeline");
    let train_texts = train.texts();
    let train_labels = train.labels();
    let base = SpamPipeline::fit(
        &config.vectorizer,
        &config.forest,
        &train_texts,
        &train_labels,
    )?;
    println!(
        "Vocabulary: {} terms | Trees: {}",
        base.vocabulary().len(),
        config.forest.n_trees
    );

    info!("[3/4] Calibrating with {}-fold CV", config.calibration.folds);
    let calibrated = CalibratedPipeline::fit(
        &config.vectorizer,
        &config.forest,
        &config.calibration,
        &train,
    )?;

    info!("[4/4] Evaluating on held-out test set");
    let report = evaluate(&base, &calibrated, &train, &test, &config)?;
    println!("\n{report}\n");

    let artifact = SpamArtifact::new(calibrated);
    let artifact_path = out_dir.join("spam_pipeline.json");
    save_artifact(&artifact_path, &artifact)?;
    println!("Saved pipeline artifact: {}", artifact_path.display());

    let metadata = ModelMetadata {
        schema_version: ARTIFACT_SCHEMA_VERSION,
        metrics: MetadataMetrics {
            accuracy: report.confusion.accuracy(),
            precision: report.confusion.precision(),
            recall: report.confusion.recall(),
            f1_score: report.confusion.f1(),
            fp_rate: report.confusion.fpr(),
        },
        confusion_matrix: report.confusion.as_array(),
        training: config,
        training_samples: train.len(),
        test_samples: test.len(),
        unique_messages: unique.len(),
        created_at: Utc::now(),
    };
    let metadata_path = out_dir.join("metadata.json");
    spamguard_model::artifact::save_metadata(&metadata_path, &metadata)?;
    println!("Saved model metadata: {}", metadata_path.display());

    Ok(())
}
