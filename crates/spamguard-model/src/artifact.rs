//! Versioned persistence of the calibrated pipeline and its metadata.
//!
//! The artifact is explicit JSON rather than an opaque language-specific
//! serialization: vocabulary table, per-tree node arrays, and isotonic
//! breakpoints are plain data, inspectable with standard tooling. Writes go
//! to a temporary file in the destination directory followed by a rename, so
//! a concurrent loader never observes a partially-written artifact.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use spamguard_core::{ModelMetadata, Result, SpamGuardError};
use tracing::info;

use crate::calibration::CalibratedPipeline;

/// Schema version this build reads and writes.
///
/// Bump on any incompatible change to the pipeline encoding; loaders reject
/// mismatched artifacts at startup.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 2;

/// The persisted unit: schema version, creation time, and the calibrated
/// pipeline (vocabulary + trees + calibration mappings travel together).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamArtifact {
    /// Schema version of this artifact.
    pub schema_version: u32,
    /// When the pipeline was trained.
    pub created_at: chrono::DateTime<Utc>,
    /// The fitted calibrated pipeline.
    pub pipeline: CalibratedPipeline,
}

impl SpamArtifact {
    /// Wrap a freshly trained pipeline at the current schema version.
    #[must_use]
    pub fn new(pipeline: CalibratedPipeline) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            created_at: Utc::now(),
            pipeline,
        }
    }
}

/// Minimal probe used to read the schema version before full decoding.
#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

/// Write `bytes` to `path` atomically: temp file in the same directory, then
/// rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Persist the artifact atomically.
///
/// # Errors
///
/// Returns I/O or serialization errors from the write path.
pub fn save_artifact(path: &Path, artifact: &SpamArtifact) -> Result<()> {
    let bytes = serde_json::to_vec(artifact)?;
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "artifact saved");
    Ok(())
}

/// Load and validate a persisted artifact.
///
/// # Errors
///
/// Returns [`SpamGuardError::ArtifactNotFound`] when the file is absent and
/// [`SpamGuardError::ArtifactIncompatible`] when the blob is truncated,
/// undecodable, or carries a different schema version.
pub fn load_artifact(path: &Path) -> Result<SpamArtifact> {
    if !path.exists() {
        return Err(SpamGuardError::ArtifactNotFound {
            path: path.display().to_string(),
        });
    }
    let contents = std::fs::read_to_string(path)?;

    let probe: VersionProbe =
        serde_json::from_str(&contents).map_err(|_| SpamGuardError::ArtifactIncompatible {
            found: 0,
            expected: ARTIFACT_SCHEMA_VERSION,
        })?;
    if probe.schema_version != ARTIFACT_SCHEMA_VERSION {
        return Err(SpamGuardError::ArtifactIncompatible {
            found: probe.schema_version,
            expected: ARTIFACT_SCHEMA_VERSION,
        });
    }

    let artifact: SpamArtifact =
        serde_json::from_str(&contents).map_err(|_| SpamGuardError::ArtifactIncompatible {
            found: probe.schema_version,
            expected: ARTIFACT_SCHEMA_VERSION,
        })?;
    info!(
        path = %path.display(),
        folds = artifact.pipeline.n_folds(),
        "artifact loaded"
    );
    Ok(artifact)
}

/// Persist the metadata record atomically alongside the artifact.
///
/// # Errors
///
/// Returns I/O or serialization errors from the write path.
pub fn save_metadata(path: &Path, metadata: &ModelMetadata) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(metadata)?;
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), "metadata saved");
    Ok(())
}

/// Load a metadata record.
///
/// # Errors
///
/// Returns [`SpamGuardError::ArtifactNotFound`] when absent, or a
/// serialization error for undecodable contents.
pub fn load_metadata(path: &Path) -> Result<ModelMetadata> {
    if !path.exists() {
        return Err(SpamGuardError::ArtifactNotFound {
            path: path.display().to_string(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
