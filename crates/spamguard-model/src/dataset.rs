//! Dataset preparation, loading, deduplication, and stratified splitting.
//!
//! The raw corpus is a tab-separated, headerless, two-column file
//! (`label<TAB>message`) tolerant of 8-bit characters. [`prepare_raw_dataset`]
//! converts it to the processed CSV (`target,message` with a header) that
//! [`load_dataset`] consumes.

use std::collections::HashSet;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use spamguard_core::{Label, MessageRecord, Result, SpamGuardError};
use tracing::info;

/// An ordered collection of labeled messages.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Records in source order.
    pub records: Vec<MessageRecord>,
}

impl Dataset {
    /// Create a dataset from records.
    #[must_use]
    pub fn new(records: Vec<MessageRecord>) -> Self {
        Self { records }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of spam records.
    #[must_use]
    pub fn spam_count(&self) -> usize {
        self.records.iter().filter(|r| r.label.is_spam()).count()
    }

    /// Number of ham records.
    #[must_use]
    pub fn ham_count(&self) -> usize {
        self.len() - self.spam_count()
    }

    /// Collapse rows with identical `text`, keeping the first occurrence.
    ///
    /// Near-duplicates with small character differences are NOT collapsed;
    /// this is a documented limitation of exact deduplication, not a bug.
    #[must_use]
    pub fn dedup_exact(&self) -> Self {
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.records.len());
        let records = self
            .records
            .iter()
            .filter(|r| seen.insert(r.text.as_str()))
            .cloned()
            .collect();
        Self { records }
    }

    /// Borrowed message texts in record order.
    #[must_use]
    pub fn texts(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.text.as_str()).collect()
    }

    /// Labels in record order.
    #[must_use]
    pub fn labels(&self) -> Vec<Label> {
        self.records.iter().map(|r| r.label).collect()
    }
}

/// Convert the raw tab-separated corpus into the processed CSV.
///
/// The raw file has no header and two columns: label string and message
/// text. Bytes that are not valid UTF-8 are replaced rather than rejected,
/// keeping the reader tolerant of 8-bit encodings. Message content is not
/// transformed; only the container format and column naming change.
///
/// # Errors
///
/// Returns [`SpamGuardError::DataNotFound`] if `raw_path` does not exist and
/// [`SpamGuardError::MalformedRow`] for lines without a tab separator.
pub fn prepare_raw_dataset(raw_path: &Path, out_path: &Path) -> Result<usize> {
    if !raw_path.exists() {
        return Err(SpamGuardError::DataNotFound {
            path: raw_path.display().to_string(),
        });
    }

    let bytes = std::fs::read(raw_path)?;
    let contents = String::from_utf8_lossy(&bytes);

    let mut writer = csv::Writer::from_path(out_path)
        .map_err(|e| SpamGuardError::Internal(format!("csv open failed: {e}")))?;
    writer
        .write_record(["target", "message"])
        .map_err(|e| SpamGuardError::Internal(format!("csv write failed: {e}")))?;

    let mut rows = 0usize;
    for (idx, line) in contents.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let (label, message) = line.split_once('\t').ok_or(SpamGuardError::MalformedRow {
            line: idx + 1,
            reason: "missing tab separator".to_string(),
        })?;
        writer
            .write_record([label, message])
            .map_err(|e| SpamGuardError::Internal(format!("csv write failed: {e}")))?;
        rows += 1;
    }
    writer
        .flush()
        .map_err(|e| SpamGuardError::Internal(format!("csv flush failed: {e}")))?;

    info!(rows, out = %out_path.display(), "prepared dataset");
    Ok(rows)
}

/// Load the processed CSV into a [`Dataset`].
///
/// The file must have a header row and at least two columns interpreted as
/// (label, text). Labels are restricted to `ham` / `spam`.
///
/// # Errors
///
/// Returns [`SpamGuardError::DataNotFound`] if the path does not exist and
/// [`SpamGuardError::MalformedRow`] for rows that cannot be parsed or carry
/// an unrecognized label.
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    if !path.exists() {
        return Err(SpamGuardError::DataNotFound {
            path: path.display().to_string(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| SpamGuardError::Internal(format!("csv open failed: {e}")))?;

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        // Header occupies line 1; data rows start at line 2.
        let line = idx + 2;
        let row = row.map_err(|e| SpamGuardError::MalformedRow {
            line,
            reason: e.to_string(),
        })?;
        let label_field = row.get(0).ok_or(SpamGuardError::MalformedRow {
            line,
            reason: "missing label column".to_string(),
        })?;
        let text = row.get(1).ok_or(SpamGuardError::MalformedRow {
            line,
            reason: "missing message column".to_string(),
        })?;
        let label: Label = label_field
            .parse()
            .map_err(|reason| SpamGuardError::MalformedRow { line, reason })?;
        records.push(MessageRecord::new(text, label));
    }

    info!(
        total = records.len(),
        spam = records.iter().filter(|r| r.label.is_spam()).count(),
        path = %path.display(),
        "loaded dataset"
    );
    Ok(Dataset::new(records))
}

/// Perform a stratified train/test split preserving class ratios.
///
/// Each class is shuffled and partitioned independently at `test_fraction`
/// (rounded per class), then unioned. Identical inputs and seed always
/// produce the identical partition.
///
/// # Errors
///
/// Returns [`SpamGuardError::Config`] when `test_fraction` is outside (0, 1).
pub fn stratified_split(
    dataset: &Dataset,
    test_fraction: f64,
    seed: u64,
) -> Result<(Dataset, Dataset)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SpamGuardError::Config(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }

    let mut ham: Vec<usize> = Vec::new();
    let mut spam: Vec<usize> = Vec::new();
    for (i, record) in dataset.records.iter().enumerate() {
        if record.label.is_spam() {
            spam.push(i);
        } else {
            ham.push(i);
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    ham.shuffle(&mut rng);
    spam.shuffle(&mut rng);

    let test_ham = (ham.len() as f64 * test_fraction).round() as usize;
    let test_spam = (spam.len() as f64 * test_fraction).round() as usize;

    let mut test_indices: Vec<usize> = ham[..test_ham]
        .iter()
        .chain(spam[..test_spam].iter())
        .copied()
        .collect();
    let mut train_indices: Vec<usize> = ham[test_ham..]
        .iter()
        .chain(spam[test_spam..].iter())
        .copied()
        .collect();
    // Restore source order so the partition is independent of shuffle
    // internals beyond membership.
    test_indices.sort_unstable();
    train_indices.sort_unstable();

    let gather = |indices: &[usize]| {
        Dataset::new(
            indices
                .iter()
                .map(|&i| dataset.records[i].clone())
                .collect(),
        )
    };

    info!(
        train = train_indices.len(),
        test = test_indices.len(),
        "stratified split"
    );
    Ok((gather(&train_indices), gather(&test_indices)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn sample_dataset() -> Dataset {
        let mut records = Vec::new();
        for i in 0..80 {
            records.push(MessageRecord::new(format!("hello friend {i}"), Label::Ham));
        }
        for i in 0..20 {
            records.push(MessageRecord::new(format!("win a prize {i}"), Label::Spam));
        }
        Dataset::new(records)
    }

    #[test]
    fn prepare_converts_tsv_to_csv() {
        let dir = tempdir().unwrap();
        let raw = write_file(
            dir.path(),
            "spam_raw.txt",
            "ham\tHello, how are you?\nspam\tWIN a FREE prize now!!!\n",
        );
        let out = dir.path().join("spam.csv");

        let rows = prepare_raw_dataset(&raw, &out).unwrap();
        assert_eq!(rows, 2);

        let dataset = load_dataset(&out).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records[0].label, Label::Ham);
        assert_eq!(dataset.records[1].label, Label::Spam);
        assert_eq!(dataset.records[0].text, "Hello, how are you?");
    }

    #[test]
    fn prepare_missing_file_is_data_not_found() {
        let dir = tempdir().unwrap();
        let err = prepare_raw_dataset(
            &dir.path().join("nope.txt"),
            &dir.path().join("out.csv"),
        )
        .unwrap_err();
        assert!(matches!(err, SpamGuardError::DataNotFound { .. }));
    }

    #[test]
    fn prepare_rejects_line_without_tab() {
        let dir = tempdir().unwrap();
        let raw = write_file(dir.path(), "bad.txt", "ham\thi\nno separator here\n");
        let err = prepare_raw_dataset(&raw, &dir.path().join("out.csv")).unwrap_err();
        match err {
            SpamGuardError::MalformedRow { line, .. } => assert_eq!(line, 2),
            other => panic!("expected MalformedRow, got {other:?}"),
        }
    }

    #[test]
    fn load_rejects_unrecognized_label() {
        let dir = tempdir().unwrap();
        let csv = write_file(
            dir.path(),
            "spam.csv",
            "target,message\nham,hello\njunk,what is this\n",
        );
        let err = load_dataset(&csv).unwrap_err();
        match err {
            SpamGuardError::MalformedRow { line, reason } => {
                assert_eq!(line, 3);
                assert!(reason.contains("junk"));
            }
            other => panic!("expected MalformedRow, got {other:?}"),
        }
    }

    #[test]
    fn load_missing_file_is_data_not_found() {
        let err = load_dataset(Path::new("/nonexistent/spam.csv")).unwrap_err();
        assert!(matches!(err, SpamGuardError::DataNotFound { .. }));
    }

    #[test]
    fn load_handles_commas_inside_quoted_messages() {
        let dir = tempdir().unwrap();
        let csv = write_file(
            dir.path(),
            "spam.csv",
            "target,message\nham,\"Hello, how are you?\"\n",
        );
        let dataset = load_dataset(&csv).unwrap();
        assert_eq!(dataset.records[0].text, "Hello, how are you?");
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let dataset = Dataset::new(vec![
            MessageRecord::new("hello", Label::Ham),
            MessageRecord::new("win now", Label::Spam),
            MessageRecord::new("hello", Label::Spam),
            MessageRecord::new("hello there", Label::Ham),
        ]);
        let unique = dataset.dedup_exact();
        assert_eq!(unique.len(), 3);
        // First occurrence wins, including its label.
        assert_eq!(unique.records[0].label, Label::Ham);
        assert_eq!(unique.records[0].text, "hello");
        // Near-duplicates survive.
        assert_eq!(unique.records[2].text, "hello there");
    }

    #[test]
    fn split_is_deterministic() {
        let dataset = sample_dataset();
        let (train_a, test_a) = stratified_split(&dataset, 0.3, 42).unwrap();
        let (train_b, test_b) = stratified_split(&dataset, 0.3, 42).unwrap();
        assert_eq!(train_a.records, train_b.records);
        assert_eq!(test_a.records, test_b.records);
    }

    #[test]
    fn split_changes_with_seed() {
        let dataset = sample_dataset();
        let (_, test_a) = stratified_split(&dataset, 0.3, 42).unwrap();
        let (_, test_b) = stratified_split(&dataset, 0.3, 43).unwrap();
        assert_ne!(test_a.records, test_b.records);
    }

    #[test]
    fn split_preserves_class_ratio() {
        let dataset = sample_dataset();
        let (train, test) = stratified_split(&dataset, 0.25, 7).unwrap();
        assert_eq!(train.len() + test.len(), dataset.len());
        // 25% of 80 ham = 20, 25% of 20 spam = 5.
        assert_eq!(test.ham_count(), 20);
        assert_eq!(test.spam_count(), 5);
        assert_eq!(train.ham_count(), 60);
        assert_eq!(train.spam_count(), 15);
    }

    #[test]
    fn split_partitions_are_disjoint() {
        let dataset = sample_dataset();
        let (train, test) = stratified_split(&dataset, 0.3, 1).unwrap();
        let train_texts: HashSet<&str> = train.records.iter().map(|r| r.text.as_str()).collect();
        assert!(test
            .records
            .iter()
            .all(|r| !train_texts.contains(r.text.as_str())));
    }

    #[test]
    fn split_rejects_bad_fraction() {
        let dataset = sample_dataset();
        assert!(stratified_split(&dataset, 0.0, 1).is_err());
        assert!(stratified_split(&dataset, 1.0, 1).is_err());
        assert!(stratified_split(&dataset, -0.1, 1).is_err());
    }
}
