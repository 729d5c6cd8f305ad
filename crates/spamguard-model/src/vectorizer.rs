//! TF-IDF text vectorization.
//!
//! [`TfidfVectorizer::fit`] builds a [`Vocabulary`] from training texts only;
//! [`Vocabulary::transform`] is a pure function of the fitted vocabulary and
//! a text. The fitted vocabulary has no mutation path, so fitting on test or
//! inference inputs is impossible by construction rather than by convention.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use spamguard_core::{Result, SpamGuardError, VectorizerConfig};

/// English stop words excluded from the vocabulary.
///
/// Covers the determiners, pronouns, auxiliaries, and prepositions that
/// dominate short messages without carrying class signal.
const ENGLISH_STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "cannot", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "if", "in", "into", "is", "it", "its", "itself",
    "just", "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on",
    "once", "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over", "own",
    "same", "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "themselves", "then", "there", "these", "they", "this", "those", "through", "to",
    "too", "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

/// Sparse feature vector: `(feature index, weight)` pairs sorted by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    entries: Vec<(u32, f64)>,
}

impl SparseVector {
    /// Build from entries; the caller must supply unique indices.
    #[must_use]
    pub fn from_entries(mut entries: Vec<(u32, f64)>) -> Self {
        entries.sort_unstable_by_key(|&(idx, _)| idx);
        Self { entries }
    }

    /// Weight at `index`, zero when absent.
    #[must_use]
    pub fn get(&self, index: u32) -> f64 {
        match self.entries.binary_search_by_key(&index, |&(i, _)| i) {
            Ok(pos) => self.entries[pos].1,
            Err(_) => 0.0,
        }
    }

    /// Iterate over the non-zero entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of non-zero entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Euclidean norm.
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.entries
            .iter()
            .map(|&(_, w)| w * w)
            .sum::<f64>()
            .sqrt()
    }
}

/// Lowercase a text into word tokens of two or more alphanumeric characters,
/// dropping stop words.
fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !ENGLISH_STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Expand tokens into the configured n-gram terms.
fn terms(tokens: &[String], bigrams: bool) -> Vec<String> {
    let mut out: Vec<String> = tokens.to_vec();
    if bigrams {
        for pair in tokens.windows(2) {
            out.push(format!("{} {}", pair[0], pair[1]));
        }
    }
    out
}

/// One retained vocabulary term.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TermEntry {
    token: String,
    idf: f64,
}

/// Fitted token→index mapping plus inverse-document-frequency statistics.
///
/// Produced once by [`TfidfVectorizer::fit`] on training texts and applied
/// unchanged to test and inference inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    terms: Vec<TermEntry>,
    sublinear_tf: bool,
    bigrams: bool,
    /// Number of training documents the vocabulary was fit on.
    n_documents: usize,
    #[serde(skip)]
    index: std::sync::OnceLock<HashMap<String, u32>>,
}

impl Vocabulary {
    fn build_index(&self) -> &HashMap<String, u32> {
        self.index.get_or_init(|| {
            self.terms
                .iter()
                .enumerate()
                .map(|(i, t)| (t.token.clone(), i as u32))
                .collect()
        })
    }

    /// Vocabulary size (feature dimensionality).
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the vocabulary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Number of training documents used for the fit.
    #[must_use]
    pub fn n_documents(&self) -> usize {
        self.n_documents
    }

    /// Token at a feature index.
    #[must_use]
    pub fn token(&self, index: u32) -> Option<&str> {
        self.terms.get(index as usize).map(|t| t.token.as_str())
    }

    /// Transform a text into an L2-normalized TF-IDF vector.
    ///
    /// Pure function of `(self, text)`: tokens outside the vocabulary
    /// contribute zero and the vocabulary is never updated.
    #[must_use]
    pub fn transform(&self, text: &str) -> SparseVector {
        let index = self.build_index();
        let tokens = tokenize(text);
        let mut counts: HashMap<u32, usize> = HashMap::new();
        for term in terms(&tokens, self.bigrams) {
            if let Some(&idx) = index.get(&term) {
                *counts.entry(idx).or_insert(0) += 1;
            }
        }

        let mut entries: Vec<(u32, f64)> = counts
            .into_iter()
            .map(|(idx, count)| {
                let tf = if self.sublinear_tf {
                    1.0 + (count as f64).ln()
                } else {
                    count as f64
                };
                (idx, tf * self.terms[idx as usize].idf)
            })
            .collect();

        let norm = entries.iter().map(|&(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for entry in &mut entries {
                entry.1 /= norm;
            }
        }
        SparseVector::from_entries(entries)
    }
}

/// TF-IDF vectorizer: configuration plus the fit operation.
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    config: VectorizerConfig,
}

impl TfidfVectorizer {
    /// Create a vectorizer with the given configuration.
    #[must_use]
    pub fn new(config: VectorizerConfig) -> Self {
        Self { config }
    }

    /// Fit a [`Vocabulary`] on training texts only.
    ///
    /// Retains unigram and bigram terms appearing in at least `min_df`
    /// documents and in at most `max_df` (as a fraction) of them, capped at
    /// `max_features` terms by descending document frequency with
    /// lexicographic tie-breaking. The retained terms are indexed in
    /// lexicographic order, so the mapping is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`SpamGuardError::Config`] when `texts` is empty.
    pub fn fit(&self, texts: &[&str]) -> Result<Vocabulary> {
        if texts.is_empty() {
            return Err(SpamGuardError::Config(
                "cannot fit vectorizer on an empty corpus".to_string(),
            ));
        }

        let n_documents = texts.len();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for text in texts {
            let tokens = tokenize(text);
            let mut seen: std::collections::HashSet<String> =
                terms(&tokens, self.config.bigrams).into_iter().collect();
            for term in seen.drain() {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let max_df_count = (self.config.max_df * n_documents as f64).floor() as usize;
        let mut candidates: Vec<(String, usize)> = document_frequency
            .into_iter()
            .filter(|&(_, df)| df >= self.config.min_df && df <= max_df_count.max(1))
            .collect();

        // Highest document frequency first; ties resolved lexicographically
        // so the cap is deterministic.
        candidates.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(self.config.max_features);
        candidates.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let terms = candidates
            .into_iter()
            .map(|(token, df)| TermEntry {
                idf: ((1.0 + n_documents as f64) / (1.0 + df as f64)).ln() + 1.0,
                token,
            })
            .collect();

        Ok(Vocabulary {
            terms,
            sublinear_tf: self.config.sublinear_tf,
            bigrams: self.config.bigrams,
            n_documents,
            index: std::sync::OnceLock::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VectorizerConfig {
        VectorizerConfig {
            max_features: 100,
            min_df: 1,
            max_df: 1.0,
            bigrams: true,
            sublinear_tf: true,
        }
    }

    fn corpus() -> Vec<&'static str> {
        vec![
            "win a free prize now",
            "free prize click here",
            "hello friend lunch tomorrow",
            "lunch tomorrow sounds good",
        ]
    }

    #[test]
    fn tokenize_lowercases_and_drops_stop_words() {
        let tokens = tokenize("Hello, HOW are You doing TODAY?");
        assert_eq!(tokens, vec!["hello", "doing", "today"]);
    }

    #[test]
    fn tokenize_drops_single_characters() {
        let tokens = tokenize("win a prize");
        assert_eq!(tokens, vec!["win", "prize"]);
    }

    #[test]
    fn fit_builds_unigrams_and_bigrams() {
        let vectorizer = TfidfVectorizer::new(small_config());
        let vocab = vectorizer.fit(&corpus()).unwrap();
        let tokens: Vec<&str> = (0..vocab.len() as u32)
            .map(|i| vocab.token(i).unwrap())
            .collect();
        assert!(tokens.contains(&"free"));
        assert!(tokens.contains(&"free prize"));
        assert!(tokens.contains(&"lunch tomorrow"));
    }

    #[test]
    fn fit_respects_min_df() {
        let config = VectorizerConfig {
            min_df: 2,
            ..small_config()
        };
        let vocab = TfidfVectorizer::new(config).fit(&corpus()).unwrap();
        let tokens: Vec<&str> = (0..vocab.len() as u32)
            .map(|i| vocab.token(i).unwrap())
            .collect();
        // "click" appears in one document only.
        assert!(!tokens.contains(&"click"));
        assert!(tokens.contains(&"prize"));
    }

    #[test]
    fn fit_respects_max_features_cap() {
        let config = VectorizerConfig {
            max_features: 3,
            ..small_config()
        };
        let vocab = TfidfVectorizer::new(config).fit(&corpus()).unwrap();
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn fit_on_empty_corpus_fails() {
        let vectorizer = TfidfVectorizer::new(small_config());
        assert!(vectorizer.fit(&[]).is_err());
    }

    #[test]
    fn fit_is_deterministic_and_ignores_test_content() {
        let vectorizer = TfidfVectorizer::new(small_config());
        let train = corpus();
        let vocab_a = vectorizer.fit(&train).unwrap();
        let vocab_b = vectorizer.fit(&train).unwrap();
        let tokens = |v: &Vocabulary| -> Vec<String> {
            (0..v.len() as u32)
                .map(|i| v.token(i).unwrap().to_string())
                .collect()
        };
        // Same train corpus, same vocabulary, regardless of whatever test
        // data exists elsewhere: fit never sees it.
        assert_eq!(tokens(&vocab_a), tokens(&vocab_b));
    }

    #[test]
    fn transform_is_idempotent_and_pure() {
        let vocab = TfidfVectorizer::new(small_config())
            .fit(&corpus())
            .unwrap();
        let a = vocab.transform("free prize for my friend");
        let b = vocab.transform("free prize for my friend");
        assert_eq!(a, b);
    }

    #[test]
    fn transform_unknown_tokens_contribute_zero() {
        let vocab = TfidfVectorizer::new(small_config())
            .fit(&corpus())
            .unwrap();
        let v = vocab.transform("entirely novel vocabulary zorbl");
        assert_eq!(v.nnz(), 0);
    }

    #[test]
    fn transform_output_is_l2_normalized() {
        let vocab = TfidfVectorizer::new(small_config())
            .fit(&corpus())
            .unwrap();
        let v = vocab.transform("win a free prize now");
        assert!((v.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sparse_vector_get_returns_zero_for_missing() {
        let v = SparseVector::from_entries(vec![(3, 0.5), (7, 0.25)]);
        assert!((v.get(3) - 0.5).abs() < f64::EPSILON);
        assert!(v.get(4).abs() < f64::EPSILON);
        assert_eq!(v.nnz(), 2);
    }
}
