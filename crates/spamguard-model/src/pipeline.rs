//! Vectorizer + classifier composition.
//!
//! A [`SpamPipeline`] couples a fitted [`Vocabulary`] with the
//! [`ExtraTreesClassifier`] trained on its output, so the two always travel
//! together. Mismatched vocabulary/classifier pairs cannot be constructed
//! from outside this module.

use serde::{Deserialize, Serialize};
use spamguard_core::{ForestConfig, Label, Result, VectorizerConfig};

use crate::forest::ExtraTreesClassifier;
use crate::vectorizer::{TfidfVectorizer, Vocabulary};

/// A fitted text-to-prediction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamPipeline {
    vocabulary: Vocabulary,
    classifier: ExtraTreesClassifier,
}

impl SpamPipeline {
    /// Fit the vocabulary on `texts` and the classifier on the vectorized
    /// corpus.
    ///
    /// # Errors
    ///
    /// Propagates configuration errors from either stage.
    pub fn fit(
        vectorizer: &VectorizerConfig,
        forest: &ForestConfig,
        texts: &[&str],
        labels: &[Label],
    ) -> Result<Self> {
        let vocabulary = TfidfVectorizer::new(vectorizer.clone()).fit(texts)?;
        let rows: Vec<_> = texts.iter().map(|t| vocabulary.transform(t)).collect();
        let mut classifier = ExtraTreesClassifier::new(forest.clone());
        classifier.fit(&rows, labels, vocabulary.len())?;
        Ok(Self {
            vocabulary,
            classifier,
        })
    }

    /// Class probabilities `(p_ham, p_spam)` for a message.
    ///
    /// # Errors
    ///
    /// Returns [`spamguard_core::SpamGuardError::NotFitted`] if the inner
    /// classifier was restored in an unfitted state.
    pub fn predict_proba(&self, text: &str) -> Result<(f64, f64)> {
        self.classifier
            .predict_proba(&self.vocabulary.transform(text))
    }

    /// Raw spam probability for a message.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::predict_proba`].
    pub fn spam_score(&self, text: &str) -> Result<f64> {
        Ok(self.predict_proba(text)?.1)
    }

    /// Predicted label for a message.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::predict_proba`].
    pub fn predict(&self, text: &str) -> Result<Label> {
        self.classifier.predict(&self.vocabulary.transform(text))
    }

    /// The fitted vocabulary.
    #[must_use]
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// The fitted classifier.
    #[must_use]
    pub fn classifier(&self) -> &ExtraTreesClassifier {
        &self.classifier
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use spamguard_core::Label;

    fn training_texts() -> (Vec<&'static str>, Vec<Label>) {
        let mut texts = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..12 {
            texts.push("WIN a FREE prize now!!! Click here");
            labels.push(Label::Spam);
            texts.push("Hello, how are you?");
            labels.push(Label::Ham);
            texts.push("lunch tomorrow sounds good");
            labels.push(Label::Ham);
            texts.push("free cash prize claim now");
            labels.push(Label::Spam);
        }
        (texts, labels)
    }

    fn quick_forest() -> ForestConfig {
        ForestConfig {
            n_trees: 15,
            seed: 42,
            ..ForestConfig::default()
        }
    }

    #[test]
    fn pipeline_learns_spam_vs_ham() {
        let (texts, labels) = training_texts();
        let pipeline = SpamPipeline::fit(
            &VectorizerConfig {
                min_df: 1,
                ..VectorizerConfig::default()
            },
            &quick_forest(),
            &texts,
            &labels,
        )
        .unwrap();

        assert_eq!(
            pipeline.predict("WIN a FREE prize now!!!").unwrap(),
            Label::Spam
        );
        assert_eq!(
            pipeline.predict("Hello, how are you?").unwrap(),
            Label::Ham
        );
    }

    #[test]
    fn pipeline_probability_invariant() {
        let (texts, labels) = training_texts();
        let pipeline = SpamPipeline::fit(
            &VectorizerConfig {
                min_df: 1,
                ..VectorizerConfig::default()
            },
            &quick_forest(),
            &texts,
            &labels,
        )
        .unwrap();

        for text in ["free prize", "see you at lunch", ""] {
            let (p_ham, p_spam) = pipeline.predict_proba(text).unwrap();
            assert!((p_ham + p_spam - 1.0).abs() < 1e-6);
            assert!((0.0..=1.0).contains(&p_spam));
        }
    }
}
