// ============================================================
// TF-IDF VECTORIZER
// ============================================================
// Character n-grams within word boundaries ("char_wb"): each word is
// padded with spaces before n-gram extraction, so grams never cross
// word edges. Fit on the train split only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::error::{AppError, Result};

/// A sparse feature vector: (feature index, value), indices ascending.
pub type SparseVector = Vec<(usize, f64)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfIdfVectorizer {
    /// n-gram -> feature index.
    vocabulary: HashMap<String, usize>,
    /// Smoothed inverse document frequency per feature.
    idf: Vec<f64>,
    /// Documents seen during fit.
    n_documents: usize,
    ngram_min: usize,
    ngram_max: usize,
}

impl TfIdfVectorizer {
    pub fn fit(documents: &[&str], ngram_min: usize, ngram_max: usize) -> Result<Self> {
        if documents.is_empty() {
            return Err(AppError::ValidationError(
                "Cannot fit vectorizer on zero documents".to_string(),
            ));
        }
        if ngram_min < 1 || ngram_max < ngram_min {
            return Err(AppError::ValidationError(format!(
                "Invalid n-gram range: {ngram_min}..={ngram_max}"
            )));
        }

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let grams = char_wb_ngrams(doc, ngram_min, ngram_max);
            let mut seen: Vec<&String> = grams.keys().collect();
            seen.sort();
            for gram in seen {
                *document_frequency.entry(gram.clone()).or_insert(0) += 1;
                if !vocabulary.contains_key(gram) {
                    let idx = vocabulary.len();
                    vocabulary.insert(gram.clone(), idx);
                }
            }
        }

        let n = documents.len() as f64;
        let mut idf = vec![0.0; vocabulary.len()];
        for (gram, idx) in &vocabulary {
            let df = *document_frequency.get(gram).unwrap_or(&0) as f64;
            // Smoothed IDF, matching the common sklearn formulation.
            idf[*idx] = ((n + 1.0) / (df + 1.0)).ln() + 1.0;
        }

        Ok(Self {
            vocabulary,
            idf,
            n_documents: documents.len(),
            ngram_min,
            ngram_max,
        })
    }

    /// Transform one document into an L2-normalized sparse vector.
    /// Unknown n-grams are dropped.
    pub fn transform(&self, document: &str) -> SparseVector {
        let grams = char_wb_ngrams(document, self.ngram_min, self.ngram_max);

        let mut vector: SparseVector = grams
            .into_iter()
            .filter_map(|(gram, count)| {
                self.vocabulary
                    .get(&gram)
                    .map(|&idx| (idx, count as f64 * self.idf[idx]))
            })
            .collect();
        vector.sort_by_key(|(idx, _)| *idx);

        let norm: f64 = vector.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, v) in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }

    pub fn transform_all(&self, documents: &[&str]) -> Vec<SparseVector> {
        documents.iter().map(|doc| self.transform(doc)).collect()
    }

    pub fn num_features(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn num_documents(&self) -> usize {
        self.n_documents
    }
}

/// Count character n-grams per padded word.
fn char_wb_ngrams(text: &str, ngram_min: usize, ngram_max: usize) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in text.split_whitespace() {
        let padded: Vec<char> = format!(" {} ", word).chars().collect();
        for n in ngram_min..=ngram_max {
            if padded.len() < n {
                continue;
            }
            for window in padded.windows(n) {
                let gram: String = window.iter().collect();
                *counts.entry(gram).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ngrams_stay_within_word_boundaries() {
        let grams = char_wb_ngrams("ab cd", 2, 2);
        assert!(grams.contains_key(" a"));
        assert!(grams.contains_key("b "));
        // No gram spans the space between the two words.
        assert!(!grams.contains_key("bc"));
        assert!(!grams.contains_key("b c"));
    }

    #[test]
    fn test_transform_is_l2_normalized() {
        let docs = ["deep learning", "graph learning", "deep graphs"];
        let vectorizer = TfIdfVectorizer::fit(&docs, 2, 3).unwrap();
        let vector = vectorizer.transform("deep learning");
        assert!(!vector.is_empty());
        let norm: f64 = vector.iter().map(|(_, v)| v * v).sum::<f64>();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_grams_are_dropped() {
        let docs = ["aa bb"];
        let vectorizer = TfIdfVectorizer::fit(&docs, 2, 2).unwrap();
        let vector = vectorizer.transform("zz");
        assert!(vector.is_empty());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let docs = ["natural language processing"];
        let vectorizer = TfIdfVectorizer::fit(&docs, 2, 4).unwrap();
        let json = serde_json::to_string(&vectorizer).unwrap();
        let restored: TfIdfVectorizer = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.num_features(), vectorizer.num_features());
        assert_eq!(
            restored.transform("language"),
            vectorizer.transform("language")
        );
    }
}
