// ============================================================
// PREPROCESS PIPELINE STAGE
// ============================================================
// Text cleaning, label normalization, label encoding, and the
// train/val/test split.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::error::{AppError, Result};
use crate::domain::params::TrainParams;
use crate::domain::project::{Project, OTHER_TAG};

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").unwrap());
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());

/// Default English stopword list. Can be extended through configuration.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "below", "between", "both", "but", "by", "can", "did",
    "do", "does", "doing", "down", "during", "each", "few", "for", "from", "further", "had",
    "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor", "not", "now",
    "of", "off", "on", "once", "only", "or", "other", "our", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "very",
    "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "you", "your", "yours",
];

/// Normalize one text sample for vectorization.
pub fn clean_text(text: &str, lower: bool, stem: bool, stopwords: &HashSet<String>) -> String {
    let text = if lower { text.to_lowercase() } else { text.to_string() };
    let text = URL_RE.replace_all(&text, " ");
    let text = NON_WORD_RE.replace_all(&text, " ");

    let tokens: Vec<String> = text
        .split_whitespace()
        .filter(|token| !stopwords.contains(&token.to_lowercase()))
        .filter(|token| token.len() > 1)
        .map(|token| if stem { stem_token(token) } else { token.to_string() })
        .collect();

    tokens.join(" ")
}

/// Minimal suffix stemmer. Off by default; kept behind the `stem` param.
fn stem_token(token: &str) -> String {
    for suffix in ["ization", "ational", "fulness", "ousness", "iveness"] {
        if let Some(base) = token.strip_suffix(suffix) {
            if base.len() > 2 {
                return base.to_string();
            }
        }
    }
    for suffix in ["ing", "edly", "ings", "ers", "ies", "ily"] {
        if let Some(base) = token.strip_suffix(suffix) {
            if base.len() > 3 {
                return base.to_string();
            }
        }
    }
    for suffix in ["ed", "er", "ly", "es", "s"] {
        if let Some(base) = token.strip_suffix(suffix) {
            if base.len() > 3 {
                return base.to_string();
            }
        }
    }
    token.to_string()
}

/// Collapse tags outside the accepted list into "other".
pub fn replace_oos_labels(projects: &mut [Project], accepted: &HashSet<String>) {
    for project in projects.iter_mut() {
        if !accepted.contains(&project.tag) {
            project.tag = OTHER_TAG.to_string();
        }
    }
}

/// Collapse tags below the minimum frequency into "other".
pub fn replace_minority_labels(projects: &mut [Project], min_freq: usize) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for project in projects.iter() {
        *counts.entry(project.tag.clone()).or_insert(0) += 1;
    }
    for project in projects.iter_mut() {
        if counts.get(&project.tag).copied().unwrap_or(0) < min_freq {
            project.tag = OTHER_TAG.to_string();
        }
    }
}

/// Bidirectional tag <-> index mapping, persisted with the run artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl LabelEncoder {
    /// Fit over the tags present in the data; "other" is always a class.
    pub fn fit(tags: &[String]) -> Self {
        let mut unique: BTreeMap<String, ()> = BTreeMap::new();
        unique.insert(OTHER_TAG.to_string(), ());
        for tag in tags {
            unique.insert(tag.clone(), ());
        }
        let classes: Vec<String> = unique.into_keys().collect();
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self { classes, index }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn encode(&self, tag: &str) -> Result<usize> {
        self.index
            .get(tag)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Unknown tag: {tag}")))
    }

    pub fn decode(&self, index: usize) -> Result<&str> {
        self.classes
            .get(index)
            .map(|s| s.as_str())
            .ok_or_else(|| AppError::NotFound(format!("Unknown class index: {index}")))
    }

    /// Rebuild the skipped index map after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
    }
}

/// One fully preprocessed sample: cleaned text plus encoded label.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    pub text: String,
    pub label: usize,
}

/// The three splits produced by `prepare_data`.
#[derive(Debug, Clone)]
pub struct DataSplits {
    pub train: Vec<PreparedSample>,
    pub val: Vec<PreparedSample>,
    pub test: Vec<PreparedSample>,
}

/// Run the full preprocessing stage: label normalization, cleaning,
/// encoding, and a deterministic 70/15/15 split.
pub fn prepare_data(
    mut projects: Vec<Project>,
    accepted_tags: &HashSet<String>,
    params: &TrainParams,
    stopwords: &HashSet<String>,
) -> Result<(DataSplits, LabelEncoder)> {
    if projects.is_empty() {
        return Err(AppError::ValidationError(
            "No projects to preprocess".to_string(),
        ));
    }

    replace_oos_labels(&mut projects, accepted_tags);
    replace_minority_labels(&mut projects, params.min_freq);

    if params.shuffle {
        let mut rng = StdRng::seed_from_u64(params.seed);
        projects.shuffle(&mut rng);
    }
    if let Some(subset) = params.subset {
        projects.truncate(subset);
    }

    let tags: Vec<String> = projects.iter().map(|p| p.tag.clone()).collect();
    let encoder = LabelEncoder::fit(&tags);

    let mut samples = Vec::with_capacity(projects.len());
    for project in &projects {
        let text = clean_text(&project.text(), params.lower, params.stem, stopwords);
        let label = encoder.encode(&project.tag)?;
        samples.push(PreparedSample { text, label });
    }

    let n = samples.len();
    let train_end = (n as f64 * 0.7).round() as usize;
    let val_end = train_end + ((n as f64 * 0.15).round() as usize);
    let val_end = val_end.min(n);

    let test = samples.split_off(val_end);
    let val = samples.split_off(train_end.min(samples.len()));
    let train = samples;

    if train.is_empty() || val.is_empty() || test.is_empty() {
        return Err(AppError::ValidationError(format!(
            "Dataset too small to split: {} samples",
            n
        )));
    }

    Ok((DataSplits { train, val, test }, encoder))
}

pub fn stopword_set(extra: &[String]) -> HashSet<String> {
    DEFAULT_STOPWORDS
        .iter()
        .map(|s| s.to_string())
        .chain(extra.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: i64, tag: &str) -> Project {
        Project {
            id,
            created_on: "2020-01-01".to_string(),
            title: format!("Project {id}"),
            description: "A transformer based tagging model".to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn test_clean_text_strips_urls_and_stopwords() {
        let stopwords = stopword_set(&[]);
        let cleaned = clean_text(
            "Check https://example.com for the BEST transformers!",
            true,
            false,
            &stopwords,
        );
        assert_eq!(cleaned, "check best transformers");
    }

    #[test]
    fn test_oos_and_minority_labels_collapse_to_other() {
        let accepted: HashSet<String> = ["nlp".to_string()].into_iter().collect();
        let mut projects = vec![project(1, "nlp"), project(2, "bogus"), project(3, "nlp")];
        replace_oos_labels(&mut projects, &accepted);
        assert_eq!(projects[1].tag, OTHER_TAG);

        replace_minority_labels(&mut projects, 2);
        assert_eq!(projects[0].tag, "nlp");
        assert_eq!(projects[1].tag, OTHER_TAG);
    }

    #[test]
    fn test_label_encoder_roundtrip_and_other_always_present() {
        let encoder = LabelEncoder::fit(&["nlp".to_string(), "mlops".to_string()]);
        assert!(encoder.classes().contains(&OTHER_TAG.to_string()));
        let idx = encoder.encode("nlp").unwrap();
        assert_eq!(encoder.decode(idx).unwrap(), "nlp");
    }

    #[test]
    fn test_split_is_deterministic_for_seed() {
        let accepted: HashSet<String> = ["nlp".to_string()].into_iter().collect();
        let projects: Vec<Project> = (0..40).map(|i| project(i, "nlp")).collect();
        let params = TrainParams {
            min_freq: 1,
            ..TrainParams::default()
        };
        let stopwords = stopword_set(&[]);

        let (a, _) =
            prepare_data(projects.clone(), &accepted, &params, &stopwords).unwrap();
        let (b, _) = prepare_data(projects, &accepted, &params, &stopwords).unwrap();

        assert_eq!(a.train.len(), b.train.len());
        assert_eq!(a.train[0].text, b.train[0].text);
        assert_eq!(a.train.len() + a.val.len() + a.test.len(), 40);
    }
}
