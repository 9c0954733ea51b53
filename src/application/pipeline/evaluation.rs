// ============================================================
// EVALUATION
// ============================================================
// Weighted overall metrics, per-tag breakdown, and named data slices.

use std::collections::BTreeMap;

use crate::domain::error::{AppError, Result};
use crate::domain::performance::{ClassMetrics, Performance};

use super::preprocess::LabelEncoder;

/// Compute precision/recall/f1 for one class index.
fn class_metrics(y_true: &[usize], y_pred: &[usize], class: usize) -> ClassMetrics {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    let mut support = 0usize;

    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        if t == class {
            support += 1;
            if p == class {
                tp += 1;
            } else {
                fn_ += 1;
            }
        } else if p == class {
            fp += 1;
        }
    }

    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ClassMetrics {
        precision,
        recall,
        f1,
        num_samples: support,
    }
}

/// Support-weighted average of per-class metrics.
fn weighted_overall(per_class: &BTreeMap<String, ClassMetrics>, total: usize) -> ClassMetrics {
    if total == 0 {
        return ClassMetrics::default();
    }
    let mut overall = ClassMetrics {
        num_samples: total,
        ..ClassMetrics::default()
    };
    for metrics in per_class.values() {
        let weight = metrics.num_samples as f64 / total as f64;
        overall.precision += metrics.precision * weight;
        overall.recall += metrics.recall * weight;
        overall.f1 += metrics.f1 * weight;
    }
    overall
}

/// Evaluate predictions against true labels, with a short-text slice.
///
/// `texts` are the cleaned inputs aligned with `y_true`; a sample lands in
/// the `short_text` slice when it has fewer than `short_text_cutoff` tokens.
pub fn evaluate(
    y_true: &[usize],
    y_pred: &[usize],
    texts: &[String],
    encoder: &LabelEncoder,
    short_text_cutoff: usize,
) -> Result<Performance> {
    if y_true.len() != y_pred.len() || y_true.len() != texts.len() {
        return Err(AppError::ValidationError(format!(
            "Mismatched evaluation inputs: {} true, {} pred, {} texts",
            y_true.len(),
            y_pred.len(),
            texts.len()
        )));
    }
    if y_true.is_empty() {
        return Err(AppError::ValidationError(
            "Nothing to evaluate".to_string(),
        ));
    }

    let mut class = BTreeMap::new();
    for (idx, name) in encoder.classes().iter().enumerate() {
        let metrics = class_metrics(y_true, y_pred, idx);
        if metrics.num_samples > 0 {
            class.insert(name.clone(), metrics);
        }
    }
    let overall = weighted_overall(&class, y_true.len());

    let mut slices = BTreeMap::new();
    let short_idx: Vec<usize> = texts
        .iter()
        .enumerate()
        .filter(|(_, text)| text.split_whitespace().count() < short_text_cutoff)
        .map(|(i, _)| i)
        .collect();
    if !short_idx.is_empty() {
        let slice_true: Vec<usize> = short_idx.iter().map(|&i| y_true[i]).collect();
        let slice_pred: Vec<usize> = short_idx.iter().map(|&i| y_pred[i]).collect();
        let mut slice_class = BTreeMap::new();
        for (idx, name) in encoder.classes().iter().enumerate() {
            let metrics = class_metrics(&slice_true, &slice_pred, idx);
            if metrics.num_samples > 0 {
                slice_class.insert(name.clone(), metrics);
            }
        }
        slices.insert(
            "short_text".to_string(),
            weighted_overall(&slice_class, slice_true.len()),
        );
    }

    Ok(Performance {
        overall,
        class,
        slices,
    })
}
