//! FaceGuard - Similarity matching
//!
//! Pure functions over a template snapshot; no state, no I/O.

use crate::model::{Candidate, FaceTemplate, FeatureVector};

/// Cosine similarity. `0.0` for empty, zero-norm or mismatched vectors.
pub fn similarity(a: &FeatureVector, b: &FeatureVector) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let Some(dot) = a.dot(b) else {
        return 0.0;
    };

    let norms = a.norm() * b.norm();
    if norms == 0.0 || !norms.is_finite() {
        return 0.0;
    }

    (dot / norms).clamp(-1.0, 1.0)
}

/// Best-scoring template and its score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult<'a> {
    pub template: Option<&'a FaceTemplate>,
    pub score: f32,
}

impl<'a> MatchResult<'a> {
    pub fn is_match(&self, threshold: f32) -> bool {
        self.template.is_some() && self.score >= threshold
    }
}

/// Compare `candidate` with every template; `(None, 0.0)` for an empty set
pub fn best_match<'a>(candidate: &Candidate, templates: &'a [FaceTemplate]) -> MatchResult<'a> {
    let mut best = MatchResult {
        template: None,
        score: 0.0,
    };

    for template in templates {
        let score = similarity(&candidate.features.embedding, &template.features.embedding);
        if best.template.is_none() || score > best.score {
            best = MatchResult {
                template: Some(template),
                score,
            };
        }
    }

    best
}

/// Scores of every template at or above `threshold`
pub fn scores_above(candidate: &Candidate, templates: &[FaceTemplate], threshold: f32) -> Vec<f32> {
    templates
        .iter()
        .map(|t| similarity(&candidate.features.embedding, &t.features.embedding))
        .filter(|s| *s >= threshold)
        .collect()
}
