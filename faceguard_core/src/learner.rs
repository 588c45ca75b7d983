//! FaceGuard - Adaptive learning
//!
//! Absorbs slow natural change (lighting, ageing, occlusion) into the
//! enrolled set one accepted sample at a time, and converges the
//! beard/glasses flags of the whole set when the live face disagrees with
//! a clear majority of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::MatchConfig;
use crate::error::GuardResult;
use crate::matcher::scores_above;
use crate::model::{Candidate, FaceAttribute, FaceTemplate};
use crate::templates::TemplateStore;

/// Above this share of templates with an attribute, a live sample without it is a change
pub const ATTRIBUTE_HIGH_RATIO: f32 = 0.7;

/// Below this share, a live sample with the attribute is a change
pub const ATTRIBUTE_LOW_RATIO: f32 = 0.3;

/// What a successful authentication did to the enrolled set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum LearningOutcome {
    /// Candidate appended (possibly evicting the oldest template)
    Added { avg_similarity: f32, evicted: bool },
    /// Already represented well enough
    AlreadyRepresented { avg_similarity: f32 },
    /// No template cleared the match threshold
    NoSupport,
    /// Learning switched off
    Disabled,
}

/// A population-wide attribute flip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeChange {
    pub attribute: FaceAttribute,
    /// New value written to every template
    pub value: bool,
    /// Share of templates that had the attribute before the flip
    pub previous_ratio: f32,
}

/// Learner status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerStatus {
    pub templates: usize,
    pub capacity: usize,
    pub learning_enabled: bool,
}

/// Adaptive template learner
pub struct AdaptiveLearner {
    templates: Arc<TemplateStore>,
    config: MatchConfig,
    enabled: AtomicBool,
}

impl AdaptiveLearner {
    pub fn new(templates: Arc<TemplateStore>, config: MatchConfig, enabled: bool) -> Self {
        Self {
            templates,
            config,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_learning_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        log::info!("Adaptive learning {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_learning_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TEMPLATE DRIFT
    // ═══════════════════════════════════════════════════════════════════════

    /// Called once per accepted (post-liveness) authentication
    pub fn process_successful_authentication(&self, candidate: &Candidate) -> GuardResult<LearningOutcome> {
        if !self.is_learning_enabled() {
            return Ok(LearningOutcome::Disabled);
        }

        let capacity = self.templates.capacity();
        let mut outcome = LearningOutcome::NoSupport;

        // Score and append under one writer lock
        self.templates.update(|templates| {
            let scores = scores_above(candidate, templates, self.config.match_threshold);
            if scores.is_empty() {
                return false;
            }

            let avg_similarity = scores.iter().sum::<f32>() / scores.len() as f32;
            if avg_similarity >= self.config.learning_ceiling {
                outcome = LearningOutcome::AlreadyRepresented { avg_similarity };
                return false;
            }

            let evicted = templates.len() >= capacity;
            if evicted {
                templates.remove(0);
            }
            templates.push(FaceTemplate::from_candidate(candidate));
            outcome = LearningOutcome::Added { avg_similarity, evicted };
            true
        })?;

        if let LearningOutcome::Added { avg_similarity, .. } = outcome {
            log::info!(
                "Learned new template (avg similarity {:.3}, {} stored)",
                avg_similarity,
                self.templates.count()
            );
        }
        Ok(outcome)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ATTRIBUTE CONVERGENCE (independent of the learning toggle)
    // ═══════════════════════════════════════════════════════════════════════

    /// Runs on every detection. Flips an attribute across the whole set when
    /// the stored population disagrees with the live sample by a wide margin.
    pub fn detect_facial_changes(&self, candidate: &Candidate) -> GuardResult<Vec<AttributeChange>> {
        let mut changes = Vec::new();

        self.templates.update(|templates| {
            if templates.is_empty() {
                return false;
            }

            for attribute in FaceAttribute::ALL {
                let live = candidate.features.attribute(attribute);
                let with = templates
                    .iter()
                    .filter(|t| t.features.attribute(attribute))
                    .count();
                let ratio = with as f32 / templates.len() as f32;

                let changed = (ratio > ATTRIBUTE_HIGH_RATIO && !live) || (ratio < ATTRIBUTE_LOW_RATIO && live);
                if !changed {
                    continue;
                }

                let now = Utc::now();
                for template in templates.iter_mut() {
                    template.features.set_attribute(attribute, live);
                    template.updated_at = now;
                }
                changes.push(AttributeChange {
                    attribute,
                    value: live,
                    previous_ratio: ratio,
                });
            }

            !changes.is_empty()
        })?;

        for change in &changes {
            log::info!(
                "Facial change detected: {} -> {} (was {:.0}%)",
                change.attribute.name(),
                change.value,
                change.previous_ratio * 100.0
            );
        }

        Ok(changes)
    }

    /// Collapse the set to its single oldest template. Returns how many were dropped.
    pub fn clear_learning_data(&self) -> GuardResult<usize> {
        let before = self.templates.count();

        self.templates.update(|templates| {
            if templates.len() <= 1 {
                return false;
            }
            templates.truncate(1);
            true
        })?;

        let removed = before.saturating_sub(self.templates.count());
        log::info!("Cleared learning data ({} templates removed)", removed);
        Ok(removed)
    }

    pub fn status(&self) -> LearnerStatus {
        LearnerStatus {
            templates: self.templates.count(),
            capacity: self.templates.capacity(),
            learning_enabled: self.is_learning_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::Pose3D;
    use crate::store::MemoryStore;

    fn learner_with(templates: Vec<FaceTemplate>) -> (AdaptiveLearner, Arc<TemplateStore>) {
        let store = Arc::new(TemplateStore::load(Arc::new(MemoryStore::new()), 10).unwrap());
        store.replace_all(templates).unwrap();
        let learner = AdaptiveLearner::new(Arc::clone(&store), MatchConfig::default(), true);
        (learner, store)
    }

    #[test]
    fn test_moderate_similarity_adds_one() {
        let (learner, store) = learner_with(vec![template(unit(0, 0.0), Pose3D::default(), 0.5)]);

        // cos = 1 / sqrt(1 + 0.45^2) ~= 0.912
        let probe = candidate(unit(0, 0.45), Pose3D::default(), 0.5);
        let outcome = learner.process_successful_authentication(&probe).unwrap();

        assert!(matches!(outcome, LearningOutcome::Added { evicted: false, .. }));
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_full_set_evicts_oldest() {
        let mut seed = vec![template(unit(0, -0.45), Pose3D::default(), 0.1)];
        seed.extend((0..9).map(|_| template(unit(0, 0.45), Pose3D::default(), 0.5)));
        let (learner, store) = learner_with(seed);

        let probe = candidate(unit(0, 0.0), Pose3D::default(), 0.7);
        let outcome = learner.process_successful_authentication(&probe).unwrap();

        assert!(matches!(outcome, LearningOutcome::Added { evicted: true, .. }));
        let all = store.all();
        assert_eq!(all.len(), 10);
        assert!(all.iter().all(|t| t.features.lighting_score != 0.1));
        assert_eq!(all[9].features.lighting_score, 0.7);
    }

    #[test]
    fn test_concurrent_learning_adds_once() {
        let (learner, store) = learner_with(vec![template(unit(0, 0.0), Pose3D::default(), 0.5)]);
        let learner = Arc::new(learner);

        // once one copy is stored the average is ~0.956, above the ceiling
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let learner = Arc::clone(&learner);
                std::thread::spawn(move || {
                    let probe = candidate(unit(0, 0.45), Pose3D::default(), 0.5);
                    learner.process_successful_authentication(&probe).unwrap()
                })
            })
            .collect();
        let added = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, LearningOutcome::Added { .. }))
            .count();

        assert_eq!(added, 1);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_high_similarity_adds_nothing() {
        let (learner, store) = learner_with(vec![template(unit(0, 0.0), Pose3D::default(), 0.5)]);

        let probe = candidate(unit(0, 0.1), Pose3D::default(), 0.5);
        let outcome = learner.process_successful_authentication(&probe).unwrap();

        assert!(matches!(outcome, LearningOutcome::AlreadyRepresented { .. }));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_disabled_and_unsupported() {
        let (learner, store) = learner_with(vec![template(unit(0, 0.0), Pose3D::default(), 0.5)]);

        let stranger = candidate(unit(2, 0.0), Pose3D::default(), 0.5);
        assert_eq!(
            learner.process_successful_authentication(&stranger).unwrap(),
            LearningOutcome::NoSupport
        );

        learner.set_learning_enabled(false);
        let probe = candidate(unit(0, 0.45), Pose3D::default(), 0.5);
        assert_eq!(
            learner.process_successful_authentication(&probe).unwrap(),
            LearningOutcome::Disabled
        );
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_beard_convergence() {
        let templates = (0..10)
            .map(|i| {
                let mut t = template(unit(0, 0.0), Pose3D::default(), 0.5);
                t.features.has_beard = i < 8;
                t
            })
            .collect();
        let (learner, store) = learner_with(templates);

        let shaved = candidate(unit(0, 0.0), Pose3D::default(), 0.5);
        let changes = learner.detect_facial_changes(&shaved).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].attribute, FaceAttribute::Beard);
        assert!(store.all().iter().all(|t| !t.features.has_beard));
    }

    #[test]
    fn test_convergence_ignores_learning_toggle() {
        let (learner, store) = learner_with(vec![template(unit(0, 0.0), Pose3D::default(), 0.5)]);
        learner.set_learning_enabled(false);

        let mut glasses = candidate(unit(0, 0.0), Pose3D::default(), 0.5);
        glasses.features.has_glasses = true;
        learner.detect_facial_changes(&glasses).unwrap();

        assert!(store.all()[0].features.has_glasses);
    }

    #[test]
    fn test_within_hysteresis_no_change() {
        let templates = (0..10)
            .map(|i| {
                let mut t = template(unit(0, 0.0), Pose3D::default(), 0.5);
                t.features.has_glasses = i < 5;
                t
            })
            .collect();
        let (learner, _) = learner_with(templates);

        let mut probe = candidate(unit(0, 0.0), Pose3D::default(), 0.5);
        probe.features.has_glasses = true;
        assert!(learner.detect_facial_changes(&probe).unwrap().is_empty());
    }

    #[test]
    fn test_clear_keeps_earliest() {
        let first = template(unit(0, 0.0), Pose3D::default(), 0.5);
        let (learner, store) = learner_with(vec![
            first.clone(),
            template(unit(0, 0.2), Pose3D::default(), 0.5),
            template(unit(0, 0.3), Pose3D::default(), 0.5),
        ]);

        assert_eq!(learner.clear_learning_data().unwrap(), 2);
        assert_eq!(store.all(), vec![first]);
    }
}
