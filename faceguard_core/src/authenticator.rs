//! FaceGuard - Per-frame authentication pipeline
//!
//! ```text
//! frame ─► validate ─► attribute convergence ─► pose pre-filter
//!       ─► best match (snapshot) ─► threshold ─► anti-replay ─► learner
//! ```
//!
//! One attempt at a time: a frame arriving while another is being
//! evaluated is dropped, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AuthFailure, GuardError, GuardResult};
use crate::learner::{AdaptiveLearner, LearningOutcome};
use crate::liveness::LivenessGate;
use crate::matcher::best_match;
use crate::model::{Candidate, FrameObservation};
use crate::settings::SettingsStore;
use crate::templates::TemplateStore;

/// Successful pipeline outcomes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum AuthOutcome {
    /// Live, matching face
    Accepted {
        score: f32,
        /// `None` if the learner could not persist its update
        learning: Option<LearningOutcome>,
    },
    /// Shoulder-surfing alarm
    MultipleFaces { count: usize },
}

/// Clears the in-flight flag when the attempt ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Face authentication service
pub struct Authenticator {
    templates: Arc<TemplateStore>,
    learner: Arc<AdaptiveLearner>,
    settings: Arc<SettingsStore>,
    liveness: LivenessGate,
    threshold: f32,
    in_flight: AtomicBool,
}

impl Authenticator {
    pub fn new(
        templates: Arc<TemplateStore>,
        learner: Arc<AdaptiveLearner>,
        settings: Arc<SettingsStore>,
        liveness: LivenessGate,
        threshold: f32,
    ) -> Self {
        Self {
            templates,
            learner,
            settings,
            liveness,
            threshold,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Evaluate one frame. `None` means it was dropped because another
    /// attempt is still in flight.
    pub fn try_authenticate(&self, frame: &FrameObservation) -> Option<GuardResult<AuthOutcome>> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            log::trace!("Frame dropped, authentication in flight");
            return None;
        };

        Some(self.evaluate(frame))
    }

    /// Whether an attempt is currently being evaluated
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn evaluate(&self, frame: &FrameObservation) -> GuardResult<AuthOutcome> {
        match frame {
            FrameObservation::NoFace => Err(AuthFailure::NoFaceDetected.into()),
            FrameObservation::MultipleFaces { count } => {
                if self.settings.get().multi_face_detection {
                    log::warn!("{} faces in frame", count);
                    Ok(AuthOutcome::MultipleFaces { count: *count })
                } else {
                    Err(AuthFailure::AmbiguousFace.into())
                }
            }
            FrameObservation::Single(candidate) => self.evaluate_single(candidate),
        }
    }

    fn evaluate_single(&self, candidate: &Candidate) -> GuardResult<AuthOutcome> {
        candidate.validate()?;

        if self.templates.is_empty() {
            return Err(GuardError::NotEnrolled);
        }

        if let Err(e) = self.learner.detect_facial_changes(candidate) {
            log::warn!("Attribute convergence skipped: {}", e);
        }

        self.liveness.pre_filter(candidate)?;

        let snapshot = self.templates.snapshot();
        let result = best_match(candidate, &snapshot);
        let matched = match result.template {
            Some(template) if result.is_match(self.threshold) => template,
            _ => {
                log::debug!("No match (best score {:.3})", result.score);
                return Err(AuthFailure::NoMatch.into());
            }
        };

        self.liveness.anti_replay(candidate, matched)?;

        let learning = match self.learner.process_successful_authentication(candidate) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::warn!("Learner update failed: {}", e);
                None
            }
        };

        log::info!("Face accepted (score {:.3})", result.score);
        Ok(AuthOutcome::Accepted {
            score: result.score,
            learning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LivenessConfig, MatchConfig};
    use crate::model::fixtures::*;
    use crate::model::{FaceTemplate, Pose3D};
    use crate::store::MemoryStore;

    struct Fixture {
        auth: Authenticator,
        templates: Arc<TemplateStore>,
        settings: Arc<SettingsStore>,
        backing: Arc<MemoryStore>,
    }

    fn fixture(enrolled: Vec<FaceTemplate>) -> Fixture {
        let backing = Arc::new(MemoryStore::new());
        let templates = Arc::new(TemplateStore::load(backing.clone(), 10).unwrap());
        templates.replace_all(enrolled).unwrap();
        let settings = Arc::new(SettingsStore::load(backing.clone()).unwrap());
        let learner = Arc::new(AdaptiveLearner::new(Arc::clone(&templates), MatchConfig::default(), true));
        let auth = Authenticator::new(
            Arc::clone(&templates),
            learner,
            Arc::clone(&settings),
            LivenessGate::new(LivenessConfig::default()),
            0.85,
        );
        Fixture { auth, templates, settings, backing }
    }

    fn enrolled() -> Vec<FaceTemplate> {
        vec![template(unit(0, 0.0), Pose3D::default(), 0.5)]
    }

    fn run(f: &Fixture, frame: FrameObservation) -> GuardResult<AuthOutcome> {
        f.auth.try_authenticate(&frame).unwrap()
    }

    #[test]
    fn test_live_match_accepted_and_learned() {
        let f = fixture(enrolled());
        let probe = candidate(unit(0, 0.45), Pose3D::new(5.0, 5.0, 0.0), 0.55);

        let outcome = run(&f, probe.into()).unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Accepted { learning: Some(LearningOutcome::Added { .. }), .. }
        ));
        assert_eq!(f.templates.count(), 2);
    }

    #[test]
    fn test_perfect_replay_rejected() {
        let f = fixture(enrolled());
        let replay = candidate(unit(0, 0.0), Pose3D::default(), 0.5);

        let err = run(&f, replay.into()).unwrap_err();
        assert!(matches!(err, GuardError::Authentication(AuthFailure::LivenessFailed)));
        assert_eq!(f.templates.count(), 1);
    }

    #[test]
    fn test_failures() {
        let f = fixture(enrolled());

        let stranger = candidate(unit(2, 0.0), Pose3D::new(5.0, 5.0, 0.0), 0.5);
        assert!(matches!(
            run(&f, stranger.into()),
            Err(GuardError::Authentication(AuthFailure::NoMatch))
        ));

        let profile = candidate(unit(0, 0.0), Pose3D::new(0.0, 40.0, 0.0), 0.5);
        assert!(matches!(
            run(&f, profile.into()),
            Err(GuardError::Authentication(AuthFailure::InvalidPose))
        ));

        assert!(matches!(
            run(&f, FrameObservation::NoFace),
            Err(GuardError::Authentication(AuthFailure::NoFaceDetected))
        ));

        let mut broken = candidate(unit(0, 0.0), Pose3D::default(), 0.5);
        broken.features.confidence = 3.0;
        assert!(matches!(run(&f, broken.into()), Err(GuardError::Validation(_))));
    }

    #[test]
    fn test_not_enrolled() {
        let f = fixture(Vec::new());
        let probe = candidate(unit(0, 0.0), Pose3D::new(5.0, 5.0, 0.0), 0.5);

        assert!(matches!(run(&f, probe.into()), Err(GuardError::NotEnrolled)));
    }

    #[test]
    fn test_multiple_faces_follows_setting() {
        let f = fixture(enrolled());
        let frame = FrameObservation::MultipleFaces { count: 2 };

        assert_eq!(run(&f, frame.clone()).unwrap(), AuthOutcome::MultipleFaces { count: 2 });

        f.settings.update(|s| s.multi_face_detection = false).unwrap();
        assert!(matches!(
            run(&f, frame),
            Err(GuardError::Authentication(AuthFailure::AmbiguousFace))
        ));
    }

    #[test]
    fn test_frame_dropped_while_busy() {
        let f = fixture(enrolled());

        let held = InFlight::acquire(&f.auth.in_flight).unwrap();
        assert!(f.auth.is_busy());
        assert!(f.auth.try_authenticate(&FrameObservation::NoFace).is_none());

        drop(held);
        assert!(f.auth.try_authenticate(&FrameObservation::NoFace).is_some());
        assert!(!f.auth.is_busy());
    }

    #[test]
    fn test_learner_failure_does_not_deny() {
        let f = fixture(enrolled());
        f.backing.set_fail_writes(true);

        let probe = candidate(unit(0, 0.45), Pose3D::new(5.0, 5.0, 0.0), 0.55);
        let outcome = run(&f, probe.into()).unwrap();

        assert!(matches!(outcome, AuthOutcome::Accepted { learning: None, .. }));
        assert_eq!(f.templates.count(), 1);
    }
}
