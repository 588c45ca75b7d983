//! FaceGuard - Enrollment
//!
//! Collects good captures and, once enough are in, replaces the enrolled
//! set wholesale. Re-enrollment runs the same flow and discards all prior
//! adaptation.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::EnrollmentConfig;
use crate::error::GuardResult;
use crate::liveness::LivenessGate;
use crate::model::{Candidate, FaceTemplate};
use crate::settings::SettingsStore;
use crate::templates::TemplateStore;

/// Why a capture was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureRejection {
    InvalidPose,
    PoorLighting,
}

/// Result of one submitted capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CaptureOutcome {
    Accepted { captured: usize, required: usize },
    Rejected { reason: CaptureRejection, captured: usize, required: usize },
    Completed { templates: usize },
}

/// Drives first-time enrollment and re-enrollment
pub struct EnrollmentController {
    templates: Arc<TemplateStore>,
    settings: Arc<SettingsStore>,
    liveness: LivenessGate,
    config: EnrollmentConfig,
    captured: Mutex<Vec<FaceTemplate>>,
}

impl EnrollmentController {
    pub fn new(
        templates: Arc<TemplateStore>,
        settings: Arc<SettingsStore>,
        liveness: LivenessGate,
        config: EnrollmentConfig,
    ) -> Self {
        Self {
            templates,
            settings,
            liveness,
            config,
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn required(&self) -> usize {
        self.config.required_captures
    }

    /// Captures accepted so far
    pub fn progress(&self) -> usize {
        self.captured.lock().len()
    }

    /// Discard captures collected so far
    pub fn reset(&self) {
        self.captured.lock().clear();
    }

    fn good_lighting(&self, candidate: &Candidate) -> bool {
        let score = candidate.features.lighting_score;
        score >= self.config.min_lighting && score <= self.config.max_lighting
    }

    /// Offer one capture. Completes enrollment on the last required one.
    pub fn submit_capture(&self, candidate: &Candidate) -> GuardResult<CaptureOutcome> {
        candidate.validate()?;

        let mut captured = self.captured.lock();
        let required = self.config.required_captures;

        let rejection = if self.liveness.pre_filter(candidate).is_err() {
            Some(CaptureRejection::InvalidPose)
        } else if !self.good_lighting(candidate) {
            Some(CaptureRejection::PoorLighting)
        } else {
            None
        };

        if let Some(reason) = rejection {
            log::debug!("Enrollment capture rejected: {:?}", reason);
            return Ok(CaptureOutcome::Rejected {
                reason,
                captured: captured.len(),
                required,
            });
        }

        captured.push(FaceTemplate::from_candidate(candidate));
        if captured.len() < required {
            return Ok(CaptureOutcome::Accepted {
                captured: captured.len(),
                required,
            });
        }

        // Keep the captures if persisting fails so the caller can retry
        self.templates.replace_all(captured.clone())?;
        self.settings.update(|s| {
            s.face_enrolled = true;
            s.first_run = false;
        })?;

        let templates = captured.len();
        captured.clear();
        log::info!("Enrollment complete with {} templates", templates);

        Ok(CaptureOutcome::Completed { templates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LivenessConfig;
    use crate::model::fixtures::*;
    use crate::model::Pose3D;
    use crate::store::MemoryStore;

    fn controller() -> (EnrollmentController, Arc<TemplateStore>, Arc<SettingsStore>) {
        let backing: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let templates = Arc::new(TemplateStore::load(backing.clone(), 10).unwrap());
        let settings = Arc::new(SettingsStore::load(backing).unwrap());
        let ctl = EnrollmentController::new(
            Arc::clone(&templates),
            Arc::clone(&settings),
            LivenessGate::new(LivenessConfig::default()),
            EnrollmentConfig::default(),
        );
        (ctl, templates, settings)
    }

    #[test]
    fn test_five_good_captures_complete() {
        let (ctl, templates, settings) = controller();

        for i in 0..4 {
            let outcome = ctl.submit_capture(&candidate(unit(0, 0.0), Pose3D::default(), 0.5)).unwrap();
            assert_eq!(outcome, CaptureOutcome::Accepted { captured: i + 1, required: 5 });
        }
        let done = ctl.submit_capture(&candidate(unit(0, 0.0), Pose3D::default(), 0.5)).unwrap();

        assert_eq!(done, CaptureOutcome::Completed { templates: 5 });
        assert_eq!(templates.count(), 5);
        assert!(settings.get().face_enrolled);
        assert!(!settings.get().first_run);
        assert_eq!(ctl.progress(), 0);
    }

    #[test]
    fn test_bad_captures_rejected() {
        let (ctl, _, _) = controller();

        let dark = ctl.submit_capture(&candidate(unit(0, 0.0), Pose3D::default(), 0.2)).unwrap();
        assert!(matches!(dark, CaptureOutcome::Rejected { reason: CaptureRejection::PoorLighting, .. }));

        let profile = ctl.submit_capture(&candidate(unit(0, 0.0), Pose3D::new(0.0, 50.0, 0.0), 0.5)).unwrap();
        assert!(matches!(profile, CaptureOutcome::Rejected { reason: CaptureRejection::InvalidPose, .. }));

        assert_eq!(ctl.progress(), 0);
    }

    #[test]
    fn test_reenrollment_replaces_store() {
        let (ctl, templates, _) = controller();
        for i in 0..8 {
            templates.add(template(unit(1, i as f32), Pose3D::default(), 0.5)).unwrap();
        }

        for _ in 0..5 {
            ctl.submit_capture(&candidate(unit(0, 0.0), Pose3D::default(), 0.6)).unwrap();
        }

        assert_eq!(templates.count(), 5);
        assert!(templates.all().iter().all(|t| t.features.lighting_score == 0.6));
    }
}
