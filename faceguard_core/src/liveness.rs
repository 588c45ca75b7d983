//! FaceGuard - Liveness heuristics
//!
//! A plausibility check, not a certified anti-spoofing countermeasure.

use crate::config::LivenessConfig;
use crate::error::AuthFailure;
use crate::model::{Candidate, FaceTemplate};

/// Pose pre-filter and post-match anti-replay check
#[derive(Debug, Clone)]
pub struct LivenessGate {
    config: LivenessConfig,
}

impl LivenessGate {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    /// Reject profile views and closed eyes before any matching
    pub fn pre_filter(&self, candidate: &Candidate) -> Result<(), AuthFailure> {
        if candidate.features.pose.max_abs_angle() > self.config.max_abs_angle {
            return Err(AuthFailure::InvalidPose);
        }

        let eyes = candidate.eyes;
        if eyes.left < self.config.min_eye_openness || eyes.right < self.config.min_eye_openness {
            return Err(AuthFailure::InvalidPose);
        }

        Ok(())
    }

    /// The live pose must differ from the matched template, but not wildly,
    /// and lighting must be comparable
    pub fn anti_replay(&self, candidate: &Candidate, matched: &FaceTemplate) -> Result<(), AuthFailure> {
        let pose_delta = candidate.features.pose.delta(&matched.features.pose);
        let lighting_delta =
            (candidate.features.lighting_score - matched.features.lighting_score).abs();

        let pose_ok = pose_delta > self.config.min_pose_delta && pose_delta < self.config.max_pose_delta;
        let lighting_ok = lighting_delta < self.config.max_lighting_delta;

        if pose_ok && lighting_ok {
            Ok(())
        } else {
            log::debug!(
                "Liveness rejected: pose delta {:.1}, lighting delta {:.2}",
                pose_delta,
                lighting_delta
            );
            Err(AuthFailure::LivenessFailed)
        }
    }
}

impl Default for LivenessGate {
    fn default() -> Self {
        Self::new(LivenessConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::Pose3D;

    #[test]
    fn test_pre_filter_rejects_profile() {
        let gate = LivenessGate::default();
        let probe = candidate(unit(0, 0.0), Pose3D::new(0.0, 40.0, 0.0), 0.5);

        assert_eq!(gate.pre_filter(&probe), Err(AuthFailure::InvalidPose));

        let frontal = candidate(unit(0, 0.0), Pose3D::new(-36.0, 36.0, 10.0), 0.5);
        assert!(gate.pre_filter(&frontal).is_ok());
    }

    #[test]
    fn test_pre_filter_rejects_closed_eye() {
        let gate = LivenessGate::default();
        let mut probe = candidate(unit(0, 0.0), Pose3D::default(), 0.5);
        probe.eyes.right = 0.2;

        assert_eq!(gate.pre_filter(&probe), Err(AuthFailure::InvalidPose));
    }

    #[test]
    fn test_identical_capture_is_replay() {
        let gate = LivenessGate::default();
        let enrolled = template(unit(0, 0.0), Pose3D::default(), 0.5);
        let probe = candidate(unit(0, 0.0), Pose3D::default(), 0.5);

        assert_eq!(gate.anti_replay(&probe, &enrolled), Err(AuthFailure::LivenessFailed));
    }

    #[test]
    fn test_plausible_motion_passes() {
        let gate = LivenessGate::default();
        let enrolled = template(unit(0, 0.0), Pose3D::default(), 0.5);

        let moved = candidate(unit(0, 0.0), Pose3D::new(4.0, 6.0, 2.0), 0.6);
        assert!(gate.anti_replay(&moved, &enrolled).is_ok());

        let too_far = candidate(unit(0, 0.0), Pose3D::new(20.0, 20.0, 10.0), 0.5);
        assert!(gate.anti_replay(&too_far, &enrolled).is_err());

        let relit = candidate(unit(0, 0.0), Pose3D::new(4.0, 6.0, 2.0), 0.85);
        assert!(gate.anti_replay(&relit, &enrolled).is_err());
    }
}
