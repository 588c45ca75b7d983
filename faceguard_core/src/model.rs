//! FaceGuard - Face data model
//!
//! Everything the capture/detection collaborator hands over per frame, and
//! the enrolled records derived from it. The core never sees raw images.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};

/// Face embedding produced by the recognition model (L2-normalized upstream)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(pub Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Dot product, `None` when the lengths differ
    pub fn dot(&self, other: &FeatureVector) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        Some(self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum())
    }

    /// Euclidean norm
    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Head orientation in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose3D {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Pose3D {
    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Largest absolute angle across the three axes
    pub fn max_abs_angle(&self) -> f32 {
        self.pitch.abs().max(self.yaw.abs()).max(self.roll.abs())
    }

    /// Sum of per-axis absolute differences
    pub fn delta(&self, other: &Pose3D) -> f32 {
        (self.pitch - other.pitch).abs() + (self.yaw - other.yaw).abs() + (self.roll - other.roll).abs()
    }

    fn is_finite(&self) -> bool {
        self.pitch.is_finite() && self.yaw.is_finite() && self.roll.is_finite()
    }
}

/// Eye-open probabilities reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeOpenness {
    pub left: f32,
    pub right: f32,
}

impl Default for EyeOpenness {
    fn default() -> Self {
        Self { left: 1.0, right: 1.0 }
    }
}

/// Shape shared by enrolled templates and live candidates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacialFeatures {
    pub embedding: FeatureVector,
    #[serde(default)]
    pub landmarks: Vec<(f32, f32)>,
    pub pose: Pose3D,
    /// 0.0 (dark) ..= 1.0 (overexposed)
    pub lighting_score: f32,
    #[serde(default)]
    pub has_glasses: bool,
    #[serde(default)]
    pub has_beard: bool,
    /// Detector confidence
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// Attribute flags subject to population-wide convergence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceAttribute {
    Beard,
    Glasses,
}

impl FaceAttribute {
    pub const ALL: [FaceAttribute; 2] = [FaceAttribute::Beard, FaceAttribute::Glasses];

    pub fn name(&self) -> &'static str {
        match self {
            FaceAttribute::Beard => "beard",
            FaceAttribute::Glasses => "glasses",
        }
    }
}

impl FacialFeatures {
    pub fn attribute(&self, attr: FaceAttribute) -> bool {
        match attr {
            FaceAttribute::Beard => self.has_beard,
            FaceAttribute::Glasses => self.has_glasses,
        }
    }

    pub fn set_attribute(&mut self, attr: FaceAttribute, value: bool) {
        match attr {
            FaceAttribute::Beard => self.has_beard = value,
            FaceAttribute::Glasses => self.has_glasses = value,
        }
    }
}

/// Live feature record for one authentication or enrollment attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub features: FacialFeatures,
    #[serde(default)]
    pub eyes: EyeOpenness,
}

impl Candidate {
    pub fn new(features: FacialFeatures, eyes: EyeOpenness) -> Self {
        Self { features, eyes }
    }

    /// Reject records no detector could legitimately have produced
    pub fn validate(&self) -> GuardResult<()> {
        let f = &self.features;

        if f.embedding.is_empty() {
            return Err(GuardError::Validation("empty embedding".into()));
        }
        if f.embedding.0.iter().any(|v| !v.is_finite()) {
            return Err(GuardError::Validation("non-finite embedding value".into()));
        }
        if !f.pose.is_finite() {
            return Err(GuardError::Validation("non-finite pose".into()));
        }

        let unit = [
            ("lighting_score", f.lighting_score),
            ("confidence", f.confidence),
            ("left eye", self.eyes.left),
            ("right eye", self.eyes.right),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(GuardError::Validation(format!("{} outside [0, 1]: {}", name, value)));
            }
        }

        Ok(())
    }
}

/// Enrolled reference record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceTemplate {
    #[serde(flatten)]
    pub features: FacialFeatures,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FaceTemplate {
    /// Promote a candidate to a template
    pub fn from_candidate(candidate: &Candidate) -> Self {
        let now = Utc::now();
        Self {
            features: candidate.features.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// What the detector saw in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "faces", rename_all = "snake_case")]
pub enum FrameObservation {
    NoFace,
    MultipleFaces { count: usize },
    Single(Candidate),
}

impl From<Candidate> for FrameObservation {
    fn from(candidate: Candidate) -> Self {
        FrameObservation::Single(candidate)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Unit vector along `axis` of a 4-d space, tilted towards axis+1 by `tilt`
    pub fn unit(axis: usize, tilt: f32) -> FeatureVector {
        let mut v = vec![0.0f32; 4];
        v[axis % 4] = 1.0;
        v[(axis + 1) % 4] = tilt;
        let fv = FeatureVector(v);
        let n = fv.norm();
        FeatureVector(fv.0.into_iter().map(|x| x / n).collect())
    }

    pub fn candidate(embedding: FeatureVector, pose: Pose3D, lighting: f32) -> Candidate {
        Candidate {
            features: FacialFeatures {
                embedding,
                pose,
                lighting_score: lighting,
                ..Default::default()
            },
            eyes: EyeOpenness::default(),
        }
    }

    pub fn template(embedding: FeatureVector, pose: Pose3D, lighting: f32) -> FaceTemplate {
        FaceTemplate::from_candidate(&candidate(embedding, pose, lighting))
    }
}
