//! FaceGuard - Configuration and user settings

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};
use crate::secure_fs::atomic_write;

/// Name of the config file inside the data directory
pub const CONFIG_FILE: &str = "faceguard.json";

// ═══════════════════════════════════════════════════════════════════════════
// STATIC CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Matching thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum cosine similarity for a match
    pub match_threshold: f32,
    /// Average similarity at or above which nothing new is learned
    pub learning_ceiling: f32,
    /// Enrolled set capacity
    pub max_templates: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.85,
            learning_ceiling: 0.95,
            max_templates: 10,
        }
    }
}

/// Liveness heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Largest accepted |pitch|, |yaw|, |roll| in degrees
    pub max_abs_angle: f32,
    /// Minimum openness of each eye
    pub min_eye_openness: f32,
    /// Summed pose delta must exceed this (degrees)
    pub min_pose_delta: f32,
    /// ...and stay below this
    pub max_pose_delta: f32,
    pub max_lighting_delta: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            max_abs_angle: 36.0,
            min_eye_openness: 0.5,
            min_pose_delta: 5.0,
            max_pose_delta: 45.0,
            max_lighting_delta: 0.3,
        }
    }
}

/// Enrollment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub required_captures: usize,
    pub min_lighting: f32,
    pub max_lighting: f32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            required_captures: 5,
            min_lighting: 0.4,
            max_lighting: 0.9,
        }
    }
}

/// Protection gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_face_attempts: u32,
    pub max_password_attempts: u32,
    /// Lockout window (seconds)
    pub lockout_secs: u64,
    /// Foreground poll interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Bounded input queue size
    pub channel_capacity: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_face_attempts: 3,
            max_password_attempts: 5,
            lockout_secs: 300, // 5 minutes
            poll_interval_ms: 1000,
            channel_capacity: 32,
        }
    }
}

/// Secure vault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Plaintext bytes per encrypted frame
    pub chunk_size: usize,
    /// Directory (relative to the data dir) holding hidden files
    pub hidden_dir: String,
    /// Key store id of the vault key
    pub vault_key_id: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            hidden_dir: "hidden".into(),
            vault_key_id: "faceguard.vault".into(),
        }
    }
}

/// Top-level configuration, stored as `faceguard.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub matching: MatchConfig,
    pub liveness: LivenessConfig,
    pub enrollment: EnrollmentConfig,
    pub gate: GateConfig,
    pub vault: VaultConfig,
    /// Key store id of the store sealing key
    pub store_key_id: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            matching: MatchConfig::default(),
            liveness: LivenessConfig::default(),
            enrollment: EnrollmentConfig::default(),
            gate: GateConfig::default(),
            vault: VaultConfig::default(),
            store_key_id: "faceguard.store".into(),
        }
    }
}

impl GuardConfig {
    /// Load `faceguard.json` from `dir`, or defaults if it does not exist
    pub fn load_or_default(dir: &Path) -> GuardResult<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = fs::read_to_string(&path)?;
        let config: GuardConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write `faceguard.json` into `dir` (atomic rename)
    pub fn save(&self, dir: &Path) -> GuardResult<()> {
        self.validate()?;

        let json = serde_json::to_vec_pretty(self)?;
        atomic_write(&dir.join(CONFIG_FILE), &json)
    }

    /// Reject values that would make the pipeline meaningless
    pub fn validate(&self) -> GuardResult<()> {
        let m = &self.matching;
        if !(m.match_threshold > 0.0 && m.match_threshold <= 1.0) {
            return Err(invalid("match_threshold must be in (0, 1]"));
        }
        if !(m.learning_ceiling >= m.match_threshold && m.learning_ceiling <= 1.0) {
            return Err(invalid("learning_ceiling must be in [match_threshold, 1]"));
        }
        if m.max_templates == 0 {
            return Err(invalid("max_templates must be positive"));
        }

        let l = &self.liveness;
        if l.min_pose_delta >= l.max_pose_delta {
            return Err(invalid("min_pose_delta must be below max_pose_delta"));
        }
        if l.max_abs_angle <= 0.0 || l.max_lighting_delta <= 0.0 {
            return Err(invalid("liveness limits must be positive"));
        }

        let e = &self.enrollment;
        if e.required_captures == 0 || e.required_captures > m.max_templates {
            return Err(invalid("required_captures must be in 1..=max_templates"));
        }
        if e.min_lighting > e.max_lighting {
            return Err(invalid("min_lighting must not exceed max_lighting"));
        }

        let g = &self.gate;
        if g.max_face_attempts == 0 || g.max_password_attempts == 0 {
            return Err(invalid("attempt limits must be positive"));
        }
        if g.channel_capacity == 0 || g.poll_interval_ms == 0 {
            return Err(invalid("channel_capacity and poll_interval_ms must be positive"));
        }

        if self.vault.chunk_size == 0 {
            return Err(invalid("chunk_size must be positive"));
        }
        if self.vault.hidden_dir.is_empty() || self.store_key_id.is_empty() {
            return Err(invalid("hidden_dir and store_key_id must not be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> GuardError {
    GuardError::Validation(format!("config: {}", msg))
}

// ═══════════════════════════════════════════════════════════════════════════
// USER SETTINGS (persisted in the secure store)
// ═══════════════════════════════════════════════════════════════════════════

/// Runtime toggles the user can flip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub first_run: bool,
    pub face_enrolled: bool,
    pub adaptive_learning: bool,
    pub multi_face_detection: bool,
    pub notification_hiding: bool,
    pub app_thumbnail_hiding: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            first_run: true,
            face_enrolled: false,
            adaptive_learning: true,
            multi_face_detection: true,
            notification_hiding: true,
            app_thumbnail_hiding: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = GuardConfig::default();
        config.validate().unwrap();

        assert_eq!(config.matching.match_threshold, 0.85);
        assert_eq!(config.gate.max_face_attempts, 3);
        assert_eq!(config.vault.chunk_size, 8192);
        assert_eq!(config.store_key_id, "faceguard.store");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = GuardConfig::load_or_default(dir.path()).unwrap();
        config.gate.lockout_secs = 60;
        config.save(dir.path()).unwrap();

        let loaded = GuardConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.gate.lockout_secs, 60);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"vault": {"chunk_size": 4096}}"#).unwrap();

        let config = GuardConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.vault.chunk_size, 4096);
        assert_eq!(config.vault.hidden_dir, "hidden");
        assert_eq!(config.matching.max_templates, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GuardConfig::default();
        config.matching.match_threshold = 1.5;
        assert!(matches!(config.validate(), Err(GuardError::Validation(_))));

        let mut config = GuardConfig::default();
        config.vault.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.liveness.min_pose_delta = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(settings.first_run);
        assert!(!settings.face_enrolled);
        assert!(settings.adaptive_learning);
        assert!(settings.multi_face_detection);
    }
}
