//! FaceGuard - Application context
//!
//! Owns every service. Nothing in the crate is a global; callers construct
//! one `AppContext` and pass it (or the handles it gives out) around.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use faceguard_keystore::secrecy::SecretBox;
use faceguard_keystore::{Argon2Config, KeyProvider, PasswordHash};
use tokio::task::JoinHandle;

use crate::apps::ProtectedApps;
use crate::authenticator::{AuthOutcome, Authenticator};
use crate::config::GuardConfig;
use crate::content::HiddenFile;
use crate::crypto::VaultKey;
use crate::enrollment::{CaptureOutcome, EnrollmentController};
use crate::error::{AuthFailure, GuardResult};
use crate::gate::{AuthMethod, GateRecord, ProtectionGate};
use crate::learner::{AdaptiveLearner, LearnerStatus};
use crate::liveness::LivenessGate;
use crate::model::{Candidate, FrameObservation};
use crate::service::{spawn_gate, GateHandle, GateObserver};
use crate::settings::SettingsStore;
use crate::store::{keys, load_json, save_json, SecureStore};
use crate::templates::TemplateStore;
use crate::vault::{ContentShield, SecureVault};

/// FaceGuard application context
pub struct AppContext {
    config: GuardConfig,
    store: Arc<dyn SecureStore>,
    templates: Arc<TemplateStore>,
    settings: Arc<SettingsStore>,
    learner: Arc<AdaptiveLearner>,
    enrollment: EnrollmentController,
    authenticator: Authenticator,
    apps: Arc<ProtectedApps>,
    vault: Arc<SecureVault>,
    password_kdf: Argon2Config,
}

impl AppContext {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Load every service from `store`; hidden files live under `data_dir`
    pub fn new(
        config: GuardConfig,
        data_dir: &Path,
        store: Arc<dyn SecureStore>,
        keys: &dyn KeyProvider,
    ) -> GuardResult<Self> {
        config.validate()?;

        let templates = Arc::new(TemplateStore::load(Arc::clone(&store), config.matching.max_templates)?);
        let settings = Arc::new(SettingsStore::load(Arc::clone(&store))?);
        let learner = Arc::new(AdaptiveLearner::new(
            Arc::clone(&templates),
            config.matching.clone(),
            settings.get().adaptive_learning,
        ));
        let apps = Arc::new(ProtectedApps::load(Arc::clone(&store))?);

        let vault_key = VaultKey::from_provider(keys, &config.vault.vault_key_id)?;
        let vault = Arc::new(SecureVault::open(
            &data_dir.join(&config.vault.hidden_dir),
            &config.vault,
            Arc::clone(&store),
            vault_key,
        )?);

        let enrollment = EnrollmentController::new(
            Arc::clone(&templates),
            Arc::clone(&settings),
            LivenessGate::new(config.liveness.clone()),
            config.enrollment.clone(),
        );
        let authenticator = Authenticator::new(
            Arc::clone(&templates),
            Arc::clone(&learner),
            Arc::clone(&settings),
            LivenessGate::new(config.liveness.clone()),
            config.matching.match_threshold,
        );

        log::info!(
            "FaceGuard ready: {} templates, {} protected apps, {} protected files",
            templates.count(),
            apps.len(),
            vault.list().len()
        );

        Ok(Self {
            config,
            store,
            templates,
            settings,
            learner,
            enrollment,
            authenticator,
            apps,
            vault,
            password_kdf: Argon2Config::default(),
        })
    }

    /// Argon2 cost used for new backup passwords
    pub fn with_password_kdf(mut self, kdf: Argon2Config) -> Self {
        self.password_kdf = kdf;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn apps(&self) -> &Arc<ProtectedApps> {
        &self.apps
    }

    pub fn vault(&self) -> &Arc<SecureVault> {
        &self.vault
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ENROLLMENT & AUTHENTICATION
    // ═══════════════════════════════════════════════════════════════════════

    pub fn submit_capture(&self, candidate: &Candidate) -> GuardResult<CaptureOutcome> {
        self.enrollment.submit_capture(candidate)
    }

    /// (captured, required)
    pub fn enrollment_progress(&self) -> (usize, usize) {
        (self.enrollment.progress(), self.enrollment.required())
    }

    pub fn reset_enrollment(&self) {
        self.enrollment.reset();
    }

    /// `None` if dropped because another attempt is in flight
    pub fn authenticate(&self, frame: &FrameObservation) -> Option<GuardResult<AuthOutcome>> {
        self.authenticator.try_authenticate(frame)
    }

    /// Authenticate a frame and report the result to the gate
    pub async fn authenticate_for_gate(
        &self,
        gate: &GateHandle,
        frame: &FrameObservation,
    ) -> Option<GuardResult<AuthOutcome>> {
        let result = self.authenticate(frame)?;

        let reported = match &result {
            Ok(AuthOutcome::Accepted { .. }) => gate.auth_succeeded(AuthMethod::Face).await,
            Ok(AuthOutcome::MultipleFaces { .. }) => gate.multiple_faces().await,
            Err(e) if e.counts_as_attempt() => gate.auth_failed(AuthMethod::Face).await,
            Err(_) => Ok(()),
        };
        if let Err(e) = reported {
            log::warn!("Could not report authentication to gate: {}", e);
        }

        Some(result)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BACKUP PASSWORD
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_backup_password(&self, password: &str) -> GuardResult<()> {
        let secret = SecretBox::new(Box::new(password.to_string()));
        let hash = PasswordHash::new(&secret, &self.password_kdf)?;
        save_json(self.store.as_ref(), keys::BACKUP_PASSWORD, &hash)?;
        log::info!("Backup password updated");
        Ok(())
    }

    pub fn has_backup_password(&self) -> GuardResult<bool> {
        Ok(self.store.get(keys::BACKUP_PASSWORD)?.is_some())
    }

    /// No password set counts as a wrong password
    pub fn verify_backup_password(&self, password: &str) -> GuardResult<()> {
        let Some(hash) = load_json::<PasswordHash>(self.store.as_ref(), keys::BACKUP_PASSWORD)? else {
            log::warn!("Backup password attempted but none is set");
            return Err(AuthFailure::WrongPassword.into());
        };

        let secret = SecretBox::new(Box::new(password.to_string()));
        if hash.verify(&secret)? {
            Ok(())
        } else {
            Err(AuthFailure::WrongPassword.into())
        }
    }

    /// Verify a backup password and report the result to the gate
    pub async fn password_for_gate(&self, gate: &GateHandle, password: &str) -> GuardResult<()> {
        let result = self.verify_backup_password(password);
        let method = AuthMethod::Password;
        match &result {
            Ok(()) => gate.auth_succeeded(method).await?,
            Err(e) if e.counts_as_attempt() => gate.auth_failed(method).await?,
            Err(_) => {}
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LEARNING & SETTINGS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_learning_enabled(&self, enabled: bool) -> GuardResult<()> {
        self.settings.update(|s| s.adaptive_learning = enabled)?;
        self.learner.set_learning_enabled(enabled);
        Ok(())
    }

    pub fn clear_learning_data(&self) -> GuardResult<usize> {
        self.learner.clear_learning_data()
    }

    pub fn learner_status(&self) -> LearnerStatus {
        self.learner.status()
    }

    pub fn set_multi_face_detection(&self, enabled: bool) -> GuardResult<()> {
        self.settings.update(|s| s.multi_face_detection = enabled).map(|_| ())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CONTENT
    // ═══════════════════════════════════════════════════════════════════════

    pub fn protect_file(&self, path: &Path) -> GuardResult<HiddenFile> {
        self.vault.protect(path)
    }

    pub fn unprotect_file(&self, id: &str) -> GuardResult<HiddenFile> {
        self.vault.unprotect(id)
    }

    /// Hide one file, or everything when `id` is `None`. Returns the count hidden.
    pub fn hide(&self, id: Option<&str>) -> GuardResult<usize> {
        match id {
            Some(id) => self.vault.hide(id).map(|_| 1),
            None => self.vault.conceal_all(),
        }
    }

    /// Reveal after checking the backup password. Shares the gate's
    /// password budget and lockout, persisted in the gate record.
    pub fn reveal_with_password(&self, id: Option<&str>, password: &str) -> GuardResult<usize> {
        let now = Utc::now();
        let mut record = self.gate_record()?;
        record.ensure_unlocked(now)?;

        let result = self.verify_backup_password(password);
        let counted = match &result {
            Ok(()) => true,
            Err(e) => e.counts_as_attempt(),
        };
        if counted {
            let before = record.clone();
            record.record_attempt(&self.config.gate, AuthMethod::Password, result.is_ok(), now);
            if record != before {
                save_json(self.store.as_ref(), keys::GATE_RECORD, &record)?;
            }
        }
        result?;

        match id {
            Some(id) => self.vault.reveal(id).map(|_| 1),
            None => self.vault.reveal_all(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // GATE
    // ═══════════════════════════════════════════════════════════════════════

    /// Persisted counters and lockout
    pub fn gate_record(&self) -> GuardResult<GateRecord> {
        Ok(load_json(self.store.as_ref(), keys::GATE_RECORD)?.unwrap_or_default())
    }

    /// Start the gate task. Must be called inside a tokio runtime.
    pub fn spawn_gate(&self, observer: Arc<dyn GateObserver>) -> GuardResult<(GateHandle, JoinHandle<()>)> {
        let gate = ProtectionGate::new(self.config.gate.clone(), Arc::clone(&self.apps), self.gate_record()?);
        let shield: Arc<dyn ContentShield> = self.vault.clone();

        Ok(spawn_gate(
            gate,
            shield,
            observer,
            Arc::clone(&self.store),
            self.config.gate.channel_capacity,
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RESET
    // ═══════════════════════════════════════════════════════════════════════

    /// Reveal and forget every protected file, then wipe all persisted state.
    /// Stops at the first failure to reveal so no content is orphaned.
    pub fn reset_all(&self) -> GuardResult<()> {
        log::warn!("Resetting all FaceGuard data");

        for record in self.vault.list() {
            self.vault.unprotect(&record.id)?;
        }

        self.templates.clear()?;
        self.apps.clear()?;
        self.settings.reset()?;
        self.learner.set_learning_enabled(self.settings.get().adaptive_learning);
        self.enrollment.reset();

        for key in keys::ALL {
            self.store.delete(key)?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("templates", &self.templates.count())
            .field("apps", &self.apps.len())
            .field("files", &self.vault.list().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;
    use crate::gate::{ForegroundSource, GateState, GateStatus};
    use crate::model::fixtures::*;
    use crate::model::Pose3D;
    use crate::store::MemoryStore;
    use faceguard_keystore::MemoryKeyStore;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn context() -> (AppContext, TempDir, Arc<MemoryStore>) {
        let dir = tempdir().unwrap();
        let backing = Arc::new(MemoryStore::new());
        let ctx = AppContext::new(GuardConfig::default(), dir.path(), backing.clone(), &MemoryKeyStore::new())
            .unwrap()
            .with_password_kdf(Argon2Config::low_memory());
        (ctx, dir, backing)
    }

    fn enroll(ctx: &AppContext) {
        for _ in 0..5 {
            ctx.submit_capture(&candidate(unit(0, 0.0), Pose3D::default(), 0.5)).unwrap();
        }
    }

    #[test]
    fn test_enroll_then_authenticate() {
        let (ctx, _dir, _) = context();
        assert_eq!(ctx.enrollment_progress(), (0, 5));
        enroll(&ctx);
        assert!(ctx.settings().get().face_enrolled);

        let probe = candidate(unit(0, 0.45), Pose3D::new(5.0, 5.0, 0.0), 0.55);
        let outcome = ctx.authenticate(&probe.into()).unwrap().unwrap();
        assert!(matches!(outcome, AuthOutcome::Accepted { .. }));
    }

    #[test]
    fn test_backup_password() {
        let (ctx, _dir, _) = context();

        // nothing set yet
        assert!(matches!(
            ctx.verify_backup_password("1234"),
            Err(GuardError::Authentication(AuthFailure::WrongPassword))
        ));

        ctx.set_backup_password("correct horse").unwrap();
        assert!(ctx.has_backup_password().unwrap());
        ctx.verify_backup_password("correct horse").unwrap();
        assert!(ctx.verify_backup_password("battery staple").is_err());
    }

    #[test]
    fn test_learning_toggle_persists() {
        let (ctx, _dir, _) = context();
        ctx.set_learning_enabled(false).unwrap();

        assert!(!ctx.learner_status().learning_enabled);
        assert!(!ctx.settings().get().adaptive_learning);
    }

    #[test]
    fn test_reveal_requires_password() {
        let (ctx, dir, _) = context();
        let path = dir.path().join("secret.txt");
        fs::write(&path, b"top secret").unwrap();
        ctx.set_backup_password("letmein").unwrap();

        let record = ctx.protect_file(&path).unwrap();
        assert_eq!(ctx.hide(None).unwrap(), 1);
        assert!(!path.exists());

        assert!(ctx.reveal_with_password(Some(&record.id), "wrong").is_err());
        assert!(!path.exists());

        ctx.reveal_with_password(Some(&record.id), "letmein").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"top secret");
    }

    #[test]
    fn test_password_reveal_locks_out() {
        let (ctx, dir, _) = context();
        let path = dir.path().join("ledger.csv");
        fs::write(&path, b"balances").unwrap();
        ctx.set_backup_password("letmein").unwrap();
        let record = ctx.protect_file(&path).unwrap();
        ctx.hide(None).unwrap();

        for _ in 0..5 {
            assert!(matches!(
                ctx.reveal_with_password(Some(&record.id), "guess"),
                Err(GuardError::Authentication(AuthFailure::WrongPassword))
            ));
        }
        let gate = ctx.gate_record().unwrap();
        assert_eq!(gate.password_failures, 5);
        assert!(gate.locked_until.is_some());

        // the right password is refused until the window elapses
        assert!(matches!(
            ctx.reveal_with_password(Some(&record.id), "letmein"),
            Err(GuardError::LockedOut { .. })
        ));
        assert!(!path.exists());
        assert_eq!(ctx.gate_record().unwrap().password_failures, 5);
    }

    #[test]
    fn test_password_reveal_success_clears_failures() {
        let (ctx, dir, _) = context();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"notes").unwrap();
        ctx.set_backup_password("letmein").unwrap();
        ctx.protect_file(&path).unwrap();
        ctx.hide(None).unwrap();

        assert!(ctx.reveal_with_password(None, "guess").is_err());
        assert_eq!(ctx.gate_record().unwrap().password_failures, 1);

        assert_eq!(ctx.reveal_with_password(None, "letmein").unwrap(), 1);
        assert_eq!(ctx.gate_record().unwrap(), GateRecord::default());
        assert_eq!(fs::read(&path).unwrap(), b"notes");
    }

    #[test]
    fn test_reset_all_reveals_and_wipes() {
        let (ctx, dir, backing) = context();
        enroll(&ctx);
        ctx.apps().add("com.bank").unwrap();
        ctx.set_backup_password("letmein").unwrap();

        let path = dir.path().join("photo.jpg");
        fs::write(&path, b"jpeg").unwrap();
        let record = ctx.protect_file(&path).unwrap();
        ctx.hide(Some(&record.id)).unwrap();

        ctx.reset_all().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"jpeg");
        assert!(ctx.templates().is_empty());
        assert!(ctx.apps().is_empty());
        assert!(ctx.vault().list().is_empty());
        assert!(ctx.settings().get().first_run);
        for key in keys::ALL {
            assert!(!backing.contains(key));
        }
    }

    struct Quiet;

    impl GateObserver for Quiet {
        fn on_status(&self, _status: &GateStatus) {}
    }

    #[tokio::test]
    async fn test_face_and_password_drive_gate() {
        let (ctx, _dir, _) = context();
        enroll(&ctx);
        ctx.apps().add("com.bank").unwrap();
        ctx.set_backup_password("letmein").unwrap();

        let (gate, _task) = ctx.spawn_gate(Arc::new(Quiet)).unwrap();
        gate.foreground("com.bank", ForegroundSource::Event).await.unwrap();

        // a stranger burns one face attempt
        let stranger = candidate(unit(2, 0.0), Pose3D::new(5.0, 5.0, 0.0), 0.5);
        assert!(ctx.authenticate_for_gate(&gate, &stranger.into()).await.unwrap().is_err());
        assert_eq!(gate.status().await.unwrap().face_attempts_left, 2);

        // no face does not
        ctx.authenticate_for_gate(&gate, &FrameObservation::NoFace).await;
        assert_eq!(gate.status().await.unwrap().face_attempts_left, 2);

        ctx.password_for_gate(&gate, "letmein").await.unwrap();
        let status = gate.status().await.unwrap();
        assert_eq!(status.state, GateState::Granted);
        assert_eq!(status.face_attempts_left, 3);
    }
}
