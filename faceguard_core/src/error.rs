//! FaceGuard - Error Types

use std::fmt;

use thiserror::Error;

/// Result type for FaceGuard operations
pub type GuardResult<T> = Result<T, GuardError>;

/// Why an authentication attempt was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Head pose or eye openness outside the accepted range
    InvalidPose,
    /// Nothing resembling a face in the frame
    NoFaceDetected,
    /// Best similarity below the match threshold
    NoMatch,
    /// Matched, but the capture looks like a replay
    LivenessFailed,
    /// More than one face while multi-face alarms are off
    AmbiguousFace,
    /// Backup password rejected (or none set)
    WrongPassword,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AuthFailure::InvalidPose => "invalid pose",
            AuthFailure::NoFaceDetected => "no face detected",
            AuthFailure::NoMatch => "face not recognized",
            AuthFailure::LivenessFailed => "liveness check failed",
            AuthFailure::AmbiguousFace => "multiple faces in frame",
            AuthFailure::WrongPassword => "wrong password",
        };
        f.write_str(text)
    }
}

/// FaceGuard error types
#[derive(Error, Debug)]
pub enum GuardError {
    // ═══════════════════════════════════════════════════════════════
    // DECISION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid candidate: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("Locked out - retry in {remaining_secs}s")]
    LockedOut { remaining_secs: u64 },

    #[error("No face enrolled")]
    NotEnrolled,

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    // ═══════════════════════════════════════════════════════════════
    // VAULT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation already in progress: {0}")]
    Busy(String),

    /// Cleanup failed and plaintext remains at `path`
    #[error("Plaintext left at {path}: {cause}")]
    PlaintextExposed { path: String, cause: String },

    // ═══════════════════════════════════════════════════════════════
    // SERVICE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Gate service stopped")]
    GateStopped,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            GuardError::Crypto(_)
                | GuardError::PlaintextExposed { .. }
                | GuardError::LockedOut { .. }
                | GuardError::Authentication(AuthFailure::LivenessFailed)
        )
    }

    /// Whether this outcome consumes one of the user's attempts
    pub fn counts_as_attempt(&self) -> bool {
        matches!(
            self,
            GuardError::Authentication(
                AuthFailure::InvalidPose
                    | AuthFailure::NoMatch
                    | AuthFailure::LivenessFailed
                    | AuthFailure::WrongPassword
            )
        )
    }

    /// Whether the caller may simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GuardError::Authentication(_)
                | GuardError::Busy(_)
                | GuardError::Persistence(_)
                | GuardError::Io(_)
        )
    }
}

impl From<AuthFailure> for GuardError {
    fn from(failure: AuthFailure) -> Self {
        GuardError::Authentication(failure)
    }
}

impl From<tokio::task::JoinError> for GuardError {
    fn from(e: tokio::task::JoinError) -> Self {
        GuardError::Task(e.to_string())
    }
}

impl From<rusqlite::Error> for GuardError {
    fn from(e: rusqlite::Error) -> Self {
        GuardError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(e: serde_json::Error) -> Self {
        GuardError::Serialization(e.to_string())
    }
}

impl From<faceguard_keystore::KeyStoreError> for GuardError {
    fn from(e: faceguard_keystore::KeyStoreError) -> Self {
        GuardError::KeyStore(e.to_string())
    }
}
