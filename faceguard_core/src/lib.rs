//! # FaceGuard
//!
//! Biometric gatekeeper: decides, from face feature vectors supplied by an
//! external detector, whether the live user may see protected apps and
//! hidden files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        APP CONTEXT                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ ENROLLMENT   │  │ AUTHENTICATOR│  │ GATE SERVICE   │  │
//! │  │ 5 captures   │  │ match + live │  │ state machine  │  │
//! │  └──────┬───────┘  └──────┬───────┘  └───────┬────────┘  │
//! │         │                 │                  │           │
//! │  ┌──────┴─────────────────┴──────┐  ┌────────┴────────┐  │
//! │  │ TEMPLATE STORE  + LEARNER     │  │ SECURE VAULT    │  │
//! │  │ FIFO, max 10, snapshots       │  │ chunked AES-GCM │  │
//! │  └──────────────┬────────────────┘  └────────┬────────┘  │
//! │                 │                            │           │
//! │  ┌──────────────┴────────────────────────────┴────────┐  │
//! │  │  SECURE STORE (SQLite, XChaCha20-Poly1305 blobs)   │  │
//! │  │  keys from faceguard-keystore                      │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Fail-closed: content is hidden before any authentication prompt
//! - Hidden files encrypted per chunk with AES-256-GCM, per-file HKDF keys
//! - Persisted state sealed with XChaCha20-Poly1305
//! - Lockout counters survive restarts

pub mod apps;
pub mod authenticator;
pub mod config;
pub mod content;
pub mod context;
pub mod crypto;
pub mod enrollment;
pub mod error;
pub mod gate;
pub mod learner;
pub mod liveness;
pub mod matcher;
pub mod model;
pub mod secure_fs;
pub mod service;
pub mod settings;
pub mod store;
pub mod templates;
pub mod vault;

pub use authenticator::{AuthOutcome, Authenticator};
pub use config::{GuardConfig, Settings};
pub use content::{ContentKind, HiddenFile};
pub use context::AppContext;
pub use enrollment::{CaptureOutcome, CaptureRejection, EnrollmentController};
pub use error::{AuthFailure, GuardError, GuardResult};
pub use gate::{AuthMethod, ForegroundSource, GateInput, GateState, GateStatus, ProtectionGate};
pub use learner::{AdaptiveLearner, LearningOutcome};
pub use model::{Candidate, FaceTemplate, FrameObservation};
pub use service::{spawn_gate, spawn_poller, ForegroundProbe, GateHandle, GateObserver};
pub use store::{MemoryStore, SecureStore, SqliteStore};
pub use templates::TemplateStore;
pub use vault::{ContentShield, SecureVault};

/// FaceGuard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
