//! FaceGuard - Protection gate state machine
//!
//! Pure: every input produces a [`GateStep`] of effects for the caller to
//! run, and wall-clock time is passed in. The serialized task that feeds it
//! lives in [`crate::service`].
//!
//! ```text
//!            protected app            success
//!   Idle ───────────────────► Pending ────────► Granted
//!    ▲                         │  ▲               │
//!    │ other app /             │  │ lockout over  │ failure
//!    │ multiple faces          ▼  │               ▼
//!    └──────────────────────  Denied ◄──── (attempts exhausted)
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::apps::ProtectedApps;
use crate::config::GateConfig;
use crate::error::{GuardError, GuardResult};

/// Gate states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// No protected app in front
    Idle,
    /// Protected app in front, content hidden, waiting for authentication
    Pending,
    /// Authenticated, content visible
    Granted,
    /// Attempts exhausted, locked out
    Denied,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateState::Idle => "idle",
            GateState::Pending => "pending",
            GateState::Granted => "granted",
            GateState::Denied => "denied",
        };
        f.write_str(name)
    }
}

/// Authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Face,
    /// Backup password fallback
    Password,
}

/// Where a foreground report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForegroundSource {
    Event,
    Poll,
}

/// Everything that can drive the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateInput {
    Foreground { app: String, source: ForegroundSource },
    AuthSucceeded(AuthMethod),
    AuthFailed(AuthMethod),
    MultipleFaces,
    Retry,
    Cancel,
    /// Drop a grant without spending an attempt (failed reveal, manual lock)
    Relock,
}

/// Snapshot handed to the UI/notification collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatus {
    pub state: GateState,
    pub app: Option<String>,
    pub face_attempts_left: u32,
    pub password_attempts_left: u32,
    pub lockout_remaining_secs: Option<u64>,
}

/// Side effects, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEffect {
    /// Hide protected content
    Conceal,
    /// Reveal protected content
    Reveal,
    /// Ask the user to authenticate for `app`
    RequestAuthentication(String),
    Notify(GateStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: GateState,
    pub to: GateState,
}

/// Result of one input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateStep {
    pub transition: Option<Transition>,
    pub effects: Vec<GateEffect>,
    /// Counters or lockout changed and must be persisted
    pub record_changed: bool,
}

impl GateStep {
    pub fn is_noop(&self) -> bool {
        self.transition.is_none() && self.effects.is_empty() && !self.record_changed
    }
}

/// Durable part of the gate: survives restarts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRecord {
    pub face_failures: u32,
    pub password_failures: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl GateRecord {
    fn reset(&mut self) {
        *self = GateRecord::default();
    }

    /// Seconds left in an active lockout, rounded up
    pub fn lockout_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.locked_until.filter(|until| now < *until).map(|until| {
            let ms = (until - now).num_milliseconds().max(0) as u64;
            (ms + 999) / 1000
        })
    }

    /// `Err(LockedOut)` while the lockout window is open
    pub fn ensure_unlocked(&self, now: DateTime<Utc>) -> GuardResult<()> {
        match self.lockout_remaining(now) {
            Some(remaining_secs) => Err(GuardError::LockedOut { remaining_secs }),
            None => Ok(()),
        }
    }

    /// Count one authentication result. An elapsed lockout is cleared first;
    /// a success clears everything. Returns true if this attempt started a
    /// lockout. Callers check [`ensure_unlocked`](Self::ensure_unlocked) first.
    pub fn record_attempt(
        &mut self,
        config: &GateConfig,
        method: AuthMethod,
        success: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if self.locked_until.is_some() || success {
            self.reset();
        }
        if success {
            return false;
        }

        let (failures, max) = match method {
            AuthMethod::Face => (&mut self.face_failures, config.max_face_attempts),
            AuthMethod::Password => (&mut self.password_failures, config.max_password_attempts),
        };
        *failures += 1;
        if *failures < max {
            return false;
        }

        let until = now + Duration::seconds(config.lockout_secs as i64);
        self.locked_until = Some(until);
        log::warn!("{:?} attempts exhausted, locked until {}", method, until);
        true
    }
}

/// The protection state machine
pub struct ProtectionGate {
    config: GateConfig,
    apps: Arc<ProtectedApps>,
    state: GateState,
    app: Option<String>,
    last_seen: Option<String>,
    record: GateRecord,
}

impl ProtectionGate {
    pub fn new(config: GateConfig, apps: Arc<ProtectedApps>, record: GateRecord) -> Self {
        Self {
            config,
            apps,
            state: GateState::Idle,
            app: None,
            last_seen: None,
            record,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn record(&self) -> &GateRecord {
        &self.record
    }

    pub fn status(&self, now: DateTime<Utc>) -> GateStatus {
        GateStatus {
            state: self.state,
            app: self.app.clone(),
            face_attempts_left: self.config.max_face_attempts.saturating_sub(self.record.face_failures),
            password_attempts_left: self
                .config
                .max_password_attempts
                .saturating_sub(self.record.password_failures),
            lockout_remaining_secs: self.lockout_remaining(now),
        }
    }

    /// Seconds left in an active lockout
    pub fn lockout_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.record.lockout_remaining(now)
    }

    /// Feed one input. `Err(LockedOut)` means nothing changed.
    pub fn handle(&mut self, input: GateInput, now: DateTime<Utc>) -> GuardResult<GateStep> {
        let from = self.state;
        let mut step = GateStep::default();

        match input {
            GateInput::Foreground { app, source } => self.on_foreground(app, source, now, &mut step),
            GateInput::AuthSucceeded(method) => self.on_auth(method, true, now, &mut step)?,
            GateInput::AuthFailed(method) => self.on_auth(method, false, now, &mut step)?,
            GateInput::MultipleFaces => {
                // Override: re-hide regardless of state
                self.state = GateState::Idle;
                self.app = None;
                self.last_seen = None;
                step.effects.push(GateEffect::Conceal);
                step.transition = Some(Transition { from, to: GateState::Idle });
                log::warn!("Multiple faces detected, content hidden");
            }
            GateInput::Retry => self.on_retry(now, &mut step)?,
            GateInput::Relock => {
                if self.state == GateState::Granted {
                    self.state = GateState::Pending;
                    step.effects.push(GateEffect::Conceal);
                    if let Some(app) = &self.app {
                        step.effects.push(GateEffect::RequestAuthentication(app.clone()));
                    }
                    step.transition = Some(Transition { from, to: GateState::Pending });
                }
            }
            GateInput::Cancel => {
                if matches!(self.state, GateState::Pending | GateState::Denied) {
                    self.state = GateState::Idle;
                    self.app = None;
                    step.transition = Some(Transition { from, to: GateState::Idle });
                }
            }
        }

        if let Some(t) = step.transition {
            if t.from != t.to {
                log::info!("Gate {} -> {}", t.from, t.to);
            }
            step.effects.push(GateEffect::Notify(self.status(now)));
        }

        Ok(step)
    }

    fn on_foreground(&mut self, app: String, source: ForegroundSource, now: DateTime<Utc>, step: &mut GateStep) {
        if self.last_seen.as_deref() == Some(app.as_str()) {
            return;
        }
        log::debug!("Foreground {} ({:?})", app, source);
        self.last_seen = Some(app.clone());

        let from = self.state;

        if !self.apps.contains(&app) {
            if self.state != GateState::Idle {
                if self.state == GateState::Granted {
                    step.effects.push(GateEffect::Conceal);
                }
                self.state = GateState::Idle;
                self.app = None;
                step.transition = Some(Transition { from, to: GateState::Idle });
            }
            return;
        }

        // Fail-closed: hide before anything else happens
        step.effects.push(GateEffect::Conceal);
        self.app = Some(app.clone());

        if self.lockout_remaining(now).is_some() {
            self.state = GateState::Denied;
        } else {
            if self.record.locked_until.is_some() {
                self.record.reset();
                step.record_changed = true;
            }
            self.state = GateState::Pending;
            step.effects.push(GateEffect::RequestAuthentication(app));
        }

        step.transition = Some(Transition { from, to: self.state });
    }

    fn on_auth(&mut self, method: AuthMethod, success: bool, now: DateTime<Utc>, step: &mut GateStep) -> GuardResult<()> {
        if self.state == GateState::Idle || (success && self.state == GateState::Granted) {
            log::debug!("Ignoring {:?} auth result in state {}", method, self.state);
            return Ok(());
        }

        self.record.ensure_unlocked(now)?;

        let from = self.state;
        let before = self.record.clone();
        let locked = self.record.record_attempt(&self.config, method, success, now);
        step.record_changed = self.record != before;

        if success {
            self.state = GateState::Granted;
            step.effects.push(GateEffect::Reveal);
        } else if locked {
            self.state = GateState::Denied;
            step.effects.push(GateEffect::Conceal);
        } else {
            if self.state == GateState::Granted {
                step.effects.push(GateEffect::Conceal);
            }
            // Denied with an elapsed window lands here too
            self.state = GateState::Pending;
            if let Some(app) = &self.app {
                step.effects.push(GateEffect::RequestAuthentication(app.clone()));
            }
        }

        step.transition = Some(Transition { from, to: self.state });
        Ok(())
    }

    fn on_retry(&mut self, now: DateTime<Utc>, step: &mut GateStep) -> GuardResult<()> {
        match self.state {
            GateState::Denied => {
                self.record.ensure_unlocked(now)?;
                self.record.reset();
                step.record_changed = true;
                self.state = GateState::Pending;
                step.transition = Some(Transition { from: GateState::Denied, to: GateState::Pending });
            }
            GateState::Pending => {
                step.transition = Some(Transition { from: GateState::Pending, to: GateState::Pending });
            }
            GateState::Idle | GateState::Granted => return Ok(()),
        }

        if let Some(app) = &self.app {
            step.effects.push(GateEffect::RequestAuthentication(app.clone()));
        }
        Ok(())
    }
}
