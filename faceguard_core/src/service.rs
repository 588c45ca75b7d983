//! FaceGuard - Gate service
//!
//! Runs the [`ProtectionGate`] on its own task. Every source of input (the
//! foreground event callback, the foreground poll, authentication results
//! and UI events) goes through one bounded channel, so the machine sees a
//! single serialized stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{GuardError, GuardResult};
use crate::gate::{AuthMethod, ForegroundSource, GateEffect, GateInput, GateStatus, GateStep, ProtectionGate};
use crate::store::{keys, save_json, SecureStore};
use crate::vault::ContentShield;

/// UI/notification collaborator
pub trait GateObserver: Send + Sync {
    /// Called after every transition
    fn on_status(&self, status: &GateStatus);

    /// The user should be asked to authenticate for `app`
    fn on_auth_requested(&self, _app: &str) {}

    /// An input was refused (e.g. during lockout), or its result could not be saved
    fn on_rejected(&self, _error: &GuardError) {}
}

/// Observer that only logs
pub struct LogObserver;

impl GateObserver for LogObserver {
    fn on_status(&self, status: &GateStatus) {
        log::info!("Gate status: {:?}", status);
    }

    fn on_auth_requested(&self, app: &str) {
        log::info!("Authentication requested for {}", app);
    }

    fn on_rejected(&self, error: &GuardError) {
        log::info!("Gate input rejected: {}", error);
    }
}

/// Source of the current foreground app for the poller
pub trait ForegroundProbe: Send + Sync {
    fn foreground_app(&self) -> Option<String>;
}

enum Command {
    Input(GateInput),
    Status(oneshot::Sender<GateStatus>),
}

/// Cloneable input funnel into the gate task
#[derive(Clone)]
pub struct GateHandle {
    tx: mpsc::Sender<Command>,
}

impl GateHandle {
    pub async fn send(&self, input: GateInput) -> GuardResult<()> {
        self.tx
            .send(Command::Input(input))
            .await
            .map_err(|_| GuardError::GateStopped)
    }

    /// Non-blocking send; fails if the queue is full
    pub fn try_send(&self, input: GateInput) -> GuardResult<()> {
        self.tx.try_send(Command::Input(input)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => GuardError::Busy("gate queue full".into()),
            mpsc::error::TrySendError::Closed(_) => GuardError::GateStopped,
        })
    }

    pub async fn foreground(&self, app: impl Into<String>, source: ForegroundSource) -> GuardResult<()> {
        self.send(GateInput::Foreground {
            app: app.into(),
            source,
        })
        .await
    }

    pub async fn auth_succeeded(&self, method: AuthMethod) -> GuardResult<()> {
        self.send(GateInput::AuthSucceeded(method)).await
    }

    pub async fn auth_failed(&self, method: AuthMethod) -> GuardResult<()> {
        self.send(GateInput::AuthFailed(method)).await
    }

    pub async fn multiple_faces(&self) -> GuardResult<()> {
        self.send(GateInput::MultipleFaces).await
    }

    pub async fn retry(&self) -> GuardResult<()> {
        self.send(GateInput::Retry).await
    }

    pub async fn cancel(&self) -> GuardResult<()> {
        self.send(GateInput::Cancel).await
    }

    pub async fn relock(&self) -> GuardResult<()> {
        self.send(GateInput::Relock).await
    }

    /// Current status, answered after every input queued before it
    pub async fn status(&self) -> GuardResult<GateStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status(reply))
            .await
            .map_err(|_| GuardError::GateStopped)?;
        rx.await.map_err(|_| GuardError::GateStopped)
    }
}

struct GateWorker {
    gate: ProtectionGate,
    shield: Arc<dyn ContentShield>,
    observer: Arc<dyn GateObserver>,
    store: Arc<dyn SecureStore>,
}

impl GateWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        log::debug!("Gate service started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Status(reply) => {
                    let _ = reply.send(self.gate.status(Utc::now()));
                }
                Command::Input(input) => match self.gate.handle(input, Utc::now()) {
                    Ok(step) => self.apply(step).await,
                    Err(e) => self.observer.on_rejected(&e),
                },
            }
        }

        log::debug!("Gate service stopped");
    }

    /// The gate keeps running on a failed write; the observer is told the
    /// lockout state will not survive a restart.
    fn persist_record(&self) {
        if let Err(e) = save_json(self.store.as_ref(), keys::GATE_RECORD, self.gate.record()) {
            log::error!("Could not persist gate record: {}", e);
            self.observer.on_rejected(&e);
        }
    }

    /// Run effects in order. Hide/reveal finish before the next input.
    async fn apply(&mut self, step: GateStep) {
        if step.record_changed {
            self.persist_record();
        }

        let mut effects: VecDeque<GateEffect> = step.effects.into();
        while let Some(effect) = effects.pop_front() {
            match effect {
                GateEffect::Conceal => {
                    let shield = Arc::clone(&self.shield);
                    match run_blocking(move || shield.conceal()).await {
                        Ok(n) if n > 0 => log::info!("Concealed {} item(s)", n),
                        Ok(_) => {}
                        Err(e) => log::error!("Conceal incomplete: {}", e),
                    }
                }
                GateEffect::Reveal => {
                    let shield = Arc::clone(&self.shield);
                    if let Err(e) = run_blocking(move || shield.reveal()).await {
                        log::error!("Reveal failed, relocking: {}", e);
                        effects.clear();
                        match self.gate.handle(GateInput::Relock, Utc::now()) {
                            Ok(relock) => effects.extend(relock.effects),
                            Err(e) => log::error!("Relock rejected: {}", e),
                        }
                    }
                }
                GateEffect::RequestAuthentication(app) => self.observer.on_auth_requested(&app),
                GateEffect::Notify(status) => self.observer.on_status(&status),
            }
        }
    }
}

async fn run_blocking<F>(f: F) -> GuardResult<usize>
where
    F: FnOnce() -> GuardResult<usize> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Start the gate task. It stops once every [`GateHandle`] is dropped.
pub fn spawn_gate(
    gate: ProtectionGate,
    shield: Arc<dyn ContentShield>,
    observer: Arc<dyn GateObserver>,
    store: Arc<dyn SecureStore>,
    capacity: usize,
) -> (GateHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let worker = GateWorker {
        gate,
        shield,
        observer,
        store,
    };
    let task = tokio::spawn(worker.run(rx));
    (GateHandle { tx }, task)
}

/// Report the foreground app every `interval`. Duplicates are dropped by
/// the gate, so this can run alongside the event source.
pub fn spawn_poller(handle: GateHandle, probe: Arc<dyn ForegroundProbe>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(app) = probe.foreground_app() else {
                continue;
            };
            if handle.foreground(app, ForegroundSource::Poll).await.is_err() {
                break;
            }
        }
    })
}
