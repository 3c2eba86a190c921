use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;

use crate::client::{GraphRemote, QuestApi};
use crate::config::{DEFAULT_AUTOSAVE_DELAY, EditorConfig};
use crate::error::{LibError, Result};
use crate::graph::GraphModel;
use crate::models::{AutofixResult, ValidationReport, VersionGraph, VersionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Clean,
    Dirty,
    Saving,
    /// The last save failed and edits are still unsaved. A retry is scheduled.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Autosave,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Edited { revision: u64 },
    TimerFired,
    ManualSaveStarted,
    SaveSucceeded { revision: u64, at: DateTime<Utc> },
    SaveFailed { revision: u64, trigger: SaveTrigger },
    /// The model was replaced with server data at `revision`.
    Reloaded { revision: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Cancel any pending debounce timer and start a new one.
    ScheduleTimer,
    CancelTimer,
    /// PUT the current graph snapshot in the background.
    Persist,
    ArmUnloadGuard,
    DisarmUnloadGuard,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncMachine {
    state: SyncState,
    head_revision: u64,
    acked_revision: u64,
    in_flight: usize,
    last_failed: bool,
    last_saved_at: Option<DateTime<Utc>>,
    guard_armed: bool,
}

impl SyncMachine {
    /// Machine for a graph freshly loaded at `revision`.
    pub fn loaded(revision: u64) -> Self {
        Self {
            head_revision: revision,
            acked_revision: revision,
            ..Self::default()
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.head_revision > self.acked_revision
    }

    pub fn unload_guard_armed(&self) -> bool {
        self.guard_armed
    }

    pub fn acked_revision(&self) -> u64 {
        self.acked_revision
    }

    pub fn apply(&mut self, event: SyncEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            SyncEvent::Edited { revision } => {
                self.head_revision = self.head_revision.max(revision);
                self.last_failed = false;
                effects.push(Effect::ScheduleTimer);
            }
            SyncEvent::TimerFired => {
                if self.has_unsaved_changes() {
                    self.in_flight += 1;
                    effects.push(Effect::Persist);
                }
            }
            SyncEvent::ManualSaveStarted => {
                self.in_flight += 1;
            }
            SyncEvent::SaveSucceeded { revision, at } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if revision >= self.acked_revision {
                    self.acked_revision = revision;
                    self.last_saved_at = Some(at);
                    self.last_failed = false;
                }
            }
            SyncEvent::SaveFailed { revision, trigger } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if revision > self.acked_revision {
                    self.last_failed = true;
                    if trigger == SaveTrigger::Autosave || self.in_flight == 0 {
                        effects.push(Effect::ScheduleTimer);
                    }
                }
            }
            SyncEvent::Reloaded { revision } => {
                self.head_revision = self.head_revision.max(revision);
                self.acked_revision = self.head_revision;
                self.last_failed = false;
                effects.push(Effect::CancelTimer);
            }
        }
        self.settle(&mut effects);
        effects
    }

    fn settle(&mut self, effects: &mut Vec<Effect>) {
        let unsaved = self.has_unsaved_changes();
        self.state = if self.in_flight > 0 {
            SyncState::Saving
        } else if unsaved && self.last_failed {
            SyncState::Error
        } else if unsaved {
            SyncState::Dirty
        } else {
            SyncState::Clean
        };

        if unsaved && !self.guard_armed {
            self.guard_armed = true;
            effects.push(Effect::ArmUnloadGuard);
        } else if !unsaved && self.guard_armed {
            self.guard_armed = false;
            effects.push(Effect::DisarmUnloadGuard);
        }
    }
}

/// Passive sync indicator for the editor header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub unsaved: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    fn from_machine(machine: &SyncMachine) -> Self {
        Self {
            state: machine.state(),
            unsaved: machine.has_unsaved_changes(),
            last_saved_at: machine.last_saved_at(),
        }
    }

    pub fn label(&self) -> String {
        match (self.state, self.last_saved_at) {
            (SyncState::Saving, _) => "Saving…".to_string(),
            (SyncState::Error, _) => "Autosave failed, retrying".to_string(),
            (SyncState::Dirty, _) => "Unsaved changes".to_string(),
            (SyncState::Clean, Some(at)) => {
                format!("Saved {}", at.with_timezone(&Local).format("%H:%M:%S"))
            }
            (SyncState::Clean, None) => "No changes".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

struct Inner {
    remote: Arc<dyn GraphRemote>,
    version_id: VersionId,
    delay: Duration,
    runtime: Handle,
    model: Mutex<GraphModel>,
    live: Mutex<ValidationReport>,
    machine: Mutex<SyncMachine>,
    timer: Mutex<Option<AbortHandle>>,
    /// Serializes graph PUTs. Holds the model revision last written to the server.
    put_lock: tokio::sync::Mutex<u64>,
    report: Mutex<Option<ValidationReport>>,
    status: watch::Sender<SyncStatus>,
    toasts: broadcast::Sender<Toast>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns one version graph for the length of an editor session.
pub struct AutosaveController {
    inner: Arc<Inner>,
}

impl AutosaveController {
    /// Loads the version graph and starts tracking it. Must run inside a tokio runtime.
    pub async fn open(
        remote: Arc<dyn GraphRemote>,
        version_id: VersionId,
        delay: Duration,
    ) -> Result<Self> {
        let graph = remote.load_graph(version_id).await?;
        Self::new(remote, graph, delay)
    }

    pub async fn open_with_config(config: &EditorConfig, version_id: VersionId) -> Result<Self> {
        let api = QuestApi::from_config(config);
        Self::open(Arc::new(api), version_id, config.autosave_delay).await
    }

    pub fn new(remote: Arc<dyn GraphRemote>, graph: VersionGraph, delay: Duration) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            LibError::unknown("Autosave requires a tokio runtime", anyhow!(err))
        })?;
        let version_id = graph.version.id;
        let model = GraphModel::from_version_graph(graph);
        let live = model.validate();
        let revision = model.revision();
        let machine = SyncMachine::loaded(revision);
        let (status, _) = watch::channel(SyncStatus::from_machine(&machine));
        let (toasts, _) = broadcast::channel(32);
        tracing::info!(%version_id, nodes = model.nodes().len(), "graph editor session opened");

        Ok(Self {
            inner: Arc::new(Inner {
                remote,
                version_id,
                delay,
                runtime,
                model: Mutex::new(model),
                live: Mutex::new(live),
                machine: Mutex::new(machine),
                timer: Mutex::new(None),
                put_lock: tokio::sync::Mutex::new(revision),
                report: Mutex::new(None),
                status,
                toasts,
            }),
        })
    }

    pub fn with_default_delay(remote: Arc<dyn GraphRemote>, graph: VersionGraph) -> Result<Self> {
        Self::new(remote, graph, DEFAULT_AUTOSAVE_DELAY)
    }

    pub fn version_id(&self) -> VersionId {
        self.inner.version_id
    }

    /// Applies a mutation. Live checks are recomputed before this returns and
    /// the autosave timer is (re)started when the graph changed.
    pub fn edit<R>(&self, mutate: impl FnOnce(&mut GraphModel) -> Result<R>) -> Result<R> {
        let (result, changed) = {
            let mut model = lock(&self.inner.model);
            let before = model.revision();
            let result = mutate(&mut *model);
            let after = model.revision();
            if after != before {
                *lock(&self.inner.live) = model.validate();
                (result, Some(after))
            } else {
                (result, None)
            }
        };
        if let Some(revision) = changed {
            self.inner.feed(SyncEvent::Edited { revision });
        }
        result
    }

    pub fn graph(&self) -> VersionGraph {
        lock(&self.inner.model).to_version_graph()
    }

    pub fn revision(&self) -> u64 {
        lock(&self.inner.model).revision()
    }

    /// Result of the local structural checks for the current graph.
    pub fn live_checks(&self) -> ValidationReport {
        lock(&self.inner.live).clone()
    }

    /// Last authoritative report from the server, if one was requested.
    pub fn validation_report(&self) -> Option<ValidationReport> {
        lock(&self.inner.report).clone()
    }

    pub fn state(&self) -> SyncState {
        lock(&self.inner.machine).state()
    }

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus::from_machine(&lock(&self.inner.machine))
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.machine).last_saved_at()
    }

    /// Whether navigating away should be confirmed by the user.
    pub fn unload_guard_armed(&self) -> bool {
        lock(&self.inner.machine).unload_guard_armed()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_toasts(&self) -> broadcast::Receiver<Toast> {
        self.inner.toasts.subscribe()
    }

    /// Saves immediately, then asks the server for its validation report.
    pub async fn save_and_validate(&self) -> Result<ValidationReport> {
        self.inner.save_now().await?;
        self.inner.validate_remote().await
    }

    pub async fn validate(&self) -> Result<ValidationReport> {
        self.inner.validate_remote().await
    }

    /// Saves, re-validates and publishes only when the server reports `ok`.
    pub async fn publish(&self) -> Result<ValidationReport> {
        let report = self.save_and_validate().await?;
        if !report.ok {
            self.inner
                .toast(ToastLevel::Error, "Fix validation errors before publishing");
            return Err(LibError::invalid(
                "Version has validation errors",
                anyhow!(
                    "publish of {} blocked by {} errors",
                    self.inner.version_id,
                    report.errors.len()
                ),
            ));
        }

        if let Err(err) = self.inner.remote.publish(self.inner.version_id).await {
            self.inner.toast(ToastLevel::Error, "Publish failed");
            return Err(err);
        }
        tracing::info!(version_id = %self.inner.version_id, "version published");
        self.inner.toast(ToastLevel::Info, "Version published");
        Ok(report)
    }

    /// Saves, lets the server repair the graph, reloads it and re-validates.
    pub async fn autofix(&self) -> Result<(AutofixResult, ValidationReport)> {
        self.inner.save_now().await?;
        let fixed = match self.inner.remote.autofix(self.inner.version_id).await {
            Ok(fixed) => fixed,
            Err(err) => {
                self.inner.toast(ToastLevel::Error, "Autofix failed");
                return Err(err);
            }
        };
        self.inner.reload().await?;
        let report = self.inner.validate_remote().await?;
        tracing::info!(
            version_id = %self.inner.version_id,
            changes = fixed.changes.len(),
            "autofix applied"
        );
        Ok((fixed, report))
    }
}

impl Drop for AutosaveController {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
        if lock(&self.inner.machine).has_unsaved_changes() {
            tracing::warn!(
                version_id = %self.inner.version_id,
                "graph editor closed with unsaved changes"
            );
        }
    }
}

impl Inner {
    fn feed(self: &Arc<Self>, event: SyncEvent) {
        let (effects, status) = {
            let mut machine = lock(&self.machine);
            let effects = machine.apply(event);
            (effects, SyncStatus::from_machine(&machine))
        };
        for effect in effects {
            self.run(effect);
        }
        self.status.send_replace(status);
    }

    fn run(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::ScheduleTimer => self.schedule_timer(),
            Effect::CancelTimer => {
                if let Some(timer) = lock(&self.timer).take() {
                    timer.abort();
                }
            }
            Effect::Persist => self.spawn_autosave(),
            Effect::ArmUnloadGuard => {
                tracing::debug!(version_id = %self.version_id, "unload guard armed");
            }
            Effect::DisarmUnloadGuard => {
                tracing::debug!(version_id = %self.version_id, "unload guard disarmed");
            }
        }
    }

    fn schedule_timer(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let delay = self.delay;
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.feed(SyncEvent::TimerFired);
            }
        });
        if let Some(previous) = lock(&self.timer).replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    fn snapshot(&self) -> (VersionGraph, u64) {
        let model = lock(&self.model);
        (model.to_version_graph(), model.revision())
    }

    fn spawn_autosave(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let (revision, result) = inner.put_latest().await;
            match result {
                Ok(()) => {
                    tracing::debug!(version_id = %inner.version_id, revision, "autosave stored");
                    inner.feed(SyncEvent::SaveSucceeded {
                        revision,
                        at: Utc::now(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        version_id = %inner.version_id,
                        revision,
                        kind = ?err.kind,
                        error = %err.source,
                        "autosave failed, will retry"
                    );
                    inner.feed(SyncEvent::SaveFailed {
                        revision,
                        trigger: SaveTrigger::Autosave,
                    });
                }
            }
        });
    }

    /// PUTs the model as it is once this caller's turn comes. Skips the request
    /// when that revision is already on the server.
    async fn put_latest(&self) -> (u64, Result<()>) {
        let mut persisted = self.put_lock.lock().await;
        let (graph, revision) = self.snapshot();
        if revision <= *persisted {
            tracing::debug!(version_id = %self.version_id, revision, "graph already stored");
            return (revision, Ok(()));
        }
        let result = self.remote.put_graph(self.version_id, &graph).await;
        if result.is_ok() {
            *persisted = revision;
        }
        (revision, result)
    }

    async fn save_now(self: &Arc<Self>) -> Result<()> {
        self.feed(SyncEvent::ManualSaveStarted);
        let (revision, result) = self.put_latest().await;
        match result {
            Ok(()) => {
                tracing::info!(version_id = %self.version_id, revision, "graph saved");
                self.feed(SyncEvent::SaveSucceeded {
                    revision,
                    at: Utc::now(),
                });
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    version_id = %self.version_id,
                    revision,
                    error = %err.source,
                    "manual save failed"
                );
                self.feed(SyncEvent::SaveFailed {
                    revision,
                    trigger: SaveTrigger::Manual,
                });
                self.toast(ToastLevel::Error, "Save failed; your changes are kept");
                Err(err)
            }
        }
    }

    async fn validate_remote(&self) -> Result<ValidationReport> {
        match self.remote.validate(self.version_id).await {
            Ok(report) => {
                *lock(&self.report) = Some(report.clone());
                Ok(report)
            }
            Err(err) => {
                self.toast(ToastLevel::Error, "Validation failed");
                Err(err)
            }
        }
    }

    async fn reload(self: &Arc<Self>) -> Result<()> {
        let graph = match self.remote.load_graph(self.version_id).await {
            Ok(graph) => graph,
            Err(err) => {
                self.toast(ToastLevel::Error, "Could not reload the graph");
                return Err(err);
            }
        };
        let mut persisted = self.put_lock.lock().await;
        let revision = {
            let mut model = lock(&self.model);
            model.reload(graph);
            *lock(&self.live) = model.validate();
            model.revision()
        };
        *persisted = revision;
        drop(persisted);
        self.feed(SyncEvent::Reloaded { revision });
        Ok(())
    }

    fn toast(&self, level: ToastLevel, message: &str) {
        // No subscribers is fine; toasts are fire-and-forget.
        let _ = self.toasts.send(Toast {
            level,
            message: message.to_string(),
        });
    }
}
