// Session lifecycle: one replica, one live link, one snapshot fetch and one
// autosave pipeline per open note identity.
//
// Switching identity tears everything down synchronously before the next
// session is built. Work that cannot be cancelled (an issued fetch, an
// in-flight save, a flush) is left to settle; the identity token makes any
// late fetch result inert.

pub mod reconciler;
pub mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notesync_common::types::{ConnectionStatus, NoteId};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::reconciler::SnapshotReconciler;
use self::state::SessionState;
use crate::autosave::{AutosaveConfig, AutosavePipeline, SaveErrorCallback};
use crate::credential::CredentialSource;
use crate::engine::replica::Replica;
use crate::store::SnapshotStore;
use crate::sync::connection::ConnectionController;
use crate::sync::transport::Transport;

/// Errors surfaced to the consumer of a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no bearer credential available; live sync disabled")]
    MissingCredential,
    #[error("credential rejected by the sync server: {0}")]
    CredentialRejected(String),
}

/// Consumer view of the active session.
#[derive(Clone)]
pub struct SessionHandle {
    note_id: NoteId,
    replica: Arc<Replica>,
    status: watch::Receiver<ConnectionStatus>,
    error: watch::Receiver<Option<SessionError>>,
}

impl SessionHandle {
    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn error(&self) -> Option<SessionError> {
        self.error.borrow().clone()
    }

    pub fn watch_error(&self) -> watch::Receiver<Option<SessionError>> {
        self.error.clone()
    }
}

struct ActiveSession {
    state: Arc<SessionState>,
    replica: Arc<Replica>,
    connection: ConnectionController,
    autosave: AutosavePipeline,
    reconciler: SnapshotReconciler,
    fetch: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            note_id: self.state.note_id(),
            replica: Arc::clone(&self.replica),
            status: self.connection.watch_status(),
            error: self.connection.watch_error(),
        }
    }
}

pub struct SessionManager {
    store: Arc<dyn SnapshotStore>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
    autosave: AutosaveConfig,
    on_save_error: Option<SaveErrorCallback>,
    epoch: Arc<AtomicU64>,
    active: Option<ActiveSession>,
    beacons: Vec<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            store,
            transport,
            credentials,
            autosave: AutosaveConfig::default(),
            on_save_error: None,
            epoch: Arc::new(AtomicU64::new(0)),
            active: None,
            beacons: Vec::new(),
        }
    }

    pub fn with_autosave_config(mut self, config: AutosaveConfig) -> Self {
        self.autosave = config;
        self
    }

    pub fn with_save_error_callback(mut self, callback: SaveErrorCallback) -> Self {
        self.on_save_error = Some(callback);
        self
    }

    pub fn active_note_id(&self) -> Option<NoteId> {
        self.active.as_ref().map(|active| active.state.note_id())
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        self.active.as_ref().map(ActiveSession::handle)
    }

    /// Open `note_id`, replacing any session for a different identity.
    ///
    /// Reopening the active identity returns the existing handle. Never
    /// fails: credential and store problems surface through the handle and
    /// the logs. Must be called from within a tokio runtime.
    pub fn open_session(&mut self, note_id: NoteId, initial_title: Option<&str>) -> SessionHandle {
        if let Some(active) = &self.active {
            if active.state.note_id() == note_id {
                debug_assert!(active.state.snapshot_fetch_issued());
                return active.handle();
            }
        }
        self.teardown_active();

        let state = Arc::new(SessionState::new(note_id, Arc::clone(&self.epoch)));
        let replica = Arc::new(Replica::new());

        let connection = ConnectionController::open(
            note_id,
            Arc::clone(&replica),
            Arc::clone(&self.credentials),
            Arc::clone(&self.transport),
        );
        let autosave = AutosavePipeline::start(
            Arc::clone(&state),
            Arc::clone(&replica),
            Arc::clone(&self.store),
            self.autosave.clone(),
            self.on_save_error.clone(),
        );
        let reconciler = SnapshotReconciler::new(
            Arc::clone(&state),
            Arc::clone(&replica),
            Arc::clone(&self.store),
            initial_title.map(str::to_string),
        );
        let fetch = reconciler.ensure_fetched();

        info!(%note_id, "session opened");
        let active = ActiveSession { state, replica, connection, autosave, reconciler, fetch };
        let handle = active.handle();
        self.active = Some(active);
        handle
    }

    /// Tear down the active session without opening another.
    pub fn close_session(&mut self) {
        self.teardown_active();
    }

    /// Flush the active session unconditionally, tear it down, then wait up
    /// to `grace` for outstanding flushes.
    pub async fn shutdown(mut self, grace: Duration) {
        if let Some(active) = &self.active {
            self.beacons.push(active.autosave.flush_best_effort());
        }
        self.teardown_active();

        let pending = std::mem::take(&mut self.beacons);
        if pending.is_empty() {
            return;
        }
        let count = pending.len();
        match tokio::time::timeout(grace, futures_util::future::join_all(pending)).await {
            Ok(_) => debug!(count, "flushes settled"),
            Err(_) => warn!(count, grace_ms = grace.as_millis() as u64, "flushes still pending"),
        }
    }

    fn teardown_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let note_id = active.state.note_id();

        // Retire the identity before anything else so late fetches are inert.
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if active.state.is_dirty() {
            debug!(%note_id, "unsaved local edits; flushing");
            self.beacons.push(active.autosave.flush_best_effort());
        }
        self.beacons.retain(|beacon| !beacon.is_finished());

        drop(active);
        info!(%note_id, "session closed");
    }

    #[cfg(test)]
    async fn settle_fetch(&mut self) {
        let fetch = self.active.as_mut().and_then(|active| active.fetch.take());
        if let Some(fetch) = fetch {
            fetch.await.expect("fetch task should not panic");
        }
    }
}
