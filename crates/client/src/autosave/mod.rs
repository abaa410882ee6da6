// Autosave pipeline: local replica mutations are debounced into full-state
// snapshot writes, with an optional legacy content mirror and a
// fire-and-forget flush for teardown.
//
// Idle -> Debouncing on a local mutation, Debouncing -> Debouncing on each
// further mutation, Debouncing -> Saving once the window elapses quietly,
// Saving -> Idle when the write settles.

pub mod debounce;

use std::sync::Arc;
use std::time::Duration;

use notesync_common::crdt::origin::ReplicaOrigin;
use notesync_common::types::NoteId;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use yrs::Subscription;

use self::debounce::{Debouncer, DEFAULT_DEBOUNCE_MS};
use crate::engine::replica::Replica;
use crate::session::state::SessionState;
use crate::store::{SnapshotStore, StoreError};

/// Called for every failed snapshot write.
pub type SaveErrorCallback = Arc<dyn Fn(&SaveError) + Send + Sync>;

#[derive(Debug, Error)]
#[error("failed to save note {note_id}: {source}")]
pub struct SaveError {
    pub note_id: NoteId,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    pub debounce: Duration,
    /// Also PATCH the denormalized JSON content after each save.
    pub mirror_legacy_content: bool,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS), mirror_legacy_content: false }
    }
}

pub struct AutosavePipeline {
    saver: Arc<Saver>,
    timer: JoinHandle<()>,
    _subscription: Option<Subscription>,
}

impl AutosavePipeline {
    /// Observe `replica` and start the debounce timer task.
    pub fn start(
        state: Arc<SessionState>,
        replica: Arc<Replica>,
        store: Arc<dyn SnapshotStore>,
        config: AutosaveConfig,
        on_save_error: Option<SaveErrorCallback>,
    ) -> Self {
        let note_id = state.note_id();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<Instant>();

        let dirty_state = Arc::clone(&state);
        let subscription = replica
            .observe_updates(move |origin, _| {
                if origin == ReplicaOrigin::Local {
                    dirty_state.mark_dirty();
                    let _ = events_tx.send(Instant::now());
                }
            })
            .map_err(|error| warn!(%note_id, error = %error, "failed to observe replica"))
            .ok();

        let saver = Arc::new(Saver {
            state,
            replica,
            store,
            mirror_legacy_content: config.mirror_legacy_content,
            on_save_error,
        });
        let timer = tokio::spawn(run_timer(
            events_rx,
            Debouncer::new(config.debounce),
            Arc::clone(&saver),
        ));

        Self { saver, timer, _subscription: subscription }
    }

    /// Deliver the current full state through the store's beacon path.
    ///
    /// Returns immediately; the delivery outcome is never reported.
    pub fn flush_best_effort(&self) -> JoinHandle<()> {
        let saver = &self.saver;
        let note_id = saver.state.note_id();
        saver.state.clear_dirty();
        let snapshot = saver.replica.encode_state();
        let store = Arc::clone(&saver.store);
        debug!(%note_id, bytes = snapshot.len(), "flushing snapshot");
        tokio::spawn(async move { store.beacon(note_id, snapshot).await })
    }
}

impl Drop for AutosavePipeline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

async fn run_timer(
    mut events: mpsc::UnboundedReceiver<Instant>,
    mut debouncer: Debouncer,
    saver: Arc<Saver>,
) {
    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            event = events.recv() => match event {
                Some(at) => debouncer.push_at(at),
                None => return,
            },
            _ = sleep_until(deadline) => {
                if debouncer.take_ready() {
                    saver.save_now();
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Saver {
    state: Arc<SessionState>,
    replica: Arc<Replica>,
    store: Arc<dyn SnapshotStore>,
    mirror_legacy_content: bool,
    on_save_error: Option<SaveErrorCallback>,
}

impl Saver {
    /// Start a write unless one is already in flight for this session.
    ///
    /// The write runs on its own task so tearing down the timer does not
    /// cancel it.
    fn save_now(&self) {
        let note_id = self.state.note_id();
        let Some(guard) = self.state.try_begin_save() else {
            debug!(%note_id, "save already in flight; skipping cycle");
            return;
        };

        self.state.clear_dirty();
        let snapshot = self.replica.encode_state();
        let legacy = self.mirror_legacy_content.then(|| self.replica.legacy_content());
        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let on_save_error = self.on_save_error.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let bytes = snapshot.len();
            if let Err(source) = store.save(note_id, snapshot).await {
                // Credential and url failures are not flushed again at teardown.
                if source.retryable() {
                    state.mark_dirty();
                }
                let error = SaveError { note_id, source };
                warn!(%note_id, error = %error, "snapshot save failed");
                if let Some(callback) = on_save_error {
                    callback(&error);
                }
                return;
            }
            info!(%note_id, bytes, "snapshot saved");

            if let Some(content) = legacy {
                if let Err(error) = store.mirror_content(note_id, &content).await {
                    warn!(%note_id, error = %error, "legacy content mirror failed");
                }
            }
        });
    }
}
