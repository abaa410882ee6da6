// Snapshot reconciliation: one durable fetch per session, applied only to a
// replica whose content region is still empty when the fetch resolves.

use std::sync::Arc;

use notesync_common::crdt::origin::ReplicaOrigin;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::SessionState;
use crate::engine::replica::Replica;
use crate::store::{SnapshotStore, StoreError};

pub struct SnapshotReconciler {
    state: Arc<SessionState>,
    replica: Arc<Replica>,
    store: Arc<dyn SnapshotStore>,
    initial_title: Option<String>,
}

impl SnapshotReconciler {
    pub fn new(
        state: Arc<SessionState>,
        replica: Arc<Replica>,
        store: Arc<dyn SnapshotStore>,
        initial_title: Option<String>,
    ) -> Self {
        Self { state, replica, store, initial_title }
    }

    /// Issue the snapshot fetch if this session has not done so yet.
    ///
    /// Returns the continuation on the first call and `None` afterwards. The
    /// continuation is never aborted; a result arriving after the session
    /// was retired is dropped without touching the replica.
    pub fn ensure_fetched(&self) -> Option<JoinHandle<()>> {
        if !self.state.mark_fetch_issued() {
            return None;
        }

        let state = Arc::clone(&self.state);
        let replica = Arc::clone(&self.replica);
        let store = Arc::clone(&self.store);
        let initial_title = self.initial_title.clone();
        let note_id = state.note_id();
        debug!(%note_id, "fetching snapshot");

        Some(tokio::spawn(async move {
            let result = store.fetch(note_id).await;
            if !state.is_current() {
                debug!(%note_id, "discarding snapshot for retired session");
                return;
            }
            resolve(&state, &replica, initial_title.as_deref(), result);
        }))
    }
}

fn resolve(
    state: &SessionState,
    replica: &Replica,
    initial_title: Option<&str>,
    result: Result<Option<Vec<u8>>, StoreError>,
) {
    let note_id = state.note_id();
    match result {
        Ok(Some(snapshot)) => {
            if !replica.is_content_empty() {
                debug!(%note_id, "replica already populated; snapshot skipped");
                return;
            }
            match replica.apply_update(&snapshot, ReplicaOrigin::Snapshot) {
                Ok(()) => info!(%note_id, blocks = replica.content_len(), "snapshot applied"),
                Err(error) => {
                    warn!(%note_id, error = %error, "snapshot could not be decoded");
                    state.mark_fetch_failed();
                    seed_title(replica, initial_title);
                }
            }
        }
        Ok(None) => seed_title(replica, initial_title),
        Err(error) => {
            warn!(%note_id, error = %error, "snapshot fetch failed");
            state.mark_fetch_failed();
            seed_title(replica, initial_title);
        }
    }
}

fn seed_title(replica: &Replica, initial_title: Option<&str>) {
    let Some(title) = initial_title.filter(|title| !title.is_empty()) else {
        return;
    };
    if replica.is_title_empty() {
        replica.set_title(title);
    }
}
