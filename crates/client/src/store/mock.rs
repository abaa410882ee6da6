// In-memory snapshot store for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use notesync_common::protocol::rest::LegacyNoteContent;
use notesync_common::types::NoteId;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::{SnapshotStore, StoreError};

#[derive(Default)]
pub(crate) struct MockSnapshotStore {
    snapshots: Mutex<HashMap<NoteId, Vec<u8>>>,
    fetch_gate: Option<Arc<Semaphore>>,
    save_gate: Option<Arc<Semaphore>>,
    fetch_calls: AtomicUsize,
    fetch_completions: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_saves: AtomicBool,
    reject_saves: AtomicBool,
    fail_mirror: AtomicBool,
    saves: Mutex<Vec<(NoteId, Instant, Vec<u8>)>>,
    mirrors: Mutex<Vec<(NoteId, LegacyNoteContent)>>,
    beacons: Mutex<Vec<(NoteId, Vec<u8>)>>,
}

impl MockSnapshotStore {
    /// Fetches block until the returned semaphore receives a permit.
    pub(crate) fn with_fetch_gate() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self { fetch_gate: Some(Arc::clone(&gate)), ..Default::default() }, gate)
    }

    /// Saves block until the returned semaphore receives a permit.
    pub(crate) fn with_save_gate() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self { save_gate: Some(Arc::clone(&gate)), ..Default::default() }, gate)
    }

    pub(crate) fn put_snapshot(&self, note_id: NoteId, state: Vec<u8>) {
        self.snapshots.lock().unwrap().insert(note_id, state);
    }

    pub(crate) fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Answer saves with 401 instead of storing them.
    pub(crate) fn reject_saves(&self, reject: bool) {
        self.reject_saves.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn fail_mirror(&self, fail: bool) {
        self.fail_mirror.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_completions(&self) -> usize {
        self.fetch_completions.load(Ordering::SeqCst)
    }

    pub(crate) fn saves(&self) -> Vec<(NoteId, Instant, Vec<u8>)> {
        self.saves.lock().unwrap().clone()
    }

    pub(crate) fn mirrors(&self) -> Vec<(NoteId, LegacyNoteContent)> {
        self.mirrors.lock().unwrap().clone()
    }

    pub(crate) fn beacons(&self) -> Vec<(NoteId, Vec<u8>)> {
        self.beacons.lock().unwrap().clone()
    }
}

async fn pass(gate: &Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        gate.acquire().await.expect("gate should stay open").forget();
    }
}

#[async_trait]
impl SnapshotStore for MockSnapshotStore {
    async fn fetch(&self, note_id: NoteId) -> Result<Option<Vec<u8>>, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.fetch_gate).await;
        self.fetch_completions.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset".into()));
        }
        Ok(self.snapshots.lock().unwrap().get(&note_id).cloned())
    }

    async fn save(&self, note_id: NoteId, state: Vec<u8>) -> Result<(), StoreError> {
        self.saves.lock().unwrap().push((note_id, Instant::now(), state.clone()));
        pass(&self.save_gate).await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Status { status: 503 });
        }
        if self.reject_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unauthorized(401));
        }
        self.snapshots.lock().unwrap().insert(note_id, state);
        Ok(())
    }

    async fn mirror_content(
        &self,
        note_id: NoteId,
        content: &LegacyNoteContent,
    ) -> Result<(), StoreError> {
        self.mirrors.lock().unwrap().push((note_id, content.clone()));
        if self.fail_mirror.load(Ordering::SeqCst) {
            return Err(StoreError::Status { status: 500 });
        }
        Ok(())
    }

    async fn beacon(&self, note_id: NoteId, state: Vec<u8>) {
        self.beacons.lock().unwrap().push((note_id, state));
    }
}
