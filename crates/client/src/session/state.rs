// Per-session record shared by the reconciler, the autosave pipeline and
// the session manager. A fresh record is created for every identity opened.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use notesync_common::types::NoteId;

#[derive(Debug)]
pub struct SessionState {
    note_id: NoteId,
    token: u64,
    epoch: Arc<AtomicU64>,
    snapshot_fetch_issued: AtomicBool,
    snapshot_fetch_failed: AtomicBool,
    save_in_flight: AtomicBool,
    dirty: AtomicBool,
}

impl SessionState {
    /// Bind a new record to the manager's current identity token.
    pub fn new(note_id: NoteId, epoch: Arc<AtomicU64>) -> Self {
        let token = epoch.load(Ordering::SeqCst);
        Self {
            note_id,
            token,
            epoch,
            snapshot_fetch_issued: AtomicBool::new(false),
            snapshot_fetch_failed: AtomicBool::new(false),
            save_in_flight: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    /// False once the manager has moved to another identity or closed.
    pub fn is_current(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.token
    }

    /// Returns true only for the first caller in this session.
    pub fn mark_fetch_issued(&self) -> bool {
        !self.snapshot_fetch_issued.swap(true, Ordering::SeqCst)
    }

    pub fn snapshot_fetch_issued(&self) -> bool {
        self.snapshot_fetch_issued.load(Ordering::SeqCst)
    }

    pub fn mark_fetch_failed(&self) {
        self.snapshot_fetch_failed.store(true, Ordering::SeqCst);
    }

    pub fn snapshot_fetch_failed(&self) -> bool {
        self.snapshot_fetch_failed.load(Ordering::SeqCst)
    }

    /// Claim the single save slot. `None` while another save holds it.
    pub fn try_begin_save(self: &Arc<Self>) -> Option<SaveGuard> {
        self.save_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SaveGuard { state: Arc::clone(self) })
    }

    pub fn save_in_flight(&self) -> bool {
        self.save_in_flight.load(Ordering::SeqCst)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Local edits not yet handed to a save or flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

/// Holds the save slot; released on drop, including on error or task abort.
#[derive(Debug)]
pub struct SaveGuard {
    state: Arc<SessionState>,
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.state.save_in_flight.store(false, Ordering::SeqCst);
    }
}
