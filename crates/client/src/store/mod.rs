// Durable snapshot storage: the REST collaborator that holds the last
// persisted replica state of every note.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use notesync_common::protocol::rest::LegacyNoteContent;
use notesync_common::types::NoteId;
use thiserror::Error;

pub use http::HttpSnapshotStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no bearer credential available")]
    MissingCredential,
    #[error("credential rejected by the note store (HTTP {0})")]
    Unauthorized(u16),
    #[error("note store returned HTTP {status}")]
    Status { status: u16 },
    #[error("note store request failed: {0}")]
    Transport(String),
    #[error("invalid note store url: {0}")]
    Url(String),
}

impl StoreError {
    /// Whether a later attempt could succeed without operator action.
    pub fn retryable(&self) -> bool {
        match self {
            Self::MissingCredential | Self::Unauthorized(_) | Self::Url(_) => false,
            Self::Status { status } => *status >= 500 || *status == 429,
            Self::Transport(_) => true,
        }
    }
}

/// Durable snapshot storage addressed by note identity.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Last persisted full-state snapshot, `None` when the note was never saved.
    async fn fetch(&self, note_id: NoteId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the persisted snapshot. Later writes fully supersede earlier ones.
    async fn save(&self, note_id: NoteId, state: Vec<u8>) -> Result<(), StoreError>;

    /// Best-effort write of the denormalized legacy content field.
    async fn mirror_content(
        &self,
        note_id: NoteId,
        content: &LegacyNoteContent,
    ) -> Result<(), StoreError>;

    /// Fire-and-forget snapshot delivery used during teardown. Never reports
    /// failure to the caller.
    async fn beacon(&self, note_id: NoteId, state: Vec<u8>);
}
