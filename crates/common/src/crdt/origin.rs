use std::fmt;
use thiserror::Error;

/// Transaction origin tags carried on every replica mutation.
///
/// Observers use the tag to decide whether an update must be forwarded to
/// peers (`Local`, `Snapshot`) or persisted by the autosave path (`Local`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaOrigin {
    /// Edits made on this replica by the editing surface.
    Local,
    /// Updates received from peers over the live transport.
    Remote,
    /// The one-shot application of a durable snapshot.
    Snapshot,
}

impl ReplicaOrigin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "notesync-local",
            Self::Remote => "notesync-remote",
            Self::Snapshot => "notesync-snapshot",
        }
    }

    /// Decode a yrs transaction origin. Transactions opened without an origin
    /// count as local edits.
    pub fn from_origin_bytes(bytes: Option<&[u8]>) -> Result<Self, OriginParseError> {
        let Some(bytes) = bytes else {
            return Ok(Self::Local);
        };

        match bytes {
            b"notesync-local" => Ok(Self::Local),
            b"notesync-remote" => Ok(Self::Remote),
            b"notesync-snapshot" => Ok(Self::Snapshot),
            other => Err(OriginParseError::Unknown(String::from_utf8_lossy(other).into_owned())),
        }
    }

    /// Whether updates with this origin travel to peers.
    pub const fn is_forwarded(self) -> bool {
        !matches!(self, Self::Remote)
    }
}

impl fmt::Display for ReplicaOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OriginParseError {
    #[error("unknown transaction origin `{0}`")]
    Unknown(String),
}
