// notesync-common: shared types for the note synchronizer workspace

pub mod crdt;
pub mod protocol;
pub mod types;
