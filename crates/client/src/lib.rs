// notesync-client library entry point.

pub mod autosave;
pub mod config;
pub mod credential;
pub mod engine;
pub mod runtime;
pub mod session;
pub mod store;
pub mod sync;
