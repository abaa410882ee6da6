// Standalone runtime: one note session until Ctrl-C, then a bounded
// teardown flush.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notesync_common::types::NoteId;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::credential::CredentialSource;
use crate::session::{SessionHandle, SessionManager};
use crate::store::HttpSnapshotStore;
use crate::sync::WsTransport;

/// How long teardown waits for the final flush.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub fn build_manager(
    config: &ClientConfig,
    credentials: Arc<dyn CredentialSource>,
) -> Result<SessionManager> {
    config.validate().context("invalid client configuration")?;
    let store = HttpSnapshotStore::new(config.api_base_url.clone(), Arc::clone(&credentials));
    let transport = WsTransport::new(config.ws_base_url.clone());
    Ok(SessionManager::new(Arc::new(store), Arc::new(transport), credentials)
        .with_autosave_config(config.autosave_config()))
}

/// Open `note_id` and keep it live until Ctrl-C.
pub async fn run_note(
    config: &ClientConfig,
    credentials: Arc<dyn CredentialSource>,
    note_id: NoteId,
    initial_title: Option<&str>,
) -> Result<()> {
    let manager = build_manager(config, credentials)?;
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for ctrl-c");
        }
    };
    run_until(manager, note_id, initial_title, ctrl_c, SHUTDOWN_GRACE).await;
    Ok(())
}

async fn run_until<F>(
    mut manager: SessionManager,
    note_id: NoteId,
    initial_title: Option<&str>,
    shutdown: F,
    grace: Duration,
) where
    F: Future<Output = ()>,
{
    let handle = manager.open_session(note_id, initial_title);
    tokio::pin!(shutdown);

    tokio::select! {
        _ = &mut shutdown => {}
        _ = report_session(handle) => {}
    }

    info!(%note_id, "shutting down");
    manager.shutdown(grace).await;
}

/// Log connection transitions and session errors until the session ends.
async fn report_session(handle: SessionHandle) {
    let note_id = handle.note_id();
    let mut status = handle.watch_status();
    let mut error = handle.watch_error();
    if let Some(error) = handle.error() {
        warn!(%note_id, error = %error, "session degraded");
    }

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(%note_id, status = %current, "connection status");
            }
            changed = error.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(error) = error.borrow_and_update().clone() {
                    warn!(%note_id, error = %error, "session degraded");
                }
            }
        }
    }

    // Live link is gone for good; the replica and autosave stay up.
    std::future::pending::<()>().await;
}
