// Connection controller: binds one replica to one live transport link.
//
// Inbound y-sync frames are applied with origin `remote`; every other
// replica update is forwarded to the room. The link is re-established by the
// transport's reconnect policy until the credential is rejected or the
// controller is dropped.

use std::sync::Arc;

use notesync_common::crdt::origin::ReplicaOrigin;
use notesync_common::types::{ConnectionStatus, NoteId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use yrs::encoding::read::Cursor;
use yrs::sync::{Message, MessageReader, SyncMessage};
use yrs::updates::decoder::DecoderV1;
use yrs::updates::encoder::Encode;
use yrs::Subscription;

use super::transport::{Transport, TransportError, TransportLink};
use crate::credential::CredentialSource;
use crate::engine::replica::Replica;
use crate::session::SessionError;

pub struct ConnectionController {
    note_id: NoteId,
    status: watch::Receiver<ConnectionStatus>,
    error: watch::Receiver<Option<SessionError>>,
    status_tx: Option<Arc<watch::Sender<ConnectionStatus>>>,
    task: Option<JoinHandle<()>>,
    _subscription: Option<Subscription>,
}

impl ConnectionController {
    /// Start the connect loop for `note_id`. Must be called from within a
    /// tokio runtime.
    pub fn open(
        note_id: NoteId,
        replica: Arc<Replica>,
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let token = match credentials.bearer_token() {
            Ok(Some(token)) => Some(token),
            Ok(None) => None,
            Err(error) => {
                warn!(%note_id, error = %error, "credential lookup failed");
                None
            }
        };
        let Some(token) = token else {
            warn!(%note_id, "no bearer credential; live sync disabled");
            let (_, status) = watch::channel(ConnectionStatus::Disconnected);
            let (_, error) = watch::channel(Some(SessionError::MissingCredential));
            return Self {
                note_id,
                status,
                error,
                status_tx: None,
                task: None,
                _subscription: None,
            };
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let subscription = replica
            .observe_updates(move |origin, update| {
                if origin.is_forwarded() {
                    let _ = outbound_tx.send(update.to_vec());
                }
            })
            .map_err(|error| warn!(%note_id, error = %error, "failed to observe replica"))
            .ok();

        // The attempt is underway as soon as the task exists.
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
        let status_tx = Arc::new(status_tx);
        let (error_tx, error) = watch::channel(None);
        let task = tokio::spawn(run(ConnectionTask {
            note_id,
            token,
            replica,
            transport,
            outbound: outbound_rx,
            status: Arc::clone(&status_tx),
            error: error_tx,
        }));

        Self {
            note_id,
            status,
            error,
            status_tx: Some(status_tx),
            task: Some(task),
            _subscription: subscription,
        }
    }

    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn watch_error(&self) -> watch::Receiver<Option<SessionError>> {
        self.error.clone()
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(status) = self.status_tx.take() {
            status.send_replace(ConnectionStatus::Disconnected);
        }
    }
}

struct ConnectionTask {
    note_id: NoteId,
    token: String,
    replica: Arc<Replica>,
    transport: Arc<dyn Transport>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    error: watch::Sender<Option<SessionError>>,
}

async fn run(mut task: ConnectionTask) {
    let note_id = task.note_id;
    let policy = task.transport.reconnect_policy();
    let mut consecutive_failures = 0u32;

    loop {
        task.status.send_replace(ConnectionStatus::Connecting);

        let outcome = match task.transport.connect(note_id, &task.token).await {
            Ok(mut link) => {
                let outcome = session(&mut task, link.as_mut(), &mut consecutive_failures).await;
                link.close().await;
                outcome
            }
            Err(error) => Err(error),
        };
        task.status.send_replace(ConnectionStatus::Disconnected);

        match outcome {
            Ok(()) => info!(%note_id, "live link closed"),
            Err(TransportError::Rejected(reason)) => {
                warn!(%note_id, %reason, "credential rejected; live sync stopped");
                task.error.send_replace(Some(SessionError::CredentialRejected(reason)));
                return;
            }
            Err(TransportError::Io(reason)) => warn!(%note_id, %reason, "live link failed"),
        }

        consecutive_failures = consecutive_failures.saturating_add(1);
        if !policy.should_reconnect(consecutive_failures) {
            warn!(%note_id, consecutive_failures, "giving up on live link");
            return;
        }
        let delay = policy.delay_for(consecutive_failures);
        debug!(%note_id, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

/// Handshake, then pump frames in both directions until the link ends.
async fn session(
    task: &mut ConnectionTask,
    link: &mut dyn TransportLink,
    consecutive_failures: &mut u32,
) -> Result<(), TransportError> {
    // The handshake below covers anything queued while disconnected.
    while task.outbound.try_recv().is_ok() {}

    let step1 = Message::Sync(SyncMessage::SyncStep1(task.replica.state_vector())).encode_v1();
    link.send(step1).await?;

    task.status.send_replace(ConnectionStatus::Connected);
    *consecutive_failures = 0;
    info!(note_id = %task.note_id, "live link connected");

    loop {
        tokio::select! {
            frame = link.recv() => {
                let Some(payload) = frame? else {
                    return Ok(());
                };
                for reply in handle_frame(task.note_id, &task.replica, &payload)? {
                    link.send(reply).await?;
                }
            }
            update = task.outbound.recv() => {
                let Some(update) = update else {
                    return Ok(());
                };
                link.send(Message::Sync(SyncMessage::Update(update)).encode_v1()).await?;
            }
        }
    }
}

/// Apply one inbound frame; returns the replies to send back.
fn handle_frame(
    note_id: NoteId,
    replica: &Replica,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>, TransportError> {
    let mut replies = Vec::new();
    let mut decoder = DecoderV1::new(Cursor::new(payload));
    let mut reader = MessageReader::new(&mut decoder);

    while let Some(next_message) = reader.next() {
        let message = match next_message {
            Ok(message) => message,
            Err(error) => {
                warn!(%note_id, error = %error, "dropping malformed y-sync frame");
                break;
            }
        };
        match message {
            Message::Sync(SyncMessage::SyncStep1(state_vector)) => {
                let diff = replica.diff_since(&state_vector);
                replies.push(Message::Sync(SyncMessage::SyncStep2(diff)).encode_v1());
            }
            Message::Sync(SyncMessage::SyncStep2(update))
            | Message::Sync(SyncMessage::Update(update)) => {
                if let Err(error) = replica.apply_update(&update, ReplicaOrigin::Remote) {
                    warn!(%note_id, error = %error, "failed to apply peer update");
                }
            }
            Message::Auth(Some(reason)) => return Err(TransportError::Rejected(reason)),
            _ => {}
        }
    }

    Ok(replies)
}
