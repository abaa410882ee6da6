// REST-backed snapshot store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notesync_common::protocol::rest::{
    note_state_url, note_url, LegacyContentPatch, LegacyNoteContent, SNAPSHOT_CONTENT_TYPE,
};
use notesync_common::types::NoteId;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::{SnapshotStore, StoreError};
use crate::credential::CredentialSource;

const BEACON_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HttpSnapshotStore {
    client: Client,
    api_base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpSnapshotStore {
    pub fn new(api_base_url: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self::with_client(Client::new(), api_base_url, credentials)
    }

    pub fn with_client(
        client: Client,
        api_base_url: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self { client, api_base_url: api_base_url.into(), credentials }
    }

    fn bearer(&self) -> Result<String, StoreError> {
        match self.credentials.bearer_token() {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(StoreError::MissingCredential),
            Err(error) => {
                warn!(error = %error, "credential lookup failed");
                Err(StoreError::MissingCredential)
            }
        }
    }

    fn state_url(&self, note_id: NoteId) -> Result<Url, StoreError> {
        note_state_url(&self.api_base_url, note_id).map_err(|e| StoreError::Url(e.to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        Ok(request.bearer_auth(self.bearer()?))
    }

    fn post_state(&self, note_id: NoteId, state: Vec<u8>) -> Result<RequestBuilder, StoreError> {
        let request = self
            .client
            .post(self.state_url(note_id)?)
            .header(CONTENT_TYPE, SNAPSHOT_CONTENT_TYPE)
            .body(state);
        self.authorized(request)
    }
}

fn transport_error(error: reqwest::Error) -> StoreError {
    StoreError::Transport(error.to_string())
}

fn check_status(response: &Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StoreError::Unauthorized(status.as_u16()));
    }
    Err(StoreError::Status { status: status.as_u16() })
}

#[async_trait]
impl SnapshotStore for HttpSnapshotStore {
    async fn fetch(&self, note_id: NoteId) -> Result<Option<Vec<u8>>, StoreError> {
        let request = self.authorized(self.client.get(self.state_url(note_id)?))?;
        let response = request.send().await.map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%note_id, "no persisted snapshot");
            return Ok(None);
        }
        check_status(&response)?;

        let body = response.bytes().await.map_err(transport_error)?;
        debug!(%note_id, bytes = body.len(), "fetched snapshot");
        Ok(Some(body.to_vec()))
    }

    async fn save(&self, note_id: NoteId, state: Vec<u8>) -> Result<(), StoreError> {
        let bytes = state.len();
        let response = self.post_state(note_id, state)?.send().await.map_err(transport_error)?;
        check_status(&response)?;
        debug!(%note_id, bytes, "saved snapshot");
        Ok(())
    }

    async fn mirror_content(
        &self,
        note_id: NoteId,
        content: &LegacyNoteContent,
    ) -> Result<(), StoreError> {
        let url = note_url(&self.api_base_url, note_id).map_err(|e| StoreError::Url(e.to_string()))?;
        let body = LegacyContentPatch { content: content.clone() };
        let request = self.authorized(self.client.patch(url).json(&body))?;
        let response = request.send().await.map_err(transport_error)?;
        check_status(&response)
    }

    async fn beacon(&self, note_id: NoteId, state: Vec<u8>) {
        let request = match self.post_state(note_id, state) {
            Ok(request) => request.timeout(BEACON_TIMEOUT),
            Err(error) => {
                debug!(%note_id, error = %error, "beacon not sent");
                return;
            }
        };
        match request.send().await {
            Ok(response) => debug!(%note_id, status = %response.status(), "beacon delivered"),
            Err(error) => debug!(%note_id, error = %error, "beacon failed"),
        }
    }
}
