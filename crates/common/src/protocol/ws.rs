// Live transport addressing for the y-sync note rooms.
//
// Frames on the socket are y-sync v1 binary messages; only the room address
// and the credential parameter are defined here.

use url::Url;

use super::rest::{join_segments, validate_scheme, UrlError};
use crate::types::NoteId;

/// Query parameter carrying the bearer credential on the upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// `{ws_base}/notes/{id}?token={token}`
pub fn note_ws_url(ws_base_url: &str, note_id: NoteId, token: &str) -> Result<Url, UrlError> {
    let id = note_id.to_string();
    let mut url = join_segments(ws_base_url, &["notes", id.as_str()])?;
    url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
    Ok(url)
}

/// Reject plaintext websocket bases unless they point at a loopback host.
pub fn validate_ws_base_url(value: &str) -> Result<(), UrlError> {
    validate_scheme(value, "ws_base_url", "wss", "ws")
}
