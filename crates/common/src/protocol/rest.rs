// REST routes and bodies for the durable note store.
//
// GET   {base}/notes/{id}/state   -> binary replica snapshot, 404 when absent
// POST  {base}/notes/{id}/state   -> replace the snapshot (binary body)
// PATCH {base}/notes/{id}         -> legacy JSON content mirror

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::types::NoteId;

pub const SNAPSHOT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("invalid base url `{value}`: {reason}")]
    Invalid { value: String, reason: String },
    #[error("{field} must use {secure} ({insecure} is allowed only for localhost testing)")]
    Insecure { field: &'static str, secure: &'static str, insecure: &'static str },
    #[error("base url `{0}` cannot carry path segments")]
    CannotBeABase(String),
}

/// `{base}/notes/{id}/state`
pub fn note_state_url(api_base_url: &str, note_id: NoteId) -> Result<Url, UrlError> {
    let id = note_id.to_string();
    join_segments(api_base_url, &["notes", id.as_str(), "state"])
}

/// `{base}/notes/{id}`
pub fn note_url(api_base_url: &str, note_id: NoteId) -> Result<Url, UrlError> {
    let id = note_id.to_string();
    join_segments(api_base_url, &["notes", id.as_str()])
}

/// Reject plaintext API bases unless they point at a loopback host.
pub fn validate_api_base_url(value: &str) -> Result<(), UrlError> {
    validate_scheme(value, "api_base_url", "https", "http")
}

pub(crate) fn join_segments(base: &str, segments: &[&str]) -> Result<Url, UrlError> {
    let mut url = parse(base)?;
    url.path_segments_mut()
        .map_err(|()| UrlError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn validate_scheme(
    value: &str,
    field: &'static str,
    secure: &'static str,
    insecure: &'static str,
) -> Result<(), UrlError> {
    let parsed = parse(value)?;
    if parsed.scheme() == secure {
        return Ok(());
    }
    if parsed.scheme() == insecure && is_loopback_host(parsed.host_str()) {
        return Ok(());
    }
    Err(UrlError::Insecure { field, secure, insecure })
}

fn parse(value: &str) -> Result<Url, UrlError> {
    Url::parse(value)
        .map_err(|error| UrlError::Invalid { value: value.to_string(), reason: error.to_string() })
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| addr.is_loopback())
}

/// Read-friendly projection of a note, written to the legacy `content` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LegacyNoteContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub blocks: Vec<String>,
}

/// Body of `PATCH /notes/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyContentPatch {
    pub content: LegacyNoteContent,
}
