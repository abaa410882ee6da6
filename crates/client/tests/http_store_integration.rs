mod support;

use std::sync::Arc;

use notesync_client::credential::StaticCredentials;
use notesync_client::engine::replica::Replica;
use notesync_client::store::{HttpSnapshotStore, SnapshotStore, StoreError};
use notesync_common::protocol::rest::LegacyNoteContent;
use notesync_common::types::NoteId;
use serde_json::json;
use support::FakeNoteApi;

async fn store_with_token(token: &str) -> (FakeNoteApi, HttpSnapshotStore) {
    let api = FakeNoteApi::new("secret");
    let addr = api.clone().serve().await;
    let store =
        HttpSnapshotStore::new(format!("http://{addr}"), Arc::new(StaticCredentials::new(token)));
    (api, store)
}

#[tokio::test]
async fn save_then_fetch_returns_same_snapshot() {
    let (api, store) = store_with_token("secret").await;
    let note = NoteId::new(7);

    assert_eq!(store.fetch(note).await.expect("fetch should succeed"), None);

    let replica = Replica::with_client_id(1);
    replica.push_block("milk");
    replica.push_block("eggs");
    replica.set_title("Groceries");
    store.save(note, replica.encode_state()).await.expect("save should succeed");

    let fetched = store.fetch(note).await.expect("fetch should succeed").expect("snapshot exists");
    let restored = Replica::from_state(&fetched).expect("snapshot should decode");
    assert_eq!(restored.content(), vec!["milk", "eggs"]);
    assert_eq!(restored.title().as_deref(), Some("Groceries"));
    assert_eq!(api.post_count(), 1);
}

#[tokio::test]
async fn later_save_supersedes_earlier() {
    let (api, store) = store_with_token("secret").await;
    let note = NoteId::new(3);

    store.save(note, vec![1, 2, 3]).await.unwrap();
    store.save(note, vec![4, 5]).await.unwrap();
    assert_eq!(api.snapshot(3), Some(vec![4, 5]));
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let (_api, store) = store_with_token("wrong").await;

    let error = store.fetch(NoteId::new(1)).await.expect_err("fetch should be rejected");
    assert!(matches!(error, StoreError::Unauthorized(401)));
    assert!(!error.retryable());

    let error = store.save(NoteId::new(1), vec![0]).await.expect_err("save should be rejected");
    assert!(matches!(error, StoreError::Unauthorized(401)));
}

#[tokio::test]
async fn mirror_patches_legacy_json_content() {
    let (api, store) = store_with_token("secret").await;
    let content = LegacyNoteContent {
        title: Some("Groceries".to_string()),
        blocks: vec!["milk".to_string(), "eggs".to_string()],
    };

    store.mirror_content(NoteId::new(9), &content).await.expect("patch should succeed");

    let patches = api.patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].0, 9);
    assert_eq!(
        patches[0].1,
        json!({ "content": { "title": "Groceries", "blocks": ["milk", "eggs"] } })
    );
}

#[tokio::test]
async fn beacon_delivers_snapshot() {
    let (api, store) = store_with_token("secret").await;
    store.beacon(NoteId::new(4), vec![9, 9, 9]).await;
    assert_eq!(api.snapshot(4), Some(vec![9, 9, 9]));
}

#[tokio::test]
async fn unreachable_server_is_retryable_transport_error() {
    let store =
        HttpSnapshotStore::new("http://127.0.0.1:9", Arc::new(StaticCredentials::new("secret")));
    let error = store.fetch(NoteId::new(1)).await.expect_err("fetch should fail");
    assert!(matches!(error, StoreError::Transport(_)));
    assert!(error.retryable());

    store.beacon(NoteId::new(1), vec![1]).await;
}

#[tokio::test]
async fn missing_credential_sends_nothing() {
    let api = FakeNoteApi::new("secret");
    let addr = api.clone().serve().await;
    let store = HttpSnapshotStore::new(format!("http://{addr}"), Arc::new(StaticCredentials::none()));

    let error = store.save(NoteId::new(1), vec![1]).await.expect_err("save needs a credential");
    assert!(matches!(error, StoreError::MissingCredential));
    assert_eq!(api.post_count(), 0);
}
