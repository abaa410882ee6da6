// Note replica backed by a yrs document.
//
// Two logical regions: `content`, an ordered array of text blocks, and
// `meta.title`, a single-value register. Every write opens a transaction
// tagged with a `ReplicaOrigin` so observers can tell local edits from peer
// traffic and snapshot loads.

use anyhow::{Context, Result};
use notesync_common::crdt::origin::ReplicaOrigin;
use notesync_common::protocol::rest::LegacyNoteContent;
use tracing::trace;
use yrs::updates::decoder::Decode;
use yrs::{
    Array, ArrayRef, Doc, Map, MapRef, ReadTxn, StateVector, Subscription, Transact, Update,
};

const CONTENT_REGION: &str = "content";
const META_REGION: &str = "meta";
const TITLE_KEY: &str = "title";

/// Locally editable copy of one note.
pub struct Replica {
    doc: Doc,
    content: ArrayRef,
    meta: MapRef,
}

impl Replica {
    /// Create a new empty replica.
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Create a replica with a specific client ID (for deterministic testing).
    pub fn with_client_id(client_id: u64) -> Self {
        let options = yrs::Options { client_id, ..Default::default() };
        Self::from_doc(Doc::with_options(options))
    }

    /// Load a replica from a full-state snapshot.
    pub fn from_state(data: &[u8]) -> Result<Self> {
        let replica = Self::new();
        replica.apply_update(data, ReplicaOrigin::Snapshot)?;
        Ok(replica)
    }

    fn from_doc(doc: Doc) -> Self {
        let content = doc.get_or_insert_array(CONTENT_REGION);
        let meta = doc.get_or_insert_map(META_REGION);
        Self { doc, content, meta }
    }

    /// Merge a binary v1 update produced by any replica of the same note.
    pub fn apply_update(&self, data: &[u8], origin: ReplicaOrigin) -> Result<()> {
        let update = Update::decode_v1(data).context("failed to decode replica update")?;
        self.doc
            .transact_mut_with(origin.as_str())
            .apply_update(update)
            .context("failed to apply replica update")?;
        trace!(%origin, bytes = data.len(), "applied replica update");
        Ok(())
    }

    /// Encode the full replica state (the durable snapshot format).
    pub fn encode_state(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    /// Current state vector.
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Incremental update with everything the holder of `sv` is missing.
    pub fn diff_since(&self, sv: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_diff_v1(sv)
    }

    pub fn content_len(&self) -> u32 {
        self.content.len(&self.doc.transact())
    }

    pub fn is_content_empty(&self) -> bool {
        self.content_len() == 0
    }

    /// Content blocks in document order.
    pub fn content(&self) -> Vec<String> {
        let txn = self.doc.transact();
        self.content.iter(&txn).map(|block| block.to_string(&txn)).collect()
    }

    pub fn push_block(&self, text: &str) {
        let mut txn = self.doc.transact_mut_with(ReplicaOrigin::Local.as_str());
        self.content.push_back(&mut txn, text.to_string());
    }

    pub fn insert_block(&self, index: u32, text: &str) {
        let mut txn = self.doc.transact_mut_with(ReplicaOrigin::Local.as_str());
        self.content.insert(&mut txn, index, text.to_string());
    }

    /// Remove the block at `index`. Returns false when out of range.
    pub fn remove_block(&self, index: u32) -> bool {
        if index >= self.content_len() {
            return false;
        }
        let mut txn = self.doc.transact_mut_with(ReplicaOrigin::Local.as_str());
        self.content.remove(&mut txn, index);
        true
    }

    pub fn title(&self) -> Option<String> {
        let txn = self.doc.transact();
        self.meta.get(&txn, TITLE_KEY).map(|value| value.to_string(&txn))
    }

    pub fn is_title_empty(&self) -> bool {
        self.title().map_or(true, |title| title.is_empty())
    }

    pub fn set_title(&self, title: &str) {
        let mut txn = self.doc.transact_mut_with(ReplicaOrigin::Local.as_str());
        self.meta.insert(&mut txn, TITLE_KEY, title.to_string());
    }

    /// Denormalized projection written to the legacy content field.
    pub fn legacy_content(&self) -> LegacyNoteContent {
        LegacyNoteContent { title: self.title().filter(|t| !t.is_empty()), blocks: self.content() }
    }

    /// Register an observer for every committed update.
    ///
    /// The callback runs while the committing transaction is still open and
    /// must not touch the replica. Dropping the returned subscription
    /// unregisters it.
    pub fn observe_updates<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(ReplicaOrigin, &[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |txn, event| {
                let origin = txn.origin().map(|value| value.as_ref());
                let origin = match ReplicaOrigin::from_origin_bytes(origin) {
                    Ok(origin) => origin,
                    Err(error) => {
                        trace!(%error, "treating foreign transaction origin as local");
                        ReplicaOrigin::Local
                    }
                };
                callback(origin, &event.update);
            })
            .map_err(|error| anyhow::anyhow!("failed to register update observer: {error:?}"))
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}
