use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::store::{CandidateEntry, CreateOutcome, SignalingStore};
use super::{CandidateCollection, CandidateDocument, RoomDocument, RoomPatch, SessionSdp};
use crate::error::Result;

/// Store access scoped to one room document and its two candidate
/// collections. Holds no state beyond the store handle; subscriptions live as
/// long as their receivers.
#[derive(Clone)]
pub struct SignalingChannel {
    store: Arc<dyn SignalingStore>,
    room_id: String,
}

impl SignalingChannel {
    pub fn new(store: Arc<dyn SignalingStore>, room_id: impl Into<String>) -> Self {
        Self {
            store,
            room_id: room_id.into(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn read_room(&self) -> Result<Option<RoomDocument>> {
        self.store.get_room(&self.room_id).await
    }

    /// Atomic create-if-absent; the caller becomes Host only on `Created`.
    pub async fn create_room(&self, room: RoomDocument) -> Result<CreateOutcome> {
        self.store.create_room(room).await
    }

    pub async fn publish_offer(&self, offer: SessionSdp) -> Result<()> {
        self.store
            .update_room(&self.room_id, RoomPatch::offer(offer))
            .await
    }

    pub async fn publish_answer(&self, answer: SessionSdp) -> Result<()> {
        self.store
            .update_room(&self.room_id, RoomPatch::answer(answer))
            .await
    }

    pub async fn append_candidate(
        &self,
        collection: CandidateCollection,
        candidate: CandidateDocument,
    ) -> Result<String> {
        self.store
            .append_candidate(&self.room_id, collection, candidate)
            .await
    }

    /// Subscribes to the room document. The store may redeliver the same
    /// logical state; handlers downstream must be idempotent.
    pub async fn watch_room(&self) -> Result<mpsc::UnboundedReceiver<RoomDocument>> {
        self.store.watch_room(&self.room_id).await
    }

    /// Subscribes to a candidate collection, guaranteeing each entry is
    /// delivered at most once per subscription even when the store replays
    /// the full existing set after a reconnect.
    pub async fn watch_candidates(
        &self,
        collection: CandidateCollection,
    ) -> Result<mpsc::UnboundedReceiver<CandidateEntry>> {
        let mut inner = self.store.watch_candidates(&self.room_id, collection).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        // The filter exits, dropping the store-level receiver, as soon as the
        // downstream receiver goes away; the subscription must not outlive
        // its consumer
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                tokio::select! {
                    entry = inner.recv() => {
                        let Some(entry) = entry else { break };
                        if !seen.insert(entry.entry_id.clone()) {
                            tracing::debug!(entry_id = %entry.entry_id, "Skipping replayed candidate entry");
                            continue;
                        }
                        if tx.send(entry).is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
        });

        Ok(rx)
    }
}
