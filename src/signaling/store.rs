use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};

use super::{CandidateCollection, CandidateDocument, RoomDocument, RoomPatch};
use crate::error::{ChatError, Result};

/// Outcome of an atomic create-if-absent on a room document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// One entry delivered by a candidate-collection subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    pub entry_id: String,
    pub candidate: CandidateDocument,
}

/// Document store boundary: document-level get/create/update, sub-collection
/// append, and two subscription primitives.
///
/// `create_room` is atomic create-if-absent, which is what keeps role
/// determination race-free when two peers join a fresh room at the same time.
/// A room subscription may redeliver the same logical state (for example on a
/// reconnect to the store); consumers must tolerate that. A candidate
/// subscription yields per-entry "added" events; dropping the receiver ends
/// the subscription.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomDocument>>;

    async fn create_room(&self, room: RoomDocument) -> Result<CreateOutcome>;

    async fn update_room(&self, room_id: &str, patch: RoomPatch) -> Result<()>;

    /// Appends to a per-room candidate collection, returning the entry id the
    /// store assigned.
    async fn append_candidate(
        &self,
        room_id: &str,
        collection: CandidateCollection,
        candidate: CandidateDocument,
    ) -> Result<String>;

    /// Watches one room document. Delivers the current snapshot first when the
    /// room already exists, then every subsequent update.
    async fn watch_room(&self, room_id: &str) -> Result<mpsc::UnboundedReceiver<RoomDocument>>;

    /// Watches one candidate collection. Existing entries are delivered as
    /// "added" events first, then each new append, once per entry per
    /// subscription.
    async fn watch_candidates(
        &self,
        room_id: &str,
        collection: CandidateCollection,
    ) -> Result<mpsc::UnboundedReceiver<CandidateEntry>>;
}

#[derive(Default)]
struct RoomSlot {
    doc: Option<RoomDocument>,
    candidates: HashMap<CandidateCollection, Vec<CandidateEntry>>,
    room_watchers: Vec<mpsc::UnboundedSender<RoomDocument>>,
    candidate_watchers: HashMap<CandidateCollection, Vec<mpsc::UnboundedSender<CandidateEntry>>>,
}

impl RoomSlot {
    fn notify_room(&mut self) {
        if let Some(doc) = self.doc.clone() {
            self.room_watchers
                .retain(|watcher| watcher.send(doc.clone()).is_ok());
        }
    }

    fn notify_candidate(&mut self, collection: CandidateCollection, entry: &CandidateEntry) {
        if let Some(watchers) = self.candidate_watchers.get_mut(&collection) {
            watchers.retain(|watcher| watcher.send(entry.clone()).is_ok());
        }
    }
}

/// In-process signaling store used by tests and the demo binary. Implements
/// the same atomicity and subscription semantics the trait requires of a real
/// backing store.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, RoomSlot>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn generate_entry_id() -> String {
        let mut rng = rand::thread_rng();
        format!("{:016x}", rng.gen::<u64>())
    }

    /// Simulates the store redelivering the current room snapshot to every
    /// active subscription, as happens after a reconnect.
    pub async fn redeliver_room(&self, room_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(slot) = rooms.get_mut(room_id) {
            slot.notify_room();
        }
    }

    /// Number of registered candidate-collection watchers. Watchers whose
    /// receiver is gone are pruned on the next delivery attempt.
    pub async fn candidate_watcher_count(
        &self,
        room_id: &str,
        collection: CandidateCollection,
    ) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .and_then(|slot| slot.candidate_watchers.get(&collection))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Simulates a reconnecting subscription being re-invoked with the full
    /// existing entry set of a candidate collection.
    pub async fn redeliver_candidates(&self, room_id: &str, collection: CandidateCollection) {
        let mut rooms = self.rooms.write().await;
        if let Some(slot) = rooms.get_mut(room_id) {
            let entries = slot.candidates.get(&collection).cloned().unwrap_or_default();
            for entry in &entries {
                slot.notify_candidate(collection, entry);
            }
        }
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomDocument>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room_id).and_then(|slot| slot.doc.clone()))
    }

    async fn create_room(&self, room: RoomDocument) -> Result<CreateOutcome> {
        let mut rooms = self.rooms.write().await;
        let slot = rooms.entry(room.room_id.clone()).or_default();

        if slot.doc.is_some() {
            return Ok(CreateOutcome::AlreadyExists);
        }

        tracing::info!(room_id = %room.room_id, host_id = %room.host_id, "Room created");
        slot.doc = Some(room);
        slot.notify_room();
        Ok(CreateOutcome::Created)
    }

    async fn update_room(&self, room_id: &str, patch: RoomPatch) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let slot = rooms
            .get_mut(room_id)
            .filter(|slot| slot.doc.is_some())
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;

        if let Some(doc) = slot.doc.as_mut() {
            if let Some(offer) = patch.offer {
                doc.offer = Some(offer);
            }
            if let Some(answer) = patch.answer {
                doc.answer = Some(answer);
            }
        }
        slot.notify_room();
        Ok(())
    }

    async fn append_candidate(
        &self,
        room_id: &str,
        collection: CandidateCollection,
        candidate: CandidateDocument,
    ) -> Result<String> {
        let mut rooms = self.rooms.write().await;
        let slot = rooms.entry(room_id.to_string()).or_default();

        let entry = CandidateEntry {
            entry_id: Self::generate_entry_id(),
            candidate,
        };
        slot.candidates
            .entry(collection)
            .or_default()
            .push(entry.clone());
        slot.notify_candidate(collection, &entry);
        Ok(entry.entry_id)
    }

    async fn watch_room(&self, room_id: &str) -> Result<mpsc::UnboundedReceiver<RoomDocument>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = self.rooms.write().await;
        let slot = rooms.entry(room_id.to_string()).or_default();
        if let Some(doc) = slot.doc.clone() {
            let _ = tx.send(doc);
        }
        slot.room_watchers.push(tx);
        Ok(rx)
    }

    async fn watch_candidates(
        &self,
        room_id: &str,
        collection: CandidateCollection,
    ) -> Result<mpsc::UnboundedReceiver<CandidateEntry>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = self.rooms.write().await;
        let slot = rooms.entry(room_id.to_string()).or_default();
        for entry in slot.candidates.entry(collection).or_default().iter() {
            let _ = tx.send(entry.clone());
        }
        slot.candidate_watchers
            .entry(collection)
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SessionSdp;

    fn sample_candidate(n: u16) -> CandidateDocument {
        CandidateDocument {
            candidate: format!("candidate:{n} 1 udp 2130706431 192.0.2.1 {} typ host", 50000 + n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn test_create_room_is_atomic() {
        let store = MemoryStore::new();
        let a = store.create_room(RoomDocument::new("r1", "user-a", 1)).await.unwrap();
        let b = store.create_room(RoomDocument::new("r1", "user-b", 2)).await.unwrap();

        assert_eq!(a, CreateOutcome::Created);
        assert_eq!(b, CreateOutcome::AlreadyExists);

        // The losing create must not have overwritten the host
        let room = store.get_room("r1").await.unwrap().unwrap();
        assert_eq!(room.host_id, "user-a");
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_winner() {
        let store = MemoryStore::new();
        let (a, b) = tokio::join!(
            store.create_room(RoomDocument::new("r2", "user-a", 1)),
            store.create_room(RoomDocument::new("r2", "user-b", 1)),
        );

        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|o| **o == CreateOutcome::Created).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_missing_room_fails() {
        let store = MemoryStore::new();
        let err = store
            .update_room("nope", RoomPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_watch_room_delivers_snapshot_then_updates() {
        let store = MemoryStore::new();
        store.create_room(RoomDocument::new("r3", "user-a", 1)).await.unwrap();

        let mut rx = store.watch_room("r3").await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.host_id, "user-a");
        assert!(snapshot.answer.is_none());

        let answer = SessionSdp {
            sdp_type: "answer".to_string(),
            sdp: "v=0\r\n".to_string(),
        };
        store
            .update_room("r3", RoomPatch::answer(answer.clone()))
            .await
            .unwrap();
        let updated = rx.recv().await.unwrap();
        assert_eq!(updated.answer, Some(answer));
    }

    #[tokio::test]
    async fn test_watch_candidates_replays_existing_then_new() {
        let store = MemoryStore::new();
        store
            .append_candidate("r4", CandidateCollection::Offer, sample_candidate(1))
            .await
            .unwrap();

        let mut rx = store
            .watch_candidates("r4", CandidateCollection::Offer)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().candidate, sample_candidate(1));

        store
            .append_candidate("r4", CandidateCollection::Offer, sample_candidate(2))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().candidate, sample_candidate(2));

        // Partitioned: nothing from the answer collection arrives here
        store
            .append_candidate("r4", CandidateCollection::Answer, sample_candidate(3))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_redeliver_room_repeats_current_state() {
        let store = MemoryStore::new();
        store.create_room(RoomDocument::new("r5", "user-a", 1)).await.unwrap();

        let mut rx = store.watch_room("r5").await.unwrap();
        let first = rx.recv().await.unwrap();

        store.redeliver_room("r5").await;
        let second = rx.recv().await.unwrap();
        assert_eq!(first, second);
    }
}
