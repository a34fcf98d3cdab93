// Integration tests for the signaling and negotiation coordinator
// These run two real sessions against the in-process store. Everything here
// is local: offers, answers and candidates only cross the MemoryStore. The
// full transport handshake is exercised by the ignored end-to-end test, which
// needs working UDP networking.

use std::sync::Arc;

use tokio::time::{sleep, timeout, Duration};

use p2p_chat::signaling::RoomDocument;
use p2p_chat::{
    ChatClient, ChatError, ConnectionStatus, IceConfig, MemoryStore, Role, Session,
    SignalingStore, User,
};

async fn wait_for_room(
    store: &Arc<MemoryStore>,
    room_id: &str,
    pred: impl Fn(&RoomDocument) -> bool,
) -> RoomDocument {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(room) = store.get_room(room_id).await.unwrap() {
                if pred(&room) {
                    return room;
                }
            }
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("room never reached the expected state")
}

#[tokio::test]
async fn test_two_joiners_split_roles() {
    let store = MemoryStore::new();
    let ice = IceConfig::default();

    let (a, b) = tokio::join!(
        Session::join(store.clone(), &ice, User::new("user-a"), "fresh-1"),
        Session::join(store.clone(), &ice, User::new("user-b"), "fresh-1"),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let roles = [a.role(), b.role()];
    assert_eq!(roles.iter().filter(|r| **r == Role::Host).count(), 1);
    assert_eq!(roles.iter().filter(|r| **r == Role::Guest).count(), 1);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_handshake_reaches_answer_through_store() {
    let store = MemoryStore::new();
    let ice = IceConfig::default();

    let host = Session::join(store.clone(), &ice, User::new("user-a"), "alpha-1")
        .await
        .unwrap();
    assert_eq!(host.role(), Role::Host);

    // The Host writes its offer and identity before join returns
    let room = wait_for_room(&store, "alpha-1", |r| r.offer.is_some()).await;
    assert_eq!(room.host_id, "user-a");
    assert_eq!(room.offer.as_ref().unwrap().sdp_type, "offer");
    assert!(room.answer.is_none());

    let guest = Session::join(store.clone(), &ice, User::new("user-b"), "alpha-1")
        .await
        .unwrap();
    assert_eq!(guest.role(), Role::Guest);

    // The Guest observes the offer and answers through the store
    let room = wait_for_room(&store, "alpha-1", |r| r.answer.is_some()).await;
    assert_eq!(room.answer.as_ref().unwrap().sdp_type, "answer");

    host.close().await;
    guest.close().await;
}

#[tokio::test]
async fn test_third_joiner_rejected_when_room_paired() {
    let store = MemoryStore::new();
    let ice = IceConfig::default();

    let host = Session::join(store.clone(), &ice, User::new("user-a"), "beta-1")
        .await
        .unwrap();
    let guest = Session::join(store.clone(), &ice, User::new("user-b"), "beta-1")
        .await
        .unwrap();
    wait_for_room(&store, "beta-1", |r| r.answer.is_some()).await;

    let err = Session::join(store.clone(), &ice, User::new("user-c"), "beta-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::RoomFull(_)));

    host.close().await;
    guest.close().await;
}

#[tokio::test]
async fn test_rejoin_follows_document_state_not_identity() {
    let store = MemoryStore::new();
    let ice = IceConfig::default();

    let first = Session::join(store.clone(), &ice, User::new("user-a"), "gamma-1")
        .await
        .unwrap();
    assert_eq!(first.role(), Role::Host);
    first.close().await;

    // The room document outlives the session, so the same user comes back
    // as Guest
    let again = Session::join(store.clone(), &ice, User::new("user-a"), "gamma-1")
        .await
        .unwrap();
    assert_eq!(again.role(), Role::Guest);
    again.close().await;
}

#[tokio::test]
async fn test_closed_session_rejects_sends_and_stays_disconnected() {
    let store = MemoryStore::new();
    let ice = IceConfig::default();

    let session = Session::join(store.clone(), &ice, User::new("user-a"), "delta-1")
        .await
        .unwrap();
    assert_eq!(session.status(), ConnectionStatus::Connecting);

    session.close().await;
    session.close().await; // idempotent

    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(matches!(
        session.send_message("too late"),
        Err(ChatError::ChannelNotReady)
    ));
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn test_client_switches_rooms_without_leaking_sessions() {
    let store = MemoryStore::new();
    let mut client = ChatClient::new(store.clone(), IceConfig::default(), User::new("user-a"));

    assert_eq!(client.join("room-1").await.unwrap(), Role::Host);
    let old_status = client.watch_status().unwrap();

    assert_eq!(client.join("room-2").await.unwrap(), Role::Host);

    // The replaced session was fully torn down
    assert_eq!(*old_status.borrow(), ConnectionStatus::Disconnected);
    assert_eq!(client.status(), ConnectionStatus::Connecting);

    // Rooms persist in the store after the sessions that made them
    assert!(store.get_room("room-1").await.unwrap().is_some());

    client.leave().await;
    client.leave().await; // idempotent
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert!(matches!(
        client.send_message("nobody home"),
        Err(ChatError::ChannelNotReady)
    ));
}

/// Full end-to-end chat across a real transport.
/// Needs working UDP networking between the two local peer connections, so it
/// is ignored in environments without it. Run with `cargo test -- --ignored`.
#[tokio::test]
#[ignore]
async fn test_end_to_end_chat() {
    let store = MemoryStore::new();
    let ice = IceConfig::default();

    let a = Session::join(store.clone(), &ice, User::with_name("user-a", "Alice"), "e2e-1")
        .await
        .unwrap();
    let b = Session::join(store.clone(), &ice, User::with_name("user-b", "Bob"), "e2e-1")
        .await
        .unwrap();

    let mut a_status = a.watch_status();
    let mut b_status = b.watch_status();
    timeout(Duration::from_secs(20), async {
        while *a_status.borrow() != ConnectionStatus::Connected {
            a_status.changed().await.unwrap();
        }
        while *b_status.borrow() != ConnectionStatus::Connected {
            b_status.changed().await.unwrap();
        }
    })
    .await
    .expect("peers never connected");

    a.send_message("hello").unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            let received = b.messages();
            if !received.is_empty() {
                assert_eq!(received.len(), 1);
                assert_eq!(received[0].text, "hello");
                assert_eq!(received[0].sender_id, "user-a");
                assert_eq!(received[0].sender_name, "Alice");
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("message never arrived");

    // The sender's own bus got exactly the optimistic local append
    assert_eq!(a.messages().len(), 1);

    a.close().await;
    b.close().await;
}
