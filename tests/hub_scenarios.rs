use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header};
use roomwire::{
    auth::{Claims, Identity, Principal},
    db,
    rooms::{ServerEvent, SessionGuard},
    store::NewRoom,
    Config, Hub, Store,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

const SECRET: &str = "integration-secret";

struct Harness {
    hub: Arc<Hub>,
    store: Store,
    identity: Identity,
}

impl Harness {
    async fn new() -> Harness {
        let store = Store::new(db::memory_pool().await.unwrap());
        let config = Config { jwt_secret: SECRET.to_owned(), ..Config::default() };
        Harness {
            hub: Hub::new(store.clone(), config),
            identity: Identity::new(SECRET, store.clone()),
            store,
        }
    }

    fn token(user_id: Uuid) -> String {
        let exp = time::OffsetDateTime::now_utc().unix_timestamp() as u64 + 300;
        jsonwebtoken::encode(
            &Header::default(),
            &Claims { user_id, exp },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    /// Registers a user and connects them the way the socket handler does:
    /// token in, principal out, then a session on the hub.
    async fn connect(&self, username: &str) -> (SessionGuard, mpsc::UnboundedReceiver<ServerEvent>) {
        let user = self.store.create_user(username, None).await.unwrap();
        let principal: Principal = self
            .identity
            .authenticate(Some(&Harness::token(user.id)))
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (self.hub.connect(principal, tx).await.unwrap(), rx)
    }

    async fn frame(&self, guard: &SessionGuard, frame: Value) {
        self.hub
            .handle_frame(guard.session(), frame.to_string().as_bytes())
            .await;
    }
}

/// Everything queued so far, as it would go over the wire.
fn wire(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(event) = rx.try_recv() {
        frames.push(serde_json::to_value(&event).unwrap());
    }
    frames
}

fn named<'a>(frames: &'a [Value], event: &str) -> Vec<&'a Value> {
    frames.iter().filter(|frame| frame["event"] == event).collect()
}

#[tokio::test]
async fn a_conversation_over_json_frames() {
    let harness = Harness::new().await;
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (bob, mut bob_rx) = harness.connect("bob").await;

    let room = harness
        .store
        .create_room(NewRoom {
            name: "general".to_owned(),
            description: Some("everyone".to_owned()),
            is_private: false,
            created_by: alice.session().principal.id,
        })
        .await
        .unwrap();

    harness.frame(&alice, json!({ "event": "join_room", "data": { "roomId": room.id } })).await;
    harness.frame(&bob, json!({ "event": "join_room", "data": { "roomId": room.id } })).await;

    let frames = wire(&mut alice_rx);
    assert_eq!(named(&frames, "user_online")[0]["data"]["username"], "bob");
    assert_eq!(named(&frames, "room_joined")[0]["data"]["roomId"], room.id.to_string());
    assert_eq!(named(&frames, "user_joined_room")[0]["data"]["user"]["username"], "bob");
    wire(&mut bob_rx);

    for content in ["M1", "M2", "M3"] {
        harness
            .frame(
                &alice,
                json!({ "event": "send_message", "data": { "roomId": room.id, "content": content } }),
            )
            .await;
    }

    let frames = wire(&mut bob_rx);
    let messages = named(&frames, "new_message");
    let contents: Vec<&str> = messages
        .iter()
        .map(|frame| frame["data"]["message"]["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["M1", "M2", "M3"]);
    assert_eq!(messages[0]["data"]["message"]["messageType"], "text");
    assert_eq!(messages[0]["data"]["message"]["sender"]["username"], "alice");
    wire(&mut alice_rx);

    let first_id = messages[0]["data"]["message"]["id"].clone();
    for _ in 0..2 {
        harness
            .frame(
                &bob,
                json!({ "event": "add_reaction", "data": { "messageId": first_id, "emoji": "👍" } }),
            )
            .await;
    }
    let frames = wire(&mut alice_rx);
    let updates = named(&frames, "message_reaction_updated");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["data"]["message"]["reactions"].as_array().unwrap().len(), 1);
    assert_eq!(updates[0]["data"]["message"]["reactions"][0]["user"]["username"], "bob");
    assert_eq!(updates[1]["data"]["message"]["reactions"].as_array().unwrap().len(), 0);

    harness
        .frame(
            &bob,
            json!({
                "event": "send_message",
                "data": { "roomId": room.id, "content": "agreed", "replyTo": first_id }
            }),
        )
        .await;
    let frames = wire(&mut alice_rx);
    let replies = named(&frames, "new_message");
    let reply = &replies[0]["data"]["message"]["replyTo"];
    assert_eq!(reply["content"], "M1");
    assert_eq!(reply["sender"]["username"], "alice");

    harness.frame(&bob, json!({ "event": "typing_start", "data": { "roomId": room.id } })).await;
    drop(bob);

    let frames = wire(&mut alice_rx);
    let names: Vec<&str> = frames.iter().map(|frame| frame["event"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["user_typing", "user_stopped_typing", "user_offline"]);
}

#[tokio::test]
async fn bad_frames_only_bother_their_sender() {
    let harness = Harness::new().await;
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (_bob, mut bob_rx) = harness.connect("bob").await;
    wire(&mut alice_rx);
    wire(&mut bob_rx);

    harness.frame(&alice, json!({ "event": "levitate", "data": {} })).await;
    harness
        .frame(&alice, json!({ "event": "join_room", "data": { "roomId": Uuid::now_v7() } }))
        .await;

    let frames = wire(&mut alice_rx);
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|frame| frame["event"] == "error"));
    assert_eq!(frames[1]["data"]["message"], "room not found");
    assert!(wire(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn direct_messages_over_json_frames() {
    let harness = Harness::new().await;
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (bob, mut bob_rx) = harness.connect("bob").await;
    wire(&mut alice_rx);
    wire(&mut bob_rx);

    harness
        .frame(
            &alice,
            json!({
                "event": "send_direct_message",
                "data": { "recipientId": bob.session().principal.id, "content": "psst" }
            }),
        )
        .await;

    let to_bob = wire(&mut bob_rx);
    let to_alice = wire(&mut alice_rx);
    assert_eq!(named(&to_bob, "new_direct_message")[0]["data"]["message"]["content"], "psst");
    assert_eq!(named(&to_alice, "message_sent")[0]["data"]["message"]["content"], "psst");
    assert_eq!(
        to_bob[0]["data"]["message"]["roomId"],
        to_alice[0]["data"]["message"]["roomId"]
    );
}

#[tokio::test]
async fn rejected_credentials_never_reach_the_hub() {
    let harness = Harness::new().await;
    let stranger = Harness::token(Uuid::now_v7());

    assert!(harness.identity.authenticate(Some(&stranger)).await.is_err());
    assert!(harness.identity.authenticate(None).await.is_err());
    assert_eq!(harness.hub.registry().session_count(), 0);
}
