use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    auth::Principal,
    store::{test_helpers, Room},
    Config, Store,
};

use super::{Hub, ServerEvent, SessionGuard, SessionHandle};

pub async fn test_hub() -> (Arc<Hub>, Store) {
    test_hub_with(|_| {}).await
}

pub async fn test_hub_with(configure: impl FnOnce(&mut Config)) -> (Arc<Hub>, Store) {
    let store = test_helpers::test_store().await;
    let mut config = Config {
        jwt_secret: "test-secret".to_owned(),
        ..Config::default()
    };
    configure(&mut config);
    (Hub::new(store.clone(), config), store)
}

/// A connected user, with the receiving end of its session queue standing
/// in for the socket.
pub struct Client {
    pub guard: SessionGuard,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    pub async fn new(hub: &Arc<Hub>, store: &Store, username: &str) -> Client {
        let user = test_helpers::user(store, username).await;
        Client::connect(hub, Principal::from(user)).await
    }

    /// Another session for an existing principal.
    pub async fn connect(hub: &Arc<Hub>, principal: Principal) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = hub.connect(principal, tx).await.unwrap();
        Client { guard, rx }
    }

    pub fn session(&self) -> &SessionHandle {
        self.guard.session()
    }

    pub fn principal(&self) -> Principal {
        self.session().principal.clone()
    }

    pub async fn public_room(&self, store: &Store, name: &str) -> Room {
        self.room(store, name, false).await
    }

    pub async fn private_room(&self, store: &Store, name: &str) -> Room {
        self.room(store, name, true).await
    }

    async fn room(&self, store: &Store, name: &str, is_private: bool) -> Room {
        store
            .create_room(crate::store::NewRoom {
                name: name.to_owned(),
                description: None,
                is_private,
                created_by: self.session().principal.id,
            })
            .await
            .unwrap()
    }
}

/// Everything queued so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Only the `new_message` payloads, in arrival order.
pub fn new_messages(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::NewMessage { message } => Some(message.content.clone()),
            _ => None,
        })
        .collect()
}
