//! The real-time side of the service: sessions, room channels, and the
//! events that flow between them.

mod channels;
mod msg;
mod new;
mod presence;
mod protocol;
mod reactions;
mod registry;
mod room;
mod session;
mod typing;
mod ws;

#[cfg(test)]
pub(crate) mod test_helpers;

use std::{future::Future, sync::Arc};

use axum::{routing::get, Router};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AppState, ChatError, ChatResult, Config, Store};

pub use channels::RoomChannels;
pub use protocol::{ClientEvent, ServerEvent};
pub use registry::{ConnectionRegistry, SessionHandle, SessionId};
pub use session::SessionGuard;
pub use typing::TypingState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
}

/// Coordinates every live session of the process.
///
/// Shared state is sharded by the smallest key that needs it: the registry
/// by principal, channels by room, typing flags by (room, principal), and
/// the send sequencer by room. Nothing here is a process-wide lock.
pub struct Hub {
    pub(crate) store: Store,
    pub(crate) config: Config,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) channels: RoomChannels,
    pub(crate) typing: TypingState,
    sequencers: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Hub {
    pub fn new(store: Store, config: Config) -> Arc<Hub> {
        Arc::new(Hub {
            typing: TypingState::new(config.typing_ttl),
            store,
            config,
            registry: ConnectionRegistry::default(),
            channels: RoomChannels::default(),
            sequencers: DashMap::new(),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn channels(&self) -> &RoomChannels {
        &self.channels
    }

    /// Runs a store or identity call under the configured timeout.
    pub async fn bounded<T>(&self, call: impl Future<Output = ChatResult<T>>) -> ChatResult<T> {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| ChatError::Timeout)?
    }

    /// Takes the room's turn. Whatever is persisted and fanned out while the
    /// guard is held reaches every subscriber in the same order.
    async fn room_turn(&self, room_id: Uuid) -> OwnedMutexGuard<()> {
        let sequencer = self
            .sequencers
            .entry(room_id)
            .or_default()
            .value()
            .clone();
        sequencer.lock_owned().await
    }

    /// Queues `event` for every current subscriber of the room, optionally
    /// skipping one session. Returns how many sessions got it.
    pub(crate) fn fan_out(&self, room_id: Uuid, event: &ServerEvent, except: Option<SessionId>) -> usize {
        let mut delivered = 0;
        for session_id in self.channels.subscribers(room_id) {
            if Some(session_id) == except {
                continue;
            }
            match self.registry.get(session_id) {
                Some(handle) => {
                    if handle.send(event.clone()) {
                        delivered += 1;
                    }
                }
                // Subscribed while disconnecting; nobody is left to tear it down.
                None => {
                    self.channels.unsubscribe(room_id, session_id);
                }
            }
        }
        delivered
    }

    pub async fn handle_event(&self, session: &SessionHandle, event: ClientEvent) -> ChatResult<()> {
        use ClientEvent::*;
        match event {
            JoinRoom { room_id } => self.join(session, room_id).await,
            LeaveRoom { room_id } => {
                self.leave(session, room_id);
                Ok(())
            }
            SendMessage { room_id, content, message_type, attachment, reply_to } => {
                self.send(session, room_id, content, message_type, attachment, reply_to)
                    .await
                    .map(|_| ())
            }
            TypingStart { room_id } => {
                self.start_typing(session, room_id);
                Ok(())
            }
            TypingStop { room_id } => {
                self.stop_typing(session, room_id);
                Ok(())
            }
            AddReaction { message_id, emoji } => self.react(session, message_id, &emoji).await.map(|_| ()),
            EditMessage { message_id, content } => self.edit(session, message_id, &content).await.map(|_| ()),
            DeleteMessage { message_id } => self.delete(session, message_id).await,
            SendDirectMessage { recipient_id, content, message_type } => {
                self.send_direct(session, recipient_id, content, message_type)
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Decodes one inbound frame and handles it. Failures are reported to
    /// the sender only.
    pub async fn handle_frame(&self, session: &SessionHandle, frame: &[u8]) {
        let event = match serde_json::from_slice::<ClientEvent>(frame) {
            Ok(event) => event,
            Err(err) => {
                debug!(session = %session.id, "unreadable frame: {err}");
                session.send(ServerEvent::Error { message: format!("malformed event: {err}") });
                return;
            }
        };

        if let Err(err) = self.handle_event(session, event).await {
            if err.is_internal() {
                warn!(session = %session.id, user = %session.principal.id, "event failed: {err}");
            } else {
                debug!(session = %session.id, user = %session.principal.id, "event rejected: {err}");
            }
            session.send(ServerEvent::from(&err));
        }
    }
}
