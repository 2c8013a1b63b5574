use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    store::{Message, MessageType, NewMessage, Room},
    ChatError, ChatResult,
};

use super::{Hub, ServerEvent, SessionHandle};

const DIRECT_ATTEMPTS: usize = 3;

impl Hub {
    /// The one direct room shared by `a` and `b`, created on first use.
    ///
    /// Concurrent callers for the same pair, in either order, converge on
    /// the same room: the loser of the insert race finds the winner's room
    /// on its next lookup.
    pub async fn resolve_or_create_direct(&self, a: Uuid, b: Uuid) -> ChatResult<Room> {
        if a == b {
            return Err(ChatError::validation("cannot open a direct conversation with yourself"));
        }
        if self.bounded(self.store.find_user(b)).await?.is_none() {
            return Err(ChatError::NotFound("user"));
        }

        for attempt in 1..=DIRECT_ATTEMPTS {
            if let Some(room) = self.bounded(self.store.find_direct(a, b)).await? {
                return Ok(room);
            }
            if let Some(room) = self.bounded(self.store.insert_direct(a, b)).await? {
                info!(room = %room.id, "opened direct room for {a} and {b}");
                return Ok(room);
            }

            debug!(attempt, "direct room for {a} and {b} raced, retrying");
            let backoff = rand::rng().random_range(5..=25 * attempt as u64);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }

        // The winner has committed by now.
        self.bounded(self.store.find_direct(a, b))
            .await?
            .ok_or(ChatError::NotFound("direct room"))
    }

    /// Subscribes a session on behalf of someone else. Backs out if the
    /// session deregistered in the meantime, since its teardown has run.
    pub(crate) fn subscribe_live(&self, room_id: Uuid, session: &SessionHandle) -> bool {
        self.channels.subscribe(room_id, session.id);
        if self.registry.get(session.id).is_none() {
            self.channels.unsubscribe(room_id, session.id);
            return false;
        }
        true
    }

    /// `send_direct_message`. The recipient's sessions get
    /// `new_direct_message`, the sender's get `message_sent`.
    pub async fn send_direct(
        &self,
        session: &SessionHandle,
        recipient_id: Uuid,
        content: String,
        message_type: MessageType,
    ) -> ChatResult<Message> {
        if message_type == MessageType::System {
            return Err(ChatError::validation("system messages cannot be sent by clients"));
        }
        let content = self.validate_content(&content, false)?;

        let sender_id = session.principal.id;
        let room = self.resolve_or_create_direct(sender_id, recipient_id).await?;
        for user_id in [sender_id, recipient_id] {
            for handle in self.registry.sessions_of(user_id) {
                self.subscribe_live(room.id, &handle);
            }
        }

        let _turn = self.room_turn(room.id).await;
        let message = self
            .bounded(self.store.create_message(NewMessage {
                room_id: room.id,
                sender_id,
                content,
                message_type,
                attachment: None,
                reply_to: None,
            }))
            .await?;

        self.registry
            .send_to_user(recipient_id, &ServerEvent::NewDirectMessage { message: message.clone() });
        self.registry
            .send_to_user(sender_id, &ServerEvent::MessageSent { message: message.clone() });
        debug!(session = %session.id, room = %room.id, seq = message.seq, "direct message sent");

        Ok(message)
    }
}
