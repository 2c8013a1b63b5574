use tracing::debug;
use uuid::Uuid;

use crate::{
    store::{Message, ReactionToggle},
    ChatError, ChatResult,
};

use super::{Hub, ServerEvent, SessionHandle};

const MAX_EMOJI_BYTES: usize = 32;

impl Hub {
    /// `add_reaction`. Toggles the actor's reaction and broadcasts the
    /// message's canonical reaction list to the whole room, actor included.
    pub async fn react(&self, session: &SessionHandle, message_id: Uuid, emoji: &str) -> ChatResult<ReactionToggle> {
        let message = self
            .bounded(self.store.find_message(message_id))
            .await?
            .filter(|message| !message.deleted)
            .ok_or(ChatError::NotFound("message"))?;
        self.readable_room(&session.principal, message.room_id).await?;

        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.len() > MAX_EMOJI_BYTES {
            return Err(ChatError::validation("emoji must be between 1 and 32 bytes"));
        }

        let outcome = self
            .bounded(self.store.toggle_reaction(message.id, session.principal.id, emoji))
            .await?;
        debug!(session = %session.id, message = %message.id, ?outcome, "reaction toggled");

        // Re-read under the turn so the last broadcast carries the latest set.
        let _turn = self.room_turn(message.room_id).await;
        let current: Message = self
            .bounded(self.store.find_message(message.id))
            .await?
            .ok_or(ChatError::NotFound("message"))?;
        self.fan_out(current.room_id, &ServerEvent::MessageReactionUpdated { message: current.clone() }, None);

        Ok(outcome)
    }
}
