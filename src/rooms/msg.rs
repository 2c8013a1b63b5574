use tracing::debug;
use uuid::Uuid;

use crate::{
    store::{Message, MessageType, NewMessage, Role},
    ChatError, ChatResult,
};

use super::{Hub, ServerEvent, SessionHandle};

impl Hub {
    /// Trims `content` and checks it against the length limit. Empty content
    /// is only allowed when something is attached.
    pub(crate) fn validate_content(&self, content: &str, has_attachment: bool) -> ChatResult<String> {
        let content = content.trim();
        if content.is_empty() && !has_attachment {
            return Err(ChatError::validation("message content is required"));
        }
        if content.chars().count() > self.config.max_message_len {
            return Err(ChatError::validation(format!(
                "message exceeds {} characters",
                self.config.max_message_len
            )));
        }
        Ok(content.to_owned())
    }

    fn check_type(message_type: MessageType) -> ChatResult<()> {
        if message_type == MessageType::System {
            return Err(ChatError::validation("system messages cannot be sent by clients"));
        }
        Ok(())
    }

    /// `send_message`. Persists, then fans out `new_message` to every
    /// current subscriber of the room, the sender's sessions included.
    pub async fn send(
        &self,
        session: &SessionHandle,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
        attachment: Option<String>,
        reply_to: Option<Uuid>,
    ) -> ChatResult<Message> {
        let room = self.readable_room(&session.principal, room_id).await?;
        Self::check_type(message_type)?;
        let attachment = attachment.filter(|reference| !reference.trim().is_empty());
        let content = self.validate_content(&content, attachment.is_some())?;

        if let Some(reply_to) = reply_to {
            let target = self.bounded(self.store.find_message(reply_to)).await?;
            if !target.is_some_and(|target| target.room_id == room.id && !target.deleted) {
                return Err(ChatError::InvalidReference);
            }
        }

        let new = NewMessage {
            room_id: room.id,
            sender_id: session.principal.id,
            content,
            message_type,
            attachment,
            reply_to,
        };

        let _turn = self.room_turn(room.id).await;
        let message = self.bounded(self.store.create_message(new)).await?;
        let delivered = self.fan_out(room.id, &ServerEvent::NewMessage { message: message.clone() }, None);
        debug!(session = %session.id, room = %room.id, seq = message.seq, delivered, "message sent");

        Ok(message)
    }

    /// A message that has not been deleted.
    async fn live_message(&self, message_id: Uuid) -> ChatResult<Message> {
        self.bounded(self.store.find_message(message_id))
            .await?
            .filter(|message| !message.deleted)
            .ok_or(ChatError::NotFound("message"))
    }

    /// `edit_message`. Only the sender may edit.
    pub async fn edit(&self, session: &SessionHandle, message_id: Uuid, content: &str) -> ChatResult<Message> {
        let message = self.live_message(message_id).await?;
        if message.sender.id != session.principal.id {
            return Err(ChatError::AccessDenied);
        }
        let content = self.validate_content(content, message.attachment.is_some())?;

        let _turn = self.room_turn(message.room_id).await;
        let edited = self
            .bounded(self.store.edit_message(message.id, &content))
            .await?
            .ok_or(ChatError::NotFound("message"))?;
        self.fan_out(edited.room_id, &ServerEvent::MessageEdited { message: edited.clone() }, None);

        Ok(edited)
    }

    /// `delete_message`. The sender or an admin of the room may delete.
    pub async fn delete(&self, session: &SessionHandle, message_id: Uuid) -> ChatResult<()> {
        let message = self.live_message(message_id).await?;
        if message.sender.id != session.principal.id {
            let role = self
                .bounded(self.store.membership(message.room_id, session.principal.id))
                .await?;
            if role != Some(Role::Admin) {
                return Err(ChatError::AccessDenied);
            }
        }

        let _turn = self.room_turn(message.room_id).await;
        if !self.bounded(self.store.delete_message(message.id)).await? {
            return Err(ChatError::NotFound("message"));
        }
        self.fan_out(
            message.room_id,
            &ServerEvent::MessageDeleted { room_id: message.room_id, message_id: message.id },
            None,
        );
        debug!(session = %session.id, room = %message.room_id, message = %message.id, "message deleted");

        Ok(())
    }
}
