//! JSON frames exchanged over the socket: `{"event": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::Principal,
    store::{Message, MessageType},
    ChatError,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_id: Uuid,
    },
    LeaveRoom {
        room_id: Uuid,
    },
    SendMessage {
        room_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        attachment: Option<String>,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },
    TypingStart {
        room_id: Uuid,
    },
    TypingStop {
        room_id: Uuid,
    },
    AddReaction {
        message_id: Uuid,
        emoji: String,
    },
    EditMessage {
        message_id: Uuid,
        content: String,
    },
    DeleteMessage {
        message_id: Uuid,
    },
    SendDirectMessage {
        recipient_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(default)]
        message_type: MessageType,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    RoomJoined {
        room_id: Uuid,
    },
    RoomLeft {
        room_id: Uuid,
    },
    UserJoinedRoom {
        room_id: Uuid,
        user: Principal,
    },
    UserLeftRoom {
        room_id: Uuid,
        user: Principal,
    },
    NewMessage {
        message: Message,
    },
    MessageEdited {
        message: Message,
    },
    MessageDeleted {
        room_id: Uuid,
        message_id: Uuid,
    },
    MessageReactionUpdated {
        message: Message,
    },
    NewDirectMessage {
        message: Message,
    },
    MessageSent {
        message: Message,
    },
    UserTyping {
        room_id: Uuid,
        user: Principal,
    },
    UserStoppedTyping {
        room_id: Uuid,
        user: Principal,
    },
    UserOnline {
        user_id: Uuid,
        username: String,
    },
    UserOffline {
        user_id: Uuid,
        username: String,
        #[serde(with = "time::serde::rfc3339")]
        last_seen: OffsetDateTime,
    },
    Error {
        message: String,
    },
}

impl From<&ChatError> for ServerEvent {
    fn from(err: &ChatError) -> Self {
        ServerEvent::Error { message: err.client_message() }
    }
}
