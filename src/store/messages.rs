use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::Principal,
    db::{self, from_millis, parse_id, to_millis},
    ChatError, ChatResult,
};

use super::{Reaction, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Voice,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        use MessageType::*;
        match self {
            Text => "text",
            Image => "image",
            File => "file",
            Voice => "voice",
            System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        use MessageType::*;
        match raw {
            "text" => Ok(Text),
            "image" => Ok(Image),
            "file" => Ok(File),
            "voice" => Ok(Voice),
            "system" => Ok(System),
            other => Err(format!("unknown message type {other:?}")),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a reply shows of the message it answers. A deleted target keeps
/// its sender but loses its content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: Uuid,
    pub content: String,
    pub sender: Principal,
    pub deleted: bool,
}

/// A persisted message, complete with sender and reactions, exactly as it
/// is fanned out to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned position; defines delivery order within the room.
    pub seq: i64,
    pub room_id: Uuid,
    pub sender: Principal,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<String>,
    pub reply_to: Option<ReplyPreview>,
    pub reactions: Vec<Reaction>,
    pub edited: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    pub deleted: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<String>,
    pub reply_to: Option<Uuid>,
}

#[derive(FromRow)]
struct MessageRow {
    seq: i64,
    id: String,
    room_id: String,
    sender_id: String,
    sender_username: String,
    sender_avatar: Option<String>,
    content: String,
    message_type: String,
    attachment: Option<String>,
    reply_to: Option<String>,
    reply_content: Option<String>,
    reply_deleted: Option<bool>,
    reply_sender_id: Option<String>,
    reply_sender_username: Option<String>,
    reply_sender_avatar: Option<String>,
    edited: bool,
    edited_at: Option<i64>,
    deleted: bool,
    deleted_at: Option<i64>,
    created_at: i64,
}

impl MessageRow {
    fn reply_preview(&mut self) -> Result<Option<ReplyPreview>, sqlx::Error> {
        let (Some(id), Some(sender_id), Some(username)) = (
            self.reply_to.take(),
            self.reply_sender_id.take(),
            self.reply_sender_username.take(),
        ) else {
            return Ok(None);
        };
        let deleted = self.reply_deleted.unwrap_or(false);

        Ok(Some(ReplyPreview {
            id: parse_id(&id)?,
            content: if deleted { String::new() } else { self.reply_content.take().unwrap_or_default() },
            sender: Principal {
                id: parse_id(&sender_id)?,
                username,
                avatar: self.reply_sender_avatar.take(),
            },
            deleted,
        }))
    }

    fn into_message(mut self, reactions: Vec<Reaction>) -> Result<Message, sqlx::Error> {
        let reply_to = self.reply_preview()?;
        Ok(Message {
            id: parse_id(&self.id)?,
            seq: self.seq,
            room_id: parse_id(&self.room_id)?,
            sender: Principal {
                id: parse_id(&self.sender_id)?,
                username: self.sender_username,
                avatar: self.sender_avatar,
            },
            content: self.content,
            message_type: self
                .message_type
                .parse()
                .map_err(|err: String| sqlx::Error::Decode(err.into()))?,
            attachment: self.attachment,
            reply_to,
            reactions,
            edited: self.edited,
            edited_at: self.edited_at.map(from_millis).transpose()?,
            deleted: self.deleted,
            deleted_at: self.deleted_at.map(from_millis).transpose()?,
            created_at: from_millis(self.created_at)?,
        })
    }
}

impl Store {
    /// Persists a message. The store assigns the id, the sequence number and
    /// the canonical timestamp.
    ///
    /// A reply is only inserted if its target is a live message of the same
    /// room at the moment of the insert; otherwise `InvalidReference`.
    pub async fn create_message(&self, new: NewMessage) -> ChatResult<Message> {
        let id = Uuid::now_v7();
        let reply_to = new.reply_to.as_ref().map(Uuid::to_string);
        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (id,room_id,sender_id,content,message_type,attachment,reply_to,created_at)
            SELECT ?,?,?,?,?,?,?,?
            WHERE ? IS NULL
               OR EXISTS (SELECT 1 FROM messages WHERE id=? AND room_id=? AND deleted=0)
            "#,
        )
        .bind(id.to_string())
        .bind(new.room_id.to_string())
        .bind(new.sender_id.to_string())
        .bind(&new.content)
        .bind(new.message_type.as_str())
        .bind(&new.attachment)
        .bind(&reply_to)
        .bind(to_millis(db::now()))
        .bind(&reply_to)
        .bind(&reply_to)
        .bind(new.room_id.to_string())
        .execute(&self.db_pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(ChatError::InvalidReference);
        }

        self.find_message(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound.into())
    }

    /// Looks a message up, deleted or not.
    pub async fn find_message(&self, message_id: Uuid) -> ChatResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            SELECT m.seq, m.id, m.room_id, m.sender_id, u.username AS sender_username,
                   u.avatar AS sender_avatar, m.content, m.message_type, m.attachment,
                   m.reply_to, rm.content AS reply_content, rm.deleted AS reply_deleted,
                   rm.sender_id AS reply_sender_id, ru.username AS reply_sender_username,
                   ru.avatar AS reply_sender_avatar,
                   m.edited, m.edited_at, m.deleted, m.deleted_at, m.created_at
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            LEFT JOIN messages rm ON rm.id = m.reply_to
            LEFT JOIN users ru ON ru.id = rm.sender_id
            WHERE m.id = ?
            "#,
        )
        .bind(message_id.to_string())
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let reactions = self.reactions_for(message_id).await?;
        Ok(Some(row.into_message(reactions)?))
    }

    /// Replaces the content of a live message. `None` if it does not exist
    /// or was deleted.
    pub async fn edit_message(&self, message_id: Uuid, content: &str) -> ChatResult<Option<Message>> {
        let result = sqlx::query("UPDATE messages SET content=?, edited=1, edited_at=? WHERE id=? AND deleted=0")
            .bind(content)
            .bind(to_millis(db::now()))
            .bind(message_id.to_string())
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_message(message_id).await
    }

    /// Soft-deletes a live message. Returns whether this call deleted it.
    pub async fn delete_message(&self, message_id: Uuid) -> ChatResult<bool> {
        let result = sqlx::query("UPDATE messages SET deleted=1, deleted_at=? WHERE id=? AND deleted=0")
            .bind(to_millis(db::now()))
            .bind(message_id.to_string())
            .execute(&self.db_pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
