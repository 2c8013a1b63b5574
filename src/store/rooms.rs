use std::{fmt, str::FromStr};

use serde::Serialize;
use sqlx::{FromRow, Sqlite, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::{self, from_millis, parse_id, to_millis},
    ChatError, ChatResult,
};

use super::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub is_direct: bool,
    pub is_active: bool,
    pub created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input to [`Store::create_room`].
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Admin => "admin",
            Moderator => "moderator",
            Member => "member",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "admin" => Ok(Role::Admin),
            "moderator" => Ok(Role::Moderator),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(FromRow)]
pub(super) struct RoomRow {
    id: String,
    name: String,
    description: Option<String>,
    is_private: bool,
    is_direct: bool,
    is_active: bool,
    created_by: String,
    created_at: i64,
}

impl TryFrom<RoomRow> for Room {
    type Error = sqlx::Error;

    fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
        Ok(Room {
            id: parse_id(&row.id)?,
            name: row.name,
            description: row.description,
            is_private: row.is_private,
            is_direct: row.is_direct,
            is_active: row.is_active,
            created_by: parse_id(&row.created_by)?,
            created_at: from_millis(row.created_at)?,
        })
    }
}

pub(super) const ROOM_COLUMNS: &str =
    "r.id,r.name,r.description,r.is_private,r.is_direct,r.is_active,r.created_by,r.created_at";

/// Inserts the room row only. Shared with the direct-message path, which
/// needs it inside its own transaction.
pub(super) async fn insert_room(
    tx: &mut Transaction<'_, Sqlite>,
    room: &Room,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO rooms (id,name,description,is_private,is_direct,is_active,created_by,created_at) VALUES (?,?,?,?,?,?,?,?)",
    )
    .bind(room.id.to_string())
    .bind(&room.name)
    .bind(&room.description)
    .bind(room.is_private)
    .bind(room.is_direct)
    .bind(room.is_active)
    .bind(room.created_by.to_string())
    .bind(to_millis(room.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(super) async fn insert_member(
    tx: &mut Transaction<'_, Sqlite>,
    room_id: Uuid,
    user_id: Uuid,
    role: Role,
    at: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO memberships (room_id,user_id,role,joined_at) VALUES (?,?,?,?) ON CONFLICT(room_id,user_id) DO NOTHING",
    )
    .bind(room_id.to_string())
    .bind(user_id.to_string())
    .bind(role.as_str())
    .bind(to_millis(at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl Store {
    /// Creates a room with its creator as admin. Room management belongs to
    /// the REST layer in front of the store; the hub only reads rooms.
    pub async fn create_room(&self, NewRoom { name, description, is_private, created_by }: NewRoom) -> ChatResult<Room> {
        let room = Room {
            id: Uuid::now_v7(),
            name,
            description,
            is_private,
            is_direct: false,
            is_active: true,
            created_by,
            created_at: db::now(),
        };

        let mut tx = self.db_pool.begin().await?;
        insert_room(&mut tx, &room).await?;
        insert_member(&mut tx, room.id, created_by, Role::Admin, room.created_at).await?;
        tx.commit().await?;

        Ok(room)
    }

    pub async fn find_room(&self, room_id: Uuid) -> ChatResult<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.id=?"))
            .bind(room_id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(row.map(Room::try_from).transpose()?)
    }

    /// Durable membership, written by the REST layer when a user is invited
    /// or joins a room.
    pub async fn add_member(&self, room_id: Uuid, user_id: Uuid, role: Role) -> ChatResult<()> {
        let mut tx = self.db_pool.begin().await?;
        insert_member(&mut tx, room_id, user_id, role, db::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Archives or restores a room. Archived rooms are neither joinable nor
    /// auto-subscribed. Called by the REST layer.
    pub async fn set_room_active(&self, room_id: Uuid, is_active: bool) -> ChatResult<()> {
        sqlx::query("UPDATE rooms SET is_active=? WHERE id=?")
            .bind(is_active)
            .bind(room_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    /// The user's durable role in the room, if they are a member at all.
    pub async fn membership(&self, room_id: Uuid, user_id: Uuid) -> ChatResult<Option<Role>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT role FROM memberships WHERE room_id=? AND user_id=?")
                .bind(room_id.to_string())
                .bind(user_id.to_string())
                .fetch_optional(&self.db_pool)
                .await?;

        let Some((role,)) = row else {
            return Ok(None);
        };
        let role = role
            .parse()
            .map_err(|err: String| sqlx::Error::Decode(err.into()))?;
        Ok(Some(role))
    }

    /// Active rooms the user is a member of.
    pub async fn member_rooms(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT m.room_id FROM memberships m JOIN rooms r ON r.id=m.room_id WHERE m.user_id=? AND r.is_active=1",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.db_pool)
        .await?;

        rows.iter()
            .map(|(room_id,)| parse_id(room_id).map_err(ChatError::from))
            .collect()
    }
}
