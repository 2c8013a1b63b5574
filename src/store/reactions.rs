use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::Principal,
    db::{self, from_millis, parse_id, to_millis},
    ChatResult,
};

use super::Store;

/// Attempts before a toggle that keeps colliding with concurrent toggles of
/// the same triple gives up.
const TOGGLE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user: Principal,
    pub emoji: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// What a toggle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionToggle {
    Added,
    Removed,
}

#[derive(FromRow)]
struct ReactionRow {
    user_id: String,
    username: String,
    avatar: Option<String>,
    emoji: String,
    created_at: i64,
}

impl Store {
    /// Flips the presence of the (message, user, emoji) triple.
    ///
    /// Each step is a single conditional statement, so concurrent toggles by
    /// different users never lose each other's updates, and the UNIQUE
    /// constraint keeps a triple from ever being stored twice.
    pub async fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> ChatResult<ReactionToggle> {
        for attempt in 0..TOGGLE_ATTEMPTS {
            let removed = sqlx::query("DELETE FROM reactions WHERE message_id=? AND user_id=? AND emoji=?")
                .bind(message_id.to_string())
                .bind(user_id.to_string())
                .bind(emoji)
                .execute(&self.db_pool)
                .await?;
            if removed.rows_affected() > 0 {
                return Ok(ReactionToggle::Removed);
            }

            let added = sqlx::query(
                "INSERT INTO reactions (message_id,user_id,emoji,created_at) VALUES (?,?,?,?) ON CONFLICT(message_id,user_id,emoji) DO NOTHING",
            )
            .bind(message_id.to_string())
            .bind(user_id.to_string())
            .bind(emoji)
            .bind(to_millis(db::now()))
            .execute(&self.db_pool)
            .await?;
            if added.rows_affected() > 0 {
                return Ok(ReactionToggle::Added);
            }

            debug!(%message_id, %user_id, attempt, "reaction toggle collided, retrying");
        }

        Err(sqlx::Error::Protocol(format!("reaction toggle on {message_id} kept colliding")).into())
    }

    /// The canonical reaction list, oldest first.
    pub async fn reactions_for(&self, message_id: Uuid) -> ChatResult<Vec<Reaction>> {
        let rows: Vec<ReactionRow> = sqlx::query_as(
            "SELECT r.user_id,u.username,u.avatar,r.emoji,r.created_at FROM reactions r JOIN users u ON u.id=r.user_id WHERE r.message_id=? ORDER BY r.seq",
        )
        .bind(message_id.to_string())
        .fetch_all(&self.db_pool)
        .await?;

        let reactions = rows
            .into_iter()
            .map(|row| {
                Ok(Reaction {
                    user: Principal {
                        id: parse_id(&row.user_id)?,
                        username: row.username,
                        avatar: row.avatar,
                    },
                    emoji: row.emoji,
                    created_at: from_millis(row.created_at)?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()?;
        Ok(reactions)
    }
}
