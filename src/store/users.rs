use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::{from_millis, parse_id, to_millis},
    ChatResult,
};

use super::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<OffsetDateTime>,
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    avatar: Option<String>,
    is_online: bool,
    last_seen: Option<i64>,
}

impl TryFrom<UserRow> for User {
    type Error = sqlx::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_id(&row.id)?,
            username: row.username,
            avatar: row.avatar,
            is_online: row.is_online,
            last_seen: row.last_seen.map(from_millis).transpose()?,
        })
    }
}

impl Store {
    /// Accounts are normally provisioned by the REST layer; this is the
    /// minimal insert the hub and its tests rely on.
    pub async fn create_user(&self, username: &str, avatar: Option<&str>) -> ChatResult<User> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO users (id,username,avatar) VALUES (?,?,?)")
            .bind(id.to_string())
            .bind(username)
            .bind(avatar)
            .execute(&self.db_pool)
            .await?;

        Ok(User {
            id,
            username: username.to_owned(),
            avatar: avatar.map(str::to_owned),
            is_online: false,
            last_seen: None,
        })
    }

    pub async fn find_user(&self, user_id: Uuid) -> ChatResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id,username,avatar,is_online,last_seen FROM users WHERE id=?")
                .bind(user_id.to_string())
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(row.map(User::try_from).transpose()?)
    }

    /// Records an online/offline transition.
    ///
    /// `epoch` orders transitions of the same user: a write carrying an
    /// older epoch than the stored one is ignored, so a late offline write
    /// can never clobber a newer online one. Returns whether it applied.
    pub async fn set_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        last_seen: OffsetDateTime,
        epoch: u64,
    ) -> ChatResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_online=?, last_seen=?, presence_epoch=? WHERE id=? AND presence_epoch<?",
        )
        .bind(is_online)
        .bind(to_millis(last_seen))
        .bind(epoch as i64)
        .bind(user_id.to_string())
        .bind(epoch as i64)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{db, store::test_helpers::{test_store, user}};

    #[tokio::test]
    async fn unknown_user_is_none() {
        let store = test_store().await;
        assert!(store.find_user(uuid::Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let store = test_store().await;
        user(&store, "alice").await;
        assert!(store.create_user("alice", None).await.is_err());
    }

    #[tokio::test]
    async fn stale_presence_writes_are_ignored() {
        let store = test_store().await;
        let alice = user(&store, "alice").await;
        let at = db::now();

        assert!(store.set_presence(alice.id, true, at, 2).await.unwrap());
        assert!(!store.set_presence(alice.id, false, at, 1).await.unwrap());

        let stored = store.find_user(alice.id).await.unwrap().unwrap();
        assert!(stored.is_online);
        assert_eq!(stored.last_seen, Some(at));

        assert!(store.set_presence(alice.id, false, at, 3).await.unwrap());
        assert!(!store.find_user(alice.id).await.unwrap().unwrap().is_online);
    }
}
