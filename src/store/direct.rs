use uuid::Uuid;

use crate::{db, ChatResult};

use super::{
    rooms::{insert_member, insert_room, Role, RoomRow, ROOM_COLUMNS},
    Room, Store,
};

/// Order-independent key of a user pair: `"<lower id>:<higher id>"`.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

impl Store {
    pub async fn find_direct(&self, a: Uuid, b: Uuid) -> ChatResult<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as(&format!(
            "SELECT {ROOM_COLUMNS} FROM direct_pairs d JOIN rooms r ON r.id=d.room_id WHERE d.pair_key=?"
        ))
        .bind(pair_key(a, b))
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(Room::try_from).transpose()?)
    }

    /// Creates the private room for `a` and `b` with both as members.
    ///
    /// Returns `None` when the pair already has a room: the pair key is the
    /// table's primary key, so whichever concurrent creator commits second
    /// hits the constraint and its whole transaction is rolled back.
    pub async fn insert_direct(&self, a: Uuid, b: Uuid) -> ChatResult<Option<Room>> {
        let key = pair_key(a, b);
        let room = Room {
            id: Uuid::now_v7(),
            name: format!("DM-{key}"),
            description: None,
            is_private: true,
            is_direct: true,
            is_active: true,
            created_by: a,
            created_at: db::now(),
        };

        let mut tx = self.db_pool.begin().await?;
        insert_room(&mut tx, &room).await?;
        insert_member(&mut tx, room.id, a, Role::Member, room.created_at).await?;
        insert_member(&mut tx, room.id, b, Role::Member, room.created_at).await?;

        let claimed = sqlx::query("INSERT INTO direct_pairs (pair_key,room_id) VALUES (?,?)")
            .bind(&key)
            .bind(room.id.to_string())
            .execute(&mut *tx)
            .await;

        match claimed {
            Ok(_) => {
                tx.commit().await?;
                Ok(Some(room))
            }
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                tx.rollback().await?;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_helpers::{test_store, user};

    #[test]
    fn pair_key_ignores_order() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        assert_eq!(pair_key(a, b), pair_key(b, a));
        assert_ne!(pair_key(a, b), pair_key(a, a));
    }

    #[tokio::test]
    async fn second_insert_for_a_pair_is_refused() {
        let store = test_store().await;
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;

        let room = store.insert_direct(alice.id, bob.id).await.unwrap().unwrap();
        assert!(room.is_private && room.is_direct);
        assert!(store.membership(room.id, bob.id).await.unwrap().is_some());

        assert!(store.insert_direct(bob.id, alice.id).await.unwrap().is_none());
        assert_eq!(store.find_direct(bob.id, alice.id).await.unwrap(), Some(room));

        let (rooms,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rooms WHERE is_direct=1")
            .fetch_one(&store.db_pool)
            .await
            .unwrap();
        assert_eq!(rooms, 1);
    }
}
