use super::{NewRoom, Room, Store, User};

/// A fresh store over an isolated in-memory database.
pub async fn test_store() -> Store {
    Store::new(
        crate::db::memory_pool()
            .await
            .expect("failed to create in-memory database"),
    )
}

pub async fn user(store: &Store, username: &str) -> User {
    store.create_user(username, None).await.unwrap()
}

pub async fn room(store: &Store, owner: &User, name: &str, is_private: bool) -> Room {
    store
        .create_room(NewRoom {
            name: name.to_owned(),
            description: None,
            is_private,
            created_by: owner.id,
        })
        .await
        .unwrap()
}
