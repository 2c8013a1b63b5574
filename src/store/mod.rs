//! Durable state: users, rooms, memberships, messages, reactions and the
//! direct-message pair index. Each domain lives in its own file with an
//! `impl Store` block.

use sqlx::SqlitePool;

mod direct;
mod messages;
mod reactions;
mod rooms;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use direct::pair_key;
pub use messages::{Message, MessageType, NewMessage, ReplyPreview};
pub use reactions::{Reaction, ReactionToggle};
pub use rooms::{NewRoom, Role, Room};
pub use users::User;

#[derive(Clone)]
pub struct Store {
    pub(crate) db_pool: SqlitePool,
}

impl Store {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}
