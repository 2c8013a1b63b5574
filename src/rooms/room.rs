use tracing::debug;
use uuid::Uuid;

use crate::{auth::Principal, store::Room, ChatError, ChatResult};

use super::{Hub, ServerEvent, SessionHandle};

impl Hub {
    /// The room, if it exists, is active, and `principal` may read it.
    /// Private rooms require a durable membership.
    pub(crate) async fn readable_room(&self, principal: &Principal, room_id: Uuid) -> ChatResult<Room> {
        let Some(room) = self
            .bounded(self.store.find_room(room_id))
            .await?
            .filter(|room| room.is_active)
        else {
            return Err(ChatError::NotFound("room"));
        };

        if room.is_private
            && self
                .bounded(self.store.membership(room.id, principal.id))
                .await?
                .is_none()
        {
            return Err(ChatError::AccessDenied);
        }

        Ok(room)
    }

    /// `join_room`. Acknowledges to the caller and tells the room's other
    /// live subscribers, not its durable roster.
    pub async fn join(&self, session: &SessionHandle, room_id: Uuid) -> ChatResult<()> {
        let room = self.readable_room(&session.principal, room_id).await?;

        let newly = self.channels.subscribe(room.id, session.id);
        session.send(ServerEvent::RoomJoined { room_id: room.id });

        if newly {
            debug!(session = %session.id, room = %room.id, "joined {}", room.name);
            self.fan_out(
                room.id,
                &ServerEvent::UserJoinedRoom { room_id: room.id, user: session.principal.clone() },
                Some(session.id),
            );
        }
        Ok(())
    }

    /// `leave_room`. Always acknowledged; only announced if the session was
    /// actually subscribed.
    pub fn leave(&self, session: &SessionHandle, room_id: Uuid) {
        let was_subscribed = self.channels.unsubscribe(room_id, session.id);
        session.send(ServerEvent::RoomLeft { room_id });

        if !was_subscribed {
            return;
        }
        debug!(session = %session.id, room = %room_id, "left room");

        if let Some(user) = self.typing.clear_in_room(room_id, session.id, session.principal.id) {
            self.announce_stopped(room_id, user, None);
        }
        self.fan_out(
            room_id,
            &ServerEvent::UserLeftRoom { room_id, user: session.principal.clone() },
            None,
        );
    }
}
