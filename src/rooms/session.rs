use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{auth::Principal, ChatResult};

use super::{Hub, ServerEvent, SessionHandle};

/// Owns one session's registration.
///
/// Dropping it, on whatever path the connection task ends, deregisters the
/// session and removes it from every room channel. If it was the
/// principal's last session, they are marked offline.
pub struct SessionGuard {
    hub: Arc<Hub>,
    handle: Arc<SessionHandle>,
}

impl SessionGuard {
    pub fn session(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.hub.disconnect(&self.handle);
    }
}

impl Hub {
    /// Registers an authenticated connection and subscribes it to every
    /// active room the principal is a durable member of.
    pub async fn connect(
        self: &Arc<Self>,
        principal: Principal,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> ChatResult<SessionGuard> {
        // Before registering: a failed lookup must leave no session behind
        // and announce nothing.
        let rooms = self.bounded(self.store.member_rooms(principal.id)).await?;

        let (handle, came_online) = self.registry.register(principal, tx);
        let guard = SessionGuard { hub: self.clone(), handle: handle.clone() };
        for room_id in &rooms {
            self.channels.subscribe(*room_id, handle.id);
        }

        info!(
            session = %handle.id,
            user = %handle.principal.id,
            rooms = rooms.len(),
            "{} connected",
            handle.principal.username
        );

        if let Some(epoch) = came_online {
            self.went_online(&handle.principal, epoch).await;
        }

        Ok(guard)
    }

    /// Deregisters first: anything that subscribes the session afterwards
    /// sees it gone and backs out, anything before is swept up here.
    fn disconnect(&self, handle: &SessionHandle) {
        let Some((_, went_offline)) = self.registry.deregister(handle.id) else {
            debug!(session = %handle.id, "already deregistered");
            return;
        };

        let rooms = self.channels.unsubscribe_all(handle.id);
        for (room_id, user) in self.typing.clear_session(handle.id) {
            self.announce_stopped(room_id, user, None);
        }

        info!(
            session = %handle.id,
            user = %handle.principal.id,
            rooms = rooms.len(),
            "{} disconnected",
            handle.principal.username
        );

        if let Some(epoch) = went_offline {
            self.went_offline(&handle.principal, epoch);
        }
    }
}
