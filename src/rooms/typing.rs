use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use tokio::{task::JoinHandle, time::Instant};
use tracing::debug;
use uuid::Uuid;

use crate::auth::Principal;

use super::{Hub, ServerEvent, SessionHandle, SessionId};

#[derive(Debug, Clone)]
struct TypingEntry {
    expires_at: Instant,
    session: SessionId,
    user: Principal,
}

/// (room, principal) → when the "is typing" flag lapses.
///
/// Advisory only. Entries remember which session raised them so a
/// disconnect can clear exactly its own.
pub struct TypingState {
    ttl: Duration,
    entries: DashMap<(Uuid, Uuid), TypingEntry>,
}

impl TypingState {
    pub fn new(ttl: Duration) -> TypingState {
        TypingState { ttl, entries: DashMap::new() }
    }

    /// Raises or refreshes the flag. Returns `true` if it was not already up.
    pub fn start(&self, room_id: Uuid, session: SessionId, user: &Principal, now: Instant) -> bool {
        let previous = self.entries.insert(
            (room_id, user.id),
            TypingEntry { expires_at: now + self.ttl, session, user: user.clone() },
        );
        previous.is_none_or(|entry| entry.expires_at <= now)
    }

    /// Lowers the flag. Returns the user if it was up.
    pub fn stop(&self, room_id: Uuid, user_id: Uuid) -> Option<Principal> {
        self.entries
            .remove(&(room_id, user_id))
            .map(|(_, entry)| entry.user)
    }

    /// Lowers the session's flag in one room, if it owns it.
    pub fn clear_in_room(&self, room_id: Uuid, session: SessionId, user_id: Uuid) -> Option<Principal> {
        self.entries
            .remove_if(&(room_id, user_id), |_, entry| entry.session == session)
            .map(|(_, entry)| entry.user)
    }

    /// Lowers every flag raised by the session.
    pub fn clear_session(&self, session: SessionId) -> Vec<(Uuid, Principal)> {
        self.drain_where(|entry| entry.session == session)
    }

    /// Lowers every flag that lapsed at or before `now`.
    pub fn expire(&self, now: Instant) -> Vec<(Uuid, Principal)> {
        self.drain_where(|entry| entry.expires_at <= now)
    }

    pub fn is_typing(&self, room_id: Uuid, user_id: Uuid, now: Instant) -> bool {
        self.entries
            .get(&(room_id, user_id))
            .is_some_and(|entry| entry.expires_at > now)
    }

    fn drain_where(&self, pred: impl Fn(&TypingEntry) -> bool) -> Vec<(Uuid, Principal)> {
        let keys: Vec<(Uuid, Uuid)> = self
            .entries
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                self.entries
                    .remove_if(&key, |_, entry| pred(entry))
                    .map(|((room_id, _), entry)| (room_id, entry.user))
            })
            .collect()
    }
}

impl Hub {
    /// `typing_start`. Ignored for rooms the session is not subscribed to.
    pub fn start_typing(&self, session: &SessionHandle, room_id: Uuid) {
        if !self.channels.is_subscribed(room_id, session.id) {
            return;
        }
        self.typing.start(room_id, session.id, &session.principal, Instant::now());
        self.fan_out(
            room_id,
            &ServerEvent::UserTyping { room_id, user: session.principal.clone() },
            Some(session.id),
        );
    }

    /// `typing_stop`. Only announced if the flag was actually up.
    pub fn stop_typing(&self, session: &SessionHandle, room_id: Uuid) {
        if let Some(user) = self.typing.stop(room_id, session.principal.id) {
            self.announce_stopped(room_id, user, Some(session.id));
        }
    }

    /// Emits the synthetic stops for every lapsed flag.
    pub fn sweep_typing(&self, now: Instant) -> usize {
        let lapsed = self.typing.expire(now);
        let count = lapsed.len();
        for (room_id, user) in lapsed {
            debug!(room = %room_id, user = %user.id, "typing indicator lapsed");
            self.announce_stopped(room_id, user, None);
        }
        count
    }

    pub(crate) fn announce_stopped(&self, room_id: Uuid, user: Principal, except: Option<SessionId>) {
        self.fan_out(room_id, &ServerEvent::UserStoppedTyping { room_id, user }, except);
    }

    /// Sweeps lapsed typing flags every `typing_sweep` until the hub is gone.
    pub fn spawn_typing_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub: Weak<Hub> = Arc::downgrade(self);
        let period = self.config.typing_sweep;

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.sweep_typing(Instant::now());
            }
        })
    }
}
