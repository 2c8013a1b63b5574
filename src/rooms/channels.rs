use std::collections::HashSet;

use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use super::SessionId;

/// Which sessions are listening to which rooms right now.
///
/// Purely in-memory. A room's channel exists only while it has at least one
/// subscriber; the reverse index lets a disconnect tear down every
/// subscription without scanning all rooms.
#[derive(Default)]
pub struct RoomChannels {
    rooms: DashMap<Uuid, HashSet<SessionId>>,
    by_session: DashMap<SessionId, HashSet<Uuid>>,
}

impl RoomChannels {
    /// Returns `false` if the session was already subscribed.
    pub fn subscribe(&self, room_id: Uuid, session: SessionId) -> bool {
        let added = self.rooms.entry(room_id).or_default().insert(session);
        self.by_session.entry(session).or_default().insert(room_id);
        added
    }

    /// Returns `false` if the session was not subscribed.
    pub fn unsubscribe(&self, room_id: Uuid, session: SessionId) -> bool {
        let removed = remove_and_prune(&self.rooms, room_id, &session);
        remove_and_prune(&self.by_session, session, &room_id);
        removed
    }

    /// Drops every subscription of a session. Returns the rooms it was in.
    pub fn unsubscribe_all(&self, session: SessionId) -> Vec<Uuid> {
        let Some((_, rooms)) = self.by_session.remove(&session) else {
            return Vec::new();
        };
        for room_id in &rooms {
            remove_and_prune(&self.rooms, *room_id, &session);
        }
        rooms.into_iter().collect()
    }

    pub fn subscribers(&self, room_id: Uuid) -> Vec<SessionId> {
        self.rooms
            .get(&room_id)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, room_id: Uuid, session: SessionId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|sessions| sessions.contains(&session))
    }

    pub fn rooms_of(&self, session: SessionId) -> Vec<Uuid> {
        self.by_session
            .get(&session)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms with at least one subscriber.
    pub fn live_rooms(&self) -> usize {
        self.rooms.len()
    }
}

fn remove_and_prune<K, V>(map: &DashMap<K, HashSet<V>>, key: K, value: &V) -> bool
where
    K: Eq + std::hash::Hash,
    V: Eq + std::hash::Hash,
{
    match map.entry(key) {
        Entry::Occupied(mut set) => {
            let removed = set.get_mut().remove(value);
            if set.get().is_empty() {
                set.remove();
            }
            removed
        }
        Entry::Vacant(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_channels_are_discarded() {
        let channels = RoomChannels::default();
        let room = Uuid::now_v7();
        let session = SessionId::for_tests(1);

        assert!(channels.subscribe(room, session));
        assert!(!channels.subscribe(room, session));
        assert_eq!(channels.live_rooms(), 1);

        assert!(channels.unsubscribe(room, session));
        assert!(!channels.unsubscribe(room, session));
        assert_eq!(channels.live_rooms(), 0);
        assert!(channels.rooms_of(session).is_empty());
    }

    #[test]
    fn unsubscribe_all_leaves_other_sessions_alone() {
        let channels = RoomChannels::default();
        let (general, random) = (Uuid::now_v7(), Uuid::now_v7());
        let (leaving, staying) = (SessionId::for_tests(1), SessionId::for_tests(2));

        channels.subscribe(general, leaving);
        channels.subscribe(random, leaving);
        channels.subscribe(general, staying);

        let mut left = channels.unsubscribe_all(leaving);
        left.sort();
        let mut expected = vec![general, random];
        expected.sort();
        assert_eq!(left, expected);

        assert_eq!(channels.subscribers(general), vec![staying]);
        assert!(channels.subscribers(random).is_empty());
        assert!(!channels.is_subscribed(general, leaving));
        assert_eq!(channels.live_rooms(), 1);
        assert!(channels.unsubscribe_all(leaving).is_empty());
    }
}
