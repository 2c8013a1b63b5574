use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{auth::Principal, db};

use super::ServerEvent;

/// Index of a live connection. Allocated from a counter, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

#[cfg(test)]
impl SessionId {
    pub(crate) fn for_tests(raw: u64) -> SessionId {
        SessionId(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One live connection and the queue its writer task drains.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub principal: Principal,
    pub connected_at: OffsetDateTime,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl SessionHandle {
    /// Queues an event. `false` once the connection's writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Epoch stamped on an online/offline transition, for ordering the durable
/// presence writes. Never lower than the wall clock in milliseconds, so
/// epochs stored by a previous run of the process stay behind new ones.
pub type PresenceEpoch = u64;

/// principal → sessions, plus session → handle.
///
/// The per-principal entry lock decides the 0→1 and N→0 transitions, so two
/// sessions of the same user racing to connect or disconnect agree on which
/// one flips presence.
pub struct ConnectionRegistry {
    next_session: AtomicU64,
    last_epoch: AtomicU64,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    by_principal: DashMap<Uuid, HashSet<SessionId>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        ConnectionRegistry {
            next_session: AtomicU64::new(1),
            last_epoch: AtomicU64::new(0),
            sessions: DashMap::new(),
            by_principal: DashMap::new(),
        }
    }
}

impl ConnectionRegistry {
    /// Adds a session. The epoch is `Some` when this is the principal's
    /// first live session.
    pub fn register(
        &self,
        principal: Principal,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> (Arc<SessionHandle>, Option<PresenceEpoch>) {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(SessionHandle {
            id,
            principal,
            connected_at: db::now(),
            tx,
        });
        self.sessions.insert(id, handle.clone());

        let mut owned = self.by_principal.entry(handle.principal.id).or_default();
        owned.insert(id);
        let came_online = (owned.len() == 1).then(|| self.next_epoch());
        drop(owned);

        (handle, came_online)
    }

    /// Removes a session. The epoch is `Some` when it was the principal's
    /// last one.
    pub fn deregister(&self, id: SessionId) -> Option<(Arc<SessionHandle>, Option<PresenceEpoch>)> {
        let (_, handle) = self.sessions.remove(&id)?;

        let went_offline = match self.by_principal.entry(handle.principal.id) {
            Entry::Occupied(mut owned) => {
                owned.get_mut().remove(&id);
                if owned.get().is_empty() {
                    owned.remove();
                    Some(self.next_epoch())
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        };

        Some((handle, went_offline))
    }

    /// Strictly increasing within the process, and at least the current
    /// millisecond so a restart does not fall behind stored epochs.
    pub(crate) fn next_epoch(&self) -> PresenceEpoch {
        let floor = db::to_millis(db::now()).max(0) as u64;
        let advance = |last: u64| last.saturating_add(1).max(floor);
        match self
            .last_epoch
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(advance(last)))
        {
            Ok(last) | Err(last) => advance(last),
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|handle| handle.value().clone())
    }

    pub fn sessions_of(&self, user_id: Uuid) -> Vec<Arc<SessionHandle>> {
        let ids: Vec<SessionId> = self
            .by_principal
            .get(&user_id)
            .map(|owned| owned.iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.by_principal.contains_key(&user_id)
    }

    /// Delivers to every live session of one user. Returns how many got it.
    pub fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        self.sessions_of(user_id)
            .iter()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    /// Delivers to every live session not owned by `user_id`.
    pub fn send_to_others(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let targets: Vec<Arc<SessionHandle>> = self
            .sessions
            .iter()
            .filter(|handle| handle.principal.id != user_id)
            .map(|handle| handle.value().clone())
            .collect();
        targets
            .iter()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn online_count(&self) -> usize {
        self.by_principal.len()
    }
}
