use tracing::warn;

use crate::{auth::Principal, db};

use super::{registry::PresenceEpoch, Hub, ServerEvent};

impl Hub {
    /// The principal's first session came up.
    pub(crate) async fn went_online(&self, principal: &Principal, epoch: PresenceEpoch) {
        let stored = self
            .bounded(self.store.set_presence(principal.id, true, db::now(), epoch))
            .await;
        if let Err(err) = stored {
            warn!(user = %principal.id, "failed to record online presence: {err}");
        }

        self.registry.send_to_others(
            principal.id,
            &ServerEvent::UserOnline {
                user_id: principal.id,
                username: principal.username.clone(),
            },
        );
    }

    /// The principal's last session went away. Runs from a destructor, so the
    /// durable write is detached onto the runtime.
    pub(crate) fn went_offline(&self, principal: &Principal, epoch: PresenceEpoch) {
        let last_seen = db::now();
        self.registry.send_to_others(
            principal.id,
            &ServerEvent::UserOffline {
                user_id: principal.id,
                username: principal.username.clone(),
                last_seen,
            },
        );

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(user = %principal.id, "no runtime to record offline presence");
            return;
        };
        let store = self.store.clone();
        let timeout = self.config.store_timeout;
        let user_id = principal.id;
        runtime.spawn(async move {
            match tokio::time::timeout(timeout, store.set_presence(user_id, false, last_seen, epoch)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(user = %user_id, "failed to record offline presence: {err}"),
                Err(_) => warn!(user = %user_id, "recording offline presence timed out"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        db,
        rooms::{
            test_helpers::{drain, test_hub, Client},
            Hub, ServerEvent,
        },
        store::test_helpers::user,
    };

    fn presence(events: &[ServerEvent]) -> Vec<&ServerEvent> {
        events
            .iter()
            .filter(|event| matches!(event, ServerEvent::UserOnline { .. } | ServerEvent::UserOffline { .. }))
            .collect()
    }

    #[tokio::test]
    async fn online_and_offline_fire_on_first_and_last_session() {
        let (hub, store) = test_hub().await;
        let mut watcher = Client::new(&hub, &store, "watcher").await;
        let alice_user = user(&store, "alice").await;

        let phone = Client::connect(&hub, alice_user.clone().into()).await;
        let laptop = Client::connect(&hub, alice_user.clone().into()).await;

        let events = drain(&mut watcher.rx);
        assert_eq!(
            presence(&events),
            vec![&ServerEvent::UserOnline { user_id: alice_user.id, username: "alice".to_owned() }]
        );
        assert!(store.find_user(alice_user.id).await.unwrap().unwrap().is_online);

        drop(phone);
        assert!(presence(&drain(&mut watcher.rx)).is_empty());

        drop(laptop);
        let events = drain(&mut watcher.rx);
        let offline = presence(&events);
        assert_eq!(offline.len(), 1);
        assert!(matches!(offline[0], ServerEvent::UserOffline { user_id, .. } if *user_id == alice_user.id));

        // the durable write is detached; give it a moment to land
        for _ in 0..50 {
            if !store.find_user(alice_user.id).await.unwrap().unwrap().is_online {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("offline presence was never recorded");
    }

    #[tokio::test]
    async fn users_do_not_hear_about_themselves() {
        let (hub, store) = test_hub().await;
        let mut alice = Client::new(&hub, &store, "alice").await;
        let _bob = Client::new(&hub, &store, "bob").await;

        let events = drain(&mut alice.rx);
        let presence = presence(&events);
        assert_eq!(presence.len(), 1);
        assert!(matches!(presence[0], ServerEvent::UserOnline { username, .. } if username == "bob"));
    }

    #[tokio::test]
    async fn presence_keeps_updating_after_a_restart() {
        let (previous, store) = test_hub().await;
        let alice = user(&store, "alice").await;

        // the last transition recorded by the previous process
        let stale = previous.registry.next_epoch();
        assert!(store.set_presence(alice.id, false, db::now(), stale).await.unwrap());
        let config = previous.config.clone();
        drop(previous);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let restarted = Hub::new(store.clone(), config);
        let session = Client::connect(&restarted, alice.clone().into()).await;
        assert!(store.find_user(alice.id).await.unwrap().unwrap().is_online);

        drop(session);
        for _ in 0..50 {
            if !store.find_user(alice.id).await.unwrap().unwrap().is_online {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("offline presence was never recorded after the restart");
    }
}
