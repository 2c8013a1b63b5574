use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{store::User, ChatError, ChatResult, Store};

/// An authenticated user, as attached to a session and to outbound events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
}

impl From<User> for Principal {
    fn from(User { id, username, avatar, .. }: User) -> Self {
        Principal { id, username, avatar }
    }
}

/// Claims carried by the bearer token. Issued elsewhere.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub exp: u64,
}

/// Verifies handshake credentials and resolves them to a [`Principal`].
#[derive(Clone)]
pub struct Identity {
    key: DecodingKey,
    validation: Validation,
    store: Store,
}

impl Identity {
    pub fn new(secret: &str, store: Store) -> Identity {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.required_spec_claims = ["exp".to_owned()].into();

        Identity {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            store,
        }
    }

    pub async fn authenticate(&self, credential: Option<&str>) -> ChatResult<Principal> {
        let Some(token) = credential.map(str::trim).filter(|token| !token.is_empty()) else {
            return Err(ChatError::Authentication("missing credential"));
        };

        let claims = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|err| {
                debug!("rejected credential: {err}");
                match err.kind() {
                    ErrorKind::ExpiredSignature => ChatError::Authentication("expired credential"),
                    ErrorKind::InvalidSignature => ChatError::Authentication("bad signature"),
                    _ => ChatError::Authentication("malformed credential"),
                }
            })?
            .claims;

        self.store
            .find_user(claims.user_id)
            .await?
            .map(Principal::from)
            .ok_or(ChatError::Authentication("unknown user"))
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

#[cfg(test)]
pub(crate) fn mint(secret: &str, user_id: Uuid, ttl_secs: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header};

    let exp = time::OffsetDateTime::now_utc().unix_timestamp() + ttl_secs;
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &Claims { user_id, exp: exp.max(0) as u64 },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_helpers::test_store;

    const SECRET: &str = "test-secret";

    #[tokio::test]
    async fn valid_token_resolves_to_principal() {
        let store = test_store().await;
        let alice = store.create_user("alice", None).await.unwrap();
        let identity = Identity::new(SECRET, store);

        let token = mint(SECRET, alice.id, 60);
        let principal = identity.authenticate(Some(&token)).await.unwrap();
        assert_eq!(principal.id, alice.id);
        assert_eq!(principal.username, "alice");
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected() {
        let store = test_store().await;
        let alice = store.create_user("alice", None).await.unwrap();
        let identity = Identity::new(SECRET, store);

        for credential in [
            None,
            Some(String::new()),
            Some("not-a-jwt".to_owned()),
            Some(mint("other-secret", alice.id, 60)),
            Some(mint(SECRET, alice.id, -120)),
            Some(mint(SECRET, Uuid::now_v7(), 60)),
        ] {
            let result = identity.authenticate(credential.as_deref()).await;
            assert!(
                matches!(result, Err(ChatError::Authentication(_))),
                "{credential:?} should be refused"
            );
        }
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer("bearer  abc"), Some("abc"));
        assert_eq!(bearer("Basic abc"), None);
        assert_eq!(bearer("abc"), None);
    }
}
