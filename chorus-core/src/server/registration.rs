//! Authenticator forwarding
//!
//! Each call is answered by the attached authenticator. With none attached,
//! or when the authenticator declines, the answer is `None`.

use super::Server;
use crate::auth::{AuthResult, Authenticator, Registration};
use crate::types::UserId;
use std::collections::BTreeMap;
use tracing::debug;

impl Server {
    fn with_authenticator<T>(&self, f: impl FnOnce(&dyn Authenticator) -> Option<T>) -> Option<T> {
        // Clone out so the backend runs without the slot locked
        let authenticator = self.current_authenticator()?;
        f(authenticator.as_ref())
    }

    pub fn register_participant(&self, name: &str) -> Option<UserId> {
        let user = self.with_authenticator(|a| a.register_participant(name));
        debug!(server = %self.id(), name = %name, user = ?user, "Registration requested");
        user
    }

    pub fn unregister_participant(&self, user: UserId) -> Option<bool> {
        self.with_authenticator(|a| a.unregister_participant(user))
    }

    pub fn list_registered(&self, filter: &str) -> Option<BTreeMap<UserId, Registration>> {
        self.with_authenticator(|a| a.list_registered(filter))
    }

    pub fn get_registration(&self, user: UserId) -> Option<Registration> {
        self.with_authenticator(|a| a.get_registration(user))
    }

    pub fn authenticate(&self, name: &str, password: &str) -> Option<AuthResult> {
        self.with_authenticator(|a| a.authenticate(name, password))
    }

    pub fn set_password(&self, user: UserId, password: &str) -> Option<bool> {
        self.with_authenticator(|a| a.set_password(user, password))
    }

    pub fn set_email(&self, user: UserId, email: &str) -> Option<bool> {
        self.with_authenticator(|a| a.set_email(user, email))
    }

    pub fn set_name(&self, user: UserId, name: &str) -> Option<bool> {
        self.with_authenticator(|a| a.set_name(user, name))
    }

    pub fn set_texture(&self, user: UserId, texture: &[u8]) -> Option<bool> {
        self.with_authenticator(|a| a.set_texture(user, texture))
    }

    pub fn id_to_name(&self, user: UserId) -> Option<String> {
        self.with_authenticator(|a| a.id_to_name(user))
    }

    pub fn name_to_id(&self, name: &str) -> Option<UserId> {
        self.with_authenticator(|a| a.name_to_id(name))
    }

    pub fn id_to_texture(&self, user: UserId) -> Option<Vec<u8>> {
        self.with_authenticator(|a| a.id_to_texture(user))
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::{AuthResult, MemoryAuthenticator};
    use crate::error::ServerError;
    use crate::server::Server;
    use crate::types::{ServerId, UserId};
    use std::sync::Arc;

    #[test]
    fn test_everything_none_without_authenticator() {
        let server = Server::new(ServerId(1));

        assert_eq!(server.register_participant("alice"), None);
        assert_eq!(server.unregister_participant(UserId(1)), None);
        assert_eq!(server.list_registered(""), None);
        assert_eq!(server.get_registration(UserId(1)), None);
        assert_eq!(server.authenticate("alice", "pw"), None);
        assert_eq!(server.set_password(UserId(1), "pw"), None);
        assert_eq!(server.set_email(UserId(1), "a@b"), None);
        assert_eq!(server.set_name(UserId(1), "x"), None);
        assert_eq!(server.set_texture(UserId(1), &[0]), None);
        assert_eq!(server.id_to_name(UserId(1)), None);
        assert_eq!(server.name_to_id("alice"), None);
        assert_eq!(server.id_to_texture(UserId(1)), None);
    }

    #[test]
    fn test_forwarding_and_detach() {
        let server = Server::new(ServerId(1));
        server.connect_authenticator(Arc::new(MemoryAuthenticator::new()));

        let user = server.register_participant("alice").unwrap();
        assert_eq!(server.id_to_name(user).as_deref(), Some("alice"));

        assert!(server.disconnect_authenticator());
        assert!(!server.disconnect_authenticator());
        assert_eq!(server.id_to_name(user), None);
    }

    #[tokio::test]
    async fn test_connect_authenticated() {
        let server = Server::new(ServerId(1));
        let auth = Arc::new(MemoryAuthenticator::new());
        server.connect_authenticator(auth);

        let user = server.register_participant("Alice").unwrap();
        server.set_password(user, "secret");

        let session = server.connect_authenticated("alice", "secret").await.unwrap();
        let p = server.participant(session.id()).await.unwrap();
        assert_eq!(p.user_id(), Some(user));
        assert_eq!(p.name(), "Alice");

        assert_eq!(
            server.connect_authenticated("alice", "nope").await.unwrap_err(),
            ServerError::AuthenticationRejected("alice".into())
        );

        let guest = server.connect_authenticated("bob", "whatever").await.unwrap();
        assert_eq!(server.participant(guest.id()).await.unwrap().user_id(), None);

        assert_eq!(
            server.authenticate("alice", "secret"),
            Some(AuthResult::Accepted { user, name: "Alice".into() })
        );
    }
}
