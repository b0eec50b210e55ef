//! Registration and authentication port
//!
//! A server delegates user registration and credential checks to an optional
//! [`Authenticator`]. Every method returns `None` when the authenticator does
//! not handle the request; the server also answers `None` for every request
//! while no authenticator is attached.

use crate::types::UserId;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Registered user details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: Option<String>,
}

/// Outcome of a credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Credentials match; `name` is the canonical registered name
    Accepted { user: UserId, name: String },
    Rejected,
}

/// External registration and authentication backend
pub trait Authenticator: Send + Sync {
    /// Register a new user; returns the assigned id
    fn register_participant(&self, name: &str) -> Option<UserId>;

    fn unregister_participant(&self, user: UserId) -> Option<bool>;

    /// Registered users whose name contains `filter` (all when empty)
    fn list_registered(&self, filter: &str) -> Option<BTreeMap<UserId, Registration>>;

    fn get_registration(&self, user: UserId) -> Option<Registration>;

    fn authenticate(&self, name: &str, password: &str) -> Option<AuthResult>;

    fn set_password(&self, user: UserId, password: &str) -> Option<bool>;

    fn set_email(&self, user: UserId, email: &str) -> Option<bool>;

    fn set_name(&self, user: UserId, name: &str) -> Option<bool>;

    fn set_texture(&self, user: UserId, texture: &[u8]) -> Option<bool>;

    fn id_to_name(&self, user: UserId) -> Option<String>;

    fn name_to_id(&self, name: &str) -> Option<UserId>;

    fn id_to_texture(&self, user: UserId) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
struct UserRecord {
    name: String,
    email: Option<String>,
    /// PHC string
    password_hash: Option<String>,
    texture: Vec<u8>,
}

#[derive(Debug)]
struct Registry {
    users: BTreeMap<UserId, UserRecord>,
    next_id: u32,
}

/// In-process authenticator keeping registrations in memory.
///
/// Passwords are stored as Argon2id hashes. Ids start at 1; the superuser id
/// is never handed out.
#[derive(Debug)]
pub struct MemoryAuthenticator {
    registry: RwLock<Registry>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                users: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.read().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().users.is_empty()
    }

    fn hash_password(password: &str) -> Option<String> {
        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);

        let salt = match SaltString::encode_b64(&salt) {
            Ok(salt) => salt,
            Err(e) => {
                warn!(error = %e, "Salt encoding failed");
                return None;
            }
        };

        match Argon2::default().hash_password(password.as_bytes(), &salt) {
            Ok(hash) => Some(hash.to_string()),
            Err(e) => {
                warn!(error = %e, "Password hashing failed");
                None
            }
        }
    }

    fn verify_password(hash: &str, password: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    fn name_taken(registry: &Registry, name: &str, except: Option<UserId>) -> bool {
        registry
            .users
            .iter()
            .any(|(id, r)| Some(*id) != except && r.name.eq_ignore_ascii_case(name))
    }
}

impl Default for MemoryAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator for MemoryAuthenticator {
    fn register_participant(&self, name: &str) -> Option<UserId> {
        let mut registry = self.registry.write();
        if name.is_empty() || Self::name_taken(&registry, name, None) {
            debug!(name = %name, "Registration refused");
            return None;
        }

        let user = UserId(registry.next_id);
        registry.next_id += 1;
        registry.users.insert(
            user,
            UserRecord {
                name: name.to_string(),
                ..Default::default()
            },
        );

        debug!(user = %user, name = %name, "User registered");
        Some(user)
    }

    fn unregister_participant(&self, user: UserId) -> Option<bool> {
        Some(self.registry.write().users.remove(&user).is_some())
    }

    fn list_registered(&self, filter: &str) -> Option<BTreeMap<UserId, Registration>> {
        let registry = self.registry.read();
        let filter = filter.to_lowercase();
        Some(
            registry
                .users
                .iter()
                .filter(|(_, r)| filter.is_empty() || r.name.to_lowercase().contains(&filter))
                .map(|(id, r)| {
                    (
                        *id,
                        Registration {
                            name: r.name.clone(),
                            email: r.email.clone(),
                        },
                    )
                })
                .collect(),
        )
    }

    fn get_registration(&self, user: UserId) -> Option<Registration> {
        self.registry.read().users.get(&user).map(|r| Registration {
            name: r.name.clone(),
            email: r.email.clone(),
        })
    }

    fn authenticate(&self, name: &str, password: &str) -> Option<AuthResult> {
        let (user, record) = {
            let registry = self.registry.read();
            let (id, r) = registry
                .users
                .iter()
                .find(|(_, r)| r.name.eq_ignore_ascii_case(name))?;
            (*id, r.clone())
        };

        // Unknown names fall through to other backends; a wrong password is a rejection
        let accepted = record
            .password_hash
            .as_deref()
            .map_or(false, |hash| Self::verify_password(hash, password));

        if accepted {
            Some(AuthResult::Accepted {
                user,
                name: record.name,
            })
        } else {
            debug!(user = %user, "Authentication rejected");
            Some(AuthResult::Rejected)
        }
    }

    fn set_password(&self, user: UserId, password: &str) -> Option<bool> {
        if !self.registry.read().users.contains_key(&user) {
            return Some(false);
        }
        let hash = Self::hash_password(password)?;

        let mut registry = self.registry.write();
        Some(match registry.users.get_mut(&user) {
            Some(r) => {
                r.password_hash = Some(hash);
                true
            }
            None => false,
        })
    }

    fn set_email(&self, user: UserId, email: &str) -> Option<bool> {
        let mut registry = self.registry.write();
        Some(match registry.users.get_mut(&user) {
            Some(r) => {
                r.email = Some(email.to_string());
                true
            }
            None => false,
        })
    }

    fn set_name(&self, user: UserId, name: &str) -> Option<bool> {
        let mut registry = self.registry.write();
        if name.is_empty() || Self::name_taken(&registry, name, Some(user)) {
            return Some(false);
        }
        Some(match registry.users.get_mut(&user) {
            Some(r) => {
                r.name = name.to_string();
                true
            }
            None => false,
        })
    }

    fn set_texture(&self, user: UserId, texture: &[u8]) -> Option<bool> {
        let mut registry = self.registry.write();
        Some(match registry.users.get_mut(&user) {
            Some(r) => {
                r.texture = texture.to_vec();
                true
            }
            None => false,
        })
    }

    fn id_to_name(&self, user: UserId) -> Option<String> {
        self.registry.read().users.get(&user).map(|r| r.name.clone())
    }

    fn name_to_id(&self, name: &str) -> Option<UserId> {
        self.registry
            .read()
            .users
            .iter()
            .find(|(_, r)| r.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    fn id_to_texture(&self, user: UserId) -> Option<Vec<u8>> {
        self.registry.read().users.get(&user).map(|r| r.texture.clone())
    }
}
