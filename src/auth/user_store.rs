//! User Storage
//! Mission: Resolve token subjects to identities and keep password credentials
//!
//! Persistence lives outside this crate; the in-memory store stands in for it
//! and is what the binary wires up.

use crate::auth::models::{Identity, UserRole};
use bcrypt::{hash, verify, DEFAULT_COST};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("email already registered")]
    EmailTaken,

    #[error("username already taken")]
    UsernameTaken,

    #[error("user not found")]
    NotFound,

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// A password account about to be created.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_creator: bool,
}

/// Contract the auth endpoints need from a user backend.
pub trait IdentityDirectory: Send + Sync {
    fn lookup(&self, subject: &str) -> Option<Identity>;

    /// Insert or replace the identity stored under `identity.sub`.
    fn upsert(&self, identity: Identity);

    /// Record an external sign-in. Existing users keep their role and creator
    /// flag; profile fields and the verified flag are refreshed. New users
    /// start as plain users.
    fn register_external(
        &self,
        subject: &str,
        username: &str,
        email: &str,
        email_verified: bool,
    ) -> Identity;

    /// Whether the provider vouched for the user's email address.
    fn is_email_verified(&self, subject: &str) -> bool;

    /// Create a password account. Email and username are unique,
    /// email case-insensitively.
    fn create_account(&self, account: NewAccount) -> Result<Identity, DirectoryError>;

    /// `Ok(None)` for an unknown email, an account without a password or a
    /// wrong password.
    fn verify_password(&self, email: &str, password: &str)
        -> Result<Option<Identity>, DirectoryError>;

    fn rename(&self, subject: &str, username: &str) -> Result<Identity, DirectoryError>;
}

struct UserRecord {
    identity: Identity,
    password_hash: Option<String>,
    email_verified: bool,
}

impl UserRecord {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            password_hash: None,
            email_verified: false,
        }
    }
}

/// In-memory user storage
pub struct UserStore {
    users: RwLock<HashMap<String, UserRecord>>,
    hash_cost: u32,
}

impl Default for UserStore {
    fn default() -> Self {
        Self::with_hash_cost(DEFAULT_COST)
    }
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// bcrypt cost for new password hashes
    pub fn with_hash_cost(hash_cost: u32) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            hash_cost,
        }
    }

    /// Build a store pre-populated with the given identities
    pub fn with_users(users: impl IntoIterator<Item = Identity>) -> Self {
        let store = Self::new();
        for identity in users {
            store.upsert(identity);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

fn conflict(
    users: &HashMap<String, UserRecord>,
    skip_subject: Option<&str>,
    username: Option<&str>,
    email: Option<&str>,
) -> Option<DirectoryError> {
    users
        .values()
        .filter(|r| Some(r.identity.sub.as_str()) != skip_subject)
        .find_map(|r| {
            if email.is_some_and(|e| r.identity.email.eq_ignore_ascii_case(e)) {
                Some(DirectoryError::EmailTaken)
            } else if username.is_some_and(|u| r.identity.username == u) {
                Some(DirectoryError::UsernameTaken)
            } else {
                None
            }
        })
}

impl IdentityDirectory for UserStore {
    fn lookup(&self, subject: &str) -> Option<Identity> {
        self.users.read().get(subject).map(|r| r.identity.clone())
    }

    fn upsert(&self, identity: Identity) {
        let mut users = self.users.write();
        match users.get_mut(&identity.sub) {
            Some(record) => record.identity = identity,
            None => {
                users.insert(identity.sub.clone(), UserRecord::new(identity));
            }
        }
    }

    fn register_external(
        &self,
        subject: &str,
        username: &str,
        email: &str,
        email_verified: bool,
    ) -> Identity {
        let mut users = self.users.write();
        let record = users.entry(subject.to_string()).or_insert_with(|| {
            info!(sub = %subject, "Registering new user from external sign-in");
            UserRecord::new(Identity::new(subject, username, email, UserRole::User, false))
        });
        record.identity.username = username.to_string();
        record.identity.email = email.to_string();
        record.email_verified = email_verified;
        record.identity.clone()
    }

    fn is_email_verified(&self, subject: &str) -> bool {
        self.users
            .read()
            .get(subject)
            .is_some_and(|r| r.email_verified)
    }

    fn create_account(&self, account: NewAccount) -> Result<Identity, DirectoryError> {
        let password_hash = hash(&account.password, self.hash_cost)
            .map_err(|e| DirectoryError::Hashing(e.to_string()))?;

        let mut users = self.users.write();
        if let Some(err) = conflict(
            &users,
            None,
            Some(account.username.as_str()),
            Some(account.email.as_str()),
        ) {
            return Err(err);
        }

        let identity = Identity::new(
            Uuid::new_v4().to_string(),
            account.username,
            account.email,
            UserRole::User,
            account.is_creator,
        );
        info!(sub = %identity.sub, username = %identity.username, "Created password account");

        users.insert(
            identity.sub.clone(),
            UserRecord {
                identity: identity.clone(),
                password_hash: Some(password_hash),
                email_verified: false,
            },
        );
        Ok(identity)
    }

    fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Identity>, DirectoryError> {
        let candidate = {
            let users = self.users.read();
            users.values().find_map(|r| {
                let password_hash = r.password_hash.as_ref()?;
                r.identity
                    .email
                    .eq_ignore_ascii_case(email)
                    .then(|| (r.identity.clone(), password_hash.clone()))
            })
        };

        let Some((identity, password_hash)) = candidate else {
            return Ok(None);
        };

        let matches = verify(password, &password_hash)
            .map_err(|e| DirectoryError::Hashing(e.to_string()))?;
        Ok(matches.then_some(identity))
    }

    fn rename(&self, subject: &str, username: &str) -> Result<Identity, DirectoryError> {
        let mut users = self.users.write();
        if let Some(err) = conflict(&users, Some(subject), Some(username), None) {
            return Err(err);
        }
        let record = users.get_mut(subject).ok_or(DirectoryError::NotFound)?;
        record.identity.username = username.to_string();
        Ok(record.identity.clone())
    }
}
