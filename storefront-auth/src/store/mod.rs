//! Storage abstractions for the gateway

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::{InMemorySessionStore, InMemoryTokenLedger, InMemoryUserStore};
pub use models::*;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use storefront_identity::IdentityClaims;

use crate::error::GatewayError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, GatewayError>;

/// Trait for user account storage
pub trait UserStore: Send + Sync {
    /// Insert a user; fails with `EmailAlreadyExists` if the email is taken
    fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Get a user by uid
    fn get_user(&self, uid: &str) -> StoreResult<Option<User>>;

    /// Get a user by email address (case-insensitive)
    fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Replace a user's stored credential
    fn update_password(&self, uid: &str, password_hash: &str) -> StoreResult<()>;

    /// Insert or refresh the account for a federated identity
    ///
    /// Matches by `uid == sub`, then by email (keeping the existing uid),
    /// and otherwise inserts a new user with `uid = sub`. An email match
    /// with an unverified provider email is `EmailAlreadyExists`.
    fn upsert_federated(&self, profile: &FederatedProfile) -> StoreResult<User>;
}

/// Trait for session storage
pub trait SessionStore: Send + Sync {
    /// Create and persist an empty session living for `ttl`
    fn create(&self, ttl: Duration) -> StoreResult<Session>;

    /// Get a live session; expired sessions are deleted and reported as absent
    fn get(&self, session_id: &SessionId) -> StoreResult<Option<Session>>;

    /// Persist the session's user and flow state
    fn save(&self, session: &Session) -> StoreResult<()>;

    /// Move a session's expiry
    fn touch(&self, session_id: &SessionId, expires_at: DateTime<Utc>) -> StoreResult<()>;

    /// Delete a session
    fn delete(&self, session_id: &SessionId) -> StoreResult<()>;

    /// Delete expired sessions, returning how many were removed
    fn cleanup_expired(&self) -> StoreResult<u64>;
}

/// Short-lived store of one-time tokens minted by the OIDC callback
pub trait TokenLedger: Send + Sync {
    /// Record claims under `token`, expiring after `ttl`
    fn insert(&self, token: &str, claims: IdentityClaims, ttl: Duration) -> StoreResult<()>;

    /// Read an entry without changing it
    fn get(&self, token: &str) -> StoreResult<Option<TempAuthEntry>>;

    /// Atomically consume an entry
    ///
    /// Returns the entry as it was before the call. If it was unconsumed and
    /// unexpired it is now consumed and expires at `now + grace`; otherwise
    /// it is left untouched.
    fn mark_consumed(
        &self,
        token: &str,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> StoreResult<Option<TempAuthEntry>>;

    /// Remove an entry
    fn remove(&self, token: &str) -> StoreResult<()>;

    /// Drop every entry expired at `now`, returning how many were removed
    fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

impl<T: UserStore + ?Sized> UserStore for Arc<T> {
    fn create_user(&self, user: NewUser) -> StoreResult<User> {
        (**self).create_user(user)
    }

    fn get_user(&self, uid: &str) -> StoreResult<Option<User>> {
        (**self).get_user(uid)
    }

    fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        (**self).get_user_by_email(email)
    }

    fn update_password(&self, uid: &str, password_hash: &str) -> StoreResult<()> {
        (**self).update_password(uid, password_hash)
    }

    fn upsert_federated(&self, profile: &FederatedProfile) -> StoreResult<User> {
        (**self).upsert_federated(profile)
    }
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn create(&self, ttl: Duration) -> StoreResult<Session> {
        (**self).create(ttl)
    }

    fn get(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        (**self).get(session_id)
    }

    fn save(&self, session: &Session) -> StoreResult<()> {
        (**self).save(session)
    }

    fn touch(&self, session_id: &SessionId, expires_at: DateTime<Utc>) -> StoreResult<()> {
        (**self).touch(session_id, expires_at)
    }

    fn delete(&self, session_id: &SessionId) -> StoreResult<()> {
        (**self).delete(session_id)
    }

    fn cleanup_expired(&self) -> StoreResult<u64> {
        (**self).cleanup_expired()
    }
}
