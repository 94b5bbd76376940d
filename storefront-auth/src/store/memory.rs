//! In-memory storage implementations

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use storefront_identity::IdentityClaims;
use uuid::Uuid;

use super::{
    FederatedProfile, NewUser, Session, SessionId, SessionStore, StoreResult, TempAuthEntry,
    TokenLedger, User, UserStore,
};
use crate::error::GatewayError;

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| GatewayError::Internal("store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| GatewayError::Internal("store lock poisoned".to_string()))
}

/// Users keyed by uid, with a lowercase email index
#[derive(Default)]
struct Users {
    by_uid: HashMap<String, User>,
    uid_by_email: HashMap<String, String>,
}

impl Users {
    fn by_email(&self, email: &str) -> Option<&User> {
        self.uid_by_email
            .get(&email.to_lowercase())
            .and_then(|uid| self.by_uid.get(uid))
    }

    fn insert(&mut self, user: User) {
        self.uid_by_email.insert(user.email.clone(), user.uid.clone());
        self.by_uid.insert(user.uid.clone(), user);
    }
}

/// In-memory user store
pub struct InMemoryUserStore {
    users: RwLock<Users>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(Users::default()),
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for InMemoryUserStore {
    fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let mut users = write(&self.users)?;
        let email = new.email.to_lowercase();
        if users.uid_by_email.contains_key(&email) || users.by_uid.contains_key(&new.uid) {
            return Err(GatewayError::EmailAlreadyExists);
        }

        let now = Utc::now();
        let user = User {
            uid: new.uid,
            email,
            name: new.name,
            picture_url: None,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.clone());
        Ok(user)
    }

    fn get_user(&self, uid: &str) -> StoreResult<Option<User>> {
        Ok(read(&self.users)?.by_uid.get(uid).cloned())
    }

    fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(read(&self.users)?.by_email(email).cloned())
    }

    fn update_password(&self, uid: &str, password_hash: &str) -> StoreResult<()> {
        let mut users = write(&self.users)?;
        let user = users.by_uid.get_mut(uid).ok_or(GatewayError::UserNotFound)?;
        user.password_hash = Some(password_hash.to_string());
        user.updated_at = Utc::now();
        Ok(())
    }

    fn upsert_federated(&self, profile: &FederatedProfile) -> StoreResult<User> {
        let mut users = write(&self.users)?;
        let now = Utc::now();

        let existing_uid = if users.by_uid.contains_key(&profile.sub) {
            Some(profile.sub.clone())
        } else {
            match users.by_email(&profile.email) {
                Some(user) if profile.email_verified => Some(user.uid.clone()),
                Some(_) => return Err(GatewayError::EmailAlreadyExists),
                None => None,
            }
        };

        if let Some(uid) = existing_uid {
            let user = users.by_uid.get_mut(&uid).ok_or(GatewayError::UserNotFound)?;
            if profile.name.is_some() {
                user.name = profile.name.clone();
            }
            if profile.picture_url.is_some() {
                user.picture_url = profile.picture_url.clone();
            }
            user.updated_at = now;
            return Ok(user.clone());
        }

        let user = User {
            uid: profile.sub.clone(),
            email: profile.email.to_lowercase(),
            name: profile.name.clone(),
            picture_url: profile.picture_url.clone(),
            password_hash: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.clone());
        Ok(user)
    }
}

/// In-memory session store
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, ttl: Duration) -> StoreResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: SessionId(Uuid::new_v4().to_string()),
            user_info: None,
            oidc: None,
            created_at: now,
            expires_at: now + ttl,
        };
        write(&self.sessions)?.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn get(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        let session = read(&self.sessions)?.get(session_id).cloned();
        match session {
            Some(s) if s.is_expired(Utc::now()) => {
                write(&self.sessions)?.remove(session_id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn save(&self, session: &Session) -> StoreResult<()> {
        write(&self.sessions)?.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn touch(&self, session_id: &SessionId, expires_at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(session) = write(&self.sessions)?.get_mut(session_id) {
            session.expires_at = expires_at;
        }
        Ok(())
    }

    fn delete(&self, session_id: &SessionId) -> StoreResult<()> {
        write(&self.sessions)?.remove(session_id);
        Ok(())
    }

    fn cleanup_expired(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut sessions = write(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

/// Process-local one-time token ledger
///
/// Entries live only as long as the process; running several gateway
/// replicas needs a shared ledger behind the same trait.
pub struct InMemoryTokenLedger {
    entries: RwLock<HashMap<String, TempAuthEntry>>,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTokenLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenLedger for InMemoryTokenLedger {
    fn insert(&self, token: &str, claims: IdentityClaims, ttl: Duration) -> StoreResult<()> {
        let entry = TempAuthEntry {
            claims,
            expires_at: Utc::now() + ttl,
            consumed: false,
        };
        write(&self.entries)?.insert(token.to_string(), entry);
        Ok(())
    }

    fn get(&self, token: &str) -> StoreResult<Option<TempAuthEntry>> {
        Ok(read(&self.entries)?.get(token).cloned())
    }

    fn mark_consumed(
        &self,
        token: &str,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> StoreResult<Option<TempAuthEntry>> {
        // The write lock spans read, check and flip
        let mut entries = write(&self.entries)?;
        let Some(entry) = entries.get_mut(token) else {
            return Ok(None);
        };

        let prior = entry.clone();
        if !entry.consumed && !entry.is_expired(now) {
            entry.consumed = true;
            entry.expires_at = now + grace;
        }
        Ok(Some(prior))
    }

    fn remove(&self, token: &str) -> StoreResult<()> {
        write(&self.entries)?.remove(token);
        Ok(())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut entries = write(&self.entries)?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}
