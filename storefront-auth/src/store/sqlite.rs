//! SQLite-based storage implementation

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    FederatedProfile, NewUser, OidcFlowState, Session, SessionId, SessionStore, StoreResult, User,
    UserInfo, UserStore,
};
use crate::error::GatewayError;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

const USER_COLUMNS: &str =
    "uid, email, name, picture_url, password_hash, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_info, oidc_state, created_at, expires_at";

fn db_err(e: rusqlite::Error) -> GatewayError {
    GatewayError::Internal(e.to_string())
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(User {
        uid: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        picture_url: row.get(3)?,
        password_hash: row.get(4)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

/// Session row before its JSON columns are decoded
struct SessionRow {
    id: String,
    user_info: Option<String>,
    oidc_state: Option<String>,
    created_at: String,
    expires_at: i64,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_info: row.get(1)?,
            oidc_state: row.get(2)?,
            created_at: row.get(3)?,
            expires_at: row.get(4)?,
        })
    }

    fn into_session(self) -> StoreResult<Session> {
        let user_info = self
            .user_info
            .map(|json| serde_json::from_str::<UserInfo>(&json))
            .transpose()
            .map_err(|e| GatewayError::Internal(format!("corrupt session user_info: {}", e)))?;
        let oidc = self
            .oidc_state
            .map(|json| serde_json::from_str::<OidcFlowState>(&json))
            .transpose()
            .map_err(|e| GatewayError::Internal(format!("corrupt session oidc_state: {}", e)))?;

        Ok(Session {
            id: SessionId(self.id),
            user_info,
            oidc,
            created_at: parse_time(&self.created_at),
            expires_at: from_millis(self.expires_at),
        })
    }
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

/// SQLite-based store implementing both UserStore and SessionStore
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path
    pub fn open(path: &str) -> Result<Self, GatewayError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, GatewayError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GatewayError::Internal("database lock poisoned".to_string()))
    }

    /// Run database migrations
    fn migrate(conn: &Connection) -> Result<(), GatewayError> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(db_err)?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    pub fn get_schema_version(conn: &Connection) -> Result<i32, GatewayError> {
        let table_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        if !table_exists {
            return Ok(0);
        }

        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
        })
        .map_err(db_err)
    }

    /// Migration to version 1: initial schema
    fn migrate_v1(conn: &Connection) -> Result<(), GatewayError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                picture_url TEXT,
                password_hash TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- user_info and oidc_state hold JSON
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_info TEXT,
                oidc_state TEXT,
                created_at TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn user_where(conn: &Connection, clause: &str, value: &str) -> StoreResult<Option<User>> {
        conn.query_row(
            &format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, clause),
            params![value],
            user_from_row,
        )
        .optional()
        .map_err(db_err)
    }
}

impl UserStore for SqliteStore {
    fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let conn = self.conn()?;
        let email = new.email.to_lowercase();

        let taken: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 OR uid = ?2)",
                params![email, new.uid],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if taken {
            return Err(GatewayError::EmailAlreadyExists);
        }

        let now = Utc::now();
        conn.execute(
            "INSERT INTO users (uid, email, name, picture_url, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?5)",
            params![new.uid, email, new.name, new.password_hash, now.to_rfc3339()],
        )
        .map_err(db_err)?;

        Ok(User {
            uid: new.uid,
            email,
            name: new.name,
            picture_url: None,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_user(&self, uid: &str) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        Self::user_where(&conn, "uid = ?1", uid)
    }

    fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        Self::user_where(&conn, "email = ?1", &email.to_lowercase())
    }

    fn update_password(&self, uid: &str, password_hash: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE uid = ?3",
                params![password_hash, Utc::now().to_rfc3339(), uid],
            )
            .map_err(db_err)?;

        if updated == 0 {
            return Err(GatewayError::UserNotFound);
        }
        Ok(())
    }

    fn upsert_federated(&self, profile: &FederatedProfile) -> StoreResult<User> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let now = Utc::now().to_rfc3339();
        let email = profile.email.to_lowercase();

        let existing = match Self::user_where(&tx, "uid = ?1", &profile.sub)? {
            Some(user) => Some(user),
            None => match Self::user_where(&tx, "email = ?1", &email)? {
                Some(user) if profile.email_verified => Some(user),
                Some(_) => return Err(GatewayError::EmailAlreadyExists),
                None => None,
            },
        };

        let uid = match existing {
            Some(user) => {
                tx.execute(
                    "UPDATE users SET name = COALESCE(?1, name),
                                      picture_url = COALESCE(?2, picture_url),
                                      updated_at = ?3
                     WHERE uid = ?4",
                    params![profile.name, profile.picture_url, now, user.uid],
                )
                .map_err(db_err)?;
                user.uid
            }
            None => {
                tx.execute(
                    "INSERT INTO users (uid, email, name, picture_url, password_hash, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)",
                    params![profile.sub, email, profile.name, profile.picture_url, now],
                )
                .map_err(db_err)?;
                profile.sub.clone()
            }
        };

        let user = Self::user_where(&tx, "uid = ?1", &uid)?.ok_or(GatewayError::UserNotFound)?;
        tx.commit().map_err(db_err)?;
        Ok(user)
    }
}

impl SessionStore for SqliteStore {
    fn create(&self, ttl: Duration) -> StoreResult<Session> {
        let conn = self.conn()?;
        let now = Utc::now();
        let session = Session {
            id: SessionId(Uuid::new_v4().to_string()),
            user_info: None,
            oidc: None,
            created_at: now,
            expires_at: now + ttl,
        };

        conn.execute(
            "INSERT INTO sessions (id, user_info, oidc_state, created_at, expires_at)
             VALUES (?1, NULL, NULL, ?2, ?3)",
            params![
                session.id.0,
                now.to_rfc3339(),
                session.expires_at.timestamp_millis()
            ],
        )
        .map_err(db_err)?;

        Ok(session)
    }

    fn get(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id.0],
                SessionRow::from_row,
            )
            .optional()
            .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let session = row.into_session()?;

        if session.is_expired(Utc::now()) {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id.0])
                .map_err(db_err)?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (id, user_info, oidc_state, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.0,
                to_json(&session.user_info)?,
                to_json(&session.oidc)?,
                session.created_at.to_rfc3339(),
                session.expires_at.timestamp_millis()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn touch(&self, session_id: &SessionId, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET expires_at = ?1 WHERE id = ?2",
            params![expires_at.timestamp_millis(), session_id.0],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn delete(&self, session_id: &SessionId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id.0])
            .map_err(db_err)?;
        Ok(())
    }

    fn cleanup_expired(&self) -> StoreResult<u64> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![Utc::now().timestamp_millis()],
            )
            .map_err(db_err)?;
        Ok(deleted as u64)
    }
}
