//! Data models for gateway storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_identity::IdentityClaims;

/// Unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// A user account
#[derive(Debug, Clone)]
pub struct User {
    pub uid: String,
    /// Always stored lowercase
    pub email: String,
    pub name: Option<String>,
    pub picture_url: Option<String>,
    /// bcrypt hash, legacy plaintext, or `None` for federated-only accounts
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn view(&self) -> UserView {
        UserView {
            uid: self.uid.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            picture_url: self.picture_url.clone(),
        }
    }
}

/// The public JSON shape of a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub uid: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
}

/// Fields for a password registration
#[derive(Debug, Clone)]
pub struct NewUser {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
}

/// Profile asserted by an identity provider
#[derive(Debug, Clone)]
pub struct FederatedProfile {
    pub sub: String,
    pub email: String,
    /// Only a verified email may link to an existing account
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture_url: Option<String>,
}

impl FederatedProfile {
    /// `None` when the claims carry no email to key the account on
    pub fn from_claims(claims: &IdentityClaims) -> Option<Self> {
        Some(Self {
            sub: claims.sub.clone(),
            email: claims.email.clone()?.to_lowercase(),
            email_verified: claims.email_verified == Some(true),
            name: claims.display_name(),
            picture_url: claims.picture.clone(),
        })
    }
}

/// Who a session belongs to, denormalized at login time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            picture: user.picture_url.clone(),
        }
    }
}

/// An in-progress OIDC redirect login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcFlowState {
    pub state: String,
    pub nonce: String,
    pub redirect_uri: String,
}

/// A server-side session
///
/// A session without `user_info` is pre-authentication: it exists only to
/// carry the OIDC flow state between initiate and callback.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_info: Option<UserInfo>,
    pub oidc: Option<OidcFlowState>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A one-time token ledger entry
#[derive(Debug, Clone)]
pub struct TempAuthEntry {
    pub claims: IdentityClaims,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl TempAuthEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
