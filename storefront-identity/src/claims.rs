//! Identity claims extracted from verified provider tokens

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The `token_use` claim Cognito stamps on every token it issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Id,
    Access,
}

impl TokenUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenUse::Id => "id",
            TokenUse::Access => "access",
        }
    }
}

impl fmt::Display for TokenUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attributes of a verified subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Provider subject identifier
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Nonce echoed back from the authorization request, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<TokenUse>,
    pub issuer: String,
    pub expires_at: DateTime<Utc>,
}

impl IdentityClaims {
    /// Best available display name: `name`, else the local part of the email
    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            self.email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
                .map(str::to_string)
        })
    }
}

/// Audience claim, which JWTs allow as either a string or an array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub(crate) fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|a| a == expected),
        }
    }
}

/// Claims as they appear on the wire
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawClaims {
    pub sub: Option<String>,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub aud: Option<Audience>,
    /// Cognito access tokens carry the app client here instead of `aud`
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub token_use: Option<TokenUse>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "bool_or_string")]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default, rename = "cognito:username")]
    pub cognito_username: Option<String>,
}

impl RawClaims {
    pub(crate) fn into_identity(self) -> crate::Result<IdentityClaims> {
        let sub = self
            .sub
            .or(self.cognito_username)
            .ok_or(crate::Error::MissingClaim("sub"))?;
        let expires_at = DateTime::from_timestamp(self.exp, 0)
            .ok_or(crate::Error::MissingClaim("exp"))?;

        Ok(IdentityClaims {
            sub,
            email: self.email.map(|e| e.to_lowercase()),
            email_verified: self.email_verified,
            name: self.name,
            picture: self.picture,
            nonce: self.nonce,
            token_use: self.token_use,
            issuer: self.iss,
            expires_at,
        })
    }
}

/// Deserialize a boolean that may arrive as `"true"` / `"false"`
///
/// Google and Cognito userinfo responses emit `"email_verified": "true"`.
pub fn bool_or_string<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    Ok(match Option::<BoolOrString>::deserialize(deserializer)? {
        Some(BoolOrString::Bool(b)) => Some(b),
        Some(BoolOrString::String(s)) => Some(s.eq_ignore_ascii_case("true")),
        None => None,
    })
}
