//! Login reconciliation shared by the route handlers
//!
//! Everything here is independent of HTTP: password checks with legacy
//! credential upgrade, interpretation of a one-time token claim, federated
//! account upsert and principal resolution.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use storefront_identity::IdentityClaims;
use tokio::task::JoinHandle;

use crate::crypto;
use crate::error::GatewayError;
use crate::store::{FederatedProfile, TokenLedger, User, UserInfo, UserStore};

/// The authenticated subject of a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.uid.clone(),
            email: Some(user.email.clone()),
            name: user.name.clone(),
            picture: user.picture_url.clone(),
        }
    }
}

/// Check an email/password pair
///
/// Every failure is `InvalidCredentials`; the reason is only logged. A
/// matching legacy plaintext credential is accepted and re-hashed in the
/// background.
pub async fn authenticate_password<U: UserStore + 'static>(
    store: &Arc<U>,
    email: &str,
    password: &str,
    bcrypt_cost: u32,
) -> Result<User, GatewayError> {
    let Some(user) = store.get_user_by_email(email)? else {
        tracing::debug!("Password login failed: no such user");
        return Err(GatewayError::InvalidCredentials);
    };
    let Some(stored) = user.password_hash.clone() else {
        tracing::debug!(uid = %user.uid, "Password login failed: account has no password");
        return Err(GatewayError::InvalidCredentials);
    };

    if crypto::is_password_hash(&stored) {
        let candidate = password.to_string();
        let verified = tokio::task::spawn_blocking(move || crypto::verify_password(&candidate, &stored))
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        match verified {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(uid = %user.uid, "Password login failed: wrong password");
                return Err(GatewayError::InvalidCredentials);
            }
            Err(e) => {
                tracing::error!(uid = %user.uid, error = %e, "Stored password hash is unreadable");
                return Err(GatewayError::InvalidCredentials);
            }
        }
    } else {
        if !crypto::legacy_password_matches(&stored, password) {
            tracing::debug!(uid = %user.uid, "Password login failed: wrong legacy password");
            return Err(GatewayError::InvalidCredentials);
        }
        tracing::info!(uid = %user.uid, "Legacy credential accepted, scheduling rehash");
        spawn_rehash(store.clone(), user.uid.clone(), password.to_string(), bcrypt_cost);
    }

    Ok(user)
}

/// Replace a legacy credential with a bcrypt hash off the request path
///
/// Failures are logged and otherwise ignored; the next login retries.
pub fn spawn_rehash<U: UserStore + 'static>(
    store: Arc<U>,
    uid: String,
    password: String,
    bcrypt_cost: u32,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let result = crypto::hash_password(&password, bcrypt_cost)
            .map_err(|e| GatewayError::Internal(e.to_string()))
            .and_then(|hash| store.update_password(&uid, &hash));
        match result {
            Ok(()) => tracing::info!(uid = %uid, "Legacy credential upgraded"),
            Err(e) => tracing::warn!(uid = %uid, error = %e, "Legacy credential upgrade failed"),
        }
    })
}

/// How a one-time token claim resolved
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// First claim of the token
    Fresh(IdentityClaims),
    /// Repeat claim inside the grace window
    Replay(IdentityClaims),
}

impl ClaimOutcome {
    pub fn claims(&self) -> &IdentityClaims {
        match self {
            ClaimOutcome::Fresh(c) | ClaimOutcome::Replay(c) => c,
        }
    }
}

/// Consume a one-time token from the ledger
pub fn claim_temp_token(
    ledger: &dyn TokenLedger,
    token: &str,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<ClaimOutcome, GatewayError> {
    let Some(prior) = ledger.mark_consumed(token, now, grace)? else {
        return Err(GatewayError::InvalidOrExpiredToken);
    };

    match (prior.consumed, prior.is_expired(now)) {
        (false, false) => Ok(ClaimOutcome::Fresh(prior.claims)),
        (true, false) => Ok(ClaimOutcome::Replay(prior.claims)),
        (false, true) => {
            ledger.remove(token)?;
            Err(GatewayError::TokenExpired)
        }
        (true, true) => {
            ledger.remove(token)?;
            Err(GatewayError::InvalidOrExpiredToken)
        }
    }
}

/// Insert or refresh the account behind verified provider claims
pub fn upsert_from_claims<U: UserStore + ?Sized>(
    store: &U,
    claims: &IdentityClaims,
) -> Result<User, GatewayError> {
    let profile = FederatedProfile::from_claims(claims).ok_or_else(|| {
        tracing::debug!(sub = %claims.sub, "Provider token carries no email");
        GatewayError::InvalidToken
    })?;
    store.upsert_federated(&profile)
}

/// Find the stored account for claims without writing anything
///
/// The email fallback only applies to a provider-verified email.
pub fn find_user_for_claims<U: UserStore + ?Sized>(
    store: &U,
    claims: &IdentityClaims,
) -> Result<Option<User>, GatewayError> {
    if let Some(user) = store.get_user(&claims.sub)? {
        return Ok(Some(user));
    }
    match &claims.email {
        Some(email) if claims.email_verified == Some(true) => store.get_user_by_email(email),
        _ => Ok(None),
    }
}

/// Principal for a session, enriched from the store when a record matches
pub fn principal_from_session<U: UserStore + ?Sized>(
    store: &U,
    info: &UserInfo,
) -> Result<Principal, GatewayError> {
    let user = match store.get_user(&info.uid)? {
        Some(user) => Some(user),
        None => store.get_user_by_email(&info.email)?,
    };

    Ok(match user {
        Some(user) => Principal::from(&user),
        None => Principal {
            id: first_non_empty(&[info.uid.as_str(), info.email.as_str()]),
            email: Some(info.email.clone()),
            name: info.name.clone(),
            picture: info.picture.clone(),
        },
    })
}

/// Principal for verified bearer claims
pub fn principal_from_claims<U: UserStore + ?Sized>(
    store: &U,
    claims: &IdentityClaims,
) -> Result<Principal, GatewayError> {
    Ok(match find_user_for_claims(store, claims)? {
        Some(user) => Principal::from(&user),
        None => Principal {
            id: first_non_empty(&[claims.sub.as_str(), claims.email.as_deref().unwrap_or_default()]),
            email: claims.email.clone(),
            name: claims.display_name(),
            picture: claims.picture.clone(),
        },
    })
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .map(|c| c.to_string())
        .unwrap_or_default()
}

/// Pick the redirect URI for a login, which must be allow-listed verbatim
pub fn select_redirect_uri(
    allowed: &[String],
    requested: Option<&str>,
    headers: &HeaderMap,
) -> Result<String, GatewayError> {
    let candidate = match requested {
        Some(uri) => uri.to_string(),
        None => derive_callback_uri(headers).ok_or(GatewayError::RedirectMismatch)?,
    };

    if allowed.iter().any(|a| *a == candidate) {
        Ok(candidate)
    } else {
        tracing::warn!(redirect_uri = %candidate, "Redirect URI not in allow-list");
        Err(GatewayError::RedirectMismatch)
    }
}

/// `{scheme}://{host}/callback` as seen by the client
fn derive_callback_uri(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let host = header("x-forwarded-host").or_else(|| header("host"))?;
    let scheme = header("x-forwarded-proto").unwrap_or("http");
    Some(format!("{}://{}/callback", scheme, host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTokenLedger, InMemoryUserStore, NewUser};

    fn claims(sub: &str, email: Option<&str>) -> IdentityClaims {
        IdentityClaims {
            sub: sub.to_string(),
            email: email.map(str::to_string),
            email_verified: None,
            name: None,
            picture: None,
            nonce: None,
            token_use: None,
            issuer: "https://issuer.example".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn user_store_with(email: &str, password_hash: Option<&str>) -> Arc<InMemoryUserStore> {
        let store = Arc::new(InMemoryUserStore::new());
        store
            .create_user(NewUser {
                uid: "uid-1".to_string(),
                email: email.to_string(),
                name: Some("Pat".to_string()),
                password_hash: password_hash.map(str::to_string),
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_bcrypt_login() {
        let hash = crypto::hash_password("secret", 4).unwrap();
        let store = user_store_with("pat@example.com", Some(&hash));

        let user = authenticate_password(&store, "PAT@example.com", "secret", 4)
            .await
            .unwrap();
        assert_eq!(user.uid, "uid-1");

        let err = authenticate_password(&store, "pat@example.com", "nope", 4).await;
        assert!(matches!(err, Err(GatewayError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_failures_are_indistinguishable() {
        let store = user_store_with("pat@example.com", None);

        let unknown = authenticate_password(&store, "ghost@example.com", "x", 4).await;
        let no_password = authenticate_password(&store, "pat@example.com", "x", 4).await;
        assert!(matches!(unknown, Err(GatewayError::InvalidCredentials)));
        assert!(matches!(no_password, Err(GatewayError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_legacy_login_upgrades_credential() {
        let store = user_store_with("pat@example.com", Some("plaintext-pw"));

        authenticate_password(&store, "pat@example.com", "plaintext-pw", 4)
            .await
            .unwrap();

        // The rehash is detached; wait for it by re-running it synchronously
        spawn_rehash(store.clone(), "uid-1".to_string(), "plaintext-pw".to_string(), 4)
            .await
            .unwrap();
        let stored = store.get_user("uid-1").unwrap().unwrap().password_hash.unwrap();
        assert!(crypto::is_password_hash(&stored));
        assert!(crypto::verify_password("plaintext-pw", &stored).unwrap());
    }

    #[tokio::test]
    async fn test_legacy_mismatch_rejected() {
        let store = user_store_with("pat@example.com", Some("plaintext-pw"));
        let result = authenticate_password(&store, "pat@example.com", "other", 4).await;
        assert!(matches!(result, Err(GatewayError::InvalidCredentials)));
        assert_eq!(
            store.get_user("uid-1").unwrap().unwrap().password_hash.as_deref(),
            Some("plaintext-pw")
        );
    }

    #[tokio::test]
    async fn test_rehash_failure_is_swallowed() {
        let store = Arc::new(InMemoryUserStore::new());
        // Unknown uid makes update_password fail; the task must still finish cleanly
        spawn_rehash(store, "missing".to_string(), "pw".to_string(), 4)
            .await
            .unwrap();
    }

    #[test]
    fn test_claim_lifecycle() {
        let ledger = InMemoryTokenLedger::new();
        ledger
            .insert("tok", claims("sub-1", Some("a@example.com")), Duration::minutes(5))
            .unwrap();
        let now = Utc::now();
        let grace = Duration::seconds(30);

        let first = claim_temp_token(&ledger, "tok", now, grace).unwrap();
        assert!(matches!(first, ClaimOutcome::Fresh(_)));

        let replay = claim_temp_token(&ledger, "tok", now + Duration::seconds(5), grace).unwrap();
        assert_eq!(replay, ClaimOutcome::Replay(first.claims().clone()));

        let late = claim_temp_token(&ledger, "tok", now + Duration::seconds(31), grace);
        assert!(matches!(late, Err(GatewayError::InvalidOrExpiredToken)));
        assert!(ledger.get("tok").unwrap().is_none());
    }

    #[test]
    fn test_claim_expired_before_first_use() {
        let ledger = InMemoryTokenLedger::new();
        ledger
            .insert("tok", claims("sub-1", None), Duration::minutes(5))
            .unwrap();

        let later = Utc::now() + Duration::minutes(6);
        let result = claim_temp_token(&ledger, "tok", later, Duration::seconds(30));
        assert!(matches!(result, Err(GatewayError::TokenExpired)));
        assert!(ledger.get("tok").unwrap().is_none());
    }

    #[test]
    fn test_claim_unknown_token() {
        let ledger = InMemoryTokenLedger::new();
        let result = claim_temp_token(&ledger, "", Utc::now(), Duration::seconds(30));
        assert!(matches!(result, Err(GatewayError::InvalidOrExpiredToken)));
    }

    #[test]
    fn test_upsert_requires_email() {
        let store = InMemoryUserStore::new();
        let result = upsert_from_claims(&store, &claims("sub-1", None));
        assert!(matches!(result, Err(GatewayError::InvalidToken)));
    }

    #[test]
    fn test_principal_prefers_stored_uid() {
        let store = user_store_with("pat@example.com", None);

        // Provider sub differs from the stored uid; a verified email links them
        let mut verified = claims("provider-sub", Some("pat@example.com"));
        verified.email_verified = Some(true);
        let principal = principal_from_claims(store.as_ref(), &verified).unwrap();
        assert_eq!(principal.id, "uid-1");
        assert_eq!(principal.name.as_deref(), Some("Pat"));

        let unverified =
            principal_from_claims(store.as_ref(), &claims("provider-sub", Some("pat@example.com")))
                .unwrap();
        assert_eq!(unverified.id, "provider-sub");

        let unknown =
            principal_from_claims(store.as_ref(), &claims("other-sub", Some("x@example.com")))
                .unwrap();
        assert_eq!(unknown.id, "other-sub");
    }

    #[test]
    fn test_session_principal_falls_back_to_session_fields() {
        let store = InMemoryUserStore::new();
        let info = UserInfo {
            uid: String::new(),
            email: "gone@example.com".to_string(),
            name: Some("Gone".to_string()),
            picture: None,
        };

        let principal = principal_from_session(&store, &info).unwrap();
        assert_eq!(principal.id, "gone@example.com");
        assert_eq!(principal.name.as_deref(), Some("Gone"));
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let allowed = vec!["http://localhost:3000/callback".to_string()];
        let headers = HeaderMap::new();

        assert!(select_redirect_uri(&allowed, Some("http://localhost:3000/callback"), &headers).is_ok());
        assert!(matches!(
            select_redirect_uri(&allowed, Some("http://localhost:3000/callback/"), &headers),
            Err(GatewayError::RedirectMismatch)
        ));
        assert!(matches!(
            select_redirect_uri(&allowed, Some("http://evil.example/callback"), &headers),
            Err(GatewayError::RedirectMismatch)
        ));
    }

    #[test]
    fn test_redirect_uri_derived_from_forwarded_headers() {
        let allowed = vec!["https://shop.example/callback".to_string()];
        let mut headers = HeaderMap::new();
        headers.insert("host", "internal:3000".parse().unwrap());
        headers.insert("x-forwarded-host", "shop.example".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());

        assert_eq!(
            select_redirect_uri(&allowed, None, &headers).unwrap(),
            "https://shop.example/callback"
        );

        assert!(matches!(
            select_redirect_uri(&allowed, None, &HeaderMap::new()),
            Err(GatewayError::RedirectMismatch)
        ));
    }
}
