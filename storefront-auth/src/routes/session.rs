//! Session cookie handling

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tower_cookies::cookie::time::Duration as CookieDuration;
use tower_cookies::{Cookie, Cookies};

use crate::config::CookieSettings;
use crate::error::GatewayError;
use crate::state::AppState;
use crate::store::{Session, SessionId, SessionStore, UserInfo, UserStore};

/// The session cookie, with every attribute it is ever set or cleared with
fn session_cookie(settings: &CookieSettings, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::build((settings.name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(settings.secure)
        .same_site(settings.same_site)
        .max_age(CookieDuration::seconds(settings.max_age.num_seconds()))
        .build();
    if let Some(domain) = &settings.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Helper to set the signed session cookie
pub fn set_session_cookie<U: UserStore, S: SessionStore>(
    state: &AppState<U, S>,
    cookies: &Cookies,
    session_id: &SessionId,
) {
    let cookie = session_cookie(&state.settings.cookie, session_id.0.clone());
    cookies.signed(&state.cookie_key).add(cookie);
}

/// Helper to clear the session cookie
pub fn clear_session_cookie<U: UserStore, S: SessionStore>(state: &AppState<U, S>, cookies: &Cookies) {
    let mut cookie = session_cookie(&state.settings.cookie, String::new());
    cookie.set_max_age(CookieDuration::ZERO);
    cookies.add(cookie);
}

/// Live session referenced by the request's signed cookie
///
/// A missing, unsigned or tampered cookie is the same as no session.
pub fn current_session<U: UserStore, S: SessionStore>(
    state: &AppState<U, S>,
    cookies: &Cookies,
) -> Result<Option<Session>, GatewayError> {
    let Some(cookie) = cookies
        .signed(&state.cookie_key)
        .get(&state.settings.cookie.name)
    else {
        return Ok(None);
    };
    state
        .session_store
        .get(&SessionId(cookie.value().to_string()))
}

/// Start an authenticated session under a fresh id
///
/// Any session the request already had is deleted, so a pre-login id never
/// becomes an authenticated one.
pub fn establish_session<U: UserStore, S: SessionStore>(
    state: &AppState<U, S>,
    cookies: &Cookies,
    user_info: UserInfo,
    previous: Option<&Session>,
) -> Result<Session, GatewayError> {
    if let Some(previous) = previous {
        state.session_store.delete(&previous.id)?;
    }

    let mut session = state.session_store.create(state.settings.cookie.max_age)?;
    session.user_info = Some(user_info);
    state.session_store.save(&session)?;
    set_session_cookie(state, cookies, &session.id);

    tracing::debug!(uid = ?session.user_info.as_ref().map(|u| &u.uid), "Session established");
    Ok(session)
}

/// Push an authenticated session's expiry forward and re-issue its cookie
pub fn slide_session<U: UserStore, S: SessionStore>(
    state: &AppState<U, S>,
    cookies: &Cookies,
    session: &Session,
) {
    let expires_at = Utc::now() + state.settings.cookie.max_age;
    match state.session_store.touch(&session.id, expires_at) {
        Ok(()) => set_session_cookie(state, cookies, &session.id),
        Err(e) => tracing::warn!(error = %e, "Failed to extend session"),
    }
}

/// `302 Found` to `location`
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
