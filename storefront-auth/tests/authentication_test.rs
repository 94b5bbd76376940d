//! Session and bearer authentication of `/user/me`

mod common;

use axum::http::{header, HeaderValue, StatusCode};
use common::*;
use cookie::Cookie;
use serde_json::{json, Value};
use storefront_auth::store::{NewUser, UserStore};

#[tokio::test]
async fn test_no_credentials() {
    let ctx = create_test_context();

    let response = ctx.server.get("/user/me").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"], "No token provided");
}

#[tokio::test]
async fn test_bearer_token() {
    let ctx = create_test_context();
    ctx.idp.register("access-1", claims("bearer-sub", "b@example.com"));

    let response = ctx
        .server
        .get("/user/me")
        .add_header(header::AUTHORIZATION, bearer("access-1"))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["authType"], "bearer");
    assert_eq!(body["user"]["id"], "bearer-sub");
    assert_eq!(body["user"]["email"], "b@example.com");

    // Bearer authentication neither creates users nor sets cookies
    assert!(ctx.users.get_user("bearer-sub").unwrap().is_none());
    assert!(session_cookie(&response).is_none());
}

#[tokio::test]
async fn test_bearer_prefers_stored_uid() {
    let ctx = create_test_context();
    ctx.users
        .create_user(NewUser {
            uid: "stored-uid".to_string(),
            email: "b@example.com".to_string(),
            name: Some("Stored Name".to_string()),
            password_hash: None,
        })
        .unwrap();
    ctx.idp.register("access-1", claims("bearer-sub", "b@example.com"));

    let body: Value = ctx
        .server
        .get("/user/me")
        .add_header(header::AUTHORIZATION, bearer("access-1"))
        .await
        .json();
    assert_eq!(body["user"]["id"], "stored-uid");
    assert_eq!(body["user"]["name"], "Stored Name");
}

#[tokio::test]
async fn test_invalid_bearer_token() {
    let ctx = create_test_context();

    let response = ctx
        .server
        .get("/user/me")
        .add_header(header::AUTHORIZATION, bearer("forged"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_bearer_without_cognito() {
    let ctx = create_test_context_with(TestOptions {
        cognito: false,
        ..TestOptions::default()
    });

    let response = ctx
        .server
        .get("/user/me")
        .add_header(header::AUTHORIZATION, bearer("access-1"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_takes_precedence_over_bearer() {
    let ctx = create_test_context();
    register(&ctx.server, "s@example.com", "pw").await;
    let cookie = login(&ctx.server, "s@example.com", "pw").await;

    let response = ctx
        .server
        .get("/user/me")
        .add_cookie(cookie)
        .add_header(header::AUTHORIZATION, bearer("forged"))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["authType"], "session");
    assert_eq!(body["user"]["email"], "s@example.com");
}

#[tokio::test]
async fn test_unauthenticated_session_falls_through_to_bearer() {
    let ctx = create_test_context();
    ctx.idp.register("access-1", claims("bearer-sub", "b@example.com"));
    let (flow_cookie, _) = start_redirect_login(&ctx.server).await;

    let body: Value = ctx
        .server
        .get("/user/me")
        .add_cookie(flow_cookie)
        .add_header(header::AUTHORIZATION, bearer("access-1"))
        .await
        .json();
    assert_eq!(body["authType"], "bearer");
}

#[tokio::test]
async fn test_tampered_cookie_rejected() {
    let ctx = create_test_context();
    register(&ctx.server, "s@example.com", "pw").await;
    let cookie = login(&ctx.server, "s@example.com", "pw").await;

    let tampered = Cookie::new(COOKIE_NAME, format!("{}x", cookie.value()));
    ctx.server
        .get("/user/me")
        .add_cookie(tampered)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let unsigned = Cookie::new(COOKIE_NAME, "some-session-id");
    ctx.server
        .get("/user/me")
        .add_cookie(unsigned)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_auth_slides_cookie() {
    let ctx = create_test_context();
    register(&ctx.server, "s@example.com", "pw").await;
    let cookie = login(&ctx.server, "s@example.com", "pw").await;

    let response = ctx.server.get("/user/me").add_cookie(cookie.clone()).await;
    response.assert_status_ok();

    let reissued = session_cookie(&response).expect("session auth re-issues the cookie");
    assert_eq!(reissued.value(), cookie.value());
    assert_eq!(
        reissued.max_age().map(|age| age.whole_seconds()),
        Some(test_settings().cookie.max_age.num_seconds())
    );
}

#[tokio::test]
async fn test_health() {
    let ctx = create_test_context();
    let body: Value = ctx.server.get("/health").await.json();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_cors_allows_frontend_with_credentials() {
    let ctx = create_test_context();

    let response = ctx
        .server
        .get("/health")
        .add_header(header::ORIGIN, FRONTEND.parse::<HeaderValue>().unwrap())
        .await;
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), FRONTEND);
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS), "true");
}
