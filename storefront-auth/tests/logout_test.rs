//! Logout tests

mod common;

use axum::http::StatusCode;
use common::*;

#[tokio::test]
async fn test_logout_clears_cookie_and_ends_provider_session() {
    let ctx = create_test_context();
    register(&ctx.server, "a@example.com", "pw").await;
    let cookie = login(&ctx.server, "a@example.com", "pw").await;

    let response = ctx.server.get("/logout").add_cookie(cookie.clone()).await;
    response.assert_status(StatusCode::FOUND);

    let target = location(&response);
    assert!(target.starts_with("https://idp.test/logout?"), "unexpected redirect {}", target);
    assert_eq!(query_param(&target, "logout_uri").as_deref(), Some(FRONTEND));

    let cleared = session_cookie(&response).expect("logout should clear the cookie");
    assert_eq!(cleared.value(), "");
    assert_eq!(cleared.max_age().map(|age| age.whole_seconds()), Some(0));
    assert_eq!(cleared.path(), cookie.path());
    assert_eq!(cleared.http_only(), cookie.http_only());
    assert_eq!(cleared.same_site(), cookie.same_site());

    ctx.server
        .get("/user/me")
        .add_cookie(cookie)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_without_hosted_ui_returns_to_frontend() {
    let ctx = create_test_context_with(TestOptions {
        oidc: false,
        ..TestOptions::default()
    });
    register(&ctx.server, "a@example.com", "pw").await;
    let cookie = login(&ctx.server, "a@example.com", "pw").await;

    let response = ctx.server.get("/logout").add_cookie(cookie).await;
    response.assert_status(StatusCode::FOUND);
    assert_eq!(location(&response), FRONTEND);
}

#[tokio::test]
async fn test_logout_without_session() {
    let ctx = create_test_context();

    let response = ctx.server.get("/logout").await;
    response.assert_status(StatusCode::FOUND);
    assert!(session_cookie(&response).is_some());
}

#[tokio::test]
async fn test_logout_only_ends_own_session() {
    let ctx = create_test_context();
    register(&ctx.server, "a@example.com", "pw").await;
    let first = login(&ctx.server, "a@example.com", "pw").await;
    let second = login(&ctx.server, "a@example.com", "pw").await;

    ctx.server.get("/logout").add_cookie(first.clone()).await;

    ctx.server
        .get("/user/me")
        .add_cookie(first)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    ctx.server
        .get("/user/me")
        .add_cookie(second)
        .await
        .assert_status_ok();
}
