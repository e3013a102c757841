//! Router tests against in-memory stores and provider.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use verse_api::config::ApiConfig;
use verse_api::{AppState, Collaborators};
use verse_core::auth::legacy::LegacyVerifier;
use verse_core::memory::{
    MemoryIdentityProvider, MemoryJournal, MemoryLegacyStore, MemoryReferenceStore,
};

const SECRET: &str = "test-legacy-secret";

struct TestApp {
    router: Router,
    legacy: Arc<MemoryLegacyStore>,
    references: Arc<MemoryReferenceStore>,
    provider: Arc<MemoryIdentityProvider>,
}

fn app() -> TestApp {
    let legacy = Arc::new(MemoryLegacyStore::new());
    legacy.insert_account("42", "u@x.com", "oldpass", "poet");
    let references = Arc::new(MemoryReferenceStore::with_legacy_store(legacy.clone()));
    references.insert_row("articles", "A1", "42");
    references.insert_row("articles", "A2", "42");
    references.insert_row("comments", "C1", "42");
    let provider = Arc::new(MemoryIdentityProvider::new());

    let config = ApiConfig::from_lookup(|key| match key {
        "LEGACY_JWT_SECRET" => Some(SECRET.to_string()),
        "PROVIDER_TIMEOUT_MS" => Some("1000".to_string()),
        _ => None,
    })
    .expect("config");

    let state = AppState::new(
        config,
        Collaborators {
            legacy: legacy.clone(),
            references: references.clone(),
            journal: Arc::new(MemoryJournal::new()),
            provider: provider.clone(),
        },
    );
    TestApp {
        router: verse_api::router(state),
        legacy,
        references,
        provider,
    }
}

fn legacy_token(app: &TestApp, id: &str) -> String {
    LegacyVerifier::new(SECRET.as_bytes(), app.legacy.clone())
        .issue(id)
        .expect("issue legacy token")
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let resp = router.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("parse JSON")
    };
    (status, headers, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let (status, _, json) = send(&app.router, get("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn me_requires_a_credential() {
    let app = app();
    let (status, _, json) = send(&app.router, get("/auth/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");

    let (status, _, _) = send(&app.router, get("/auth/me", Some("garbage"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.provider.verify_calls(), 1);
}

#[tokio::test]
async fn malformed_header_never_reaches_the_provider() {
    let app = app();
    let req = Request::builder()
        .uri("/auth/me")
        .header(header::AUTHORIZATION, "Token abc")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.provider.verify_calls(), 0);
}

#[tokio::test]
async fn legacy_callers_get_migration_headers() {
    let app = app();
    let token = legacy_token(&app, "42");

    let (status, headers, json) = send(&app.router, get("/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scheme"], "legacy");
    assert_eq!(json["user"]["id"], "42");
    assert_eq!(json["migration_suggested"], true);
    assert_eq!(headers["x-migration-suggested"], "true");
    assert_eq!(headers["x-migration-url"], "/auth/migrate");
}

#[tokio::test]
async fn migration_status_is_optional_auth() {
    let app = app();

    let (status, headers, json) = send(&app.router, get("/auth/migration-status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "migration_suggested": false }));
    assert!(headers.get("x-migration-suggested").is_none());

    let token = legacy_token(&app, "42");
    let (status, headers, json) =
        send(&app.router, get("/auth/migration-status", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["migration_suggested"], true);
    assert_eq!(headers["x-migration-suggested"], "true");
}

#[tokio::test]
async fn legacy_login_is_flagged_for_migration() {
    let app = app();
    let (status, _, json) = send(
        &app.router,
        post_json("/auth/login", json!({ "email": "u@x.com", "password": "oldpass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scheme"], "legacy");
    assert_eq!(json["needs_migration"], true);
    assert!(json.get("refresh_token").is_none());

    let (status, _, json) = send(
        &app.router,
        post_json("/auth/login", json!({ "email": "u@x.com", "password": "test123" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Invalid credential");
}

#[tokio::test]
async fn migrate_then_use_the_managed_session() {
    let app = app();
    let (status, _, json) = send(
        &app.router,
        post_json(
            "/auth/migrate",
            json!({
                "email": "u@x.com",
                "current_password": "oldpass",
                "new_password": "newpass123"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["status"], "completed");
    assert_eq!(json["receipt"]["legacy_id"], "42");
    assert_eq!(json["receipt"]["references_updated"], 3);
    let new_id = json["receipt"]["new_id"].as_str().unwrap().to_string();
    let access_token = json["session"]["access_token"].as_str().unwrap().to_string();

    assert_eq!(
        app.references.owner_of("comments", "C1").as_deref(),
        Some(new_id.as_str())
    );

    let (status, headers, json) = send(&app.router, get("/auth/me", Some(&access_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scheme"], "managed");
    assert_eq!(json["user"]["id"], new_id.as_str());
    assert!(headers.get("x-migration-suggested").is_none());

    // The retired legacy token is dead.
    let token = legacy_token(&app, "42");
    let (status, _, _) = send(&app.router, get("/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn migrate_errors_map_to_specific_statuses() {
    let app = app();
    let body = |email: &str, current: &str, new: &str| {
        json!({ "email": email, "current_password": current, "new_password": new })
    };

    let (status, _, _) = send(
        &app.router,
        post_json("/auth/migrate", body("ghost@x.com", "oldpass", "newpass123")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(
        &app.router,
        post_json("/auth/migrate", body("u@x.com", "wrong", "newpass123")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &app.router,
        post_json("/auth/migrate", body("u@x.com", "oldpass", "short")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.provider.set_unavailable(true);
    let (status, _, _) = send(
        &app.router,
        post_json("/auth/migrate", body("u@x.com", "oldpass", "newpass123")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn deferred_migration_answers_accepted() {
    let app = app();
    app.provider.require_confirmation(true);

    let (status, _, json) = send(
        &app.router,
        post_json(
            "/auth/migrate",
            json!({
                "email": "u@x.com",
                "current_password": "oldpass",
                "new_password": "newpass123"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "pending_confirmation");
    assert_eq!(json["legacy_id"], "42");
    assert!(app.legacy.contains("42"));
}

#[tokio::test]
async fn refresh_and_forgot_password_pass_through() {
    let app = app();
    let (_, _, json) = send(
        &app.router,
        post_json(
            "/auth/migrate",
            json!({
                "email": "u@x.com",
                "current_password": "oldpass",
                "new_password": "newpass123"
            }),
        ),
    )
    .await;
    let refresh_token = json["session"]["refresh_token"].as_str().unwrap().to_string();

    let (status, _, json) = send(
        &app.router,
        post_json("/auth/refresh", json!({ "refresh_token": refresh_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["access_token"].is_string());

    let (status, _, _) = send(
        &app.router,
        post_json("/auth/refresh", json!({ "refresh_token": "stale" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, json) = send(
        &app.router,
        post_json("/auth/forgot-password", json!({ "email": "u@x.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].is_string());
    assert_eq!(app.provider.reset_requests(), vec!["u@x.com".to_string()]);
}

fn post_json_as(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn managed_token(app: &TestApp, email: &str, password: &str) -> String {
    let (status, _, json) = send(
        &app.router,
        post_json("/auth/login", json!({"email": email, "password": password})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scheme"], "managed");
    json["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_then_sign_in_as_managed() {
    let app = app();
    let (status, _, json) = send(
        &app.router,
        post_json(
            "/auth/register",
            json!({"email": "new@x.com", "password": "longenough1", "username": "verses"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["user"]["username"], "verses");
    let token = json["token"].as_str().unwrap().to_string();
    assert!(json["refresh_token"].is_string());

    let (status, _, json) = send(&app.router, get("/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scheme"], "managed");

    managed_token(&app, "new@x.com", "longenough1").await;
}

#[tokio::test]
async fn unconfirmed_registration_has_no_tokens() {
    let app = app();
    app.provider.require_confirmation(true);
    let (status, _, json) = send(
        &app.router,
        post_json(
            "/auth/register",
            json!({"email": "new@x.com", "password": "longenough1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(json.get("token").is_none());
    assert_eq!(json["user"]["email_confirmed"], false);
}

#[tokio::test]
async fn register_errors_map_to_specific_statuses() {
    let app = app();
    app.provider.seed_identity("m@x.com", "whatever12", true);

    for (body, expected) in [
        (
            json!({"email": "u@x.com", "password": "longenough1"}),
            StatusCode::CONFLICT,
        ),
        (
            json!({"email": "m@x.com", "password": "longenough1"}),
            StatusCode::CONFLICT,
        ),
        (
            json!({"email": "new@x.com", "password": "short"}),
            StatusCode::BAD_REQUEST,
        ),
        (
            json!({"email": "nope", "password": "longenough1"}),
            StatusCode::BAD_REQUEST,
        ),
    ] {
        let (status, _, _) = send(&app.router, post_json("/auth/register", body.clone())).await;
        assert_eq!(status, expected, "{body}");
    }
    assert_eq!(app.provider.identities_with_email("u@x.com"), 0);
}

#[tokio::test]
async fn logout_revokes_the_managed_session() {
    let app = app();
    app.provider.seed_identity("m@x.com", "whatever12", true);
    let token = managed_token(&app, "m@x.com", "whatever12").await;

    let (status, _, json) =
        send(&app.router, post_json_as("/auth/logout", &token, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Signed out");

    let (status, _, _) = send(&app.router, get("/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_requires_a_credential_and_acknowledges_legacy_callers() {
    let app = app();
    let (status, _, _) = send(&app.router, post_json("/auth/logout", json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = legacy_token(&app, "42");
    let (status, headers, _) =
        send(&app.router, post_json_as("/auth/logout", &token, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-migration-suggested"], "true");
}

#[tokio::test]
async fn reset_password_sets_the_new_password() {
    let app = app();
    app.provider.seed_identity("m@x.com", "whatever12", true);
    let token = managed_token(&app, "m@x.com", "whatever12").await;

    let (status, _, _) = send(
        &app.router,
        post_json(
            "/auth/reset-password",
            json!({"access_token": token, "new_password": "short"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &app.router,
        post_json(
            "/auth/reset-password",
            json!({"access_token": "not-a-session", "new_password": "brandnew123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, json) = send(
        &app.router,
        post_json(
            "/auth/reset-password",
            json!({"access_token": token, "new_password": "brandnew123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Password updated");
    assert!(app.provider.has_password("m@x.com", "brandnew123"));
    managed_token(&app, "m@x.com", "brandnew123").await;
}

#[tokio::test]
async fn verify_token_answers_for_both_schemes() {
    let app = app();
    app.provider.seed_identity("m@x.com", "whatever12", true);
    let managed = managed_token(&app, "m@x.com", "whatever12").await;
    let legacy = legacy_token(&app, "42");

    let (status, _, json) = send(
        &app.router,
        post_json("/auth/verify-token", json!({"access_token": managed})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);
    assert_eq!(json["scheme"], "managed");
    assert_eq!(json["user"]["email"], "m@x.com");

    let (status, _, json) = send(
        &app.router,
        post_json("/auth/verify-token", json!({"access_token": legacy})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scheme"], "legacy");
    assert_eq!(json["user"]["id"], "42");

    let (status, _, _) = send(
        &app.router,
        post_json("/auth/verify-token", json!({"access_token": "garbage"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &app.router,
        post_json("/auth/verify-token", json!({"access_token": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_text_authorization_is_malformed() {
    let app = app();
    let req = Request::builder()
        .uri("/auth/me")
        .header(
            header::AUTHORIZATION,
            header::HeaderValue::from_bytes(b"Bearer \xff").unwrap(),
        )
        .body(Body::empty())
        .unwrap();
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
    assert_eq!(app.provider.verify_calls(), 0);

    let req = Request::builder()
        .uri("/auth/migration-status")
        .header(
            header::AUTHORIZATION,
            header::HeaderValue::from_bytes(b"Bearer \xff").unwrap(),
        )
        .body(Body::empty())
        .unwrap();
    let (status, _, json) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["migration_suggested"], false);
}
