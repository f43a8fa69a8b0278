// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface scenarios: session/CSRF enforcement, host CRUD, and the
//! refusal paths a browser client actually hits.

use axum::http::StatusCode;
use nixfleet_dashboard::transport::auth::CSRF_HEADER;
use nixfleet_specs::{Harness, TEST_PASSWORD};

fn server(harness: &Harness) -> axum_test::TestServer {
    axum_test::TestServer::builder()
        .save_cookies(true)
        .build(harness.router())
        .expect("build test server")
}

/// `/health` never requires a session.
#[tokio::test]
async fn health_is_reachable_without_a_session() {
    let harness = Harness::bare().await;
    let server = server(&harness);
    let resp = server.get("/health").await;
    resp.assert_status(StatusCode::OK);
}

/// Any other endpoint is refused without a valid session cookie.
#[tokio::test]
async fn api_requires_a_session() {
    let harness = Harness::bare().await;
    let server = server(&harness);
    let resp = server.get("/api/hosts").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

/// A correct password mints a session cookie and hands back a CSRF token;
/// a wrong one is refused.
#[tokio::test]
async fn login_succeeds_with_correct_password_only() {
    let harness = Harness::with_login(None).await;
    let server = server(&harness);

    let wrong = server.post("/login").json(&serde_json::json!({ "password": "not-it" })).await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);

    let ok = server.post("/login").json(&serde_json::json!({ "password": TEST_PASSWORD })).await;
    ok.assert_status(StatusCode::OK);
    let body: serde_json::Value = ok.json();
    assert!(body["csrf_token"].as_str().is_some_and(|t| !t.is_empty()));

    let hosts = server.get("/api/hosts").await;
    hosts.assert_status(StatusCode::OK);
}

/// A state-changing request without the CSRF header is refused even with a
/// valid session cookie.
#[tokio::test]
async fn state_changing_request_requires_csrf_header() {
    let harness = Harness::with_login(None).await;
    let server = server(&harness);
    server.post("/login").json(&serde_json::json!({ "password": TEST_PASSWORD })).await.assert_status(StatusCode::OK);

    let resp = server
        .post("/api/hosts")
        .json(&serde_json::json!({ "hostname": "hsb7", "os_kind": "nixos" }))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

/// With both the session cookie and the CSRF header, `add_host` succeeds and
/// the resulting host shows up (offline) via `GET /api/hosts`.
#[tokio::test]
async fn add_host_then_list_round_trips() {
    let harness = Harness::with_login(None).await;
    let server = server(&harness);
    let login = server.post("/login").json(&serde_json::json!({ "password": TEST_PASSWORD })).await;
    let csrf = login.json::<serde_json::Value>()["csrf_token"].as_str().unwrap().to_owned();

    let added = server
        .post("/api/hosts")
        .add_header(CSRF_HEADER, &csrf)
        .json(&serde_json::json!({ "hostname": "hsb7", "os_kind": "nixos" }))
        .await;
    added.assert_status(StatusCode::OK);

    let hosts: Vec<nixfleet_dashboard::model::Host> = server.get("/api/hosts").await.json();
    assert!(hosts.iter().any(|h| h.hostname == "hsb7" && !h.online));
}

/// A second-factor secret makes `/login` require a matching TOTP code.
#[tokio::test]
async fn login_with_totp_requires_a_valid_code() {
    use totp_rs::{Algorithm, Secret, TOTP};

    let secret = Secret::generate_secret();
    let encoded = secret.to_encoded().to_string();
    let bytes = secret.to_bytes().unwrap();
    let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes).unwrap();
    let code = totp.generate_current().unwrap();

    let harness = Harness::with_login(Some(&encoded)).await;
    let server = server(&harness);

    let missing_code = server.post("/login").json(&serde_json::json!({ "password": TEST_PASSWORD })).await;
    missing_code.assert_status(StatusCode::UNAUTHORIZED);

    let wrong_code = server
        .post("/login")
        .json(&serde_json::json!({ "password": TEST_PASSWORD, "totp_code": "000000" }))
        .await;
    wrong_code.assert_status(StatusCode::UNAUTHORIZED);

    let ok = server
        .post("/login")
        .json(&serde_json::json!({ "password": TEST_PASSWORD, "totp_code": code }))
        .await;
    ok.assert_status(StatusCode::OK);
}

/// `DELETE /api/hosts/{id}` refuses a host that is still online.
#[tokio::test]
async fn delete_host_refuses_while_online() {
    let harness = Harness::with_login(None).await;
    let server = server(&harness);
    let login = server.post("/login").json(&serde_json::json!({ "password": TEST_PASSWORD })).await;
    let csrf = login.json::<serde_json::Value>()["csrf_token"].as_str().unwrap().to_owned();

    let mut host = nixfleet_dashboard::model::Host::new("hsb8", nixfleet_dashboard::model::OsKind::Nixos);
    host.online = true;
    harness.state.hub.store().upsert_host(host).await.unwrap();

    let resp = server.delete("/api/hosts/hsb8").add_header(CSRF_HEADER, &csrf).await;
    resp.assert_status(StatusCode::CONFLICT);
}

/// `POST /api/hosts/{id}/command` dispatches `stop`/`restart` as special
/// ops and refuses `reboot` (it has its own TOTP-gated endpoint).
#[tokio::test]
async fn command_endpoint_routes_special_ops_correctly() {
    let harness = Harness::with_login(None).await;
    let server = server(&harness);
    let login = server.post("/login").json(&serde_json::json!({ "password": TEST_PASSWORD })).await;
    let csrf = login.json::<serde_json::Value>()["csrf_token"].as_str().unwrap().to_owned();

    let reboot_via_command = server
        .post("/api/hosts/hsb9/command")
        .add_header(CSRF_HEADER, &csrf)
        .json(&serde_json::json!({ "command": "reboot" }))
        .await;
    reboot_via_command.assert_status(StatusCode::BAD_REQUEST);

    let unknown = server
        .post("/api/hosts/hsb9/command")
        .add_header(CSRF_HEADER, &csrf)
        .json(&serde_json::json!({ "command": "not-a-real-op" }))
        .await;
    unknown.assert_status(StatusCode::BAD_REQUEST);
}
