mod common;

use common::{test_config, TestApp};
use service_core::utils::signature::generate_signature;
use wiremock::MockServer;

const SECRET: &str = "gateway-secret";

async fn spawn_signed() -> TestApp {
    let pesapal = MockServer::start().await;
    let mut config = test_config(&pesapal.uri());
    config.signature.enabled = true;
    config.signature.secret = secrecy::Secret::new(SECRET.to_string());
    TestApp::spawn_with(config, pesapal).await
}

fn signed_get(app: &TestApp, path: &str, nonce: &str) -> reqwest::RequestBuilder {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = generate_signature(SECRET, "GET", path, timestamp, nonce, "").unwrap();

    app.client
        .get(format!("{}{}", app.address, path))
        .header("X-User-ID", app.super_admin.user_id.to_string())
        .header("X-Client-ID", "gateway")
        .header("X-Timestamp", timestamp.to_string())
        .header("X-Nonce", nonce)
        .header("X-Signature", signature)
}

#[tokio::test]
async fn unsigned_requests_are_rejected_when_enforced() {
    let app = spawn_signed().await;

    let response = app.get("/subscription", app.super_admin.user_id).await;

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn public_paths_skip_signatures() {
    let app = spawn_signed().await;

    let health = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");
    let plans = app
        .client
        .get(format!("{}/subscription-plans", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(health.status().as_u16(), 200);
    assert_eq!(plans.status().as_u16(), 200);
}

#[tokio::test]
async fn signed_request_passes_once() {
    let app = spawn_signed().await;

    let first = signed_get(&app, "/subscription", "nonce-1")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(first.status().as_u16(), 200);

    let replay = signed_get(&app, "/subscription", "nonce-1")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(replay.status().as_u16(), 401);
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let app = spawn_signed().await;
    let timestamp = chrono::Utc::now().timestamp();
    let signature =
        generate_signature("wrong-secret", "GET", "/subscription", timestamp, "n-2", "").unwrap();

    let response = app
        .client
        .get(format!("{}/subscription", app.address))
        .header("X-User-ID", app.super_admin.user_id.to_string())
        .header("X-Client-ID", "gateway")
        .header("X-Timestamp", timestamp.to_string())
        .header("X-Nonce", "n-2")
        .header("X-Signature", signature)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
}
