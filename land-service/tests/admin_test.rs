//! Super-admin user management, subagent provisioning, audit and gateway setup.

mod common;

use common::TestApp;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn super_admin_creates_and_lists_users() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/admin/users",
            app.super_admin.user_id,
            &json!({
                "username": "wambui",
                "email": "Wambui@Example.com",
                "first_name": "Wambui",
                "last_name": "Njeri",
                "role": "admin",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let user: Value = response.json().await.unwrap();
    assert_eq!(user["role"], "admin");
    assert_eq!(user["email"], "wambui@example.com");
    assert_eq!(user["created_by"], app.super_admin.user_id);

    let admins: Vec<Value> = app
        .get("/admin/users?role=admin", app.super_admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0]["username"], "wambui");

    let response = app
        .get(
            &format!("/admin/users/{}", user["user_id"]),
            app.super_admin.user_id,
        )
        .await;
    assert!(response.status().is_success());
}

#[tokio::test]
async fn invalid_user_requests_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/admin/users",
            app.super_admin.user_id,
            &json!({ "username": "ghost", "email": "ghost@example.com", "role": "unknown" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .post(
            "/admin/users",
            app.super_admin.user_id,
            &json!({ "username": "x", "email": "not-an-email", "role": "admin" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
async fn admin_endpoints_are_super_admin_only() {
    let app = TestApp::spawn().await;
    let admin = app.subscribed_admin("owner").await;

    assert_eq!(app.get("/admin/users", admin.user_id).await.status().as_u16(), 403);
    assert_eq!(
        app.get("/admin/audit-logs", admin.user_id).await.status().as_u16(),
        403
    );
    let response = app
        .post(
            "/admin/users",
            admin.user_id,
            &json!({ "username": "sneaky", "email": "s@example.com", "role": "super_admin" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn super_admin_cannot_delete_self() {
    let app = TestApp::spawn().await;
    let other = app.seed_user("other", "client").await;

    let response = app
        .delete(
            &format!("/admin/users/{}", app.super_admin.user_id),
            app.super_admin.user_id,
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .delete(&format!("/admin/users/{}", other.user_id), app.super_admin.user_id)
        .await;
    assert_eq!(response.status().as_u16(), 204);

    let response = app
        .get(&format!("/admin/users/{}", other.user_id), app.super_admin.user_id)
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn subscribed_admin_provisions_subagents() {
    let app = TestApp::spawn().await;
    let admin = app.subscribed_admin("owner").await;

    let response = app
        .post(
            "/users/subagents",
            admin.user_id,
            &json!({ "username": "agent-one", "email": "agent1@example.com" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let agent: Value = response.json().await.unwrap();
    assert_eq!(agent["role"], "subagent");
    assert_eq!(agent["created_by"], admin.user_id);

    let response = app
        .post(
            "/users/subagents",
            admin.user_id,
            &json!({ "username": "client-one", "email": "client1@example.com", "role": "client" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let response = app
        .post(
            "/users/subagents",
            admin.user_id,
            &json!({ "username": "promoted", "email": "p@example.com", "role": "admin" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn unsubscribed_admin_cannot_provision() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;

    let response = app
        .post(
            "/users/subagents",
            admin.user_id,
            &json!({ "username": "agent-one", "email": "agent1@example.com" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn unknown_and_inactive_callers_are_refused() {
    let app = TestApp::spawn().await;
    let inactive = app.store.seed_user("dormant", "admin", false).await;

    assert_eq!(app.get("/subscription", 987_654).await.status().as_u16(), 401);
    assert_eq!(
        app.get("/subscription", inactive.user_id).await.status().as_u16(),
        403
    );
}

#[tokio::test]
async fn deactivated_user_is_locked_out_until_reactivated() {
    let app = TestApp::spawn().await;
    let client = app.seed_user("kamau", "client").await;
    assert_eq!(app.get("/bookings", client.user_id).await.status().as_u16(), 200);

    let response = app
        .patch(
            &format!("/admin/users/{}", client.user_id),
            app.super_admin.user_id,
            &json!({ "is_active": false, "email": " Kamau@Example.com " }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let user: Value = response.json().await.unwrap();
    assert_eq!(user["is_active"], false);
    assert_eq!(user["email"], "kamau@example.com");

    assert_eq!(app.get("/bookings", client.user_id).await.status().as_u16(), 403);

    let response = app
        .patch(
            &format!("/admin/users/{}", client.user_id),
            app.super_admin.user_id,
            &json!({ "is_active": true }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.get("/bookings", client.user_id).await.status().as_u16(), 200);

    let entries: Vec<Value> = app
        .get("/admin/audit-logs?resource_type=user", app.super_admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["action"] == "update"));
}

#[tokio::test]
async fn user_updates_are_validated() {
    let app = TestApp::spawn().await;
    let client = app.seed_user("kamau", "client").await;
    let path = format!("/admin/users/{}", client.user_id);

    let response = app
        .patch(&path, app.super_admin.user_id, &json!({ "email": "not-an-email" }))
        .await;
    assert_eq!(response.status().as_u16(), 422);

    let response = app
        .patch(&path, client.user_id, &json!({ "is_active": false }))
        .await;
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .patch(
            &format!("/admin/users/{}", app.super_admin.user_id),
            app.super_admin.user_id,
            &json!({ "is_active": false }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .patch("/admin/users/999999", app.super_admin.user_id, &json!({ "first_name": "X" }))
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn administrative_actions_are_audited() {
    let app = TestApp::spawn().await;
    let admin = app.subscribed_admin("owner").await;
    app.create_project(&admin, "Audited Estate", &[]).await;
    let project: Vec<Value> = app
        .get("/projects", admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    let response = app
        .delete(
            &format!("/projects/{}", project[0]["project_id"]),
            admin.user_id,
        )
        .await;
    assert_eq!(response.status().as_u16(), 204);

    let entries: Vec<Value> = app
        .get("/admin/audit-logs", app.super_admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    let pairs: Vec<(String, String)> = entries
        .iter()
        .map(|e| {
            (
                e["action"].as_str().unwrap().to_string(),
                e["resource_type"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert!(pairs.contains(&("create".to_string(), "subscription_plan".to_string())));
    assert!(pairs.contains(&("grant".to_string(), "subscription".to_string())));
    assert!(pairs.contains(&("delete".to_string(), "project".to_string())));

    let grants: Vec<Value> = app
        .get(
            "/admin/audit-logs?resource_type=subscription&limit=5",
            app.super_admin.user_id,
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0]["actor_name"], "root");
}

#[tokio::test]
async fn ipn_url_is_registered_with_pesapal() {
    let app = TestApp::spawn().await;
    app.mock_token().await;
    Mock::given(method("POST"))
        .and(path("/URLSetup/RegisterIPN"))
        .and(body_partial_json(json!({
            "url": "https://land.example.com/webhooks/pesapal",
            "ipn_notification_type": "GET"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://land.example.com/webhooks/pesapal",
            "created_date": "2025-03-07T10:00:00.000Z",
            "ipn_id": "e32182ca-0983-4fa0-91bc-c3bb813ba750",
            "ipn_notification_type_description": "GET",
            "ipn_status_description": "Active",
            "error": null,
            "status": "200"
        })))
        .expect(1)
        .mount(&app.pesapal)
        .await;

    let response = app
        .post(
            "/admin/gateway/ipn",
            app.super_admin.user_id,
            &json!({ "url": "https://land.example.com/webhooks/pesapal" }),
        )
        .await;

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ipn_id"], "e32182ca-0983-4fa0-91bc-c3bb813ba750");
    assert_eq!(body["status"], "Active");
}
