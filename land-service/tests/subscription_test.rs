//! Plans, checkout and the subscription gate.

mod common;

use chrono::{DateTime, Utc};
use common::TestApp;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn parse_date(value: &Value) -> DateTime<Utc> {
    value
        .as_str()
        .expect("date missing")
        .parse()
        .expect("invalid date")
}

#[tokio::test]
async fn plans_are_public_and_created_by_super_admin_only() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;

    let denied = app
        .post(
            "/admin/subscription-plans",
            admin.user_id,
            &json!({ "name": "Basic", "amount": 1000, "period": "monthly" }),
        )
        .await;
    assert_eq!(denied.status().as_u16(), 403);

    let plan_id = app.create_plan("Basic", "monthly", 3).await;

    let response = app
        .client
        .get(format!("{}/subscription-plans", app.address))
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());
    let plans: Vec<Value> = response.json().await.unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0]["plan_id"], plan_id);
    assert_eq!(plans[0]["duration_days"], 90);
    assert_eq!(plans[0]["display_name"], "Basic - 3 monthly");
}

#[tokio::test]
async fn deactivated_plan_disappears_from_listing() {
    let app = TestApp::spawn().await;
    let plan_id = app.create_plan("Basic", "monthly", 1).await;

    let response = app
        .delete(
            &format!("/admin/subscription-plans/{}", plan_id),
            app.super_admin.user_id,
        )
        .await;
    assert_eq!(response.status().as_u16(), 204);

    let plans: Vec<Value> = app
        .client
        .get(format!("{}/subscription-plans", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(plans.is_empty());
}

#[tokio::test]
async fn admin_without_subscription_is_gated() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;

    let response = app.get("/projects", admin.user_id).await;
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["subscription_status"], "none");

    let response = app.get("/subscription", admin.user_id).await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["has_subscription"], false);
    assert_eq!(body["status"], "none");
}

#[tokio::test]
async fn completed_payment_activates_for_plan_duration() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;
    let plan_id = app.create_plan("Quarter", "monthly", 3).await;

    let checkout = app.checkout(&admin, plan_id, "ORDER-ACT-1").await;
    assert_eq!(checkout["order_tracking_id"], "ORDER-ACT-1");
    let reference = checkout["merchant_reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with(&format!("SUB-{}-", admin.user_id)));
    assert!(checkout["redirect_url"].as_str().unwrap().contains("ORDER-ACT-1"));

    // Checkout alone grants nothing.
    let response = app.get("/projects", admin.user_id).await;
    assert_eq!(response.status().as_u16(), 403);

    app.mock_status("ORDER-ACT-1", "Completed", &reference).await;
    let response = app.get("/payments/verify/ORDER-ACT-1", admin.user_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "successful");
    assert_eq!(body["payment"]["transaction_id"], "QGT7H8K2LM");

    let subscription = &body["subscription"];
    assert_eq!(subscription["status"], "active");
    let start = parse_date(&subscription["start_date"]);
    let end = parse_date(&subscription["end_date"]);
    assert_eq!((end - start).num_days(), 90);

    let response = app.get("/projects", admin.user_id).await;
    assert!(response.status().is_success());
}

#[tokio::test]
async fn failed_payment_leaves_subscription_inactive() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;
    let plan_id = app.create_plan("Basic", "monthly", 1).await;

    let checkout = app.checkout(&admin, plan_id, "ORDER-FAIL-1").await;
    app.mock_status(
        "ORDER-FAIL-1",
        "Failed",
        checkout["merchant_reference"].as_str().unwrap(),
    )
    .await;

    let response = app.get("/payments/verify/ORDER-FAIL-1", admin.user_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "failed");

    let body: Value = app
        .get("/subscription", admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["is_active"], false);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn rejected_order_cancels_the_pending_payment() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;
    let plan_id = app.create_plan("Basic", "monthly", 1).await;

    app.mock_token().await;
    Mock::given(method("POST"))
        .and(path("/Transactions/SubmitOrderRequest"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&app.pesapal)
        .await;

    let response = app
        .post(
            "/subscription/subscribe",
            admin.user_id,
            &json!({ "plan_id": plan_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 502);

    let history: Value = app
        .get("/payments/history", admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history["total"], 1);
    assert_eq!(history["payments"][0]["status"], "cancelled");
}

#[tokio::test]
async fn order_without_checkout_url_is_not_accepted() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;
    let plan_id = app.create_plan("Basic", "monthly", 1).await;

    app.mock_token().await;
    Mock::given(method("POST"))
        .and(path("/Transactions/SubmitOrderRequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_tracking_id": "ORDER-NO-URL",
            "merchant_reference": "ignored",
            "redirect_url": "",
            "error": null,
            "status": "200"
        })))
        .mount(&app.pesapal)
        .await;

    let response = app
        .post(
            "/subscription/subscribe",
            admin.user_id,
            &json!({ "plan_id": plan_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 502);

    let history: Value = app
        .get("/payments/history", admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history["payments"][0]["status"], "cancelled");
    assert!(history["payments"][0]["order_tracking_id"].is_null());
}

#[tokio::test]
async fn subscribing_to_unknown_plan_is_not_found() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;

    let response = app
        .post(
            "/subscription/subscribe",
            admin.user_id,
            &json!({ "plan_id": 9999 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn cancelling_ends_access_immediately() {
    let app = TestApp::spawn().await;
    let admin = app.subscribed_admin("owner").await;

    let response = app.get("/projects", admin.user_id).await;
    assert!(response.status().is_success());

    let response = app
        .post("/subscription/cancel", admin.user_id, &json!({}))
        .await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["is_active"], false);

    let response = app.get("/projects", admin.user_id).await;
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["subscription_status"], "cancelled");
}

#[tokio::test]
async fn verifying_someone_elses_order_is_not_found() {
    let app = TestApp::spawn().await;
    let owner = app.seed_user("owner", "admin").await;
    let other = app.seed_user("other", "admin").await;
    let plan_id = app.create_plan("Basic", "monthly", 1).await;

    app.checkout(&owner, plan_id, "ORDER-OWN-1").await;

    let response = app.get("/payments/verify/ORDER-OWN-1", other.user_id).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn abandoned_checkout_does_not_change_the_paid_plan() {
    let app = TestApp::spawn().await;
    let admin = app.seed_user("owner", "admin").await;
    let daily = app.create_plan("Day pass", "daily", 1).await;
    let yearly = app.create_plan("Annual", "yearly", 1).await;

    let paid = app.checkout(&admin, daily, "ORDER-DAY-1").await;
    let reference = paid["merchant_reference"].as_str().unwrap().to_string();

    // A second checkout for a bigger plan that is never paid.
    app.pesapal.reset().await;
    app.checkout(&admin, yearly, "ORDER-YEAR-1").await;

    let current: Value = app.get("/subscription", admin.user_id).await.json().await.unwrap();
    assert_eq!(current["subscription"]["plan_id"], daily);

    app.mock_status("ORDER-DAY-1", "Completed", &reference).await;
    let body: Value = app
        .get("/payments/verify/ORDER-DAY-1", admin.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "successful");

    let subscription = &body["subscription"];
    assert_eq!(subscription["plan_id"], daily);
    let start = parse_date(&subscription["start_date"]);
    let end = parse_date(&subscription["end_date"]);
    assert_eq!((end - start).num_days(), 1);
}
