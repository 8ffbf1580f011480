//! Installments on bookings and the sales rollups they maintain.

mod common;

use common::{number, TestApp};
use land_service::models::User;
use serde_json::{json, Value};

async fn booking(app: &TestApp, owner: &User, price: i64, deposit: i64) -> (i64, i64, i64) {
    let project_id = app.create_project(owner, "Joska Heights", &[]).await["project_id"]
        .as_i64()
        .unwrap();
    let plot_id = app.create_plot(owner, project_id, "J-1", price).await["plot_id"]
        .as_i64()
        .unwrap();
    let booking: Value = app
        .create_booking(owner, plot_id, deposit)
        .await
        .json()
        .await
        .unwrap();
    (project_id, plot_id, booking["booking_id"].as_i64().unwrap())
}

async fn pay(app: &TestApp, user: &User, booking_id: i64, amount: i64) -> reqwest::Response {
    app.post(
        &format!("/bookings/{}/installments", booking_id),
        user.user_id,
        &json!({ "amount": amount, "agent_name": "Kamau" }),
    )
    .await
}

#[tokio::test]
async fn installment_updates_deposit_balance_and_rollups() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let (project_id, plot_id, booking_id) = booking(&app, &owner, 10_000, 2_000).await;

    let response = pay(&app, &owner, booking_id, 3_000).await;
    assert_eq!(response.status().as_u16(), 200);
    let receipt: Value = response.json().await.unwrap();
    assert_eq!(number(&receipt["previous_deposit"]), 2_000.0);
    assert_eq!(number(&receipt["new_deposit"]), 5_000.0);
    assert_eq!(number(&receipt["balance"]), 5_000.0);
    assert_eq!(receipt["agent_name"], "Kamau");

    let booking: Value = app
        .get(&format!("/bookings/{}", booking_id), owner.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(number(&booking["amount_paid"]), 5_000.0);
    assert_eq!(number(&booking["balance"]), 5_000.0);

    let project_sales: Vec<Value> = app
        .get(&format!("/sales/projects?project_id={}", project_id), owner.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(project_sales.len(), 1);
    assert_eq!(project_sales[0]["plot_id"], plot_id);
    assert_eq!(number(&project_sales[0]["deposit"]), 5_000.0);

    let agent_sales: Vec<Value> = app
        .get(&format!("/sales/agents?plot_id={}", plot_id), owner.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(agent_sales.len(), 1);
    assert_eq!(agent_sales[0]["agent_name"], "Kamau");
    assert_eq!(number(&agent_sales[0]["commission"]), 5.0);
}

#[tokio::test]
async fn overpayment_is_accepted_with_negative_balance() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let (_, _, booking_id) = booking(&app, &owner, 1_000, 900).await;

    let receipt: Value = pay(&app, &owner, booking_id, 300).await.json().await.unwrap();

    assert_eq!(number(&receipt["balance"]), -200.0);
}

#[tokio::test]
async fn non_positive_installment_is_rejected() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let (_, _, booking_id) = booking(&app, &owner, 1_000, 0).await;

    for amount in [0, -100] {
        let response = pay(&app, &owner, booking_id, amount).await;
        assert_eq!(response.status().as_u16(), 422);
    }

    let booking: Value = app
        .get(&format!("/bookings/{}", booking_id), owner.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(number(&booking["amount_paid"]), 0.0);
}

#[tokio::test]
async fn installment_on_missing_booking_is_not_found() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;

    let response = pay(&app, &owner, 424_242, 100).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn owner_sets_commission_and_later_installments_keep_it() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let (project_id, _, booking_id) = booking(&app, &owner, 10_000, 0).await;
    pay(&app, &owner, booking_id, 1_000).await;

    let sales: Vec<Value> = app
        .get("/sales/agents", owner.user_id)
        .await
        .json()
        .await
        .unwrap();
    let sale_id = sales[0]["sale_id"].as_i64().unwrap();

    let subagent = app.seed_user("agent", "subagent").await;
    app.assign(&owner, project_id, &subagent).await;
    let response = app
        .patch(
            &format!("/sales/agents/{}", sale_id),
            subagent.user_id,
            &json!({ "commission": 9 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .patch(
            &format!("/sales/agents/{}", sale_id),
            owner.user_id,
            &json!({ "commission": 7 }),
        )
        .await;
    assert!(response.status().is_success());
    assert_eq!(number(&response.json::<Value>().await.unwrap()["commission"]), 7.0);

    pay(&app, &owner, booking_id, 1_000).await;

    let sales: Vec<Value> = app
        .get("/sales/agents", owner.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(number(&sales[0]["commission"]), 7.0);
}

#[tokio::test]
async fn commission_above_hundred_is_invalid() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let (_, _, booking_id) = booking(&app, &owner, 10_000, 0).await;
    pay(&app, &owner, booking_id, 1_000).await;
    let sales: Vec<Value> = app
        .get("/sales/agents", owner.user_id)
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .patch(
            &format!("/sales/agents/{}", sales[0]["sale_id"]),
            owner.user_id,
            &json!({ "commission": 150 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 422);
}
