//! Booking lifecycle and plot availability.

mod common;

use common::{number, TestApp};
use serde_json::{json, Value};

async fn plot_available(app: &TestApp, user_id: i64, plot_id: i64) -> bool {
    let plot: Value = app
        .get(&format!("/plots/{}", plot_id), user_id)
        .await
        .json()
        .await
        .unwrap();
    plot["is_available"].as_bool().unwrap()
}

#[tokio::test]
async fn booking_flips_plot_availability() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let project_id = app.create_project(&owner, "Malaa Gardens", &[]).await["project_id"]
        .as_i64()
        .unwrap();
    let plot_id = app.create_plot(&owner, project_id, "M-7", 600_000).await["plot_id"]
        .as_i64()
        .unwrap();
    assert!(plot_available(&app, owner.user_id, plot_id).await);

    let response = app.create_booking(&owner, plot_id, 100_000).await;
    assert_eq!(response.status().as_u16(), 201);
    let booking: Value = response.json().await.unwrap();
    assert_eq!(booking["status"], "booked");
    assert_eq!(number(&booking["purchase_price"]), 600_000.0);
    assert_eq!(number(&booking["balance"]), 500_000.0);
    assert!(!plot_available(&app, owner.user_id, plot_id).await);

    let available: Vec<Value> = app
        .get(
            &format!("/plots?project_id={}&is_available=true", project_id),
            owner.user_id,
        )
        .await
        .json()
        .await
        .unwrap();
    assert!(available.is_empty());

    let response = app
        .delete(
            &format!("/bookings/{}", booking["booking_id"]),
            owner.user_id,
        )
        .await;
    assert_eq!(response.status().as_u16(), 204);
    assert!(plot_available(&app, owner.user_id, plot_id).await);
}

#[tokio::test]
async fn deleting_a_client_releases_their_plots() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let project_id = app.create_project(&owner, "Malaa Gardens", &[]).await["project_id"]
        .as_i64()
        .unwrap();
    let plot_id = app.create_plot(&owner, project_id, "A-1", 600_000).await["plot_id"]
        .as_i64()
        .unwrap();
    let client = app.seed_user("wanjiru", "client").await;
    app.assign(&owner, project_id, &client).await;

    let response = app.create_booking(&client, plot_id, 50_000).await;
    assert_eq!(response.status().as_u16(), 201);
    assert!(!plot_available(&app, owner.user_id, plot_id).await);

    let response = app
        .delete(
            &format!("/admin/users/{}", client.user_id),
            app.super_admin.user_id,
        )
        .await;
    assert_eq!(response.status().as_u16(), 204);

    let bookings: Vec<Value> = app
        .get(&format!("/bookings?plot_id={}", plot_id), owner.user_id)
        .await
        .json()
        .await
        .unwrap();
    assert!(bookings.is_empty());
    assert!(plot_available(&app, owner.user_id, plot_id).await);

    let response = app.create_booking(&owner, plot_id, 50_000).await;
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn booked_plot_cannot_be_booked_again() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let project_id = app.create_project(&owner, "Malaa Gardens", &[]).await["project_id"]
        .as_i64()
        .unwrap();
    let plot_id = app.create_plot(&owner, project_id, "M-8", 600_000).await["plot_id"]
        .as_i64()
        .unwrap();

    let first = app.create_booking(&owner, plot_id, 0).await;
    assert_eq!(first.status().as_u16(), 201);

    let second = app.create_booking(&owner, plot_id, 0).await;
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
async fn booking_phase_must_exist_on_plot() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let project_id = app
        .create_project(&owner, "Phased Estate", &["Phase 1", "Phase 2"])
        .await["project_id"]
        .as_i64()
        .unwrap();

    let response = app
        .post(
            "/plots",
            owner.user_id,
            &json!({
                "project_id": project_id,
                "plot_number": "P-1",
                "size": 0.25,
                "price": 400000,
                "property_type": "commercial",
                "phases": ["Phase 3"],
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let plot: Value = app
        .post(
            "/plots",
            owner.user_id,
            &json!({
                "project_id": project_id,
                "plot_number": "P-1",
                "size": 0.25,
                "price": 400000,
                "property_type": "commercial",
                "phases": ["Phase 1"],
            }),
        )
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .post(
            "/bookings",
            owner.user_id,
            &json!({
                "plot_id": plot["plot_id"],
                "customer_name": "Otieno",
                "phase": "Phase 2",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .post(
            "/bookings",
            owner.user_id,
            &json!({
                "plot_id": plot["plot_id"],
                "customer_name": "Otieno",
                "phase": "Phase 1",
                "purchase_price": 380000,
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let booking: Value = response.json().await.unwrap();
    assert_eq!(booking["phase"], "Phase 1");
    assert_eq!(number(&booking["purchase_price"]), 380_000.0);
}

#[tokio::test]
async fn booking_can_be_updated() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let project_id = app.create_project(&owner, "Malaa Gardens", &[]).await["project_id"]
        .as_i64()
        .unwrap();
    let plot_id = app.create_plot(&owner, project_id, "M-9", 600_000).await["plot_id"]
        .as_i64()
        .unwrap();
    let booking: Value = app
        .create_booking(&owner, plot_id, 0)
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .patch(
            &format!("/bookings/{}", booking["booking_id"]),
            owner.user_id,
            &json!({ "status": "confirmed", "payment_reference": "MPESA-QX12" }),
        )
        .await;
    assert!(response.status().is_success());
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["status"], "confirmed");
    assert_eq!(updated["payment_reference"], "MPESA-QX12");
}

#[tokio::test]
async fn negative_deposit_is_rejected() {
    let app = TestApp::spawn().await;
    let owner = app.subscribed_admin("owner").await;
    let project_id = app.create_project(&owner, "Malaa Gardens", &[]).await["project_id"]
        .as_i64()
        .unwrap();
    let plot_id = app.create_plot(&owner, project_id, "M-10", 600_000).await["plot_id"]
        .as_i64()
        .unwrap();

    let response = app.create_booking(&owner, plot_id, -5).await;
    assert_eq!(response.status().as_u16(), 422);
    assert!(plot_available(&app, owner.user_id, plot_id).await);
}
