#![allow(dead_code)]

use land_service::config::{DatabaseConfig, LandConfig, PesapalConfig, ServiceSignatureConfig};
use land_service::models::User;
use land_service::services::InMemoryStore;
use land_service::startup::Application;
use reqwest::{Client, Response};
use secrecy::Secret;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_TOKEN: &str = "test-pesapal-token";

pub struct TestApp {
    pub address: String,
    pub http_port: u16,
    pub store: Arc<InMemoryStore>,
    pub pesapal: MockServer,
    pub super_admin: User,
    pub client: Client,
}

pub fn test_config(pesapal_base_url: &str) -> LandConfig {
    LandConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        service_name: "land-service".to_string(),
        service_version: "test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
            min_connections: 1,
        },
        pesapal: PesapalConfig {
            consumer_key: "test-consumer-key".to_string(),
            consumer_secret: Secret::new("test-consumer-secret".to_string()),
            base_url: pesapal_base_url.to_string(),
            callback_url: "http://localhost:3000/subscription/callback".to_string(),
            ipn_id: "test-ipn-id".to_string(),
            ipn_url: "http://localhost:8080/webhooks/pesapal".to_string(),
            currency: "KES".to_string(),
            country_code: "KE".to_string(),
            timeout_secs: 5,
            token_ttl_secs: 300,
        },
        signature: ServiceSignatureConfig {
            enabled: false,
            secret: Secret::new("test-secret".to_string()),
            nonce_ttl_secs: 300,
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let pesapal = MockServer::start().await;
        let config = test_config(&pesapal.uri());
        Self::spawn_with(config, pesapal).await
    }

    pub async fn spawn_with(config: LandConfig, pesapal: MockServer) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let super_admin = store.seed_user("root", "super_admin", true).await;

        let app = Application::build_with_store(config, store.clone())
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            http_port,
            store,
            pesapal,
            super_admin,
            client,
        }
    }

    pub async fn seed_user(&self, username: &str, role: &str) -> User {
        self.store.seed_user(username, role, true).await
    }

    // ------------------------------------------------------------------------
    // Requests as a given user
    // ------------------------------------------------------------------------

    pub async fn get(&self, path: &str, user_id: i64) -> Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post<T: Serialize>(&self, path: &str, user_id: i64, body: &T) -> Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id.to_string())
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn patch<T: Serialize>(&self, path: &str, user_id: i64, body: &T) -> Response {
        self.client
            .patch(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id.to_string())
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str, user_id: i64) -> Response {
        self.client
            .delete(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Unauthenticated GET, as the gateway delivers IPNs.
    pub async fn ipn(&self, order_tracking_id: &str, merchant_reference: &str) -> Response {
        self.client
            .get(format!("{}/webhooks/pesapal", self.address))
            .query(&[
                ("OrderTrackingId", order_tracking_id),
                ("OrderMerchantReference", merchant_reference),
                ("OrderNotificationType", "IPNCHANGE"),
            ])
            .send()
            .await
            .expect("Failed to execute request")
    }

    // ------------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------------

    /// Create a plan as the super admin and return its id.
    pub async fn create_plan(&self, name: &str, period: &str, period_count: i32) -> i64 {
        let response = self
            .post(
                "/admin/subscription-plans",
                self.super_admin.user_id,
                &json!({
                    "name": name,
                    "amount": 1500,
                    "currency": "KES",
                    "period": period,
                    "period_count": period_count,
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201, "plan creation failed");
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["plan_id"].as_i64().expect("plan_id missing")
    }

    /// Seed an admin with an active, granted subscription.
    pub async fn subscribed_admin(&self, username: &str) -> User {
        let admin = self.seed_user(username, "admin").await;
        let plan_id = self.create_plan(&format!("{} plan", username), "monthly", 1).await;
        let response = self
            .post(
                &format!("/admin/users/{}/subscription", admin.user_id),
                self.super_admin.user_id,
                &json!({ "plan_id": plan_id }),
            )
            .await;
        assert!(response.status().is_success(), "grant failed");
        admin
    }

    /// Create a project owned by `owner` and return its JSON.
    pub async fn create_project(&self, owner: &User, name: &str, phases: &[&str]) -> Value {
        let response = self
            .post(
                "/projects",
                owner.user_id,
                &json!({ "name": name, "location": "Kitengela", "phases": phases }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201, "project creation failed");
        response.json().await.expect("Failed to parse JSON")
    }

    pub async fn create_plot(
        &self,
        owner: &User,
        project_id: i64,
        plot_number: &str,
        price: i64,
    ) -> Value {
        let response = self
            .post(
                "/plots",
                owner.user_id,
                &json!({
                    "project_id": project_id,
                    "plot_number": plot_number,
                    "size": 0.125,
                    "price": price,
                    "property_type": "residential",
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201, "plot creation failed");
        response.json().await.expect("Failed to parse JSON")
    }

    pub async fn create_booking(&self, user: &User, plot_id: i64, amount_paid: i64) -> Response {
        self.post(
            "/bookings",
            user.user_id,
            &json!({
                "plot_id": plot_id,
                "customer_name": "Wanjiru Kamau",
                "customer_contact": "0712345678",
                "amount_paid": amount_paid,
            }),
        )
        .await
    }

    pub async fn assign(&self, owner: &User, project_id: i64, user: &User) {
        let response = self
            .post(
                &format!("/projects/{}/assignments", project_id),
                owner.user_id,
                &json!({ "user_id": user.user_id }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201, "assignment failed");
    }

    // ------------------------------------------------------------------------
    // Pesapal mocks
    // ------------------------------------------------------------------------

    pub async fn mock_token(&self) {
        Mock::given(method("POST"))
            .and(path("/Auth/RequestToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": TEST_TOKEN,
                "expiryDate": "2099-01-01T00:00:00Z",
                "error": null,
                "status": "200",
                "message": "Request processed successfully"
            })))
            .mount(&self.pesapal)
            .await;
    }

    pub async fn mock_submit_order(&self, order_tracking_id: &str) {
        Mock::given(method("POST"))
            .and(path("/Transactions/SubmitOrderRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "order_tracking_id": order_tracking_id,
                "merchant_reference": "ignored",
                "redirect_url": format!("https://pay.pesapal.com/iframe?OrderTrackingId={}", order_tracking_id),
                "error": null,
                "status": "200"
            })))
            .mount(&self.pesapal)
            .await;
    }

    pub async fn mock_status(&self, order_tracking_id: &str, status: &str, merchant_reference: &str) {
        Mock::given(method("GET"))
            .and(path("/Transactions/GetTransactionStatus"))
            .and(query_param("orderTrackingId", order_tracking_id))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(
                status,
                merchant_reference,
            )))
            .mount(&self.pesapal)
            .await;
    }

    /// Walk the checkout for `user` on `plan_id` and return the order id.
    pub async fn checkout(&self, user: &User, plan_id: i64, order_tracking_id: &str) -> Value {
        self.mock_token().await;
        self.mock_submit_order(order_tracking_id).await;

        let response = self
            .post(
                "/subscription/subscribe",
                user.user_id,
                &json!({ "plan_id": plan_id, "phone_number": "0712345678" }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201, "subscribe failed");
        response.json().await.expect("Failed to parse JSON")
    }
}

pub fn status_body(status: &str, merchant_reference: &str) -> Value {
    json!({
        "payment_method": "MpesaKE",
        "amount": 1500.0,
        "created_date": "2025-03-07T10:15:00.000Z",
        "confirmation_code": "QGT7H8K2LM",
        "payment_status_description": status,
        "description": "",
        "message": "Request processed successfully",
        "payment_account": "2547xxxxx678",
        "call_back_url": "http://localhost:3000/subscription/callback",
        "status_code": 1,
        "merchant_reference": merchant_reference,
        "currency": "KES",
        "error": { "error_type": null, "code": null, "message": null },
        "status": "200"
    })
}

/// Money fields serialize as decimal strings or floats; read either.
pub fn number(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or_else(|| panic!("not a number: {}", value))
}
