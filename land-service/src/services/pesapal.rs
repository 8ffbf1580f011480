//! Pesapal API 3.0 client.
//!
//! Covers the four calls the service needs: token issuance, order
//! submission, transaction status and IPN registration. Bearer tokens are
//! cached for a short TTL and shared by every clone of the client.

use crate::config::PesapalConfig;
use crate::services::metrics::record_gateway_request;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Pesapal credentials are not configured")]
    NotConfigured,

    #[error("Pesapal request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Pesapal returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Pesapal rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Malformed Pesapal response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    fn outcome(&self) -> &'static str {
        match self {
            GatewayError::NotConfigured => "not_configured",
            GatewayError::Transport(e) if e.is_timeout() => "timeout",
            GatewayError::Transport(_) => "transport",
            GatewayError::Http { .. } => "http_error",
            GatewayError::Rejected { .. } => "rejected",
            GatewayError::MalformedResponse(_) => "malformed",
        }
    }
}

/// Status of an order as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Completed,
    Failed,
    Invalid,
    Reversed,
    Pending,
    Unknown(String),
}

impl GatewayStatus {
    /// Case-insensitive; anything unrecognised is kept verbatim.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let known = [
            ("completed", GatewayStatus::Completed),
            ("failed", GatewayStatus::Failed),
            ("invalid", GatewayStatus::Invalid),
            ("reversed", GatewayStatus::Reversed),
            ("pending", GatewayStatus::Pending),
        ];
        known
            .into_iter()
            .find(|(name, _)| trimmed.eq_ignore_ascii_case(name))
            .map(|(_, status)| status)
            .unwrap_or_else(|| GatewayStatus::Unknown(trimmed.to_string()))
    }

    /// Pesapal's numeric `status_code`.
    pub fn from_status_code(code: i64) -> Self {
        match code {
            0 => GatewayStatus::Invalid,
            1 => GatewayStatus::Completed,
            2 => GatewayStatus::Failed,
            3 => GatewayStatus::Reversed,
            other => GatewayStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayStatus::Completed => "Completed",
            GatewayStatus::Failed => "Failed",
            GatewayStatus::Invalid => "Invalid",
            GatewayStatus::Reversed => "Reversed",
            GatewayStatus::Pending => "Pending",
            GatewayStatus::Unknown(raw) => raw,
        }
    }
}

/// Error object Pesapal embeds in otherwise successful HTTP responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiError {
    fn into_rejection(self) -> Option<GatewayError> {
        let code = self.code.filter(|c| !c.is_empty());
        let message = self.message.filter(|m| !m.is_empty());
        if code.is_none() && message.is_none() {
            return None;
        }
        Some(GatewayError::Rejected {
            code: code
                .or(self.error_type)
                .unwrap_or_else(|| "unknown".to_string()),
            message: message.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    consumer_key: &'a str,
    consumer_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingAddress {
    pub email_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub country_code: String,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
}

/// Recurring billing instructions attached to an order.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDetails {
    pub start_date: String,
    pub end_date: String,
    pub frequency: String,
}

impl SubscriptionDetails {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, frequency: &str) -> Self {
        Self {
            start_date: start.format("%d-%m-%Y").to_string(),
            end_date: end.format("%d-%m-%Y").to_string(),
            frequency: frequency.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub id: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub description: String,
    pub callback_url: String,
    pub notification_id: String,
    pub billing_address: BillingAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_details: Option<SubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
struct SubmitOrderResponse {
    #[serde(default)]
    order_tracking_id: Option<String>,
    #[serde(default)]
    merchant_reference: Option<String>,
    #[serde(default)]
    redirect_url: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSubmission {
    pub order_tracking_id: String,
    pub merchant_reference: Option<String>,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    confirmation_code: Option<String>,
    #[serde(default)]
    payment_status_description: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    payment_account: Option<String>,
    #[serde(default)]
    status_code: Option<serde_json::Value>,
    #[serde(default)]
    merchant_reference: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone)]
pub struct TransactionStatus {
    pub status: GatewayStatus,
    pub confirmation_code: Option<String>,
    pub payment_method: Option<String>,
    pub payment_account: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub merchant_reference: Option<String>,
    pub description: Option<String>,
    /// Full gateway body, kept for payment metadata.
    pub raw: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RegisterIpnRequest<'a> {
    url: &'a str,
    ipn_notification_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterIpnResponse {
    #[serde(default)]
    ipn_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ipn_notification_type_description: Option<String>,
    #[serde(default)]
    ipn_status_description: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IpnRegistration {
    pub ipn_id: String,
    pub url: String,
    pub notification_type: Option<String>,
    pub status: Option<String>,
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Short-lived bearer token shared across requests.
pub struct TokenCache {
    ttl: Duration,
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Option<String> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .filter(|token| token.fetched_at.elapsed() < self.ttl)
            .map(|token| token.value.clone())
    }

    pub async fn store(&self, value: String) {
        *self.slot.lock().await = Some(CachedToken {
            value,
            fetched_at: Instant::now(),
        });
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[derive(Clone)]
pub struct PesapalClient {
    client: Client,
    config: PesapalConfig,
    tokens: Arc<TokenCache>,
}

impl PesapalClient {
    pub fn new(config: PesapalConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let tokens = Arc::new(TokenCache::new(Duration::from_secs(config.token_ttl_secs)));

        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    pub fn config(&self) -> &PesapalConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        !self.config.consumer_key.is_empty()
            && !self.config.consumer_secret.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Build an order for `merchant_reference` using the configured callback
    /// and IPN id. An empty `currency` falls back to the configured one.
    pub fn order_request(
        &self,
        merchant_reference: &str,
        amount: Decimal,
        currency: &str,
        description: &str,
        billing_address: BillingAddress,
        subscription_details: Option<SubscriptionDetails>,
    ) -> OrderRequest {
        let account_number = subscription_details
            .as_ref()
            .map(|_| merchant_reference.to_string());

        OrderRequest {
            id: merchant_reference.to_string(),
            currency: if currency.is_empty() {
                self.config.currency.clone()
            } else {
                currency.to_string()
            },
            amount,
            // Pesapal caps descriptions at 100 characters.
            description: description.chars().take(100).collect(),
            callback_url: self.config.callback_url.clone(),
            notification_id: self.config.ipn_id.clone(),
            billing_address,
            account_number,
            subscription_details,
        }
    }

    /// Return a cached bearer token or fetch a fresh one.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some(token) = self.tokens.get().await {
            return Ok(token);
        }
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let token = observe("request_token", self.request_token()).await?;
        self.tokens.store(token.clone()).await;
        debug!("Pesapal access token refreshed");

        Ok(token)
    }

    async fn request_token(&self) -> Result<String, GatewayError> {
        let body = TokenRequest {
            consumer_key: &self.config.consumer_key,
            consumer_secret: self.config.consumer_secret.expose_secret(),
        };

        let response = self
            .client
            .traced_post(&self.url("Auth/RequestToken"))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let parsed: TokenResponse = read_json(response).await?;
        if let Some(rejection) = parsed.error.and_then(ApiError::into_rejection) {
            return Err(rejection);
        }

        parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::MalformedResponse("token missing".to_string()))
    }

    #[instrument(skip(self, order), fields(merchant_reference = %order.id, amount = %order.amount))]
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<OrderSubmission, GatewayError> {
        let token = self.access_token().await?;

        observe("submit_order", async {
            let response = self
                .client
                .traced_post(&self.url("Transactions/SubmitOrderRequest"))
                .header("Accept", "application/json")
                .bearer_auth(&token)
                .json(order)
                .send()
                .await?;

            let parsed: SubmitOrderResponse = self.read_authenticated(response).await?;
            if let Some(rejection) = parsed.error.and_then(ApiError::into_rejection) {
                return Err(rejection);
            }

            let order_tracking_id = parsed
                .order_tracking_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    GatewayError::MalformedResponse("order_tracking_id missing".to_string())
                })?;
            let redirect_url = parsed
                .redirect_url
                .filter(|url| !url.is_empty())
                .ok_or_else(|| {
                    GatewayError::MalformedResponse("redirect_url missing".to_string())
                })?;

            info!(order_tracking_id = %order_tracking_id, "Order submitted to Pesapal");

            Ok(OrderSubmission {
                order_tracking_id,
                merchant_reference: parsed.merchant_reference,
                redirect_url,
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn transaction_status(
        &self,
        order_tracking_id: &str,
    ) -> Result<TransactionStatus, GatewayError> {
        let token = self.access_token().await?;

        observe("transaction_status", async {
            let response = self
                .client
                .traced_get(&self.url("Transactions/GetTransactionStatus"))
                .header("Accept", "application/json")
                .bearer_auth(&token)
                .query(&[("orderTrackingId", order_tracking_id)])
                .send()
                .await?;

            let raw: serde_json::Value = self.read_authenticated(response).await?;
            let parsed: StatusResponse = serde_json::from_value(raw.clone())
                .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

            let status = match (
                parsed
                    .payment_status_description
                    .as_deref()
                    .filter(|s| !s.trim().is_empty()),
                parsed.status_code.as_ref().and_then(json_integer),
            ) {
                (Some(description), _) => GatewayStatus::parse(description),
                (None, Some(code)) => GatewayStatus::from_status_code(code),
                (None, None) => {
                    return Err(parsed
                        .error
                        .and_then(ApiError::into_rejection)
                        .unwrap_or_else(|| {
                            GatewayError::MalformedResponse("payment status missing".to_string())
                        }));
                }
            };

            debug!(status = %status.as_str(), "Pesapal transaction status");

            Ok(TransactionStatus {
                status,
                confirmation_code: parsed.confirmation_code.filter(|c| !c.is_empty()),
                payment_method: parsed.payment_method.filter(|m| !m.is_empty()),
                payment_account: parsed.payment_account,
                amount: parsed.amount.as_ref().and_then(json_decimal),
                currency: parsed.currency,
                merchant_reference: parsed.merchant_reference.filter(|r| !r.is_empty()),
                description: parsed.description,
                raw,
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn register_ipn(
        &self,
        url: &str,
        notification_type: &str,
    ) -> Result<IpnRegistration, GatewayError> {
        let token = self.access_token().await?;

        observe("register_ipn", async {
            let response = self
                .client
                .traced_post(&self.url("URLSetup/RegisterIPN"))
                .header("Accept", "application/json")
                .bearer_auth(&token)
                .json(&RegisterIpnRequest {
                    url,
                    ipn_notification_type: notification_type,
                })
                .send()
                .await?;

            let parsed: RegisterIpnResponse = self.read_authenticated(response).await?;
            if let Some(rejection) = parsed.error.and_then(ApiError::into_rejection) {
                return Err(rejection);
            }

            let ipn_id = parsed
                .ipn_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| GatewayError::MalformedResponse("ipn_id missing".to_string()))?;

            info!(ipn_id = %ipn_id, "IPN URL registered with Pesapal");

            Ok(IpnRegistration {
                ipn_id,
                url: parsed.url.unwrap_or_else(|| url.to_string()),
                notification_type: parsed.ipn_notification_type_description,
                status: parsed.ipn_status_description,
            })
        })
        .await
    }

    /// Like [`read_json`], but drops the cached token when Pesapal says it
    /// is no longer valid.
    async fn read_authenticated<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Pesapal rejected cached token");
            self.tokens.invalidate().await;
        }
        read_json(response).await
    }
}

async fn observe<T, F>(operation: &'static str, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    let started = Instant::now();
    let result = call.await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.outcome(),
    };
    record_gateway_request(operation, outcome, started.elapsed().as_secs_f64());
    result
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(GatewayError::Http {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
}

fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn json_integer(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(GatewayStatus::parse("Completed"), GatewayStatus::Completed);
        assert_eq!(GatewayStatus::parse("COMPLETED"), GatewayStatus::Completed);
        assert_eq!(GatewayStatus::parse(" failed "), GatewayStatus::Failed);
        assert_eq!(GatewayStatus::parse("Reversed"), GatewayStatus::Reversed);
    }

    #[test]
    fn unrecognised_status_is_kept() {
        assert_eq!(
            GatewayStatus::parse("AwaitingConfirmation"),
            GatewayStatus::Unknown("AwaitingConfirmation".to_string())
        );
    }

    #[test]
    fn status_codes_map_to_statuses() {
        assert_eq!(GatewayStatus::from_status_code(1), GatewayStatus::Completed);
        assert_eq!(GatewayStatus::from_status_code(2), GatewayStatus::Failed);
        assert_eq!(GatewayStatus::from_status_code(0), GatewayStatus::Invalid);
        assert_eq!(GatewayStatus::from_status_code(3), GatewayStatus::Reversed);
    }

    #[test]
    fn empty_api_error_is_not_a_rejection() {
        assert!(ApiError::default().into_rejection().is_none());

        let rejection = ApiError {
            error_type: Some("api_error".to_string()),
            code: Some("invalid_ipn".to_string()),
            message: Some("IPN not registered".to_string()),
        }
        .into_rejection();
        assert!(matches!(
            rejection,
            Some(GatewayError::Rejected { ref code, .. }) if code == "invalid_ipn"
        ));
    }

    #[test]
    fn amounts_parse_from_numbers_and_strings() {
        assert_eq!(
            json_decimal(&serde_json::json!(1500.5)),
            Some(Decimal::new(15005, 1))
        );
        assert_eq!(
            json_decimal(&serde_json::json!("2000")),
            Some(Decimal::from(2000))
        );
        assert_eq!(json_decimal(&serde_json::json!(null)), None);
    }

    #[test]
    fn subscription_dates_use_day_month_year() {
        let start = DateTime::parse_from_rfc3339("2025-03-07T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2026-03-07T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let details = SubscriptionDetails::new(start, end, "MONTHLY");
        assert_eq!(details.start_date, "07-03-2025");
        assert_eq!(details.end_date, "07-03-2026");
    }

    #[tokio::test]
    async fn token_cache_expires_after_ttl() {
        let cache = TokenCache::new(Duration::from_millis(20));
        cache.store("abc".to_string()).await;
        assert_eq!(cache.get().await.as_deref(), Some("abc"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get().await, None);
    }
}
