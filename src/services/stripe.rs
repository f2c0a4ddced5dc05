// src/services/stripe.rs

//! Stripe Checkout and webhook handling.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::{config::WEBHOOK_TOLERANCE_SECS, error::AppError};

type HmacSha256 = Hmac<Sha256>;

/// Data needed to open a checkout session for one course.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub user_email: String,
    pub course_id: i64,
    pub course_title: String,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Seam between the payment handlers and the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, AppError>;
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl StripeClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

/// Form fields for `POST /checkout/sessions`.
fn checkout_form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
    vec![
        ("mode", "payment".to_string()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("client_reference_id", request.user_id.to_string()),
        ("customer_email", request.user_email.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        (
            "line_items[0][price_data][currency]",
            request.currency.to_lowercase(),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            request.amount_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            request.course_title.clone(),
        ),
        ("metadata[course_id]", request.course_id.to_string()),
        ("metadata[user_id]", request.user_id.to_string()),
    ]
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, AppError> {
        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&checkout_form(request))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Stripe request failed: {:?}", e);
                AppError::ServiceUnavailable("Payment provider unavailable".to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;

        if !status.is_success() {
            #[derive(Deserialize)]
            struct StripeApiError {
                error: StripeApiErrorDetail,
            }

            #[derive(Deserialize)]
            struct StripeApiErrorDetail {
                message: String,
            }

            let message = serde_json::from_str::<StripeApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(AppError::InternalServerError(format!(
                "Stripe checkout failed: {}",
                message
            )));
        }

        serde_json::from_str(&body).map_err(|e| AppError::InternalServerError(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// The fields of a Checkout Session object that matter for fulfilment.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionObject {
    pub id: String,
    pub payment_intent: Option<String>,
    pub client_reference_id: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionObject {
    /// `(user_id, course_id)` stamped on the session at checkout time.
    pub fn purchase(&self) -> Option<(i64, i64)> {
        let user_id = self
            .metadata
            .get("user_id")
            .or(self.client_reference_id.as_ref())?
            .parse()
            .ok()?;
        let course_id = self.metadata.get("course_id")?.parse().ok()?;
        Some((user_id, course_id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeObject {
    pub payment_intent: Option<String>,
}

/// Webhook events this backend acts on.
#[derive(Debug, Clone)]
pub enum WebhookAction {
    CheckoutCompleted(SessionObject),
    CheckoutExpired(SessionObject),
    ChargeRefunded(ChargeObject),
    Ignored(String),
}

/// Verifies a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=...]`) over
/// `"{t}.{payload}"` and returns the parsed event.
pub fn verify_webhook_signature(
    payload: &str,
    signature: &str,
    secret: &str,
    now: i64,
) -> Result<WebhookEvent, AppError> {
    let invalid = |msg: &str| AppError::BadRequest(format!("Invalid webhook: {}", msg));

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
    if candidates.is_empty() {
        return Err(invalid("missing signature"));
    }

    let ts: i64 = timestamp.parse().map_err(|_| invalid("bad timestamp"))?;
    if now.abs_diff(ts) > WEBHOOK_TOLERANCE_SECS.unsigned_abs() {
        return Err(invalid("timestamp outside tolerance"));
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| invalid("bad secret"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    // Constant-time comparison against each provided v1 signature.
    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(invalid("signature mismatch"));
    }

    serde_json::from_str(payload).map_err(|e| invalid(&e.to_string()))
}

pub fn parse_webhook_event(event: &WebhookEvent) -> Result<WebhookAction, AppError> {
    let object = event.data.object.clone();
    let action = match event.event_type.as_str() {
        "checkout.session.completed" => {
            WebhookAction::CheckoutCompleted(serde_json::from_value(object)?)
        }
        "checkout.session.expired" => {
            WebhookAction::CheckoutExpired(serde_json::from_value(object)?)
        }
        "charge.refunded" => WebhookAction::ChargeRefunded(serde_json::from_value(object)?),
        other => WebhookAction::Ignored(other.to_string()),
    };
    Ok(action)
}

/// Builds a header value the way Stripe does. Used by tests and local tooling.
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}
