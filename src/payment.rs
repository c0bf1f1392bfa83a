use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

use crate::models::{Order, PaymentSession};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body, both ways.
pub const SIGNATURE_HEADER: &str = "x-signature";

pub const PAYMENT_SUCCEEDED: &str = "succeeded";
pub const PAYMENT_FAILED: &str = "failed";

/// PaymentGateway
///
/// Starts hosted checkouts at the payment provider. The provider reports the outcome
/// asynchronously through the signed `/payment/callback` webhook.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout for `order`'s total. The customer is sent to
    /// `PaymentSession::payment_url` and returned to `return_url` afterwards.
    async fn create_checkout(
        &self,
        order: &Order,
        return_url: &str,
        callback_url: &str,
    ) -> Result<PaymentSession, String>;
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// verify_signature
///
/// Checks a hex signature against `body` in constant time. Malformed hex never verifies.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Debug, Serialize)]
struct CheckoutRequest<'a> {
    order_id: String,
    amount_cents: i64,
    currency: &'a str,
    return_url: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    payment_url: String,
    reference: String,
}

/// HttpPaymentGateway
///
/// Talks to the provider's REST API: `POST {base_url}/checkouts` with the API key as
/// bearer token and the body signed in `x-signature`.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, api_key: &str, secret: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret: secret.to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_checkout(
        &self,
        order: &Order,
        return_url: &str,
        callback_url: &str,
    ) -> Result<PaymentSession, String> {
        let body = serde_json::to_vec(&CheckoutRequest {
            order_id: order.id.to_string(),
            amount_cents: order.total_cents,
            currency: "EUR",
            return_url,
            callback_url,
        })
        .map_err(|e| e.to_string())?;
        let signature = sign_payload(&self.secret, &body)?;

        let response = self
            .client
            .post(format!("{}/checkouts", self.base_url))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| format!("payment provider unreachable: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(%status, order_id = %order.id, "checkout creation rejected");
            return Err(format!("payment provider returned {status}: {detail}"));
        }

        let checkout: CheckoutResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid payment provider response: {e}"))?;

        Ok(PaymentSession {
            payment_url: checkout.payment_url,
            reference: checkout.reference,
        })
    }
}

/// MockPaymentGateway
///
/// Deterministic gateway for tests: the reference is derived from the order id.
#[derive(Clone, Default)]
pub struct MockPaymentGateway {
    pub should_fail: bool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self { should_fail: false }
    }

    pub fn new_failing() -> Self {
        Self { should_fail: true }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout(
        &self,
        order: &Order,
        _return_url: &str,
        _callback_url: &str,
    ) -> Result<PaymentSession, String> {
        if self.should_fail {
            return Err("Mock Payment Error: Simulation requested".to_string());
        }
        let reference = format!("mock-{}", order.id);
        Ok(PaymentSession {
            payment_url: format!("http://localhost:4000/pay/{reference}"),
            reference,
        })
    }
}

pub type PaymentState = Arc<dyn PaymentGateway>;
