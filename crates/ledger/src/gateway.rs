//! Payment gateway client.
//!
//! The gateway is the verification oracle for web payments: we query a
//! payment by id and read back its status and settled amount, and we ask
//! it to reverse a charge on cancellation. Timeouts are bounded; a timeout
//! is reported as `VerificationUnavailable`, never treated as success.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{LedgerError, LedgerResult};

/// Payment state as reported by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    pub status: String,
    pub amount: GatewayAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayAmount {
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayErrorBody {
    message: Option<String>,
    error: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Query a payment by its identifier.
    async fn fetch_payment(&self, payment_id: &str) -> LedgerResult<GatewayPayment>;

    /// Reverse a charge. Errors are surfaced verbatim; the local ledger is
    /// only mutated after this succeeds.
    async fn cancel_payment(&self, payment_id: &str, reason: &str) -> LedgerResult<()>;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for std::sync::Arc<G> {
    async fn fetch_payment(&self, payment_id: &str) -> LedgerResult<GatewayPayment> {
        (**self).fetch_payment(payment_id).await
    }

    async fn cancel_payment(&self, payment_id: &str, reason: &str) -> LedgerResult<()> {
        (**self).cancel_payment(payment_id, reason).await
    }
}

/// HTTP implementation against the gateway's REST API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
}

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>, api_secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_secret: api_secret.into(),
        }
    }

    fn unavailable(err: reqwest::Error) -> LedgerError {
        LedgerError::VerificationUnavailable(err.to_string())
    }

    async fn rejection(response: reqwest::Response) -> LedgerError {
        let status = response.status();
        let message = match response.json::<GatewayErrorBody>().await {
            Ok(body) => body
                .message
                .or(body.error)
                .unwrap_or_else(|| format!("gateway returned {status}")),
            Err(_) => format!("gateway returned {status}"),
        };
        LedgerError::GatewayRejected(message)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn fetch_payment(&self, payment_id: &str) -> LedgerResult<GatewayPayment> {
        let url = format!("{}/payments/{}", self.base_url, payment_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_secret)
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        response
            .json::<GatewayPayment>()
            .await
            .map_err(|e| LedgerError::VerificationUnavailable(e.to_string()))
    }

    async fn cancel_payment(&self, payment_id: &str, reason: &str) -> LedgerResult<()> {
        let url = format!("{}/payments/{}/cancel", self.base_url, payment_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_secret)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            let err = Self::rejection(response).await;
            tracing::warn!(payment_id = %payment_id, error = %err, "Gateway refused cancellation");
            return Err(err);
        }

        tracing::info!(payment_id = %payment_id, "Gateway cancelled payment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn fetch_payment_parses_gateway_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/payments/pay_123")
            .with_status(200)
            .with_body(r#"{"status":"PAID","amount":{"total":22000}}"#)
            .create_async()
            .await;

        let gateway = HttpPaymentGateway::new(server.url(), "secret");
        let payment = gateway.fetch_payment("pay_123").await.unwrap();

        assert_eq!(payment.status, "PAID");
        assert_eq!(payment.amount.total, 22_000);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn gateway_rejection_surfaces_its_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/payments/pay_999/cancel")
            .with_status(400)
            .with_body(r#"{"message":"already fully cancelled"}"#)
            .create_async()
            .await;

        let gateway = HttpPaymentGateway::new(server.url(), "secret");
        let err = gateway.cancel_payment("pay_999", "test").await.unwrap_err();

        match err {
            LedgerError::GatewayRejected(msg) => assert_eq!(msg, "already fully cancelled"),
            other => panic!("expected GatewayRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_success_body_is_unavailable_not_paid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/payments/pay_bad")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let gateway = HttpPaymentGateway::new(server.url(), "secret");
        let err = gateway.fetch_payment("pay_bad").await.unwrap_err();
        assert!(matches!(err, LedgerError::VerificationUnavailable(_)));
    }
}
