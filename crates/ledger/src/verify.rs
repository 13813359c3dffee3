//! Payment verification, one implementation per payment channel.
//!
//! Both channels produce a [`VerifiedPayment`] consumed by the single
//! charge path in [`crate::charger`]; nothing is ever credited unless
//! verification fully succeeds.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use salonpass_shared::Product;

use crate::error::{LedgerError, LedgerResult};
use crate::gateway::PaymentGateway;
use crate::types::PaymentChannel;

/// A payment the external authority has confirmed as settled.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub payment_id: String,
    pub channel: PaymentChannel,
    pub product: Product,
    pub amount: i64,
}

/// Verifies web payments against the gateway's query-by-id endpoint.
pub struct GatewayVerifier<G> {
    gateway: G,
}

impl<G: PaymentGateway> GatewayVerifier<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }

    /// Confirm the payment is `PAID` for exactly the catalog price of
    /// `product`. Amount mismatches are fatal; there is no tolerance.
    pub async fn verify(&self, payment_id: &str, product: Product) -> LedgerResult<VerifiedPayment> {
        if payment_id.trim().is_empty() {
            return Err(LedgerError::Validation("paymentId is required".into()));
        }

        let payment = self.gateway.fetch_payment(payment_id).await?;

        if payment.status != "PAID" {
            tracing::warn!(
                payment_id = %payment_id,
                status = %payment.status,
                "Rejecting unpaid payment"
            );
            return Err(LedgerError::NotPaid(payment.status));
        }

        if payment.amount.total != product.price_krw {
            tracing::error!(
                payment_id = %payment_id,
                expected = product.price_krw,
                actual = payment.amount.total,
                "Payment amount mismatch"
            );
            return Err(LedgerError::AmountMismatch {
                expected: product.price_krw,
                actual: payment.amount.total,
            });
        }

        Ok(VerifiedPayment {
            payment_id: payment_id.to_string(),
            channel: PaymentChannel::Web,
            product,
            amount: payment.amount.total,
        })
    }
}

/// App Store receipt status for "sandbox receipt sent to production".
const APPLE_STATUS_SANDBOX_RECEIPT: i64 = 21007;

#[derive(Debug, Deserialize)]
struct AppleVerifyResponse {
    status: i64,
    receipt: Option<AppleReceipt>,
}

#[derive(Debug, Deserialize)]
struct AppleReceipt {
    #[serde(default)]
    in_app: Vec<AppleInAppTransaction>,
}

#[derive(Debug, Deserialize)]
struct AppleInAppTransaction {
    product_id: String,
    transaction_id: String,
    #[serde(default)]
    purchase_date_ms: String,
}

/// Verifies App Store receipts.
///
/// Production endpoint first; when production reports a sandbox receipt
/// (status 21007) it retries once against the sandbox endpoint. That is
/// the only retry — every other failure rejects the receipt.
pub struct AppleReceiptVerifier {
    client: reqwest::Client,
    production_url: String,
    sandbox_url: String,
    shared_secret: String,
}

const APPLE_TIMEOUT: Duration = Duration::from_secs(10);

impl AppleReceiptVerifier {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self::with_endpoints(
            "https://buy.itunes.apple.com/verifyReceipt",
            "https://sandbox.itunes.apple.com/verifyReceipt",
            shared_secret,
        )
    }

    pub fn with_endpoints(
        production_url: impl Into<String>,
        sandbox_url: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(APPLE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            production_url: production_url.into(),
            sandbox_url: sandbox_url.into(),
            shared_secret: shared_secret.into(),
        }
    }

    /// Verify a receipt for `product` and return the settled payment.
    ///
    /// The newest in-app transaction id for the product becomes the
    /// payment id; a receipt without one gets a locally generated id.
    pub async fn verify(&self, receipt: &str, product: Product) -> LedgerResult<VerifiedPayment> {
        if receipt.is_empty() {
            return Err(LedgerError::ReceiptInvalid("receipt is required".into()));
        }

        let mut response = self.post_receipt(&self.production_url, receipt).await?;

        if response.status == APPLE_STATUS_SANDBOX_RECEIPT {
            tracing::info!("Sandbox receipt detected, retrying against sandbox endpoint");
            response = self.post_receipt(&self.sandbox_url, receipt).await?;
        }

        if response.status != 0 {
            tracing::warn!(apple_status = response.status, "Receipt verification failed");
            return Err(LedgerError::ReceiptInvalid(format!(
                "verification failed with status {}",
                response.status
            )));
        }

        let payment_id = response
            .receipt
            .map(|r| Self::latest_transaction_id(&r.in_app, product.key))
            .unwrap_or(None)
            .unwrap_or_else(|| format!("iap_{}", Uuid::new_v4()));

        Ok(VerifiedPayment {
            payment_id,
            channel: PaymentChannel::AppStore,
            product,
            amount: product.price_krw,
        })
    }

    async fn post_receipt(&self, url: &str, receipt: &str) -> LedgerResult<AppleVerifyResponse> {
        let response = self
            .client
            .post(url)
            .json(&json!({
                "receipt-data": receipt,
                "password": self.shared_secret,
                "exclude-old-transactions": true,
            }))
            .send()
            .await
            .map_err(|e| LedgerError::VerificationUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LedgerError::VerificationUnavailable(format!(
                "receipt endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<AppleVerifyResponse>()
            .await
            .map_err(|e| LedgerError::ReceiptInvalid(format!("malformed response: {e}")))
    }

    fn latest_transaction_id(
        transactions: &[AppleInAppTransaction],
        store_key: &str,
    ) -> Option<String> {
        transactions
            .iter()
            .filter(|t| {
                Product::by_store_product_id(&t.product_id)
                    .map(|p| p.key == store_key)
                    .unwrap_or(false)
            })
            .max_by_key(|t| t.purchase_date_ms.parse::<i64>().unwrap_or(0))
            .map(|t| t.transaction_id.clone())
    }
}
