//! Expiry email delivery.
//!
//! Sends through the Resend HTTP API. Without `RESEND_API_KEY` the service
//! is disabled and sends are skipped, not failed; send failures are
//! reported to the caller's counters and never raised.

use std::time::Duration;

use serde_json::json;

/// Result of one email send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailOutcome {
    Sent,
    Failed,
    /// Service disabled or the account has no address on file.
    Skipped,
}

#[derive(Clone)]
pub struct ExpiryEmailService {
    client: reqwest::Client,
    api_key: Option<String>,
    from: String,
    endpoint: String,
}

const EMAIL_TIMEOUT: Duration = Duration::from_secs(10);
const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

impl ExpiryEmailService {
    pub fn from_env() -> Self {
        let api_key = std::env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty());
        let from = std::env::var("EMAIL_FROM")
            .unwrap_or_else(|_| "no-reply@salonpass.app".to_string());
        Self::with_endpoint(api_key, from, RESEND_ENDPOINT)
    }

    pub fn with_endpoint(
        api_key: Option<String>,
        from: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(EMAIL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            from: from.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Disabled test/dev instance; every send is skipped.
    pub fn disabled() -> Self {
        Self::with_endpoint(None, "no-reply@salonpass.app", RESEND_ENDPOINT)
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// "Your plan expires in N days" warning.
    pub async fn send_plan_expiring(
        &self,
        to: &str,
        recipient_name: Option<&str>,
        plan_name: &str,
        days_remaining: i64,
        token_balance: i64,
    ) -> EmailOutcome {
        let subject = format!("Your {plan_name} plan expires in {days_remaining} day(s)");
        let html = format!(
            "<h2>Hello, {}</h2>\
             <p>Your {plan_name} plan expires in {days_remaining} day(s). Your remaining \
             {token_balance} tokens will be lost when it does.</p>\
             <p>Renew your plan to keep using the service without interruption.</p>",
            recipient_name.unwrap_or("there"),
        );
        self.send(to, &subject, &html).await
    }

    /// "Your plan has expired" notice sent at downgrade time.
    pub async fn send_plan_expired(
        &self,
        to: &str,
        recipient_name: Option<&str>,
        plan_name: &str,
        lost_tokens: i64,
    ) -> EmailOutcome {
        let subject = format!("Your {plan_name} plan has expired");
        let html = format!(
            "<h2>Hello, {}</h2>\
             <p>Your {plan_name} plan has expired and your account was moved to the free \
             plan. {lost_tokens} tokens were cleared.</p>\
             <p>Purchase a plan to continue where you left off.</p>",
            recipient_name.unwrap_or("there"),
        );
        self.send(to, &subject, &html).await
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> EmailOutcome {
        let Some(api_key) = &self.api_key else {
            tracing::debug!(to = %to, "Email service disabled, skipping send");
            return EmailOutcome::Skipped;
        };

        let result = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Email sent");
                EmailOutcome::Sent
            }
            Ok(response) => {
                tracing::error!(
                    to = %to,
                    status = %response.status(),
                    "Email provider rejected the send"
                );
                EmailOutcome::Failed
            }
            Err(e) => {
                tracing::error!(to = %to, error = %e, "Email send failed");
                EmailOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn disabled_service_skips_without_network() {
        let service = ExpiryEmailService::disabled();
        assert!(!service.is_enabled());
        let outcome = service
            .send_plan_expiring("owner@salon.example", None, "Pro", 3, 1_200)
            .await;
        assert_eq!(outcome, EmailOutcome::Skipped);
    }

    #[tokio::test]
    async fn send_reports_provider_rejection_as_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/emails")
            .with_status(422)
            .with_body(r#"{"message":"invalid from address"}"#)
            .create_async()
            .await;

        let service = ExpiryEmailService::with_endpoint(
            Some("re_test".into()),
            "no-reply@salonpass.app",
            format!("{}/emails", server.url()),
        );
        let outcome = service
            .send_plan_expired("owner@salon.example", Some("Kim"), "Basic", 500)
            .await;
        assert_eq!(outcome, EmailOutcome::Failed);
    }

    #[tokio::test]
    async fn send_succeeds_against_provider() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .with_status(200)
            .with_body(r#"{"id":"email_1"}"#)
            .create_async()
            .await;

        let service = ExpiryEmailService::with_endpoint(
            Some("re_test".into()),
            "no-reply@salonpass.app",
            format!("{}/emails", server.url()),
        );
        let outcome = service
            .send_plan_expiring("owner@salon.example", Some("Kim"), "Business", 7, 25_000)
            .await;
        assert_eq!(outcome, EmailOutcome::Sent);
        mock.assert_async().await;
    }
}
