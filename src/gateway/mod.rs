//! Messaging gateway
//!
//! Outbound side of the conversation: a narrow trait over the provider's
//! send operations plus the Twilio WhatsApp implementation.

pub mod delivery;

use crate::config::{Settings, OUTBOUND_HTTP_TIMEOUT_SECS};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from the messaging gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure
    #[error("gateway request failed: {0}")]
    Network(String),
    /// The provider rejected the message
    #[error("gateway rejected message: {status} - {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
}

/// Outbound operations the pipeline needs from the provider
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Sends a text message. Returns the provider message SID.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` on transport failure or provider rejection.
    async fn send_text(&self, to: &str, body: &str) -> Result<String, GatewayError>;

    /// Sends one image with an optional caption. Returns the provider SID.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` on transport failure or provider rejection.
    async fn send_image(&self, to: &str, url: &str, caption: &str) -> Result<String, GatewayError>;
}

/// Prefixes a number for the WhatsApp channel.
fn wa(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

#[derive(Debug, Deserialize)]
struct MessageCreated {
    #[serde(default)]
    sid: String,
}

/// Twilio WhatsApp gateway over the Messages REST API
pub struct TwilioGateway {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioGateway {
    /// Creates a gateway from settings.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(OUTBOUND_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            account_sid: settings.twilio_account_sid.clone(),
            auth_token: settings.twilio_auth_token.clone(),
            from_number: settings.twilio_whatsapp_number.clone(),
        }
    }

    async fn create_message(&self, params: &[(&str, &str)]) -> Result<String, GatewayError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(params)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: MessageCreated = response
            .json()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        debug!(sid = %created.sid, "Gateway accepted message");
        Ok(created.sid)
    }
}

#[async_trait]
impl MessagingGateway for TwilioGateway {
    async fn send_text(&self, to: &str, body: &str) -> Result<String, GatewayError> {
        let from = wa(&self.from_number);
        let to = wa(to);
        self.create_message(&[("From", &from), ("To", &to), ("Body", body)])
            .await
    }

    async fn send_image(&self, to: &str, url: &str, caption: &str) -> Result<String, GatewayError> {
        let from = wa(&self.from_number);
        let to = wa(to);
        let mut params = vec![("From", from.as_str()), ("To", to.as_str()), ("MediaUrl", url)];
        if !caption.is_empty() {
            params.push(("Body", caption));
        }
        self.create_message(&params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wa_prefixing() {
        assert_eq!(wa("+1000"), "whatsapp:+1000");
        assert_eq!(wa("whatsapp:+1000"), "whatsapp:+1000");
    }
}
