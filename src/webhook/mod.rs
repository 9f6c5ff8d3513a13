//! Webhook intake
//!
//! HTTP boundary of the pipeline. Both endpoints verify the gateway
//! signature against the raw request before parsing anything, normalize
//! the sender identity, and hand the envelope off to an independent task.
//! A rejected request has no side effects.

pub mod signature;

use crate::config::MAX_INBOUND_CHARS;
use crate::pipeline::{InboundEnvelope, Pipeline};
use crate::utils::{normalize_msisdn, truncate_graphemes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Shared state for the webhook handlers
pub struct WebhookState {
    /// The per-message processing pipeline
    pub pipeline: Arc<Pipeline>,
    /// Webhook signing key
    pub auth_token: String,
}

/// Builds the webhook router.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook/whatsapp", post(inbound_form))
        .route("/webhook/whatsapp/json", post(inbound_json))
        .with_state(state)
}

/// JSON webhook payload
#[derive(Debug, Deserialize)]
struct WebhookJsonIn {
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "Body", default)]
    body: Option<String>,
    #[serde(rename = "MessageSid", default)]
    message_sid: Option<String>,
    #[serde(rename = "SmsMessageSid", default)]
    sms_message_sid: Option<String>,
}

/// Reconstructs the URL the gateway signed, honoring proxy headers.
fn effective_url(headers: &HeaderMap, uri: &Uri) -> String {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .and_then(|v| v.to_str().ok())
        .or_else(|| headers.get(header::HOST).and_then(|v| v.to_str().ok()))
        .unwrap_or("");
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{proto}://{host}{path_and_query}")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn reject(status: StatusCode, detail: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "detail": detail })))
}

fn accept(
    state: &WebhookState,
    sender: String,
    body: String,
    message_sid: Option<String>,
) -> (StatusCode, Json<Value>) {
    let envelope = InboundEnvelope {
        sender,
        body: truncate_graphemes(body.trim(), MAX_INBOUND_CHARS),
        message_sid,
    };
    let pipeline = Arc::clone(&state.pipeline);
    // Each message is handled as an independent concurrent task; the
    // webhook answers immediately.
    tokio::spawn(async move {
        let _outcome = pipeline.handle_message(envelope).await;
    });
    (StatusCode::OK, Json(json!({ "status": "accepted" })))
}

async fn inbound_form(
    State(state): State<Arc<WebhookState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let signature = header_str(&headers, "x-twilio-signature").unwrap_or("");
    let url = effective_url(&headers, &uri);

    let Ok(params) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&body) else {
        return reject(StatusCode::BAD_REQUEST, "Malformed form body");
    };

    if !signature::validate_form(&url, &params, signature, &state.auth_token) {
        info!(
            url = %url,
            signature_present = !signature.is_empty(),
            "Webhook signature invalid (form)"
        );
        return reject(StatusCode::FORBIDDEN, "Invalid signature");
    }

    let field = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let sender = normalize_msisdn(&field("From").unwrap_or_default());
    if sender.is_empty() {
        return reject(StatusCode::BAD_REQUEST, "Número inválido");
    }

    let message_sid = field("MessageSid").or_else(|| field("SmsMessageSid"));
    accept(&state, sender, field("Body").unwrap_or_default(), message_sid)
}

async fn inbound_json(
    State(state): State<Arc<WebhookState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let signature = header_str(&headers, "x-twilio-signature").unwrap_or("");
    let algorithm = header_str(&headers, "x-twilio-signature-algorithm");
    let url = effective_url(&headers, &uri);

    // The signature covers the exact raw bytes; verify before parsing.
    if !signature::validate_json(&url, &body, signature, algorithm, &state.auth_token) {
        info!(
            url = %url,
            signature_present = !signature.is_empty(),
            "Webhook signature invalid (json)"
        );
        return reject(StatusCode::FORBIDDEN, "Invalid signature");
    }

    let Ok(payload) = serde_json::from_slice::<WebhookJsonIn>(&body) else {
        return reject(StatusCode::BAD_REQUEST, "Malformed JSON body");
    };

    let sender = normalize_msisdn(&payload.from);
    if sender.is_empty() {
        return reject(StatusCode::BAD_REQUEST, "Número inválido");
    }

    let message_sid = payload.message_sid.or(payload.sms_message_sid);
    accept(
        &state,
        sender,
        payload.body.unwrap_or_default(),
        message_sid,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_url_prefers_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", "https".parse().expect("header"));
        headers.insert("x-forwarded-host", "bot.example.com".parse().expect("header"));
        headers.insert(header::HOST, "10.0.0.5:8080".parse().expect("header"));
        let uri: Uri = "/webhook/whatsapp?x=1".parse().expect("uri");

        assert_eq!(
            effective_url(&headers, &uri),
            "https://bot.example.com/webhook/whatsapp?x=1"
        );
    }

    #[test]
    fn effective_url_falls_back_to_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "bot.example.com".parse().expect("header"));
        let uri: Uri = "/webhook/whatsapp".parse().expect("uri");

        assert_eq!(
            effective_url(&headers, &uri),
            "http://bot.example.com/webhook/whatsapp"
        );
    }
}
