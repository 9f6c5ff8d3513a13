//! Utility functions: sender masking, MSISDN normalization, text truncation,
//! and the shared gateway retry wrapper.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Masks all digits of a sender identity except the last four.
///
/// # Examples
///
/// ```
/// use pavebot::utils::mask_sender;
/// assert_eq!(mask_sender("+573001234567"), "•••••••••4567");
/// ```
#[must_use]
pub fn mask_sender(sender: &str) -> String {
    let chars: Vec<char> = sender.chars().collect();
    if chars.len() <= 4 {
        return sender.to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "•".repeat(chars.len() - 4), tail)
}

/// Normalizes a phone number into MSISDN form.
///
/// Strips the `whatsapp:` channel prefix and whitespace, and prepends `+`
/// when missing. Returns an empty string for empty input.
#[must_use]
pub fn normalize_msisdn(raw: &str) -> String {
    let mut n = raw.trim();
    if let Some(rest) = n.strip_prefix("whatsapp:") {
        n = rest;
    }
    let n: String = n.chars().filter(|c| !c.is_whitespace()).collect();
    if n.is_empty() || n.starts_with('+') {
        n
    } else {
        format!("+{n}")
    }
}

/// Returns true when the string is an http(s) URL.
#[must_use]
pub fn is_http_url(u: &str) -> bool {
    u.starts_with("http://") || u.starts_with("https://")
}

/// Safely truncates a string to a maximum grapheme count.
///
/// Unicode-safe: never splits a grapheme cluster, so emoji and combining
/// characters survive intact.
#[must_use]
pub fn truncate_graphemes(s: &str, max: usize) -> String {
    let mut out = String::new();
    for (i, g) in s.graphemes(true).enumerate() {
        if i >= max {
            return out;
        }
        out.push_str(g);
    }
    out
}

/// Retry a messaging gateway operation with exponential backoff.
///
/// The strategy uses jitter to avoid thundering herd:
/// initial delay 400ms, max delay 4s, 3 attempts
/// (see the `GATEWAY_*` constants in `config.rs`).
///
/// # Errors
///
/// Returns the last error if all attempts fail.
pub async fn retry_gateway_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{GATEWAY_INITIAL_BACKOFF_MS, GATEWAY_MAX_BACKOFF_MS, GATEWAY_MAX_RETRIES};

    let retry_strategy = ExponentialBackoff::from_millis(GATEWAY_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(GATEWAY_MAX_BACKOFF_MS))
        .map(jitter)
        .take(GATEWAY_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Gateway operation failed after {} attempts: {}",
            GATEWAY_MAX_RETRIES, e
        );
        e
    })
}
