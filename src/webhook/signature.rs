//! Webhook signature validation
//!
//! The gateway signs every webhook with HMAC over the request URL it
//! believes it called plus the payload, base64-encoded into the
//! `X-Twilio-Signature` header. Form payloads are signed over the URL with
//! the sorted parameters appended as `key||value`; JSON payloads are signed
//! over the URL followed by the exact raw body bytes. SHA1 is the default,
//! SHA256 is selected by the algorithm header.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Signature algorithm negotiated through the request header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Sha1,
    Sha256,
}

impl Algorithm {
    fn from_header(header: Option<&str>) -> Self {
        match header.map(str::to_ascii_uppercase).as_deref() {
            Some("SHA256") => Self::Sha256,
            _ => Self::Sha1,
        }
    }
}

/// Validates the signature of a form-encoded webhook.
///
/// The string to sign is the effective URL with every parameter appended
/// as `key` then `value`, parameters sorted by key. Always HMAC-SHA1, as
/// the provider's form scheme specifies.
#[must_use]
pub fn validate_form(
    url: &str,
    params: &[(String, String)],
    signature: &str,
    auth_token: &str,
) -> bool {
    if url.is_empty() || signature.is_empty() || auth_token.is_empty() {
        debug!(
            url_present = !url.is_empty(),
            signature_present = !signature.is_empty(),
            "Missing form signature material"
        );
        return false;
    }

    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut data = String::from(url);
    for (key, value) in sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let computed = b64_hmac(data.as_bytes(), auth_token, Algorithm::Sha1);
    constant_time_eq(&computed, signature)
}

/// Validates the signature of a JSON webhook.
///
/// The string to sign is the effective URL followed by the exact raw body
/// bytes. `algorithm_header` comes from the provider's algorithm header and
/// defaults to SHA1.
#[must_use]
pub fn validate_json(
    url: &str,
    raw_body: &[u8],
    signature: &str,
    algorithm_header: Option<&str>,
    auth_token: &str,
) -> bool {
    if url.is_empty() || signature.is_empty() || auth_token.is_empty() {
        debug!(
            url_present = !url.is_empty(),
            signature_present = !signature.is_empty(),
            "Missing JSON signature material"
        );
        return false;
    }

    let mut data = Vec::with_capacity(url.len() + raw_body.len());
    data.extend_from_slice(url.as_bytes());
    data.extend_from_slice(raw_body);

    let algorithm = Algorithm::from_header(algorithm_header);
    let computed = b64_hmac(&data, auth_token, algorithm);
    constant_time_eq(&computed, signature)
}

fn b64_hmac(data: &[u8], key: &str, algorithm: Algorithm) -> String {
    let digest = match algorithm {
        Algorithm::Sha1 => HmacSha1::new_from_slice(key.as_bytes()).map(|mut mac| {
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }),
        Algorithm::Sha256 => HmacSha256::new_from_slice(key.as_bytes()).map(|mut mac| {
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }),
    };
    match digest {
        Ok(bytes) => BASE64.encode(bytes),
        // HMAC accepts keys of any length; treat the impossible as a mismatch.
        Err(_) => String::new(),
    }
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "test_auth_token";

    fn form_params() -> Vec<(String, String)> {
        vec![
            ("From".to_string(), "whatsapp:+573001234567".to_string()),
            ("Body".to_string(), "hola".to_string()),
            (
                "MessageSid".to_string(),
                "SMXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX1".to_string(),
            ),
        ]
    }

    fn sign_form(url: &str, params: &[(String, String)]) -> String {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort();
        let mut data = String::from(url);
        for (k, v) in sorted {
            data.push_str(k);
            data.push_str(v);
        }
        b64_hmac(data.as_bytes(), TOKEN, Algorithm::Sha1)
    }

    fn sign_json(url: &str, body: &[u8], algorithm: Algorithm) -> String {
        let mut data = url.as_bytes().to_vec();
        data.extend_from_slice(body);
        b64_hmac(&data, TOKEN, algorithm)
    }

    #[test]
    fn form_signature_valid() {
        let url = "https://example.com/webhook/whatsapp";
        let params = form_params();
        let signature = sign_form(url, &params);
        assert!(validate_form(url, &params, &signature, TOKEN));
    }

    #[test]
    fn form_signature_rejects_tampered_body() {
        let url = "https://example.com/webhook/whatsapp";
        let params = form_params();
        let signature = sign_form(url, &params);

        let mut tampered = params;
        tampered[1].1 = "hola!!".to_string();
        assert!(!validate_form(url, &tampered, &signature, TOKEN));
    }

    #[test]
    fn form_signature_order_independent() {
        let url = "https://example.com/webhook/whatsapp";
        let params = form_params();
        let signature = sign_form(url, &params);

        let mut reversed = params;
        reversed.reverse();
        assert!(validate_form(url, &reversed, &signature, TOKEN));
    }

    #[test]
    fn form_signature_rejects_missing_material() {
        let params = form_params();
        assert!(!validate_form("https://example.com/x", &params, "", TOKEN));
        assert!(!validate_form("", &params, "sig", TOKEN));
        assert!(!validate_form("https://example.com/x", &params, "sig", ""));
    }

    #[test]
    fn json_signature_valid_sha1() {
        let url = "https://example.com/webhook/whatsapp/json";
        let body = br#"{"From":"+573001234567","Body":"hola"}"#;
        let signature = sign_json(url, body, Algorithm::Sha1);
        assert!(validate_json(url, body, &signature, None, TOKEN));
    }

    #[test]
    fn json_signature_valid_sha256() {
        let url = "https://example.com/webhook/whatsapp/json";
        let body = br#"{"From":"+573001234567","Body":"hola"}"#;
        let signature = sign_json(url, body, Algorithm::Sha256);
        assert!(validate_json(url, body, &signature, Some("SHA256"), TOKEN));
        // Wrong algorithm header must not validate.
        assert!(!validate_json(url, body, &signature, None, TOKEN));
    }

    #[test]
    fn json_signature_rejects_tampered_body() {
        let url = "https://example.com/webhook/whatsapp/json";
        let body = br#"{"From":"+573001234567","Body":"hola"}"#;
        let signature = sign_json(url, body, Algorithm::Sha1);
        let tampered = br#"{"From":"+573001234567","Body":"HOLA"}"#;
        assert!(!validate_json(url, tampered, &signature, None, TOKEN));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("", ""));
    }
}
