//! Structured reply contract and validation.
//!
//! Every reply leaving the orchestrator goes through [`validate`]: the
//! model's raw output is never trusted. Validation repairs rather than
//! rejects, and is a fixed point: running it on its own output changes
//! nothing.

use crate::config::MAX_IMAGES_PER_REPLY;
use crate::utils::is_http_url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Default prompt substituted for a missing or empty message
pub const DEFAULT_PROMPT: &str = "¿En qué puedo ayudarte?";
/// Reply used when the model output is not a recognizable structure
pub const MISUNDERSTOOD: &str = "Perdón, no entendí. ¿Puedes repetirlo?";

/// One image with its caption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    /// Image URL, http(s) only after validation
    pub url: String,
    /// Caption shown with the image, may be empty
    #[serde(default)]
    pub caption: String,
}

/// The structured reply the pipeline delivers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StructuredReply {
    /// Text only
    Text {
        /// Message body
        #[serde(rename = "text_message")]
        message: String,
    },
    /// Images only
    Images {
        /// At least one validated image
        images: Vec<ImageItem>,
    },
    /// Text followed by images
    Combined {
        /// Message body, sent first
        #[serde(rename = "text_message")]
        message: String,
        /// At least one validated image
        images: Vec<ImageItem>,
    },
}

impl StructuredReply {
    /// Convenience constructor for a text reply
    #[must_use]
    pub fn text(message: impl Into<String>) -> Self {
        Self::Text {
            message: message.into(),
        }
    }
}

/// Validates and repairs arbitrary structured data into a [`StructuredReply`].
///
/// Rules, in order: unknown shape or tag coerces to `Text` with a generic
/// prompt; `text`/`combined` require a non-empty trimmed message; image
/// lists are filtered to http(s) URLs and capped; an empty filtered list
/// downgrades the tag to `text`. Invalid image entries are dropped and
/// reported once each, never silently duplicated into logs.
#[must_use]
pub fn validate(raw: &Value) -> StructuredReply {
    let Some(obj) = raw.as_object() else {
        return StructuredReply::text(MISUNDERSTOOD);
    };

    let tag = obj.get("type").and_then(Value::as_str).unwrap_or("");
    let message = obj
        .get("text_message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty());

    match tag {
        "text" => StructuredReply::text(message.unwrap_or(DEFAULT_PROMPT)),
        "images" => {
            let images = clean_images(obj.get("images"));
            if images.is_empty() {
                StructuredReply::text(message.unwrap_or(DEFAULT_PROMPT))
            } else {
                StructuredReply::Images { images }
            }
        }
        "combined" => {
            let images = clean_images(obj.get("images"));
            let message = message.unwrap_or(DEFAULT_PROMPT).to_string();
            if images.is_empty() {
                StructuredReply::Text { message }
            } else {
                StructuredReply::Combined { message, images }
            }
        }
        _ => StructuredReply::text(message.unwrap_or(MISUNDERSTOOD)),
    }
}

/// Filters an image list down to well-formed entries, capped in length.
fn clean_images(raw: Option<&Value>) -> Vec<ImageItem> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut clean = Vec::new();
    for item in items {
        let url = item.get("url").and_then(Value::as_str).unwrap_or("");
        if is_http_url(url) {
            if clean.len() < MAX_IMAGES_PER_REPLY {
                clean.push(ImageItem {
                    url: url.to_string(),
                    caption: item
                        .get("caption")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                });
            } else {
                debug!(url, "Dropping image beyond the per-reply cap");
            }
        } else {
            debug!(?item, "Dropping image entry without a valid http(s) URL");
        }
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn passes_valid_text_through() {
        let raw = json!({"type": "text", "text_message": "¡Hola!"});
        assert_eq!(validate(&raw), StructuredReply::text("¡Hola!"));
    }

    #[test]
    fn coerces_unknown_tag_to_text() {
        let raw = json!({"type": "carousel", "cards": []});
        assert_eq!(validate(&raw), StructuredReply::text(MISUNDERSTOOD));
    }

    #[test]
    fn coerces_non_object_to_text() {
        assert_eq!(validate(&json!(null)), StructuredReply::text(MISUNDERSTOOD));
        assert_eq!(
            validate(&json!("hola que tal")),
            StructuredReply::text(MISUNDERSTOOD)
        );
    }

    #[test]
    fn substitutes_default_for_blank_message() {
        let raw = json!({"type": "text", "text_message": "   "});
        assert_eq!(validate(&raw), StructuredReply::text(DEFAULT_PROMPT));
    }

    #[test]
    fn empty_image_list_downgrades_to_text() {
        let raw = json!({"type": "images", "images": []});
        assert_eq!(validate(&raw), StructuredReply::text(DEFAULT_PROMPT));
    }

    #[test]
    fn filters_invalid_urls_and_keeps_valid() {
        let raw = json!({"type": "images", "images": [
            {"url": "ftp://bad/menu.jpg", "caption": "no"},
            {"url": "https://cdn.example.com/menu.jpg", "caption": "Menú"},
            {"caption": "sin url"}
        ]});
        let reply = validate(&raw);
        assert_eq!(
            reply,
            StructuredReply::Images {
                images: vec![ImageItem {
                    url: "https://cdn.example.com/menu.jpg".to_string(),
                    caption: "Menú".to_string(),
                }],
            }
        );
    }

    #[test]
    fn combined_with_only_bad_images_becomes_text() {
        let raw = json!({"type": "combined", "text_message": "Aquí tienes:", "images": [
            {"url": "not-a-url"}
        ]});
        assert_eq!(validate(&raw), StructuredReply::text("Aquí tienes:"));
    }

    #[test]
    fn caps_image_list_length() {
        let images: Vec<_> = (0..9)
            .map(|i| json!({"url": format!("https://cdn.example.com/{i}.jpg")}))
            .collect();
        let raw = json!({"type": "images", "images": images});
        match validate(&raw) {
            StructuredReply::Images { images } => assert_eq!(images.len(), MAX_IMAGES_PER_REPLY),
            other => panic!("expected images, got {other:?}"),
        }
    }

    #[test]
    fn validation_is_a_fixed_point() {
        let cases = vec![
            json!({"type": "combined", "text_message": "Menú:", "images": [
                {"url": "https://cdn.example.com/a.jpg", "caption": ""},
                {"url": "bogus"},
            ]}),
            json!({"type": "images", "images": []}),
            json!({"type": "text", "text_message": ""}),
            json!({"bad": true}),
        ];
        for raw in cases {
            let once = validate(&raw);
            let Ok(serialized) = serde_json::to_value(&once) else {
                panic!("reply must serialize");
            };
            let twice = validate(&serialized);
            assert_eq!(once, twice, "validator must be idempotent for {raw}");
        }
    }
}
