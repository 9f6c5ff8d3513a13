//! Outbound delivery
//!
//! Sends a validated reply through the gateway: text first for combined
//! replies, then each image sequentially with a short pacing delay. Every
//! individual send is retried with backoff; one image exhausting its
//! retries does not stop the remaining ones.

use super::MessagingGateway;
use crate::bot::reply::{ImageItem, StructuredReply};
use crate::config::{IMAGE_PACING_MS, MAX_BODY_CHARS, MAX_IMAGES_PER_REPLY};
use crate::utils::{retry_gateway_operation, truncate_graphemes};
use std::time::Duration;
use tracing::warn;

/// What happened to the individual sends of one reply
#[derive(Debug, Default, Clone, Copy)]
pub struct DeliveryReport {
    /// Sends accepted by the gateway
    pub delivered: usize,
    /// Sends that exhausted their retries
    pub failed: usize,
}

impl DeliveryReport {
    fn record(&mut self, ok: bool) {
        if ok {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Delivers a reply to `recipient`, item by item.
pub async fn deliver(
    gateway: &dyn MessagingGateway,
    recipient: &str,
    reply: &StructuredReply,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    match reply {
        StructuredReply::Text { message } => {
            report.record(send_text(gateway, recipient, message).await);
        }
        StructuredReply::Images { images } => {
            send_images(gateway, recipient, images, &mut report).await;
        }
        StructuredReply::Combined { message, images } => {
            report.record(send_text(gateway, recipient, message).await);
            tokio::time::sleep(Duration::from_millis(IMAGE_PACING_MS)).await;
            send_images(gateway, recipient, images, &mut report).await;
        }
    }
    report
}

/// Sends a one-off notice outside the normal reply flow, with retries.
/// Failures are logged and swallowed; a notice is best-effort.
pub async fn send_notice(gateway: &dyn MessagingGateway, recipient: &str, text: &str) {
    if !send_text(gateway, recipient, text).await {
        warn!(
            recipient = %crate::utils::mask_sender(recipient),
            "Failed to deliver notice"
        );
    }
}

async fn send_text(gateway: &dyn MessagingGateway, recipient: &str, body: &str) -> bool {
    let body = truncate_graphemes(body, MAX_BODY_CHARS);
    retry_gateway_operation(|| async {
        gateway
            .send_text(recipient, &body)
            .await
            .map_err(|e| anyhow::anyhow!("text send error: {e}"))
    })
    .await
    .is_ok()
}

async fn send_images(
    gateway: &dyn MessagingGateway,
    recipient: &str,
    images: &[ImageItem],
    report: &mut DeliveryReport,
) {
    let images = &images[..images.len().min(MAX_IMAGES_PER_REPLY)];
    for (i, image) in images.iter().enumerate() {
        let sent = retry_gateway_operation(|| async {
            gateway
                .send_image(recipient, &image.url, &image.caption)
                .await
                .map_err(|e| anyhow::anyhow!("image send error: {e}"))
        })
        .await
        .is_ok();
        if !sent {
            warn!(url = %image.url, "Image delivery gave up, continuing with the rest");
        }
        report.record(sent);
        if i + 1 < images.len() {
            tokio::time::sleep(Duration::from_millis(IMAGE_PACING_MS)).await;
        }
    }
}
