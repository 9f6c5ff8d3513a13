//! Per-message processing pipeline
//!
//! Intake → idempotency claim → rate limit → orchestration under a
//! deadline → delivery. Every stage can short-circuit into a terminal
//! outcome; the sender always gets either the reply or a short notice,
//! never a raw error.

use crate::bot::Orchestrator;
use crate::config::PIPELINE_DEADLINE_SECS;
use crate::gateway::{delivery, MessagingGateway};
use crate::store::{Claim, IdempotencyLedger, RateDecision, RateLimiter};
use crate::utils::mask_sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Notice for a throttled sender
pub const THROTTLE_NOTICE: &str = "Demasiados mensajes. Espera un momento.";
/// Notice when the overall deadline expired
pub const DELAY_NOTICE: &str = "Estamos experimentando demoras. Intenta de nuevo.";
/// Notice when delivery of the reply itself failed
pub const ERROR_NOTICE: &str = "Ocurrió un error. Intenta de nuevo en unos momentos.";

/// One normalized inbound message
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    /// Normalized sender identity
    pub sender: String,
    /// Message text, may be empty for non-text payloads
    pub body: String,
    /// Provider message SID, when supplied
    pub message_sid: Option<String>,
}

/// Terminal outcome of handling one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply (or part of it) reached the gateway
    Delivered,
    /// Message SID was already claimed, dropped silently
    Duplicate,
    /// Sender over the rate limit, notified
    Throttled,
    /// Overall deadline expired, sender notified
    TimedOut,
    /// Reply could not be delivered at all
    Failed,
}

/// The assembled message pipeline
pub struct Pipeline {
    idempotency: Arc<IdempotencyLedger>,
    limiter: Arc<RateLimiter>,
    orchestrator: Arc<Orchestrator>,
    gateway: Arc<dyn MessagingGateway>,
}

impl Pipeline {
    /// Wires the pipeline from its injected dependencies.
    #[must_use]
    pub fn new(
        idempotency: Arc<IdempotencyLedger>,
        limiter: Arc<RateLimiter>,
        orchestrator: Arc<Orchestrator>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Self {
        Self {
            idempotency,
            limiter,
            orchestrator,
            gateway,
        }
    }

    /// Handles one inbound message to completion.
    pub async fn handle_message(&self, envelope: InboundEnvelope) -> Outcome {
        let masked = mask_sender(&envelope.sender);
        let sid = envelope.message_sid.as_deref().unwrap_or("N/A");

        if let Some(message_sid) = &envelope.message_sid {
            let claim = self
                .idempotency
                .claim(message_sid, &envelope.sender, &envelope.body)
                .await;
            if claim == Claim::Duplicate {
                info!("Duplicate ignored | sid={message_sid} | from={masked}");
                return Outcome::Duplicate;
            }
        } else {
            // Without a SID the best we can offer is at-least-once.
            debug!("No message SID, processing without idempotency | from={masked}");
        }

        if self.limiter.check_and_increment(&envelope.sender).await == RateDecision::Throttled {
            delivery::send_notice(self.gateway.as_ref(), &envelope.sender, THROTTLE_NOTICE).await;
            return Outcome::Throttled;
        }

        let body = if envelope.body.trim().is_empty() {
            "[non-text]"
        } else {
            envelope.body.trim()
        };

        let deadline = Duration::from_secs(PIPELINE_DEADLINE_SECS);
        let reply = match timeout(deadline, self.orchestrator.respond(&envelope.sender, body)).await
        {
            Ok(reply) => reply,
            Err(_) => {
                warn!("Deadline exceeded | from={masked} | sid={sid}");
                delivery::send_notice(self.gateway.as_ref(), &envelope.sender, DELAY_NOTICE).await;
                return Outcome::TimedOut;
            }
        };

        let report = delivery::deliver(self.gateway.as_ref(), &envelope.sender, &reply).await;
        if report.delivered == 0 && report.failed > 0 {
            error!("Delivery failed | from={masked} | sid={sid}");
            delivery::send_notice(self.gateway.as_ref(), &envelope.sender, ERROR_NOTICE).await;
            return Outcome::Failed;
        }
        if report.failed > 0 {
            warn!(
                delivered = report.delivered,
                failed = report.failed,
                "Partial delivery | from={masked} | sid={sid}"
            );
        }

        info!("Delivered | from={masked} | sid={sid}");
        Outcome::Delivered
    }
}
