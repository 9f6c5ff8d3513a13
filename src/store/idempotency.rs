//! Idempotency ledger
//!
//! Records every processed provider message SID so a redelivered message is
//! detected and dropped. The first claim for a SID wins; all later claims
//! for the same SID observe the existing record. Entries expire after a
//! retention window to keep the ledger small.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First time this SID was seen; the caller owns processing
    Accepted,
    /// SID already claimed; the message must be dropped
    Duplicate,
}

/// Snapshot stored for each claimed message
#[derive(Debug, Clone)]
struct ClaimRecord {
    sender: String,
    body: String,
    received_at: DateTime<Utc>,
}

/// Ledger of claimed message SIDs with automatic retention expiry
#[derive(Clone)]
pub struct IdempotencyLedger {
    cache: Cache<String, Arc<ClaimRecord>>,
}

impl IdempotencyLedger {
    /// Creates a ledger keeping claims for `retention_secs` with at most
    /// `max_capacity` entries.
    #[must_use]
    pub fn new(retention_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(std::time::Duration::from_secs(retention_secs))
            .build();
        Self { cache }
    }

    /// Attempts to claim a message SID.
    ///
    /// The insert is atomic: under concurrent claims for the same SID
    /// exactly one caller sees [`Claim::Accepted`]. There are no false
    /// positives; an unseen SID is always accepted.
    pub async fn claim(&self, message_sid: &str, sender: &str, body: &str) -> Claim {
        let record = Arc::new(ClaimRecord {
            sender: sender.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
        });
        let entry = self
            .cache
            .entry(message_sid.to_string())
            .or_insert_with(async { record })
            .await;
        if entry.is_fresh() {
            Claim::Accepted
        } else {
            let original = entry.value();
            debug!(
                sid = message_sid,
                first_sender = %crate::utils::mask_sender(&original.sender),
                first_received_at = %original.received_at,
                first_body_chars = original.body.chars().count(),
                "Redelivered message SID"
            );
            Claim::Duplicate
        }
    }

    /// Number of SIDs currently retained, for health reporting.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
