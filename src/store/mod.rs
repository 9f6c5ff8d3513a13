//! Shared stores
//!
//! The idempotency ledger and rate windows are the only state shared
//! across concurrent message tasks; both rely on atomic single operations
//! rather than read-then-write. Sessions are logically owned by one sender
//! at a time; duplicate deliveries are handled by the ledger, not by
//! locking sessions.

pub mod idempotency;
pub mod rate_limit;
pub mod session;

use thiserror::Error;

/// Errors surfaced by a backing store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the operation failed
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub use idempotency::{Claim, IdempotencyLedger};
pub use rate_limit::{CounterStore, MemoryCounterStore, RateDecision, RateLimiter};
pub use session::{ConversationContext, Phase, SessionStore};
