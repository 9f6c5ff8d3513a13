//! Conversation sessions
//!
//! One session per sender, spanning the whole relationship rather than a
//! single message. The orchestrator reads the context at the start of a
//! turn and writes it back exactly once.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

/// Phase of the ordering conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Initial contact
    Greeting,
    /// Looking at the menu
    Browsing,
    /// Assembling an order
    Ordering,
    /// Confirming the order summary
    Confirming,
    /// Collecting the delivery address
    Delivery,
    /// Collecting the payment method
    Payment,
    /// Order closed
    Completed,
}

/// Per-sender conversation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Current conversation phase
    pub phase: Phase,
    /// Products the sender mentioned most recently, in mention order
    pub discussed_subjects: Vec<String>,
    /// Sizes the sender mentioned most recently
    pub mentioned_sizes: Vec<String>,
    /// Opaque order draft assembled by the tools
    pub draft_order: serde_json::Value,
    /// What the conversation is currently about
    pub last_topic: Option<String>,
    /// When the context last changed
    pub updated_at: DateTime<Utc>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self {
            phase: Phase::Greeting,
            discussed_subjects: Vec::new(),
            mentioned_sizes: Vec::new(),
            draft_order: serde_json::Value::Object(serde_json::Map::new()),
            last_topic: None,
            updated_at: Utc::now(),
        }
    }
}

/// Store of conversation contexts keyed by sender
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<String, ConversationContext>,
}

impl SessionStore {
    /// Creates a store expiring idle sessions after `ttl_secs`, keeping at
    /// most `max_capacity` senders.
    #[must_use]
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(std::time::Duration::from_secs(ttl_secs))
            .build();
        Self { sessions }
    }

    /// Returns the sender's context, or a fresh one for new senders.
    pub async fn get_or_default(&self, sender: &str) -> ConversationContext {
        self.sessions.get(sender).await.unwrap_or_default()
    }

    /// Writes the sender's context back. Called once per turn.
    pub async fn put(&self, sender: &str, context: ConversationContext) {
        self.sessions.insert(sender.to_string(), context).await;
    }
}
