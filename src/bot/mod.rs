//! Conversation logic
//!
//! Deterministic context heuristics, the structured reply contract, and the
//! per-turn orchestration of the model exchange.

pub mod context;
pub mod orchestrator;
pub mod reply;

pub use orchestrator::Orchestrator;
pub use reply::{ImageItem, StructuredReply};
