//! Conversation handling
//!
//! - `machine`: per-turn state machine
//! - `store`: conversation persistence
//! - `locks`: per-conversation serialization
//! - `triggers`: deterministic exit / handoff checks
//! - `history`: bounded message log
//! - `phrasing`: reply variants

pub mod history;
pub mod locks;
pub mod machine;
pub mod phrasing;
pub mod store;
pub mod triggers;

pub use history::{ConversationHistory, ConversationMessage, MessageRole};
pub use locks::SessionLocks;
pub use machine::{ConversationEngine, EngineSettings};
pub use phrasing::Phrasebook;
pub use store::{ConversationStore, InMemoryConversationStore};
