//! Deterministic message triggers
//!
//! Plain case-insensitive substring checks that run before the classifier.

/// Words that mean the customer wants a human salesperson.
pub const HANDOFF_TRIGGERS: &[&str] = &["vendedor", "humano", "atendente"];

pub fn requests_handoff(message: &str) -> bool {
    let lowered = message.to_lowercase();
    HANDOFF_TRIGGERS.iter().any(|t| lowered.contains(t))
}

pub fn requests_exit(message: &str, exit_keyword: &str) -> bool {
    let keyword = exit_keyword.trim().to_lowercase();
    !keyword.is_empty() && message.to_lowercase().contains(&keyword)
}
