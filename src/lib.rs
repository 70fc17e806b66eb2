//! Vehicle Advisor
//!
//! Decision engine behind a used-car dealership's messaging assistant:
//! - Classifies vehicles for ride-hailing categories per city
//! - Ranks inventory against a customer's stated preferences
//! - Runs the per-customer conversation state machine
//! - Hands off to a human seller on request
//!
//! TURN LOOP:
//! MESSAGE → TRIGGERS → CLASSIFY → MERGE → TRANSITION → RECOMMEND? → REPLY

pub mod api;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod eligibility;
pub mod error;
pub mod gemini;
pub mod lead;
pub mod models;
pub mod recommend;
pub mod repository;
pub mod similarity;

pub use error::{AdvisorError, Result};

// Re-export common types
pub use models::*;
