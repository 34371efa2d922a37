//! 会话级准入防护

pub mod admission;

pub use admission::{AdmissionController, AdmissionDecision, CompletionOutcome, DenyReason};
