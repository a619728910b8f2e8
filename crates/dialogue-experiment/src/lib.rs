//! Dialogue Experiment: controlled experiments over synthetic participants.
//!
//! Synthetic agents, simulated by a language-model capability, are assigned
//! treatments, grouped into conversational sessions, and driven through
//! free-form or scripted turn-taking. The crate covers:
//! - treatment-assignment strategies (session- and record-level)
//! - agent-to-session allocation
//! - the per-session conversation scheduler
//! - fail-fast validation tying a declared configuration to a reproducible run

pub mod agent;
pub mod allocation;
pub mod conversation;
pub mod error;
pub mod experiment;
pub mod llm_client;
pub mod prompt;
pub mod results;
pub mod roster;
pub mod storage;
pub mod treatment;
