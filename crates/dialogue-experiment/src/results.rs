//! Result-bundle types: the serialized output of one experiment run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentRecord;
use crate::conversation::LogEntry;

/// Everything recorded for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub treatment: String,
    pub session_system_message: String,
    /// Raw roster records of the session's subjects, in allocation order.
    pub agents_demographic: Vec<Value>,
    pub agents: Vec<AgentRecord>,
    pub message_history: Vec<LogEntry>,
}

/// The complete output of one run, keyed by experiment id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentBundle {
    pub experiment_id: String,
    pub sessions: BTreeMap<String, SessionResult>,
}

impl ExperimentBundle {
    pub fn new(experiment_id: &str) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            sessions: BTreeMap::new(),
        }
    }

    pub fn add_session(&mut self, session_id: &str, result: SessionResult) {
        self.sessions.insert(session_id.to_string(), result);
    }
}
