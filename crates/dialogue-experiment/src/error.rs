//! Configuration errors for experiment specifications.
//!
//! Every violation of a declared experiment configuration is fatal and is
//! raised synchronously, either while the specification is constructed or,
//! for script-entry shapes, when the scheduler first reads the entry.
//! Runtime degradations (a failed generation call) are never errors; they
//! are absorbed as empty utterances.

use thiserror::Error;

/// A fatal configuration error with a human-readable cause.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("agent roster must not be empty")]
    EmptyRoster,

    #[error("roster record {row} is missing the identifier column '{column}'")]
    MissingId { row: usize, column: String },

    #[error("duplicate roster identifier: {0}")]
    DuplicateId(String),

    #[error("roster column '{0}' not found")]
    MissingColumn(String),

    #[error("max_conversation_length must be at least {min}, got {got}")]
    ConversationTooShort { min: usize, got: usize },

    #[error("num_sessions must be at least 1")]
    NoSessions,

    #[error("num_agents_per_session must be at least {min}, got {got}")]
    TooFewAgents { min: usize, got: usize },

    #[error("expected {expected} agent roles, got {got}")]
    RoleCountMismatch { expected: usize, got: usize },

    #[error("interview experiments require the first role to be 'Interviewer', got '{0}'")]
    MissingInterviewerRole(String),

    #[error("experiment requires {required} agents but roster has {available}")]
    RosterTooSmall { required: usize, available: usize },

    #[error("session '{session}' has {got} members, expected {expected}")]
    SessionSizeMismatch {
        session: String,
        expected: usize,
        got: usize,
    },

    #[error("expected {expected} sessions in column '{column}', found {got}")]
    SessionCountMismatch {
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("session '{0}' mixes more than one treatment label")]
    InconsistentTreatment(String),

    #[error("no treatment found for session '{0}'")]
    MissingSessionTreatment(String),

    #[error("treatment '{0}' must map factors to levels in a full factorial design")]
    NonFactorialPayload(String),

    #[error("manual assignment requires a '{0}' column name in the configuration")]
    MissingManualColumn(&'static str),

    #[error("interview experiments require a script")]
    MissingScript,

    #[error(
        "max_conversation_length {got} must equal script length {script_len} \
         times agents per session {agents}"
    )]
    ScriptLengthMismatch {
        got: usize,
        script_len: usize,
        agents: usize,
    },

    #[error("script round {round}: {reason}")]
    MalformedScriptEntry { round: usize, reason: String },

    #[error("block size {block_size} yields no complete block for {records} records")]
    InvalidBlockSize { block_size: usize, records: usize },
}
