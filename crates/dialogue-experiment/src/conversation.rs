//! Per-session conversation scheduling.
//!
//! A `ConversationScheduler` drives one session through INIT -> RUNNING ->
//! TERMINATED, in one of two modes. Free-form mode rotates through the
//! agents round robin, feeding each the previous utterance, until the
//! termination predicate fires or the turn budget runs out. Scripted
//! (interview) mode walks an ordered script where agent 0 is the
//! interviewer and the remaining agents are subjects.
//!
//! Sessions never share mutable state; one scheduler serves one session.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::{SyntheticAgent, ROLE_ASSISTANT, ROLE_USER};
use crate::error::ConfigError;

/// Question fed to the first speaker of a session.
pub const START_SENTINEL: &str = "Start of conversation.";

/// An utterance containing this phrase ends a free-form session.
pub const TERMINATION_PHRASE: &str = "END OF CONVERSATION";

/// Appended to every session log once the session is over.
pub const END_OF_SESSION_MARKER: &str = "End of session.";

/// Speaker label for the seed entry and the end marker.
pub const SPEAKER_SYSTEM: &str = "System";

/// One session-log entry. Serialized as a single-key map `{speaker: text}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<String, String>",
    try_from = "BTreeMap<String, String>"
)]
pub struct LogEntry {
    pub speaker: String,
    pub text: String,
}

impl LogEntry {
    pub fn new(speaker: &str, text: &str) -> Self {
        Self {
            speaker: speaker.to_string(),
            text: text.to_string(),
        }
    }
}

impl From<LogEntry> for BTreeMap<String, String> {
    fn from(entry: LogEntry) -> Self {
        BTreeMap::from([(entry.speaker, entry.text)])
    }
}

impl TryFrom<BTreeMap<String, String>> for LogEntry {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!("expected a single-key map, got {} keys", map.len()));
        }
        let (speaker, text) = map.into_iter().next().unwrap();
        Ok(Self { speaker, text })
    }
}

/// Predicate over the most recent utterance deciding whether the session
/// is done. Pluggable so experiments are not tied to one magic phrase.
pub trait TerminationCheck: Send + Sync {
    fn is_terminal(&self, utterance: &str) -> bool;
}

/// Default check: the utterance contains a fixed phrase.
pub struct PhraseTermination {
    phrase: String,
}

impl PhraseTermination {
    pub fn new(phrase: &str) -> Self {
        Self {
            phrase: phrase.to_string(),
        }
    }
}

impl Default for PhraseTermination {
    fn default() -> Self {
        Self::new(TERMINATION_PHRASE)
    }
}

impl TerminationCheck for PhraseTermination {
    fn is_terminal(&self, utterance: &str) -> bool {
        utterance.contains(&self.phrase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Running,
    Terminated,
}

/// Drives turn-taking for one session and accumulates its message log.
pub struct ConversationScheduler {
    session_id: String,
    max_conversation_length: usize,
    termination: Box<dyn TerminationCheck>,
    deadline: Option<Duration>,
    state: SessionState,
    log: Vec<LogEntry>,
}

impl ConversationScheduler {
    pub fn new(session_id: &str, max_conversation_length: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            max_conversation_length,
            termination: Box::new(PhraseTermination::default()),
            deadline: None,
            state: SessionState::Init,
            log: Vec::new(),
        }
    }

    /// Replace the default phrase check.
    pub fn with_termination(mut self, termination: Box<dyn TerminationCheck>) -> Self {
        self.termination = termination;
        self
    }

    /// Wall-clock budget for the whole session. Hitting it ends the session
    /// with the usual end marker.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn into_log(self) -> Vec<LogEntry> {
        self.log
    }

    fn deadline_hit(&self, started: Instant) -> bool {
        match self.deadline {
            Some(budget) => started.elapsed() >= budget,
            None => false,
        }
    }

    fn finish(&mut self) {
        self.log
            .push(LogEntry::new(SPEAKER_SYSTEM, END_OF_SESSION_MARKER));
        self.state = SessionState::Terminated;
        info!(
            session = %self.session_id,
            entries = self.log.len(),
            "Session terminated"
        );
    }

    /// Free-form mode: agents speak round robin, each fed the previous
    /// utterance, until the termination predicate fires or the turn budget
    /// is spent. A failed generation logs an empty turn and keeps going;
    /// empty turns never match the phrase check, so a run of failures
    /// consumes the full budget and still yields a complete session.
    pub async fn run_free_form(&mut self, agents: &mut [SyntheticAgent]) {
        assert!(!agents.is_empty(), "session has no agents");

        self.state = SessionState::Running;
        self.log.push(LogEntry::new(SPEAKER_SYSTEM, START_SENTINEL));

        let started = Instant::now();
        let mut question = START_SENTINEL.to_string();
        let mut turn = 0;

        while turn < self.max_conversation_length {
            if self.deadline_hit(started) {
                warn!(session = %self.session_id, turn, "Session deadline reached");
                break;
            }

            let agent = &mut agents[turn % agents.len()];
            let utterance = agent.respond(&question).await;
            debug!(
                session = %self.session_id,
                turn,
                speaker = %agent.role(),
                "Turn completed"
            );
            self.log.push(LogEntry::new(agent.role(), &utterance));

            if self.termination.is_terminal(&utterance) {
                break;
            }
            question = utterance;
            turn += 1;
        }

        self.finish();
    }

    /// Scripted (interview) mode: agent 0 is the interviewer, the rest are
    /// subjects. Each script round is an empty string (interviewer silent,
    /// subjects respond to the prior utterance), a shared instruction
    /// string, or a per-subject list of instructions. Any other shape is a
    /// configuration error surfaced here, at run time.
    pub async fn run_scripted(
        &mut self,
        agents: &mut [SyntheticAgent],
        script: &[Value],
    ) -> Result<(), ConfigError> {
        assert!(agents.len() >= 2, "interview session needs a subject");

        self.state = SessionState::Running;
        self.log.push(LogEntry::new(SPEAKER_SYSTEM, START_SENTINEL));

        let started = Instant::now();
        let num_subjects = agents.len() - 1;
        let mut last_utterance = START_SENTINEL.to_string();

        'rounds: for (round, entry) in script.iter().enumerate() {
            if self.deadline_hit(started) {
                warn!(session = %self.session_id, round, "Session deadline reached");
                break;
            }

            match entry {
                Value::String(instruction) if instruction.is_empty() => {
                    for i in 1..agents.len() {
                        let question = last_utterance.clone();
                        let reply = agents[i].respond(&question).await;
                        self.log.push(LogEntry::new(agents[i].role(), &reply));
                        last_utterance = reply;
                    }
                }
                Value::String(instruction) => {
                    let interviewer_role = agents[0].role().to_string();
                    self.log.push(LogEntry::new(&interviewer_role, instruction));
                    agents[0].update_message_history(instruction, ROLE_ASSISTANT);

                    if self.termination.is_terminal(instruction) {
                        break 'rounds;
                    }

                    for i in 1..agents.len() {
                        let reply = agents[i].respond(instruction).await;
                        self.log.push(LogEntry::new(agents[i].role(), &reply));
                        agents[0].update_message_history(&reply, ROLE_USER);
                        last_utterance = reply;
                    }
                }
                Value::Array(instructions) => {
                    if instructions.len() != num_subjects {
                        return Err(ConfigError::MalformedScriptEntry {
                            round,
                            reason: format!(
                                "expected {} per-subject instructions, got {}",
                                num_subjects,
                                instructions.len()
                            ),
                        });
                    }
                    let mut texts = Vec::with_capacity(num_subjects);
                    for value in instructions {
                        match value {
                            Value::String(text) => texts.push(text.clone()),
                            other => {
                                return Err(ConfigError::MalformedScriptEntry {
                                    round,
                                    reason: format!(
                                        "per-subject instruction must be a string, got {}",
                                        other
                                    ),
                                })
                            }
                        }
                    }
                    let interviewer_role = agents[0].role().to_string();
                    for (i, instruction) in texts.iter().enumerate() {
                        self.log.push(LogEntry::new(&interviewer_role, instruction));
                        agents[0].update_message_history(instruction, ROLE_ASSISTANT);
                        let reply = agents[i + 1].respond(instruction).await;
                        self.log.push(LogEntry::new(agents[i + 1].role(), &reply));
                        agents[0].update_message_history(&reply, ROLE_USER);
                        last_utterance = reply;
                    }
                }
                other => {
                    return Err(ConfigError::MalformedScriptEntry {
                        round,
                        reason: format!(
                            "script entry must be a string or a list of strings, got {}",
                            other
                        ),
                    })
                }
            }
        }

        self.finish();
        Ok(())
    }
}
