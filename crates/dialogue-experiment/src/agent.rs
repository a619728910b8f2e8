//! Synthetic agents: simulated participants with private message histories.
//!
//! An agent holds its role, demographic narrative, and treatment, and
//! delegates utterance generation to the external language-model capability.
//! History is append-only; the system-role seed entry can only be written at
//! construction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm_client::{ChatMessage, LanguageModel};
use crate::prompt;

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// One conversational participant. Identity is
/// (experiment id, session id, role).
pub struct SyntheticAgent {
    experiment_id: String,
    session_id: String,
    role: String,
    role_description: String,
    demographic_info: String,
    assigned_treatment: String,
    model_info: String,
    message_history: Vec<ChatMessage>,
    model: Arc<dyn LanguageModel>,
}

impl SyntheticAgent {
    /// Construct an agent and seed its history with the system message built
    /// from experiment context, role description, demographic narrative, and
    /// treatment payload.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        experiment_id: &str,
        session_id: &str,
        experiment_context: &str,
        role: &str,
        role_description: &str,
        demographic_info: &str,
        assigned_treatment: &str,
        model_info: &str,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let system_message = prompt::agent_system_message(
            experiment_context,
            role_description,
            demographic_info,
            assigned_treatment,
        );
        Self {
            experiment_id: experiment_id.to_string(),
            session_id: session_id.to_string(),
            role: role.to_string(),
            role_description: role_description.to_string(),
            demographic_info: demographic_info.to_string(),
            assigned_treatment: assigned_treatment.to_string(),
            model_info: model_info.to_string(),
            message_history: vec![ChatMessage::new(ROLE_SYSTEM, &system_message)],
            model,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn system_message(&self) -> &str {
        &self.message_history[0].content
    }

    pub fn message_history(&self) -> &[ChatMessage] {
        &self.message_history
    }

    /// Ask the agent a question and return its utterance.
    ///
    /// The question is appended as a user turn and the reply as an assistant
    /// turn. On any capability failure (or an empty reply) the exchange is
    /// rolled back and the empty string is returned: history only ever holds
    /// completed exchanges, and callers must interpret the degraded signal
    /// themselves.
    pub async fn respond(&mut self, question: &str) -> String {
        self.message_history
            .push(ChatMessage::new(ROLE_USER, question));

        match self
            .model
            .generate(&self.model_info, &self.message_history)
            .await
        {
            Ok(utterance) if !utterance.is_empty() => {
                self.message_history
                    .push(ChatMessage::new(ROLE_ASSISTANT, &utterance));
                utterance
            }
            Ok(_) => {
                self.message_history.pop();
                warn!(
                    session = %self.session_id,
                    role = %self.role,
                    "Model returned an empty utterance"
                );
                String::new()
            }
            Err(e) => {
                self.message_history.pop();
                warn!(
                    session = %self.session_id,
                    role = %self.role,
                    error = %e,
                    "Generation call failed"
                );
                String::new()
            }
        }
    }

    /// Append a message under one of the two conversational roles.
    /// Any other role is rejected as a no-op; returns whether it was added.
    pub fn update_message_history(&mut self, message: &str, role: &str) -> bool {
        if role != ROLE_USER && role != ROLE_ASSISTANT {
            return false;
        }
        self.message_history.push(ChatMessage::new(role, message));
        true
    }

    /// Serialize the agent to a plain record for the result bundle.
    pub fn to_record(&self) -> AgentRecord {
        AgentRecord {
            experiment_id: self.experiment_id.clone(),
            session_id: self.session_id.clone(),
            role: self.role.clone(),
            role_description: self.role_description.clone(),
            demographic_info: self.demographic_info.clone(),
            model_info: self.model_info.clone(),
            treatment: self.assigned_treatment.clone(),
        }
    }
}

/// Plain serialized form of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub experiment_id: String,
    pub session_id: String,
    pub role: String,
    pub role_description: String,
    pub demographic_info: String,
    pub model_info: String,
    pub treatment: String,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted capability double: replays canned utterances in order, then
    /// keeps returning the last one. An `Err` entry simulates a failed call.
    pub(crate) struct ScriptedModel {
        replies: Mutex<Vec<Result<String, String>>>,
        last: Mutex<Option<Result<String, String>>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(replies: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                last: Mutex::new(None),
            })
        }

        /// Every call succeeds with the same utterance.
        pub(crate) fn repeating(utterance: &str) -> Arc<Self> {
            Self::new(vec![Ok(utterance.to_string())])
        }

        /// Every call fails.
        pub(crate) fn failing() -> Arc<Self> {
            Self::new(vec![Err("simulated outage".to_string())])
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, _model: &str, _history: &[ChatMessage]) -> Result<String> {
            let mut replies = self.replies.lock().unwrap();
            let next = if replies.is_empty() {
                self.last.lock().unwrap().clone()
            } else {
                let next = replies.remove(0);
                *self.last.lock().unwrap() = Some(next.clone());
                Some(next)
            };
            match next {
                Some(Ok(utterance)) => Ok(utterance),
                Some(Err(cause)) => Err(anyhow::anyhow!(cause)),
                None => Ok(String::new()),
            }
        }
    }

    fn test_agent(model: Arc<dyn LanguageModel>) -> SyntheticAgent {
        SyntheticAgent::new(
            "exp123",
            "0",
            "Test Context",
            "Buyer",
            "You are the buyer.",
            "1) Interviewer: How old are you? Me: 30 ",
            "treatmentA",
            "gpt-4o",
            model,
        )
    }

    #[test]
    fn test_seeded_system_message() {
        let agent = test_agent(ScriptedModel::repeating("hi"));

        assert_eq!(agent.message_history().len(), 1);
        assert_eq!(agent.message_history()[0].role, ROLE_SYSTEM);
        assert_eq!(
            agent.system_message(),
            "Test Context\n\nYou are the buyer.\n\n\
             1) Interviewer: How old are you? Me: 30 \n\ntreatmentA"
        );
    }

    #[tokio::test]
    async fn test_respond_appends_exchange() {
        let mut agent = test_agent(ScriptedModel::repeating("I'd pay ten dollars."));

        let reply = agent.respond("What would you pay?").await;

        assert_eq!(reply, "I'd pay ten dollars.");
        assert_eq!(agent.message_history().len(), 3);
        assert_eq!(agent.message_history()[1].role, ROLE_USER);
        assert_eq!(agent.message_history()[1].content, "What would you pay?");
        assert_eq!(agent.message_history()[2].role, ROLE_ASSISTANT);
    }

    #[tokio::test]
    async fn test_respond_failure_rolls_back_history() {
        let mut agent = test_agent(ScriptedModel::failing());

        let reply = agent.respond("What would you pay?").await;

        assert_eq!(reply, "");
        // Only the seed entry remains
        assert_eq!(agent.message_history().len(), 1);
    }

    #[tokio::test]
    async fn test_respond_empty_reply_rolls_back_history() {
        let mut agent = test_agent(ScriptedModel::repeating(""));

        let reply = agent.respond("Anything?").await;

        assert_eq!(reply, "");
        assert_eq!(agent.message_history().len(), 1);
    }

    #[test]
    fn test_update_message_history_rejects_unknown_roles() {
        let mut agent = test_agent(ScriptedModel::repeating("hi"));

        assert!(agent.update_message_history("Hello", ROLE_USER));
        assert!(agent.update_message_history("Hi there", ROLE_ASSISTANT));
        assert!(!agent.update_message_history("sneaky", ROLE_SYSTEM));
        assert!(!agent.update_message_history("sneaky", "moderator"));

        assert_eq!(agent.message_history().len(), 3);
        assert_eq!(agent.message_history()[2].content, "Hi there");
    }

    #[test]
    fn test_to_record() {
        let agent = test_agent(ScriptedModel::repeating("hi"));
        let record = agent.to_record();

        assert_eq!(record.experiment_id, "exp123");
        assert_eq!(record.session_id, "0");
        assert_eq!(record.role, "Buyer");
        assert_eq!(record.treatment, "treatmentA");
        assert_eq!(record.model_info, "gpt-4o");
    }
}
