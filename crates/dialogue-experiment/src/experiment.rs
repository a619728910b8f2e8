//! Experiment specification and runner.
//!
//! `ExperimentSpecification::new` is the single validation gate: every
//! configuration rule is checked there, fail-fast, before anything runs.
//! `ExperimentRunner` then turns a validated specification into sessions,
//! drives each one through the scheduler, and hands the assembled bundle to
//! the persistence collaborator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::allocation;
use crate::conversation::ConversationScheduler;
use crate::error::ConfigError;
use crate::llm_client::LanguageModel;
use crate::prompt;
use crate::results::{ExperimentBundle, SessionResult};
use crate::roster::{Roster, RosterRecord};
use crate::storage::ExperimentStore;
use crate::treatment::{self, Treatment, TreatmentPayload};
use crate::agent::SyntheticAgent;

/// Models the engine accepts.
pub const SUPPORTED_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"];

/// Minimum turn budget for a free-form session.
pub const MIN_CONVERSATION_LENGTH: usize = 5;

/// Reserved role name for the scripted variant's slot 0.
pub const INTERVIEWER_ROLE: &str = "Interviewer";

const EXPERIMENT_ID_LEN: usize = 15;

/// Session shape: free-form conversation or scripted interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    Conversational,
    Interview,
}

/// How sessions receive treatments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentStrategy {
    SimpleRandom,
    CompleteRandom,
    FullFactorial,
    Manual,
}

/// How roster records are dealt into sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    Random,
    Manual,
}

/// Raw, unvalidated experiment configuration as loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub model_info: String,
    pub experiment_context: String,
    pub kind: ExperimentKind,
    /// Ordered (role name, role description) pairs; one per session slot.
    pub roles: Vec<(String, String)>,
    pub num_sessions: usize,
    pub num_agents_per_session: usize,
    pub max_conversation_length: usize,
    pub treatment_strategy: TreatmentStrategy,
    pub allocation_strategy: AllocationStrategy,
    #[serde(default)]
    pub treatments: Vec<Treatment>,
    #[serde(default)]
    pub treatment_column: Option<String>,
    #[serde(default)]
    pub session_column: Option<String>,
    #[serde(default)]
    pub script: Option<Vec<Value>>,
}

/// A validated, immutable experiment configuration.
#[derive(Debug)]
pub struct ExperimentSpecification {
    config: ExperimentConfig,
    roster: Roster,
}

impl ExperimentSpecification {
    /// Validate a configuration against a roster. All-or-nothing: the first
    /// violated rule is returned and nothing is constructed.
    pub fn new(config: ExperimentConfig, roster: Roster) -> Result<Self, ConfigError> {
        if !SUPPORTED_MODELS.contains(&config.model_info.as_str()) {
            return Err(ConfigError::UnsupportedModel(config.model_info));
        }

        if config.num_sessions < 1 {
            return Err(ConfigError::NoSessions);
        }
        let min_agents = match config.kind {
            ExperimentKind::Conversational => 1,
            ExperimentKind::Interview => 2,
        };
        if config.num_agents_per_session < min_agents {
            return Err(ConfigError::TooFewAgents {
                min: min_agents,
                got: config.num_agents_per_session,
            });
        }

        if config.roles.len() != config.num_agents_per_session {
            return Err(ConfigError::RoleCountMismatch {
                expected: config.num_agents_per_session,
                got: config.roles.len(),
            });
        }

        match config.kind {
            ExperimentKind::Conversational => {
                if config.max_conversation_length < MIN_CONVERSATION_LENGTH {
                    return Err(ConfigError::ConversationTooShort {
                        min: MIN_CONVERSATION_LENGTH,
                        got: config.max_conversation_length,
                    });
                }
            }
            ExperimentKind::Interview => {
                let first_role = &config.roles[0].0;
                if first_role != INTERVIEWER_ROLE {
                    return Err(ConfigError::MissingInterviewerRole(first_role.clone()));
                }
                let script = config.script.as_ref().ok_or(ConfigError::MissingScript)?;
                let expected = script.len() * config.num_agents_per_session;
                if config.max_conversation_length != expected {
                    return Err(ConfigError::ScriptLengthMismatch {
                        got: config.max_conversation_length,
                        script_len: script.len(),
                        agents: config.num_agents_per_session,
                    });
                }
            }
        }

        // Interviewer slots carry no demographic profile and draw nothing
        // from the roster.
        let subjects_per_session = match config.kind {
            ExperimentKind::Conversational => config.num_agents_per_session,
            ExperimentKind::Interview => config.num_agents_per_session - 1,
        };

        match config.allocation_strategy {
            AllocationStrategy::Random => {
                let required = config.num_sessions * subjects_per_session;
                if required > roster.len() {
                    return Err(ConfigError::RosterTooSmall {
                        required,
                        available: roster.len(),
                    });
                }
            }
            AllocationStrategy::Manual => {
                let session_column = config
                    .session_column
                    .as_deref()
                    .ok_or(ConfigError::MissingManualColumn("session"))?;
                let (session_ids, _) =
                    allocation::manual_allocation(&roster, session_column, subjects_per_session)?;
                if session_ids.len() != config.num_sessions {
                    return Err(ConfigError::SessionCountMismatch {
                        column: session_column.to_string(),
                        expected: config.num_sessions,
                        got: session_ids.len(),
                    });
                }
            }
        }

        match config.treatment_strategy {
            TreatmentStrategy::FullFactorial => {
                treatment::factor_levels(&config.treatments)?;
            }
            TreatmentStrategy::Manual => {
                let treatment_column = config
                    .treatment_column
                    .as_deref()
                    .ok_or(ConfigError::MissingManualColumn("treatment"))?;
                let session_column = config
                    .session_column
                    .as_deref()
                    .ok_or(ConfigError::MissingManualColumn("session"))?;
                if !roster.has_column(treatment_column) {
                    return Err(ConfigError::MissingColumn(treatment_column.to_string()));
                }
                // Every record in a session must carry the same label.
                for (session_id, members) in roster.group_by(session_column)? {
                    let mut labels = members.iter().filter_map(|r| r.get(treatment_column));
                    let first = labels.next();
                    if labels.any(|label| Some(label) != first) {
                        return Err(ConfigError::InconsistentTreatment(session_id));
                    }
                }
            }
            TreatmentStrategy::SimpleRandom | TreatmentStrategy::CompleteRandom => {}
        }

        Ok(Self { config, roster })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    fn subjects_per_session(&self) -> usize {
        match self.config.kind {
            ExperimentKind::Conversational => self.config.num_agents_per_session,
            ExperimentKind::Interview => self.config.num_agents_per_session - 1,
        }
    }
}

/// 15-character run identifier: UTC timestamp prefix plus a random
/// alphanumeric suffix.
pub fn generate_experiment_id(rng: &mut dyn RngCore) -> String {
    let prefix = Utc::now().format("%y%m%d%H%M").to_string();
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(EXPERIMENT_ID_LEN - prefix.len())
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Turns a validated specification into sessions, runs each to completion,
/// and persists the result bundle.
pub struct ExperimentRunner {
    spec: ExperimentSpecification,
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn ExperimentStore>,
    experiment_id: String,
    test_mode: bool,
    session_deadline: Option<Duration>,
}

impl ExperimentRunner {
    pub fn new(
        spec: ExperimentSpecification,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn ExperimentStore>,
        experiment_id: String,
    ) -> Self {
        Self {
            spec,
            model,
            store,
            experiment_id,
            test_mode: false,
            session_deadline: None,
        }
    }

    /// Run only the first session.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Wall-clock budget per session.
    pub fn with_session_deadline(mut self, deadline: Duration) -> Self {
        self.session_deadline = Some(deadline);
        self
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Execute the experiment: allocate, assign, converse, persist.
    /// Sessions run sequentially in session-id order so a seeded generator
    /// reproduces the whole run.
    pub async fn run(&self, rng: &mut dyn RngCore) -> Result<ExperimentBundle> {
        let config = self.spec.config();
        let roster = self.spec.roster();
        let subjects_per_session = self.spec.subjects_per_session();

        let (session_ids, allocation) = match config.allocation_strategy {
            AllocationStrategy::Random => {
                let ids: Vec<String> =
                    (0..config.num_sessions).map(|i| i.to_string()).collect();
                let allocation =
                    allocation::random_allocation(roster, &ids, subjects_per_session, rng)?;
                (ids, allocation)
            }
            AllocationStrategy::Manual => {
                let session_column = config
                    .session_column
                    .as_deref()
                    .ok_or(ConfigError::MissingManualColumn("session"))?;
                allocation::manual_allocation(roster, session_column, subjects_per_session)?
            }
        };

        let labels: Vec<String> = config
            .treatments
            .iter()
            .map(|t| t.label.clone())
            .collect();
        let (assignment, payloads) = match config.treatment_strategy {
            TreatmentStrategy::SimpleRandom => (
                treatment::simple_random(&labels, &session_ids, rng),
                declared_payloads(&config.treatments),
            ),
            TreatmentStrategy::CompleteRandom => (
                treatment::complete_random(&labels, &session_ids),
                declared_payloads(&config.treatments),
            ),
            TreatmentStrategy::FullFactorial => {
                let factors = treatment::factor_levels(&config.treatments)?;
                let payloads = treatment::factor_combinations(&factors)
                    .into_iter()
                    .map(|c| (c.label, TreatmentPayload::Levels(c.levels).render()))
                    .collect();
                (treatment::full_factorial(&factors, &session_ids), payloads)
            }
            TreatmentStrategy::Manual => {
                let treatment_column = config
                    .treatment_column
                    .as_deref()
                    .ok_or(ConfigError::MissingManualColumn("treatment"))?;
                let session_column = config
                    .session_column
                    .as_deref()
                    .ok_or(ConfigError::MissingManualColumn("session"))?;
                let assignment =
                    treatment::manual(roster, treatment_column, session_column, &session_ids)?;
                (assignment, HashMap::new())
            }
        };

        info!(
            experiment = %self.experiment_id,
            sessions = session_ids.len(),
            test_mode = self.test_mode,
            "Starting experiment"
        );

        let sessions_to_run = if self.test_mode {
            &session_ids[..1]
        } else {
            &session_ids[..]
        };

        let mut bundle = ExperimentBundle::new(&self.experiment_id);
        for session_id in sessions_to_run {
            let label = assignment
                .get(session_id)
                .cloned()
                .ok_or_else(|| ConfigError::MissingSessionTreatment(session_id.clone()))?;
            // Manual labels come straight from the roster column; everything
            // else renders the declared payload.
            let payload_text = payloads.get(&label).cloned().unwrap_or_else(|| label.clone());
            let records = &allocation[session_id];

            let result = self
                .run_session(session_id, &label, &payload_text, records)
                .await?;
            bundle.add_session(session_id, result);
        }

        self.store.store(&bundle).await?;
        Ok(bundle)
    }

    async fn run_session(
        &self,
        session_id: &str,
        label: &str,
        payload_text: &str,
        records: &[RosterRecord],
    ) -> Result<SessionResult> {
        let config = self.spec.config();
        let roster = self.spec.roster();

        debug!(
            experiment = %self.experiment_id,
            session = %session_id,
            treatment = %label,
            agents = config.num_agents_per_session,
            "Building session"
        );

        let mut agents = Vec::with_capacity(config.num_agents_per_session);
        let mut subject_roles = config.roles.iter();
        if config.kind == ExperimentKind::Interview {
            // Slot 0: the interviewer, no demographic profile.
            let (role, description) = subject_roles.next().expect("roles validated non-empty");
            agents.push(SyntheticAgent::new(
                &self.experiment_id,
                session_id,
                &config.experiment_context,
                role,
                description,
                "",
                payload_text,
                &config.model_info,
                Arc::clone(&self.model),
            ));
        }
        for (record, (role, description)) in records.iter().zip(subject_roles) {
            agents.push(SyntheticAgent::new(
                &self.experiment_id,
                session_id,
                &config.experiment_context,
                role,
                description,
                &prompt::demographic_prompt(record),
                payload_text,
                &config.model_info,
                Arc::clone(&self.model),
            ));
        }

        let mut scheduler =
            ConversationScheduler::new(session_id, config.max_conversation_length);
        if let Some(deadline) = self.session_deadline {
            scheduler = scheduler.with_deadline(deadline);
        }
        match config.kind {
            ExperimentKind::Conversational => scheduler.run_free_form(&mut agents).await,
            ExperimentKind::Interview => {
                let script = config.script.as_ref().ok_or(ConfigError::MissingScript)?;
                scheduler.run_scripted(&mut agents, script).await?;
            }
        }

        Ok(SessionResult {
            treatment: label.to_string(),
            session_system_message: prompt::session_system_message(
                &config.experiment_context,
                payload_text,
            ),
            agents_demographic: records.iter().map(|r| roster.record_json(r)).collect(),
            agents: agents.iter().map(|a| a.to_record()).collect(),
            message_history: scheduler.into_log(),
        })
    }
}

fn declared_payloads(treatments: &[Treatment]) -> HashMap<String, String> {
    treatments
        .iter()
        .map(|t| (t.label.clone(), t.payload.render()))
        .collect()
}
