//! Prompt assembly for synthetic agents.
//!
//! Pure text formatting: the numbered demographic narrative, the per-agent
//! system message, and the per-session system message. Prompt *templating*
//! beyond this fixed concatenation is outside the engine.

use crate::roster::RosterRecord;

/// Render a roster record as a first-person interview transcript:
/// `1) Interviewer: <question> Me: <answer> 2) ...` with a trailing space.
/// Records with no attributes render as the empty string.
pub fn demographic_prompt(record: &RosterRecord) -> String {
    let mut prompt = String::new();
    for (i, (question, answer)) in record.attributes.iter().enumerate() {
        prompt.push_str(&format!(
            "{}) Interviewer: {} Me: {} ",
            i + 1,
            question,
            answer
        ));
    }
    prompt
}

/// Seed system message for one agent: experiment context, role description,
/// demographic narrative, and treatment payload, in that order, separated by
/// blank lines.
pub fn agent_system_message(
    experiment_context: &str,
    role_description: &str,
    demographic_info: &str,
    treatment: &str,
) -> String {
    format!(
        "{}\n\n{}\n\n{}\n\n{}",
        experiment_context, role_description, demographic_info, treatment
    )
}

/// Session-level system message: experiment context plus treatment payload.
pub fn session_system_message(experiment_context: &str, treatment: &str) -> String {
    format!("{}\n\n{}", experiment_context, treatment)
}
