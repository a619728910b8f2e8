//! Agent-to-session allocation.
//!
//! Maps each session id to an ordered list of roster records. Random mode
//! shuffles the whole roster once and slices it into consecutive chunks;
//! manual mode groups rows by a session column. The interview variant
//! reserves slot 0 for the "Interviewer" role, so its chunks are one record
//! smaller; that reservation is applied when agents are constructed, not
//! here.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::error::ConfigError;
use crate::roster::{Roster, RosterRecord};

/// Shuffle the roster once (uniform permutation) and deal consecutive chunks
/// of `agents_per_session` records to sessions in order.
pub fn random_allocation(
    roster: &Roster,
    session_ids: &[String],
    agents_per_session: usize,
    rng: &mut dyn RngCore,
) -> Result<HashMap<String, Vec<RosterRecord>>, ConfigError> {
    let required = session_ids.len() * agents_per_session;
    if required > roster.len() {
        return Err(ConfigError::RosterTooSmall {
            required,
            available: roster.len(),
        });
    }

    let mut shuffled = roster.records().to_vec();
    shuffled.shuffle(rng);

    Ok(session_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let start = i * agents_per_session;
            let chunk = shuffled[start..start + agents_per_session].to_vec();
            (id.clone(), chunk)
        })
        .collect())
}

/// Group roster rows by a session column. Returns session ids in first-seen
/// order plus the per-session records; every group must contain exactly
/// `agents_per_session` members.
pub fn manual_allocation(
    roster: &Roster,
    session_column: &str,
    agents_per_session: usize,
) -> Result<(Vec<String>, HashMap<String, Vec<RosterRecord>>), ConfigError> {
    let groups = roster.group_by(session_column)?;

    let mut session_ids = Vec::with_capacity(groups.len());
    let mut allocation = HashMap::with_capacity(groups.len());
    for (session_id, members) in groups {
        if members.len() != agents_per_session {
            return Err(ConfigError::SessionSizeMismatch {
                session: session_id,
                expected: agents_per_session,
                got: members.len(),
            });
        }
        allocation.insert(
            session_id.clone(),
            members.into_iter().cloned().collect::<Vec<_>>(),
        );
        session_ids.push(session_id);
    }
    Ok((session_ids, allocation))
}
