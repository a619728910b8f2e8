//! Treatment assignment strategies.
//!
//! Two families:
//! - Session-level functions compute a session-id to treatment-label map and
//!   never touch the roster.
//! - Record-level functions mirror survey-style designs: they return a fresh
//!   working copy of the roster with `treatment` (and for blocking, `block`)
//!   columns added, plus a label to record-ids map. The caller's roster is
//!   never mutated.
//!
//! Unsupported strategy names are rejected when the experiment specification
//! is constructed, not here.

use std::collections::{BTreeMap, HashMap};

use rand::seq::{IndexedRandom, SliceRandom};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::roster::Roster;

/// The content attached to a treatment label: free text, or a factor-to-level
/// map for factorial designs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreatmentPayload {
    Levels(BTreeMap<String, String>),
    Text(String),
}

impl TreatmentPayload {
    /// Render the payload as prompt text.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Levels(levels) => levels
                .iter()
                .map(|(factor, level)| format!("{}: {}", factor, level))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// One declared treatment. Declaration order drives round-robin assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treatment {
    pub label: String,
    pub payload: TreatmentPayload,
}

/// Joint label and payload for one factor-level combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorCombination {
    pub label: String,
    pub levels: BTreeMap<String, String>,
}

// --- Session-level assignment (pure; roster untouched) ---

/// Each session independently draws uniformly at random from the labels,
/// with replacement. No balance guarantee. An empty label set maps every
/// session to the empty label.
pub fn simple_random(
    labels: &[String],
    session_ids: &[String],
    rng: &mut dyn RngCore,
) -> HashMap<String, String> {
    session_ids
        .iter()
        .map(|id| {
            let label = labels.choose(rng).cloned().unwrap_or_default();
            (id.clone(), label)
        })
        .collect()
}

/// Deterministic round robin over session index order:
/// `assignment[i] = labels[i % labels.len()]`. Guarantees near-equal counts.
pub fn complete_random(labels: &[String], session_ids: &[String]) -> HashMap<String, String> {
    session_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let label = if labels.is_empty() {
                String::new()
            } else {
                labels[i % labels.len()].clone()
            };
            (id.clone(), label)
        })
        .collect()
}

/// Cartesian product of the factor level lists, in declaration order.
/// Combined labels join levels with `|`; the last factor varies fastest.
pub fn factor_combinations(factors: &[(String, Vec<String>)]) -> Vec<FactorCombination> {
    let mut combinations = vec![FactorCombination {
        label: String::new(),
        levels: BTreeMap::new(),
    }];
    for (factor, levels) in factors {
        combinations = combinations
            .into_iter()
            .flat_map(|combo| {
                levels.iter().map(move |level| {
                    let label = if combo.label.is_empty() {
                        level.clone()
                    } else {
                        format!("{}|{}", combo.label, level)
                    };
                    let mut combined = combo.levels.clone();
                    combined.insert(factor.clone(), level.clone());
                    FactorCombination {
                        label,
                        levels: combined,
                    }
                })
            })
            .collect();
    }
    combinations
}

/// Full factorial: combined factor-level labels assigned round robin.
/// Full combination coverage is only guaranteed when the session count is a
/// multiple of the combination count.
pub fn full_factorial(
    factors: &[(String, Vec<String>)],
    session_ids: &[String],
) -> HashMap<String, String> {
    let labels: Vec<String> = factor_combinations(factors)
        .into_iter()
        .map(|c| c.label)
        .collect();
    complete_random(&labels, session_ids)
}

/// Derive ordered factor level lists from declared factorial treatments.
///
/// Factors appear in first-seen order across payloads; levels per factor in
/// first-seen order. Errors on any non-factorial payload.
pub fn factor_levels(
    treatments: &[Treatment],
) -> Result<Vec<(String, Vec<String>)>, ConfigError> {
    let mut factors: Vec<(String, Vec<String>)> = Vec::new();
    for treatment in treatments {
        let TreatmentPayload::Levels(levels) = &treatment.payload else {
            return Err(ConfigError::NonFactorialPayload(treatment.label.clone()));
        };
        for (factor, level) in levels {
            match factors.iter_mut().find(|(name, _)| name == factor) {
                Some((_, seen)) => {
                    if !seen.contains(level) {
                        seen.push(level.clone());
                    }
                }
                None => factors.push((factor.clone(), vec![level.clone()])),
            }
        }
    }
    Ok(factors)
}

/// Read a pre-assigned treatment per session directly from the roster.
///
/// The first record carrying each session id supplies the label; per-session
/// label consistency is enforced separately at specification construction.
pub fn manual(
    roster: &Roster,
    treatment_column: &str,
    session_column: &str,
    session_ids: &[String],
) -> Result<HashMap<String, String>, ConfigError> {
    let mut assignment = HashMap::new();
    for session_id in session_ids {
        let label = roster
            .records()
            .iter()
            .find(|r| r.get(session_column) == Some(session_id.as_str()))
            .and_then(|r| r.get(treatment_column))
            .ok_or_else(|| ConfigError::MissingSessionTreatment(session_id.clone()))?;
        assignment.insert(session_id.clone(), label.to_string());
    }
    Ok(assignment)
}

// --- Record-level assignment (operates on a working copy) ---

/// A roster working copy with a treatment column added, plus the
/// label to record-ids map.
#[derive(Debug, Clone)]
pub struct RecordAssignment {
    pub roster: Roster,
    pub assignment: HashMap<String, Vec<String>>,
}

fn collect_by_label(roster: &Roster, labels: &[String]) -> HashMap<String, Vec<String>> {
    labels
        .iter()
        .map(|label| {
            let ids = roster
                .records()
                .iter()
                .filter(|r| r.get("treatment") == Some(label.as_str()))
                .map(|r| r.id.clone())
                .collect();
            (label.clone(), ids)
        })
        .collect()
}

/// Independently draw a treatment for every record, with replacement.
pub fn simple_random_assignment(
    labels: &[String],
    roster: &Roster,
    rng: &mut dyn RngCore,
) -> RecordAssignment {
    let mut records = roster.records().to_vec();
    for record in &mut records {
        let label = labels.choose(rng).cloned().unwrap_or_default();
        record.set("treatment", label);
    }
    let working = Roster::new(roster.id_column(), records).expect("roster invariants preserved");
    let assignment = collect_by_label(&working, labels);
    RecordAssignment {
        roster: working,
        assignment,
    }
}

/// Round-robin treatments over record order for near-equal counts.
pub fn complete_random_assignment(labels: &[String], roster: &Roster) -> RecordAssignment {
    let mut records = roster.records().to_vec();
    for (i, record) in records.iter_mut().enumerate() {
        let label = if labels.is_empty() {
            String::new()
        } else {
            labels[i % labels.len()].clone()
        };
        record.set("treatment", label);
    }
    let working = Roster::new(roster.id_column(), records).expect("roster invariants preserved");
    let assignment = collect_by_label(&working, labels);
    RecordAssignment {
        roster: working,
        assignment,
    }
}

/// Full factorial over records: combined factor-level labels, round robin.
pub fn full_factorial_assignment(
    factors: &[(String, Vec<String>)],
    roster: &Roster,
) -> RecordAssignment {
    let labels: Vec<String> = factor_combinations(factors)
        .into_iter()
        .map(|c| c.label)
        .collect();
    complete_random_assignment(&labels, roster)
}

/// Block randomization: records are dealt into `len / block_size` blocks in
/// shuffled order, then treatments are assigned round robin within block
/// order. When the block size does not divide the roster, the remainder
/// records wrap into existing blocks rather than being dropped.
pub fn block_random_assignment(
    labels: &[String],
    roster: &Roster,
    block_size: usize,
    rng: &mut dyn RngCore,
) -> Result<RecordAssignment, ConfigError> {
    let num_records = roster.len();
    let num_blocks = if block_size == 0 {
        0
    } else {
        num_records / block_size
    };
    if num_blocks == 0 {
        return Err(ConfigError::InvalidBlockSize {
            block_size,
            records: num_records,
        });
    }

    let mut block_ids: Vec<usize> = (0..num_records).map(|i| i % num_blocks).collect();
    block_ids.shuffle(rng);

    let mut records = roster.records().to_vec();
    for (record, block) in records.iter_mut().zip(&block_ids) {
        record.set("block", block.to_string());
    }
    // Stable sort keeps within-block record order deterministic
    records.sort_by_key(|r| {
        r.get("block")
            .and_then(|b| b.parse::<usize>().ok())
            .unwrap_or(0)
    });
    for (i, record) in records.iter_mut().enumerate() {
        let label = if labels.is_empty() {
            String::new()
        } else {
            labels[i % labels.len()].clone()
        };
        record.set("treatment", label);
    }

    let working = Roster::new(roster.id_column(), records).expect("roster invariants preserved");
    let assignment = collect_by_label(&working, labels);
    Ok(RecordAssignment {
        roster: working,
        assignment,
    })
}

/// Cluster randomization: clusters (distinct values of the cluster column)
/// are shuffled and assigned treatments round robin; every member of a
/// cluster receives its cluster's treatment.
pub fn cluster_random_assignment(
    labels: &[String],
    roster: &Roster,
    cluster_column: &str,
    rng: &mut dyn RngCore,
) -> Result<RecordAssignment, ConfigError> {
    let mut clusters: Vec<String> = roster
        .group_by(cluster_column)?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    clusters.shuffle(rng);

    let cluster_labels: HashMap<&str, &str> = clusters
        .iter()
        .enumerate()
        .map(|(i, cluster)| {
            let label = if labels.is_empty() {
                ""
            } else {
                labels[i % labels.len()].as_str()
            };
            (cluster.as_str(), label)
        })
        .collect();

    let mut records = roster.records().to_vec();
    for record in &mut records {
        let cluster = record
            .get(cluster_column)
            .ok_or_else(|| ConfigError::MissingColumn(cluster_column.to_string()))?
            .to_string();
        let label = cluster_labels[cluster.as_str()].to_string();
        record.set("treatment", label);
    }

    let working = Roster::new(roster.id_column(), records).expect("roster invariants preserved");
    let assignment = collect_by_label(&working, labels);
    Ok(RecordAssignment {
        roster: working,
        assignment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::tests::sample_roster;
    use crate::roster::{Roster, RosterRecord};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn session_ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_simple_random_covers_every_session() {
        let mut rng = StdRng::seed_from_u64(7);
        let assignment = simple_random(&labels(&["a", "b"]), &session_ids(10), &mut rng);

        assert_eq!(assignment.len(), 10);
        for label in assignment.values() {
            assert!(label == "a" || label == "b");
        }
    }

    #[test]
    fn test_simple_random_empty_labels() {
        let mut rng = StdRng::seed_from_u64(7);
        let assignment = simple_random(&[], &session_ids(4), &mut rng);

        assert_eq!(assignment.len(), 4);
        assert!(assignment.values().all(|l| l.is_empty()));
    }

    #[test]
    fn test_complete_random_is_exact_round_robin() {
        let ids = session_ids(7);
        let ls = labels(&["a", "b", "c"]);
        let assignment = complete_random(&ls, &ids);

        for (i, id) in ids.iter().enumerate() {
            assert_eq!(assignment[id], ls[i % ls.len()]);
        }
    }

    #[test]
    fn test_complete_random_empty_labels() {
        let assignment = complete_random(&[], &session_ids(3));
        assert!(assignment.values().all(|l| l.is_empty()));
    }

    #[test]
    fn test_factor_combinations_product() {
        let factors = vec![
            ("price".to_string(), vec!["high".to_string(), "low".to_string()]),
            ("color".to_string(), vec!["red".to_string(), "blue".to_string()]),
        ];
        let combos = factor_combinations(&factors);

        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0].label, "high|red");
        assert_eq!(combos[3].label, "low|blue");
        assert_eq!(combos[1].levels["color"], "blue");
        assert_eq!(combos[1].levels["price"], "high");
    }

    #[test]
    fn test_full_factorial_image_is_full_product() {
        let factors = vec![
            ("price".to_string(), vec!["high".to_string(), "low".to_string()]),
            ("color".to_string(), vec!["red".to_string(), "blue".to_string()]),
        ];
        // 8 sessions = 2 x product size, so coverage is exact
        let assignment = full_factorial(&factors, &session_ids(8));

        let mut seen: Vec<&str> = assignment.values().map(|s| s.as_str()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 4);
        for combo in factor_combinations(&factors) {
            assert!(seen.contains(&combo.label.as_str()));
        }
    }

    #[test]
    fn test_factor_levels_from_treatments() {
        let treatments = vec![
            Treatment {
                label: "t1".to_string(),
                payload: TreatmentPayload::Levels(BTreeMap::from([
                    ("price".to_string(), "high".to_string()),
                    ("color".to_string(), "red".to_string()),
                ])),
            },
            Treatment {
                label: "t2".to_string(),
                payload: TreatmentPayload::Levels(BTreeMap::from([
                    ("price".to_string(), "low".to_string()),
                    ("color".to_string(), "red".to_string()),
                ])),
            },
        ];

        let factors = factor_levels(&treatments).unwrap();
        let price = factors.iter().find(|(name, _)| name == "price").unwrap();
        assert_eq!(price.1, vec!["high", "low"]);
        let color = factors.iter().find(|(name, _)| name == "color").unwrap();
        assert_eq!(color.1, vec!["red"]);
    }

    #[test]
    fn test_factor_levels_rejects_text_payload() {
        let treatments = vec![Treatment {
            label: "t1".to_string(),
            payload: TreatmentPayload::Text("plain".to_string()),
        }];
        let err = factor_levels(&treatments).unwrap_err();
        assert!(matches!(err, ConfigError::NonFactorialPayload(l) if l == "t1"));
    }

    #[test]
    fn test_manual_reads_treatment_from_roster() {
        let csv_data = "ID,session,treatment\n1,s1,a\n2,s1,a\n3,s2,b\n4,s2,b\n";
        let roster = Roster::from_csv(csv_data.as_bytes(), "ID").unwrap();

        let assignment = manual(
            &roster,
            "treatment",
            "session",
            &["s1".to_string(), "s2".to_string()],
        )
        .unwrap();
        assert_eq!(assignment["s1"], "a");
        assert_eq!(assignment["s2"], "b");
    }

    #[test]
    fn test_manual_unknown_session() {
        let csv_data = "ID,session,treatment\n1,s1,a\n";
        let roster = Roster::from_csv(csv_data.as_bytes(), "ID").unwrap();

        let err = manual(&roster, "treatment", "session", &["s9".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSessionTreatment(s) if s == "s9"));
    }

    #[test]
    fn test_record_level_never_mutates_caller_roster() {
        let roster = sample_roster(6);
        let before = roster.clone();
        let mut rng = StdRng::seed_from_u64(1);

        let _ = simple_random_assignment(&labels(&["a", "b"]), &roster, &mut rng);
        let _ = complete_random_assignment(&labels(&["a", "b"]), &roster);

        assert_eq!(roster.records(), before.records());
        assert!(roster.records().iter().all(|r| r.get("treatment").is_none()));
    }

    #[test]
    fn test_complete_random_assignment_round_robin_over_records() {
        let roster = sample_roster(5);
        let result = complete_random_assignment(&labels(&["a", "b"]), &roster);

        let treatments: Vec<&str> = result
            .roster
            .records()
            .iter()
            .map(|r| r.get("treatment").unwrap())
            .collect();
        assert_eq!(treatments, vec!["a", "b", "a", "b", "a"]);
        assert_eq!(result.assignment["a"].len(), 3);
        assert_eq!(result.assignment["b"].len(), 2);
    }

    #[test]
    fn test_block_random_assignment_covers_everyone() {
        let roster = sample_roster(9);
        let mut rng = StdRng::seed_from_u64(11);
        let result =
            block_random_assignment(&labels(&["a", "b", "c"]), &roster, 3, &mut rng).unwrap();

        // Every record got both columns
        for record in result.roster.records() {
            assert!(record.get("block").is_some());
            assert!(record.get("treatment").is_some());
        }
        let total: usize = result.assignment.values().map(|ids| ids.len()).sum();
        assert_eq!(total, 9);
    }

    #[test]
    fn test_block_random_assignment_remainder_wraps() {
        // 7 records, block size 3 -> 2 blocks; the remainder record wraps
        let roster = sample_roster(7);
        let mut rng = StdRng::seed_from_u64(3);
        let result = block_random_assignment(&labels(&["a", "b"]), &roster, 3, &mut rng).unwrap();

        let total: usize = result.assignment.values().map(|ids| ids.len()).sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn test_block_random_assignment_oversized_block() {
        let roster = sample_roster(2);
        let mut rng = StdRng::seed_from_u64(3);
        let err = block_random_assignment(&labels(&["a"]), &roster, 5, &mut rng).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBlockSize { .. }));
    }

    #[test]
    fn test_cluster_random_assignment_uniform_within_cluster() {
        let records: Vec<RosterRecord> = (0..8)
            .map(|i| RosterRecord {
                id: i.to_string(),
                attributes: vec![("region".to_string(), if i < 4 { "north" } else { "south" }.to_string())],
            })
            .collect();
        let roster = Roster::new("ID", records).unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let result =
            cluster_random_assignment(&labels(&["a", "b"]), &roster, "region", &mut rng).unwrap();

        let north: Vec<&str> = result
            .roster
            .records()
            .iter()
            .filter(|r| r.get("region") == Some("north"))
            .map(|r| r.get("treatment").unwrap())
            .collect();
        assert!(north.windows(2).all(|w| w[0] == w[1]));

        let south_label = result
            .roster
            .records()
            .iter()
            .find(|r| r.get("region") == Some("south"))
            .and_then(|r| r.get("treatment"))
            .unwrap();
        // Two clusters, two labels: round robin gives each cluster a distinct label
        assert_ne!(north[0], south_label);
    }

    #[test]
    fn test_payload_render() {
        let text = TreatmentPayload::Text("read this ad".to_string());
        assert_eq!(text.render(), "read this ad");

        let levels = TreatmentPayload::Levels(BTreeMap::from([
            ("color".to_string(), "red".to_string()),
            ("price".to_string(), "high".to_string()),
        ]));
        assert_eq!(levels.render(), "color: red, price: high");
    }

    #[test]
    fn test_payload_deserializes_untagged() {
        let text: TreatmentPayload = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(text, TreatmentPayload::Text("plain".to_string()));

        let levels: TreatmentPayload =
            serde_json::from_str(r#"{"price": "high"}"#).unwrap();
        assert!(matches!(levels, TreatmentPayload::Levels(_)));
    }
}
