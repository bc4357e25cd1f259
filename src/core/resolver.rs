use crate::core::duplicate::DuplicatePair;
use crate::core::record::LocationRecord;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("Contract violation: duplicate pair ({id_a}, {id_b}) references unknown record {missing}")]
    ContractViolation { id_a: i64, id_b: i64, missing: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    RemovedDuplicate,
}

impl From<ResolutionAction> for String {
    fn from(action: ResolutionAction) -> Self {
        action.to_string()
    }
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionAction::RemovedDuplicate => f.write_str("removed_duplicate"),
        }
    }
}

/// One removed record and why it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionDecision {
    pub removed_id: i64,
    /// The record that remains in the cleaned set on behalf of `removed_id`.
    pub survivor_id: i64,
    /// First-scanned side of the pair that caused the removal.
    pub matched_id: i64,
    pub similarity_score: u8,
    pub distance_meters: f64,
    pub action: ResolutionAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub removed: BTreeSet<i64>,
    pub cleaned: Vec<LocationRecord>,
    pub decisions: Vec<ResolutionDecision>,
}

impl Resolution {
    /// Ids that absorbed at least one removed record.
    pub fn survivors(&self) -> BTreeSet<i64> {
        self.decisions.iter().map(|d| d.survivor_id).collect()
    }
}

/// Earliest-wins resolution: the second record of every pair is removed.
#[derive(Debug, Default)]
pub struct Resolver;

impl Resolver {
    pub fn new() -> Self {
        Self
    }

    /// Apply `pairs` (in detector scan order) to `records`.
    ///
    /// A record removed by several pairs is attributed to the first one. The
    /// reported survivor follows `id_a` through earlier removals, so a chain
    /// `A~B, B~C` attributes both B and C to A.
    pub fn resolve(
        &self,
        records: &[LocationRecord],
        pairs: &[DuplicatePair],
    ) -> Result<Resolution, ResolveError> {
        let known: HashSet<i64> = records.iter().map(|r| r.id).collect();

        let mut removed = BTreeSet::new();
        // removed id -> id it was merged into
        let mut merged_into: HashMap<i64, i64> = HashMap::new();
        let mut decisions = Vec::new();

        for pair in pairs {
            for id in [pair.id_a, pair.id_b] {
                if !known.contains(&id) {
                    return Err(ResolveError::ContractViolation {
                        id_a: pair.id_a,
                        id_b: pair.id_b,
                        missing: id,
                    });
                }
            }

            if !removed.insert(pair.id_b) {
                debug!(
                    "Record {} already removed, skipping pair ({}, {})",
                    pair.id_b, pair.id_a, pair.id_b
                );
                continue;
            }

            let survivor_id = canonical(&merged_into, pair.id_a);
            merged_into.insert(pair.id_b, survivor_id);

            debug!("Removing {} (kept {})", pair.id_b, survivor_id);
            decisions.push(ResolutionDecision {
                removed_id: pair.id_b,
                survivor_id,
                matched_id: pair.id_a,
                similarity_score: pair.similarity_score,
                distance_meters: pair.distance_meters,
                action: ResolutionAction::RemovedDuplicate,
            });
        }

        let cleaned: Vec<LocationRecord> = records
            .iter()
            .filter(|r| !removed.contains(&r.id))
            .cloned()
            .collect();

        info!(
            "Cleaned data: {} -> {} locations",
            records.len(),
            cleaned.len()
        );

        Ok(Resolution {
            removed,
            cleaned,
            decisions,
        })
    }
}

fn canonical(merged_into: &HashMap<i64, i64>, id: i64) -> i64 {
    // Targets are always resolved at insertion time, so one hop suffices
    merged_into.get(&id).copied().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(ids: &[i64]) -> Vec<LocationRecord> {
        ids.iter()
            .map(|&id| LocationRecord::new(id, format!("Coffee {id}"), -6.2, 106.8))
            .collect()
    }

    fn pair(id_a: i64, id_b: i64) -> DuplicatePair {
        DuplicatePair {
            id_a,
            id_b,
            similarity_score: 90,
            distance_meters: 12.5,
        }
    }

    #[test]
    fn test_second_of_pair_is_removed() {
        let resolution = Resolver::new()
            .resolve(&records(&[1, 2, 3]), &[pair(1, 2)])
            .unwrap();

        assert_eq!(resolution.removed, BTreeSet::from([2]));
        assert_eq!(
            resolution.cleaned.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(resolution.decisions.len(), 1);
        let decision = &resolution.decisions[0];
        assert_eq!(decision.removed_id, 2);
        assert_eq!(decision.survivor_id, 1);
        assert_eq!(decision.matched_id, 1);
        assert_eq!(decision.similarity_score, 90);
        assert_eq!(decision.distance_meters, 12.5);
        assert_eq!(decision.action, ResolutionAction::RemovedDuplicate);
    }

    #[test]
    fn test_mutual_triple_keeps_first() {
        let resolution = Resolver::new()
            .resolve(&records(&[1, 2, 3]), &[pair(1, 2), pair(1, 3), pair(2, 3)])
            .unwrap();

        assert_eq!(resolution.removed, BTreeSet::from([2, 3]));
        assert_eq!(resolution.decisions.len(), 2);
        assert_eq!(resolution.decisions[0].removed_id, 2);
        assert_eq!(resolution.decisions[1].removed_id, 3);
        assert!(resolution.decisions.iter().all(|d| d.survivor_id == 1));
        assert_eq!(resolution.survivors(), BTreeSet::from([1]));
    }

    #[test]
    fn test_chain_collapses_to_earliest() {
        let resolution = Resolver::new()
            .resolve(&records(&[1, 2, 3]), &[pair(1, 2), pair(2, 3)])
            .unwrap();

        assert_eq!(resolution.removed, BTreeSet::from([2, 3]));
        let chained = &resolution.decisions[1];
        assert_eq!(chained.removed_id, 3);
        assert_eq!(chained.matched_id, 2);
        assert_eq!(chained.survivor_id, 1);
    }

    #[test]
    fn test_unflagged_records_are_untouched() {
        let input = records(&[5, 6, 7, 8]);
        let resolution = Resolver::new().resolve(&input, &[pair(6, 8)]).unwrap();

        assert_eq!(resolution.removed, BTreeSet::from([8]));
        assert_eq!(resolution.cleaned, vec![input[0].clone(), input[1].clone(), input[2].clone()]);
    }

    #[test]
    fn test_no_pairs() {
        let input = records(&[1, 2]);
        let resolution = Resolver::new().resolve(&input, &[]).unwrap();
        assert!(resolution.removed.is_empty());
        assert!(resolution.decisions.is_empty());
        assert_eq!(resolution.cleaned, input);
    }

    #[test]
    fn test_unknown_identity_is_contract_violation() {
        let err = Resolver::new()
            .resolve(&records(&[1, 2]), &[pair(1, 2), pair(1, 99)])
            .unwrap_err();

        assert_eq!(
            err,
            ResolveError::ContractViolation {
                id_a: 1,
                id_b: 99,
                missing: 99
            }
        );
    }

    #[test]
    fn test_action_label() {
        assert_eq!(ResolutionAction::RemovedDuplicate.to_string(), "removed_duplicate");
        assert_eq!(
            serde_json::to_string(&ResolutionAction::RemovedDuplicate).unwrap(),
            "\"removed_duplicate\""
        );
    }
}
