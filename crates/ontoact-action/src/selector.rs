//! Object selection.
//!
//! The selector resolves which object instances an action applies to. The
//! scheduler only builds the condition it passes in: the action type's own
//! condition in scan mode, or that condition intersected with the caller's
//! instance identities in targeted mode.

use async_trait::async_trait;
use serde_json::{Map, Value};

use ontoact_core::types::{Condition, ObjectRow};

use crate::error::SchedulerError;

/// Resolves object rows matching a condition.
///
/// Implementations return every match (no paging). Each row carries the
/// `_instance_id`, `_instance_identity` and `_display` system fields plus the
/// object's properties.
#[async_trait]
pub trait ObjectSelector: Send + Sync {
    async fn resolve(
        &self,
        kn_id: &str,
        branch: &str,
        object_type_id: &str,
        condition: Option<&Condition>,
    ) -> Result<Vec<ObjectRow>, SchedulerError>;
}

/// Build a condition matching any of the given identities.
///
/// Each identity becomes an `==` leaf per key (joined with `and` when there
/// are several keys); several identities are joined with `or`. Returns `None`
/// when no identity carries a key.
pub fn build_instance_identities_condition(
    identities: &[Map<String, Value>],
) -> Option<Condition> {
    let mut per_identity: Vec<Condition> = identities
        .iter()
        .filter_map(identity_condition)
        .collect();

    match per_identity.len() {
        0 => None,
        1 => per_identity.pop(),
        _ => Some(Condition::or(per_identity)),
    }
}

fn identity_condition(identity: &Map<String, Value>) -> Option<Condition> {
    let mut keys: Vec<&String> = identity.keys().collect();
    keys.sort();

    let mut leaves: Vec<Condition> = keys
        .into_iter()
        .map(|k| Condition::eq(k.as_str(), identity[k.as_str()].clone()))
        .collect();

    match leaves.len() {
        0 => None,
        1 => leaves.pop(),
        _ => Some(Condition::and(leaves)),
    }
}

/// The condition handed to the selector for one request.
///
/// Scan mode (no identities) uses the action type's condition verbatim.
/// Targeted mode ANDs the identity match with the action type's condition
/// when it has one.
pub fn effective_condition(
    action_condition: Option<&Condition>,
    identities: &[Map<String, Value>],
) -> Option<Condition> {
    if identities.is_empty() {
        return action_condition.cloned();
    }

    match (build_instance_identities_condition(identities), action_condition) {
        (Some(targeted), Some(own)) => Some(Condition::and(vec![targeted, own.clone()])),
        (Some(targeted), None) => Some(targeted),
        (None, own) => own.cloned(),
    }
}
