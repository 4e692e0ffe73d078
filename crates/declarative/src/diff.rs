//! Diff computation for resources
//!
//! Compares desired attributes against prior state one attribute at a time
//! and decides the action for a single resource.

use crate::schema::{OnOmit, ResourceSchema};
use crate::types::{Action, AttributeDelta, ChangeSet, PlannedChange, PlannedValue, PriorState};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};

/// Result of diffing one resource
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    pub action: Action,
    /// Exactly the attributes whose desired value differs from prior
    pub deltas: Vec<AttributeDelta>,
    /// Every attribute the resource should end up with
    pub desired: BTreeMap<String, PlannedValue>,
}

/// Decide the action for one resource.
///
/// Computed attributes are never compared. An attribute omitted from
/// `desired` is left untouched unless its schema resets it to a default.
/// A changed force-new attribute turns the whole change into a Replace.
pub fn diff_resource(
    schema: &ResourceSchema,
    prior: Option<&PriorState>,
    desired: &BTreeMap<String, PlannedValue>,
) -> ResourceDiff {
    let mut full = BTreeMap::new();
    let mut deltas = Vec::new();

    for attr in schema.attributes() {
        if attr.is_computed() {
            continue;
        }

        let wanted = match (desired.get(&attr.name), &attr.on_omit) {
            (Some(value), _) => value.clone(),
            (None, OnOmit::ResetToDefault(default)) => PlannedValue::Known(default.clone()),
            (None, OnOmit::Ignore) => continue,
        };

        let old = prior.and_then(|p| p.get(&attr.name));
        let new = match (&wanted, old) {
            (PlannedValue::Known(v), Some(o)) if matches_prior(v, o) => None,
            (PlannedValue::Known(v), Some(o)) => Some(PlannedValue::Known(overlay(o, v))),
            (wanted, _) => Some(wanted.clone()),
        };

        if let Some(new) = new {
            deltas.push(AttributeDelta {
                name: attr.name.clone(),
                old: old.cloned(),
                new,
                force_new: attr.force_new,
                sensitive: attr.sensitive,
            });
        }
        full.insert(attr.name.clone(), wanted);
    }

    let action = if prior.is_none() {
        Action::Create
    } else if deltas.is_empty() {
        Action::NoOp
    } else if deltas.iter().any(|d| d.force_new) {
        Action::Replace
    } else {
        Action::Update
    };

    ResourceDiff {
        action,
        deltas,
        desired: full,
    }
}

/// Type-aware comparison of a desired value against prior state.
///
/// Lists compare positionally, sets ignore order, and blocks only compare
/// the fields the desired value sets.
pub fn matches_prior(desired: &Value, prior: &Value) -> bool {
    match (desired, prior) {
        (Value::Block(want), Value::Block(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).is_some_and(|h| matches_prior(v, h))),
        (Value::List(want), Value::List(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| matches_prior(w, h))
        }
        (Value::Set(want), Value::Set(have)) => {
            want.len() == have.len() && want.iter().all(|w| have.iter().any(|h| matches_prior(w, h)))
        }
        (Value::Map(want), Value::Map(have)) => {
            want.len() == have.len()
                && want
                    .iter()
                    .all(|(k, v)| have.get(k).is_some_and(|h| matches_prior(v, h)))
        }
        _ => desired == prior,
    }
}

/// Lay desired block fields over the prior block so an update never resets
/// fields the config leaves out.
fn overlay(prior: &Value, desired: &Value) -> Value {
    match (prior, desired) {
        (Value::Block(have), Value::Block(want)) => {
            let mut merged = have.clone();
            for (k, v) in want {
                let value = match have.get(k) {
                    Some(h) => overlay(h, v),
                    None => v.clone(),
                };
                merged.insert(k.clone(), value);
            }
            Value::Block(merged)
        }
        _ => desired.clone(),
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify in place
    pub modifications: usize,
    /// Number of resources to delete and recreate
    pub replacements: usize,
}

impl DiffSummary {
    /// Create a summary from a change set
    pub fn from_changes(changes: &ChangeSet) -> Self {
        let mut summary = Self::default();
        for change in changes.iter() {
            match change.action {
                Action::Create => summary.additions += 1,
                Action::Delete => summary.removals += 1,
                Action::Update => summary.modifications += 1,
                Action::Replace => summary.replacements += 1,
                Action::NoOp => {}
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.replacements
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group changes by resource kind
pub fn group_by_kind(changes: &ChangeSet) -> HashMap<&str, Vec<&PlannedChange>> {
    let mut groups: HashMap<&str, Vec<&PlannedChange>> = HashMap::new();
    for change in changes.iter() {
        groups
            .entry(change.address.kind.as_str())
            .or_default()
            .push(change);
    }
    groups
}
