//! Planner - turns desired configs and prior state into an ordered change set

use crate::diff::diff_resource;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::schema::{ID_ATTRIBUTE, ResourceSchema, SchemaRegistry};
use crate::state::StateStore;
use crate::types::{
    Action, ChangeSet, DesiredConfig, PlanMode, PlanOptions, PlannedChange, PlannedValue,
    PriorState, Reference, ResourceAddress,
};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Computes plans; never calls the remote API
pub struct Planner<'a> {
    registry: &'a SchemaRegistry,
    store: &'a StateStore,
}

/// A desired config that passed schema validation
struct Validated<'a> {
    address: &'a ResourceAddress,
    schema: &'a ResourceSchema,
    attributes: BTreeMap<String, PlannedValue>,
    references: Vec<ResourceAddress>,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a StateStore) -> Self {
        Self { registry, store }
    }

    /// Build the change set for `desired`.
    ///
    /// Every config is validated before anything is diffed, so a single bad
    /// config or a reference cycle fails the whole plan.
    pub fn plan(&self, desired: &[DesiredConfig], options: &PlanOptions) -> Result<ChangeSet> {
        let changes = match options.mode {
            PlanMode::Normal => self.plan_converge(desired)?,
            PlanMode::Destroy => self.plan_destroy(),
        };

        let changes = order_changes(with_delete_ordering(changes))?;
        let changes = filter_by_target(changes, options.target.as_deref());

        log::debug!(
            "Planned {} changes ({} with effect)",
            changes.len(),
            changes.iter().filter(|c| c.action.is_change()).count()
        );
        Ok(ChangeSet::new(changes))
    }

    fn plan_converge(&self, desired: &[DesiredConfig]) -> Result<Vec<PlannedChange>> {
        let validated = self.validate_all(desired)?;
        let graph = DependencyGraph::new(
            validated
                .iter()
                .map(|v| (v.address, v.references.as_slice())),
        );
        let order = graph.topological_order()?;

        let mut changes: Vec<PlannedChange> = Vec::with_capacity(validated.len() + self.store.len());
        let mut position: HashMap<ResourceAddress, usize> = HashMap::new();

        for i in order {
            let v = &validated[i];
            let resolved: BTreeMap<String, PlannedValue> = v
                .attributes
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        PlannedValue::Pending(reference) => position
                            .get(&reference.address)
                            .map_or_else(
                                || value.clone(),
                                |&p| self.resolve_reference(reference, &changes[p]),
                            ),
                        PlannedValue::Known(_) => value.clone(),
                    };
                    (name.clone(), value)
                })
                .collect();

            let prior = self.store.get(v.address);
            let diff = diff_resource(v.schema, prior.as_ref(), &resolved);

            position.insert(v.address.clone(), changes.len());
            changes.push(PlannedChange {
                address: v.address.clone(),
                action: diff.action,
                deltas: diff.deltas,
                desired: diff.desired,
                prior,
                depends_on: v.references.clone(),
            });
        }

        for (address, prior) in self.store.entries() {
            if !position.contains_key(&address) {
                log::debug!("{address} is no longer declared, planning delete");
                changes.push(delete_change(address, prior));
            }
        }

        Ok(changes)
    }

    fn plan_destroy(&self) -> Vec<PlannedChange> {
        self.store
            .entries()
            .into_iter()
            .map(|(address, prior)| delete_change(address, prior))
            .collect()
    }

    fn validate_all<'d>(&'d self, desired: &'d [DesiredConfig]) -> Result<Vec<Validated<'d>>>
    where
        'a: 'd,
    {
        let mut seen = HashSet::new();
        let mut validated = Vec::with_capacity(desired.len());

        for config in desired {
            let schema = self.registry.lookup(&config.address.kind)?;
            if !seen.insert(&config.address) {
                return Err(Error::validation(&config.address, "declared more than once"));
            }
            let attributes = schema.validate(config)?;

            let mut references = Vec::new();
            for value in attributes.values() {
                if let PlannedValue::Pending(r) = value
                    && !references.contains(&r.address)
                {
                    references.push(r.address.clone());
                }
            }

            validated.push(Validated {
                address: &config.address,
                schema,
                attributes,
                references,
            });
        }

        let schemas: HashMap<&ResourceAddress, &ResourceSchema> =
            validated.iter().map(|v| (v.address, v.schema)).collect();

        for v in &validated {
            for (name, value) in &v.attributes {
                let PlannedValue::Pending(reference) = value else {
                    continue;
                };
                check_reference(v, name, reference, &schemas)?;
            }
        }

        Ok(validated)
    }

    /// Resolve a reference against the already planned change of its target.
    ///
    /// Values the target will only learn from the remote API stay pending.
    fn resolve_reference(&self, reference: &Reference, target: &PlannedChange) -> PlannedValue {
        let pending = PlannedValue::Pending(reference.clone());
        if matches!(target.action, Action::Create | Action::Replace) {
            return pending;
        }
        let Some(prior) = target.prior.as_ref() else {
            return pending;
        };

        if reference.attribute == ID_ATTRIBUTE {
            return PlannedValue::Known(Value::String(prior.id.clone()));
        }

        let computed = self
            .registry
            .lookup(&reference.address.kind)
            .ok()
            .and_then(|s| s.get(&reference.attribute))
            .is_some_and(|a| a.is_computed());

        let from_prior = || {
            prior
                .get(&reference.attribute)
                .map_or_else(|| pending.clone(), |v| PlannedValue::Known(v.clone()))
        };

        if computed {
            return if target.action == Action::Update {
                pending.clone()
            } else {
                from_prior()
            };
        }

        match target.desired.get(&reference.attribute) {
            Some(PlannedValue::Known(v)) => PlannedValue::Known(v.clone()),
            Some(PlannedValue::Pending(_)) => pending.clone(),
            None => from_prior(),
        }
    }
}

/// Targets must be declared, have the attribute, and agree on its type.
fn check_reference(
    source: &Validated<'_>,
    name: &str,
    reference: &Reference,
    schemas: &HashMap<&ResourceAddress, &ResourceSchema>,
) -> Result<()> {
    let Some(target) = schemas.get(&reference.address) else {
        return Err(Error::validation(
            source.address,
            format!("attribute '{name}' references undeclared resource {}", reference.address),
        ));
    };
    let Some(target_attr) = target.get(&reference.attribute) else {
        return Err(Error::validation(
            source.address,
            format!(
                "attribute '{name}' references {}, which has no attribute '{}'",
                reference.address, reference.attribute
            ),
        ));
    };
    if let Some(source_attr) = source.schema.get(name)
        && source_attr.value_type != target_attr.value_type
    {
        return Err(Error::validation(
            source.address,
            format!(
                "attribute '{name}' expects {} but {reference} is {}",
                source_attr.value_type, target_attr.value_type
            ),
        ));
    }
    Ok(())
}

fn delete_change(address: ResourceAddress, prior: PriorState) -> PlannedChange {
    PlannedChange {
        address,
        action: Action::Delete,
        deltas: Vec::new(),
        desired: BTreeMap::new(),
        prior: Some(prior),
        depends_on: Vec::new(),
    }
}

/// A delete waits for every changing resource that last referenced it, so
/// dependents are removed or repointed first.
fn with_delete_ordering(mut changes: Vec<PlannedChange>) -> Vec<PlannedChange> {
    let referrers: Vec<(ResourceAddress, Vec<ResourceAddress>)> = changes
        .iter()
        .filter(|c| c.action.is_change())
        .filter_map(|c| {
            c.prior
                .as_ref()
                .map(|p| (c.address.clone(), p.dependencies.clone()))
        })
        .collect();

    for change in changes.iter_mut().filter(|c| c.action == Action::Delete) {
        for (referrer, dependencies) in &referrers {
            if referrer != &change.address
                && dependencies.contains(&change.address)
                && !change.depends_on.contains(referrer)
            {
                change.depends_on.push(referrer.clone());
            }
        }
    }
    changes
}

/// Order changes so dependencies come first.
fn order_changes(changes: Vec<PlannedChange>) -> Result<Vec<PlannedChange>> {
    let graph = DependencyGraph::new(changes.iter().map(|c| (&c.address, c.depends_on.as_slice())));
    let order = graph.topological_order()?;

    let mut slots: Vec<Option<PlannedChange>> = changes.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Keep changes matching `target` plus everything they depend on.
///
/// Target format: "kind" or "kind.name"
fn filter_by_target(changes: Vec<PlannedChange>, target: Option<&str>) -> Vec<PlannedChange> {
    let Some(target) = target else {
        return changes;
    };
    let (kind, name) = parse_target(target);

    let mut keep: HashSet<ResourceAddress> = changes
        .iter()
        .filter(|c| matches_filter(&c.address, &kind, name.as_deref()))
        .map(|c| c.address.clone())
        .collect();

    if keep.is_empty() {
        log::warn!("Target '{target}' matches no resources");
    }

    let by_address: HashMap<&ResourceAddress, &PlannedChange> =
        changes.iter().map(|c| (&c.address, c)).collect();
    let mut queue: Vec<ResourceAddress> = keep.iter().cloned().collect();
    while let Some(address) = queue.pop() {
        if let Some(change) = by_address.get(&address) {
            for dep in &change.depends_on {
                if keep.insert(dep.clone()) {
                    queue.push(dep.clone());
                }
            }
        }
    }

    changes
        .into_iter()
        .filter(|c| keep.contains(&c.address))
        .collect()
}

/// Parse a target string like "kind.name" into (kind, name)
fn parse_target(target: &str) -> (String, Option<String>) {
    match target.split_once('.') {
        Some((kind, name)) => (kind.to_string(), Some(name.to_string())),
        None => (target.to_string(), None),
    }
}

/// Check if an address matches the filter criteria
fn matches_filter(address: &ResourceAddress, kind: &str, name: Option<&str>) -> bool {
    if address.kind != kind {
        return false;
    }

    if let Some(n) = name
        && address.name != n
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{desired, registry};
    use serde_json::json;

    fn monitor(name: &str, threshold: f64) -> DesiredConfig {
        desired(
            "monitor",
            name,
            json!({"name": name, "type": "metric alert", "query": "avg:cpu > 80", "threshold": threshold}),
        )
    }

    fn downtime(name: &str, monitor: &str) -> DesiredConfig {
        desired(
            "downtime",
            name,
            json!({"name": name, "scope": "env:prod", "monitor_id": format!("${{monitor.{monitor}.id}}")}),
        )
    }

    fn monitor_state(id: &str, name: &str, threshold: f64) -> PriorState {
        PriorState::new(
            id,
            BTreeMap::from([
                ("id".to_string(), Value::from(id)),
                ("name".to_string(), Value::from(name)),
                ("type".to_string(), Value::from("metric alert")),
                ("query".to_string(), Value::from("avg:cpu > 80")),
                ("threshold".to_string(), Value::Number(threshold)),
                ("notify_no_data".to_string(), Value::Bool(false)),
            ]),
        )
    }

    fn store_with(entries: Vec<(ResourceAddress, PriorState)>) -> StateStore {
        let store = StateStore::in_memory();
        for (address, state) in entries {
            store.put(&address, state).unwrap();
        }
        store
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("monitor"), ("monitor".to_string(), None));
        assert_eq!(
            parse_target("monitor.cpu"),
            ("monitor".to_string(), Some("cpu".to_string()))
        );
    }

    #[test]
    fn test_empty_state_creates_in_dependency_order() {
        let registry = registry();
        let store = StateStore::in_memory();
        let planner = Planner::new(&registry, &store);

        let plan = planner
            .plan(&[downtime("weekend", "cpu"), monitor("cpu", 80.0)], &PlanOptions::default())
            .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.changes[0].address, ResourceAddress::new("monitor", "cpu"));
        assert_eq!(plan.changes[1].action, Action::Create);
        assert_eq!(
            plan.changes[1].depends_on,
            vec![ResourceAddress::new("monitor", "cpu")]
        );
        assert!(matches!(
            plan.changes[1].desired.get("monitor_id"),
            Some(PlannedValue::Pending(_))
        ));
    }

    #[test]
    fn test_reference_to_unchanged_target_is_known() {
        let registry = registry();
        let store = store_with(vec![(
            ResourceAddress::new("monitor", "cpu"),
            monitor_state("42", "cpu", 80.0),
        )]);
        let planner = Planner::new(&registry, &store);

        let plan = planner
            .plan(&[monitor("cpu", 80.0), downtime("weekend", "cpu")], &PlanOptions::default())
            .unwrap();

        assert_eq!(plan.changes[0].action, Action::NoOp);
        assert_eq!(
            plan.changes[1].desired.get("monitor_id"),
            Some(&PlannedValue::Known(Value::from("42")))
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let registry = registry();
        let store = StateStore::in_memory();
        let err = Planner::new(&registry, &store)
            .plan(&[desired("dashboard", "main", json!({}))], &PlanOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownKind);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let registry = registry();
        let store = StateStore::in_memory();
        let err = Planner::new(&registry, &store)
            .plan(&[monitor("cpu", 80.0), monitor("cpu", 90.0)], &PlanOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_reference_to_undeclared_resource_rejected() {
        let registry = registry();
        let store = StateStore::in_memory();
        let err = Planner::new(&registry, &store)
            .plan(&[downtime("weekend", "missing")], &PlanOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("undeclared resource monitor.missing"));
    }

    #[test]
    fn test_reference_type_mismatch_rejected() {
        let registry = registry();
        let store = StateStore::in_memory();
        let bad = desired(
            "downtime",
            "weekend",
            json!({"name": "w", "scope": "env:prod", "monitor_id": "${monitor.cpu.threshold}"}),
        );
        let err = Planner::new(&registry, &store)
            .plan(&[monitor("cpu", 80.0), bad], &PlanOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_cycle_rejected() {
        let registry = registry();
        let store = StateStore::in_memory();
        let a = desired(
            "downtime",
            "a",
            json!({"name": "a", "scope": "${downtime.b.scope}"}),
        );
        let b = desired(
            "downtime",
            "b",
            json!({"name": "b", "scope": "${downtime.a.scope}"}),
        );

        let err = Planner::new(&registry, &store)
            .plan(&[a, b], &PlanOptions::default())
            .unwrap_err();
        let Error::CyclicDependency { cycle } = err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn test_orphans_deleted_dependents_first() {
        let registry = registry();
        let mut downtime_state = PriorState::new(
            "d1",
            BTreeMap::from([("name".to_string(), Value::from("weekend"))]),
        );
        downtime_state.dependencies = vec![ResourceAddress::new("monitor", "cpu")];
        let store = store_with(vec![
            (ResourceAddress::new("monitor", "cpu"), monitor_state("42", "cpu", 80.0)),
            (ResourceAddress::new("downtime", "weekend"), downtime_state),
        ]);

        let plan = Planner::new(&registry, &store)
            .plan(&[], &PlanOptions::default())
            .unwrap();

        assert_eq!(plan.count(Action::Delete), 2);
        assert_eq!(plan.changes[0].address, ResourceAddress::new("downtime", "weekend"));
        assert_eq!(
            plan.changes[1].depends_on,
            vec![ResourceAddress::new("downtime", "weekend")]
        );
    }

    #[test]
    fn test_destroy_ignores_desired() {
        let registry = registry();
        let store = store_with(vec![(
            ResourceAddress::new("monitor", "cpu"),
            monitor_state("42", "cpu", 80.0),
        )]);
        let options = PlanOptions {
            mode: PlanMode::Destroy,
            target: None,
        };

        let plan = Planner::new(&registry, &store)
            .plan(&[monitor("cpu", 80.0)], &options)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.changes[0].action, Action::Delete);
    }

    #[test]
    fn test_target_keeps_dependencies() {
        let registry = registry();
        let store = StateStore::in_memory();
        let options = PlanOptions {
            mode: PlanMode::Normal,
            target: Some("downtime.weekend".into()),
        };

        let plan = Planner::new(&registry, &store)
            .plan(
                &[monitor("cpu", 80.0), monitor("disk", 90.0), downtime("weekend", "cpu")],
                &options,
            )
            .unwrap();

        let addresses: Vec<String> = plan.iter().map(|c| c.address.to_string()).collect();
        assert_eq!(addresses, vec!["monitor.cpu", "downtime.weekend"]);
    }
}
