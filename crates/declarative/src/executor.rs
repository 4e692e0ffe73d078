//! Reconciliation engine - applies change sets with bounded parallelism
//!
//! A coordinator on the calling thread hands ready changes to a rayon pool
//! and learns about completions over a channel. A change becomes ready once
//! every change it depends on has an outcome; if any of them did not reach
//! `Applied`, it is skipped instead of attempted. At most `jobs` changes are
//! handed out at a time, so a cancelled run leaves the rest undispatched.

use crate::adapter::ApiAdapter;
use crate::client::{ApiClient, RawAttributes, RemoteObject};
use crate::context::{CancelToken, ProgressCallback};
use crate::error::{ApiError, Error, ErrorKind, Result};
use crate::graph::DependencyGraph;
use crate::planner::Planner;
use crate::schema::{ResourceSchema, SchemaRegistry};
use crate::state::StateStore;
use crate::types::{
    Action, ApplyOptions, ApplySummary, ChangeSet, DesiredConfig, Outcome, PlanOptions,
    PlannedChange, PlannedValue, PriorState, ResourceAddress, ResourceOutcome,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;

/// Result of an apply run
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// One outcome per planned change, in change set order
    pub outcomes: Vec<ResourceOutcome>,
    pub summary: ApplySummary,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }
}

/// Result of comparing state against the remote API
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub unchanged: Vec<ResourceAddress>,
    /// Remote attributes differed from state; state now holds the remote values
    pub drifted: Vec<ResourceAddress>,
    /// The remote object is gone; the state entry was dropped
    pub removed: Vec<ResourceAddress>,
    pub failed: Vec<(ResourceAddress, String)>,
}

impl RefreshReport {
    fn merge(&mut self, other: Self) {
        self.unchanged.extend(other.unchanged);
        self.drifted.extend(other.drifted);
        self.removed.extend(other.removed);
        self.failed.extend(other.failed);
    }
}

/// Plans and applies changes for every registered kind
pub struct Reconciler<'a, C> {
    registry: &'a SchemaRegistry,
    adapter: &'a ApiAdapter<C>,
    store: &'a StateStore,
}

/// Desired values with every reference filled in, as JSON payloads
struct Resolved {
    /// Full attribute set, sent on create
    desired: RawAttributes,
    /// Changed attributes only, sent on update
    changes: RawAttributes,
}

impl<'a, C: ApiClient> Reconciler<'a, C> {
    pub fn new(registry: &'a SchemaRegistry, adapter: &'a ApiAdapter<C>, store: &'a StateStore) -> Self {
        Self {
            registry,
            adapter,
            store,
        }
    }

    /// Compute a change set without touching the remote API.
    pub fn plan(&self, desired: &[DesiredConfig], options: &PlanOptions) -> Result<ChangeSet> {
        Planner::new(self.registry, self.store).plan(desired, options)
    }

    /// Apply a change set.
    ///
    /// Returns an error only when the change set as a whole cannot be run
    /// (unknown kind, dependency cycle); in that case no remote call is made.
    /// Everything else is reported per resource in the returned outcomes.
    pub fn apply<P: ProgressCallback>(
        &self,
        changes: &ChangeSet,
        options: &ApplyOptions,
        progress: &mut P,
        cancel: &CancelToken,
    ) -> Result<ApplyReport> {
        for change in changes.iter() {
            self.registry.for_address(&change.address)?;
        }
        let mut schedule = Schedule::new(&changes.changes)?;

        let cancel = match options.timeout {
            Some(timeout) => cancel.with_timeout(timeout),
            None => cancel.clone(),
        };

        let jobs = options.jobs.max(1);
        log::info!("Applying {} changes with {jobs} workers", changes.len());
        progress.on_apply_start(changes.len());

        match rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
        {
            Ok(pool) => pool.in_place_scope(|scope| self.run(scope, &mut schedule, jobs, &cancel, progress)),
            Err(e) => {
                log::warn!("Failed to create thread pool ({e}), using the global pool");
                rayon::in_place_scope(|scope| self.run(scope, &mut schedule, jobs, &cancel, progress));
            }
        }

        let outcomes = schedule.into_outcomes();
        let summary = ApplySummary::from_outcomes(&outcomes);
        progress.on_apply_complete(&summary);
        Ok(ApplyReport { outcomes, summary })
    }

    /// Coordinate one run until every change has an outcome.
    fn run<'s, P: ProgressCallback>(
        &'s self,
        scope: &rayon::Scope<'s>,
        schedule: &mut Schedule<'s>,
        jobs: usize,
        cancel: &CancelToken,
        progress: &mut P,
    ) {
        let changes = schedule.changes;
        let (tx, rx) = mpsc::channel::<(usize, Outcome)>();
        let mut in_flight = 0usize;

        loop {
            while in_flight < jobs
                && let Some(index) = schedule.next_ready()
            {
                let change = &changes[index];

                let immediate = if let Some(dep) = schedule.blocked_by(index) {
                    Some(Outcome::Skipped {
                        reason: format!("dependency {dep} was not applied"),
                    })
                } else if change.action == Action::NoOp {
                    Some(Outcome::Applied {
                        state: change.prior.clone(),
                    })
                } else if cancel.is_cancelled() {
                    Some(cancelled())
                } else {
                    match self.resolve(change, &schedule.applied) {
                        Err(e) => Some(failed(&e)),
                        Ok(resolved) => {
                            progress.on_resource_start(&change.address, change.action);
                            in_flight += 1;
                            let tx = tx.clone();
                            let cancel = cancel.clone();
                            scope.spawn(move |_| {
                                let outcome = if cancel.is_cancelled() {
                                    cancelled()
                                } else {
                                    catch_unwind(AssertUnwindSafe(|| self.execute(change, &resolved)))
                                        .unwrap_or_else(|_| Outcome::Failed {
                                            kind: ErrorKind::Permanent,
                                            message: "worker panicked".to_string(),
                                        })
                                };
                                // The coordinator outlives every worker
                                let _ = tx.send((index, outcome));
                            });
                            None
                        }
                    }
                };

                if let Some(outcome) = immediate {
                    finish(schedule, index, outcome, progress);
                }
            }

            if in_flight == 0 {
                break;
            }
            match rx.recv() {
                Ok((index, outcome)) => {
                    in_flight -= 1;
                    finish(schedule, index, outcome, progress);
                }
                Err(_) => break,
            }
        }
    }

    /// Fill in references from this run's applied state, then from the store.
    fn resolve(
        &self,
        change: &PlannedChange,
        applied: &HashMap<ResourceAddress, PriorState>,
    ) -> Result<Resolved> {
        let value_of = |value: &PlannedValue| -> Result<serde_json::Value> {
            match value {
                PlannedValue::Known(v) => Ok(v.to_json()),
                PlannedValue::Pending(reference) => applied
                    .get(&reference.address)
                    .cloned()
                    .or_else(|| self.store.get(&reference.address))
                    .and_then(|state| state.get(&reference.attribute).map(|v| v.to_json()))
                    .ok_or_else(|| {
                        Error::validation(
                            &change.address,
                            format!("{reference} has no value after its resource was applied"),
                        )
                    }),
            }
        };

        let mut desired = RawAttributes::new();
        for (name, value) in &change.desired {
            desired.insert(name.clone(), value_of(value)?);
        }
        let mut changes = RawAttributes::new();
        for delta in &change.deltas {
            changes.insert(delta.name.clone(), value_of(&delta.new)?);
        }
        Ok(Resolved { desired, changes })
    }

    /// Perform one change against the remote API. Runs on a worker.
    fn execute(&self, change: &PlannedChange, resolved: &Resolved) -> Outcome {
        let result = match change.action {
            Action::Create => self.create(change, &resolved.desired).map(Some),
            Action::Update => self.update(change, &resolved.changes).map(Some),
            Action::Delete => self.delete(change).map(|()| None),
            Action::Replace => self.replace(change, &resolved.desired).map(Some),
            Action::NoOp => Ok(change.prior.clone()),
        };

        match result {
            Ok(state) => Outcome::Applied { state },
            Err(e) => failed(&e),
        }
    }

    fn create(&self, change: &PlannedChange, payload: &RawAttributes) -> Result<PriorState> {
        let kind = &change.address.kind;
        let schema = self.registry.for_address(&change.address)?;
        let created = self.adapter.create(kind, payload)?;
        log::debug!("Created {} as {kind}/{}", change.address, created.id);

        match self.adapter.confirm_created(kind, &created) {
            Ok(Some(observed)) => self.record(schema, &change.address, &observed, &change.depends_on),
            Ok(None) => {
                self.record(schema, &change.address, &created, &change.depends_on)?;
                Err(Error::PartialApply {
                    address: change.address.to_string(),
                    message: format!("created {} but it never became readable", created.id),
                })
            }
            Err(e) => {
                self.record(schema, &change.address, &created, &change.depends_on)?;
                Err(Error::PartialApply {
                    address: change.address.to_string(),
                    message: format!("created {} but reading it back failed: {e}", created.id),
                })
            }
        }
    }

    fn update(&self, change: &PlannedChange, payload: &RawAttributes) -> Result<PriorState> {
        let prior = prior_of(change)?;
        let schema = self.registry.for_address(&change.address)?;
        let updated = self.adapter.update(&change.address.kind, &prior.id, payload)?;
        self.record(schema, &change.address, &updated, &change.depends_on)
    }

    /// Delete the remote object; one that is already gone counts as deleted.
    fn delete(&self, change: &PlannedChange) -> Result<()> {
        let prior = prior_of(change)?;
        match self.adapter.delete(&change.address.kind, &prior.id) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                log::info!("{} was already deleted remotely", change.address);
            }
            Err(e) => return Err(e),
        }
        self.store.delete(&change.address)
    }

    /// Delete, then create. A failed delete stops the create.
    fn replace(&self, change: &PlannedChange, payload: &RawAttributes) -> Result<PriorState> {
        self.delete(change)?;
        match self.create(change, payload) {
            Ok(state) => Ok(state),
            Err(e @ Error::PartialApply { .. }) => Err(e),
            Err(e) => Err(Error::PartialApply {
                address: change.address.to_string(),
                message: format!("old object deleted but create failed: {e}"),
            }),
        }
    }

    /// Decode what the remote API returned and write it through to state.
    fn record(
        &self,
        schema: &ResourceSchema,
        address: &ResourceAddress,
        object: &RemoteObject,
        dependencies: &[ResourceAddress],
    ) -> Result<PriorState> {
        let attributes = schema
            .decode_remote(&object.id, &object.attributes)
            .map_err(|e| Error::Permanent(ApiError::InvalidResponse(e)))?;
        let mut state = PriorState::new(object.id.clone(), attributes);
        state.dependencies = dependencies.to_vec();
        self.store.put(address, state.clone())?;
        Ok(state)
    }

    /// Compare every state entry with the remote API.
    ///
    /// Kinds are listed in parallel. Attributes the listing leaves out keep
    /// their last observed value, since some list endpoints return summaries.
    pub fn refresh(&self) -> RefreshReport {
        let mut by_kind: BTreeMap<String, Vec<(ResourceAddress, PriorState)>> = BTreeMap::new();
        for (address, state) in self.store.entries() {
            by_kind
                .entry(address.kind.clone())
                .or_default()
                .push((address, state));
        }

        let reports: Vec<RefreshReport> = by_kind
            .par_iter()
            .map(|(kind, entries)| self.refresh_kind(kind, entries))
            .collect();

        let mut report = RefreshReport::default();
        for r in reports {
            report.merge(r);
        }
        log::info!(
            "Refreshed {} resources: {} drifted, {} removed, {} failed",
            report.unchanged.len() + report.drifted.len() + report.removed.len() + report.failed.len(),
            report.drifted.len(),
            report.removed.len(),
            report.failed.len()
        );
        report
    }

    fn refresh_kind(&self, kind: &str, entries: &[(ResourceAddress, PriorState)]) -> RefreshReport {
        let mut report = RefreshReport::default();
        let all_failed = |message: String| RefreshReport {
            failed: entries.iter().map(|(a, _)| (a.clone(), message.clone())).collect(),
            ..RefreshReport::default()
        };

        let schema = match self.registry.lookup(kind) {
            Ok(schema) => schema,
            Err(e) => return all_failed(e.to_string()),
        };
        let listing = match self.adapter.list_all(kind) {
            Ok(listing) => listing,
            Err(e) => return all_failed(e.to_string()),
        };
        let remote: HashMap<&str, &RemoteObject> =
            listing.iter().map(|o| (o.id.as_str(), o)).collect();

        for (address, prior) in entries {
            let Some(object) = remote.get(prior.id.as_str()) else {
                log::warn!("{address} ({}) no longer exists remotely", prior.id);
                match self.store.delete(address) {
                    Ok(()) => report.removed.push(address.clone()),
                    Err(e) => report.failed.push((address.clone(), e.to_string())),
                }
                continue;
            };

            let mut observed = match schema.decode_remote(&object.id, &object.attributes) {
                Ok(attributes) => attributes,
                Err(e) => {
                    report.failed.push((address.clone(), e));
                    continue;
                }
            };
            for (name, value) in &prior.attributes {
                observed.entry(name.clone()).or_insert_with(|| value.clone());
            }

            if observed == prior.attributes {
                report.unchanged.push(address.clone());
                continue;
            }

            log::info!("{address} drifted from state");
            let mut state = prior.clone();
            state.attributes = observed;
            match self.store.put(address, state) {
                Ok(()) => report.drifted.push(address.clone()),
                Err(e) => report.failed.push((address.clone(), e.to_string())),
            }
        }
        report
    }

    /// Bring an existing remote object under management.
    pub fn import(&self, address: &ResourceAddress, id: &str) -> Result<PriorState> {
        let schema = self.registry.for_address(address)?;
        if self.store.get(address).is_some() {
            return Err(Error::validation(
                address,
                "already managed; remove it from state before importing",
            ));
        }
        let object = self.adapter.read(&address.kind, id)?;
        let state = self.record(schema, address, &object, &[])?;
        log::info!("Imported {address} as {id}");
        Ok(state)
    }
}

fn prior_of(change: &PlannedChange) -> Result<&PriorState> {
    change
        .prior
        .as_ref()
        .ok_or_else(|| Error::validation(&change.address, "no prior state to act on"))
}

fn cancelled() -> Outcome {
    Outcome::Skipped {
        reason: "apply was cancelled".to_string(),
    }
}

fn failed(err: &Error) -> Outcome {
    Outcome::Failed {
        kind: err.kind(),
        message: err.to_string(),
    }
}

fn finish<P: ProgressCallback>(schedule: &mut Schedule<'_>, index: usize, outcome: Outcome, progress: &mut P) {
    let change = &schedule.changes[index];
    match &outcome {
        Outcome::Applied { .. } if change.action.is_change() => {
            log::info!("{}: {} complete", change.address, change.action);
        }
        Outcome::Applied { .. } => {}
        Outcome::Failed { .. } => log::warn!("{}: {}", change.address, outcome.cause()),
        Outcome::Skipped { reason } => log::info!("{}: skipped ({reason})", change.address),
    }
    progress.on_resource_complete(&change.address, change.action, &outcome);
    schedule.complete(index, outcome);
}

/// Dependency bookkeeping for one run, owned by the coordinator
struct Schedule<'c> {
    changes: &'c [PlannedChange],
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    /// Dependencies still without an outcome
    remaining: Vec<usize>,
    ready: VecDeque<usize>,
    outcomes: Vec<Option<Outcome>>,
    /// State produced during this run, for resolving references
    applied: HashMap<ResourceAddress, PriorState>,
}

impl<'c> Schedule<'c> {
    fn new(changes: &'c [PlannedChange]) -> Result<Self> {
        let graph = DependencyGraph::new(changes.iter().map(|c| (&c.address, c.depends_on.as_slice())));
        graph.topological_order()?;

        let remaining: Vec<usize> = graph.dependencies.iter().map(Vec::len).collect();
        let ready = (0..changes.len()).filter(|&i| remaining[i] == 0).collect();
        Ok(Self {
            changes,
            dependencies: graph.dependencies,
            dependents: graph.dependents,
            remaining,
            ready,
            outcomes: vec![None; changes.len()],
            applied: HashMap::new(),
        })
    }

    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop_front()
    }

    /// First dependency that did not reach `Applied`
    fn blocked_by(&self, index: usize) -> Option<&ResourceAddress> {
        self.dependencies[index]
            .iter()
            .find(|&&d| !self.outcomes[d].as_ref().is_some_and(Outcome::is_success))
            .map(|&d| &self.changes[d].address)
    }

    fn complete(&mut self, index: usize, outcome: Outcome) {
        if let Outcome::Applied { state: Some(state) } = &outcome {
            self.applied
                .insert(self.changes[index].address.clone(), state.clone());
        }
        self.outcomes[index] = Some(outcome);

        for &d in &self.dependents[index] {
            self.remaining[d] -= 1;
            if self.remaining[d] == 0 {
                self.ready.push_back(d);
            }
        }
    }

    fn into_outcomes(self) -> Vec<ResourceOutcome> {
        self.changes
            .iter()
            .zip(self.outcomes)
            .map(|(change, outcome)| ResourceOutcome {
                address: change.address.clone(),
                action: change.action,
                outcome: outcome.unwrap_or_else(|| Outcome::Skipped {
                    reason: "not reached".to_string(),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ApiAdapter;
    use crate::context::NoProgress;
    use crate::testing::{MockClient, Verb, desired, fast_config, registry};
    use crate::value::Value;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        registry: SchemaRegistry,
        adapter: ApiAdapter<MockClient>,
        store: StateStore,
    }

    impl Harness {
        fn new(client: MockClient) -> Self {
            Self {
                registry: registry(),
                adapter: ApiAdapter::new(client, fast_config()),
                store: StateStore::in_memory(),
            }
        }

        fn reconciler(&self) -> Reconciler<'_, MockClient> {
            Reconciler::new(&self.registry, &self.adapter, &self.store)
        }

        fn client(&self) -> &MockClient {
            self.adapter.client()
        }

        fn plan(&self, configs: &[DesiredConfig]) -> ChangeSet {
            self.reconciler().plan(configs, &PlanOptions::default()).unwrap()
        }

        fn apply(&self, changes: &ChangeSet) -> ApplyReport {
            self.reconciler()
                .apply(changes, &ApplyOptions::default(), &mut NoProgress, &CancelToken::new())
                .unwrap()
        }

        fn converge(&self, configs: &[DesiredConfig]) -> ApplyReport {
            let plan = self.plan(configs);
            self.apply(&plan)
        }

        fn id_of(&self, kind: &str, name: &str) -> String {
            self.store
                .get(&ResourceAddress::new(kind, name))
                .map(|s| s.id)
                .unwrap()
        }
    }

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

    #[test]
    fn test_scenario_create_noop_update() {
        let h = Harness::new(MockClient::new().starting_id(123));
        let cpu = desired("monitor", "cpu", json!({"name": "cpu-alert", "type": "metric alert", "threshold": 80}));

        let plan = h.plan(std::slice::from_ref(&cpu));
        assert_eq!(plan.changes[0].action, Action::Create);
        let report = h.apply(&plan);
        assert!(report.is_success());

        let state = h.store.get(&ResourceAddress::new("monitor", "cpu")).unwrap();
        assert_eq!(state.id, "123");
        assert_eq!(state.get("name"), Some(&Value::from("cpu-alert")));
        assert_eq!(state.get("threshold"), Some(&Value::Number(80.0)));

        let plan = h.plan(std::slice::from_ref(&cpu));
        assert_eq!(plan.changes[0].action, Action::NoOp);

        let changed = desired("monitor", "cpu", json!({"name": "cpu-alert", "type": "metric alert", "threshold": 90}));
        let plan = h.plan(&[changed]);
        assert_eq!(plan.changes[0].action, Action::Update);
        assert_eq!(plan.changes[0].changed_attributes(), vec!["threshold"]);
    }

    #[test]
    fn test_idempotent_after_apply() {
        let h = Harness::new(MockClient::new());
        let configs = [monitor("cpu", 80.0), monitor("disk", 90.0), downtime("weekend", "cpu")];
        assert!(h.converge(&configs).is_success());

        let plan = h.plan(&configs);
        assert!(!plan.has_changes());

        let mutations = h.client().mutations();
        let report = h.apply(&plan);
        assert_eq!(report.summary.unchanged, 3);
        assert_eq!(h.client().mutations(), mutations);
    }

    #[test]
    fn test_update_sends_only_changed_attributes() {
        let h = Harness::new(MockClient::new());
        h.converge(&[monitor("cpu", 80.0)]);

        let report = h.converge(&[monitor("cpu", 95.0)]);
        assert_eq!(report.summary.updated, 1);

        let update = h
            .client()
            .history()
            .into_iter()
            .find(|c| c.verb == Verb::Update)
            .unwrap();
        assert_eq!(update.payload.keys().collect::<Vec<_>>(), vec!["threshold"]);
        let state = h.store.get(&ResourceAddress::new("monitor", "cpu")).unwrap();
        assert_eq!(state.get("threshold"), Some(&Value::Number(95.0)));
    }

    #[test]
    fn test_replace_deletes_then_creates() {
        let h = Harness::new(MockClient::new());
        h.converge(&[monitor("cpu", 80.0)]);
        let old_id = h.id_of("monitor", "cpu");

        let changed = desired(
            "monitor",
            "cpu",
            json!({"name": "cpu", "type": "query alert", "query": "avg:cpu > 80", "threshold": 85}),
        );
        let plan = h.plan(&[changed]);
        assert_eq!(plan.changes[0].action, Action::Replace);

        let report = h.apply(&plan);
        assert_eq!(report.summary.replaced, 1);
        assert!(!h.client().exists("monitor", &old_id));
        assert_ne!(h.id_of("monitor", "cpu"), old_id);
        assert_eq!(h.client().object_count("monitor"), 1);
    }

    #[test]
    fn test_replace_stops_when_delete_fails() {
        let h = Harness::new(MockClient::new());
        h.converge(&[monitor("cpu", 80.0)]);
        h.client().fail_always(
            Verb::Delete,
            "cpu",
            ApiError::from_status(403, "forbidden", None),
        );

        let changed = desired(
            "monitor",
            "cpu",
            json!({"name": "cpu", "type": "query alert", "query": "avg:cpu > 80"}),
        );
        let creates = h.client().calls(Verb::Create);
        let report = h.converge(&[changed]);

        assert_eq!(report.summary.failed, 1);
        assert!(matches!(
            report.outcomes[0].outcome,
            Outcome::Failed { kind: ErrorKind::Permanent, .. }
        ));
        assert_eq!(h.client().calls(Verb::Create), creates);
    }

    #[test]
    fn test_replace_create_failure_is_partial_apply() {
        let h = Harness::new(MockClient::new());
        h.converge(&[monitor("cpu", 80.0)]);
        h.client().fail_always(
            Verb::Create,
            "cpu",
            ApiError::from_status(400, "bad query", None),
        );

        let changed = desired(
            "monitor",
            "cpu",
            json!({"name": "cpu", "type": "query alert", "query": "avg:cpu > 80"}),
        );
        let report = h.converge(&[changed]);

        assert!(matches!(
            report.outcomes[0].outcome,
            Outcome::Failed { kind: ErrorKind::PartialApply, .. }
        ));
        assert!(h.store.get(&ResourceAddress::new("monitor", "cpu")).is_none());
    }

    #[test]
    fn test_dependent_created_after_dependency() {
        let h = Harness::new(MockClient::new().with_latency(Duration::from_millis(5)));
        let report = h.converge(&[downtime("weekend", "cpu"), monitor("cpu", 80.0)]);
        assert!(report.is_success());

        let history = h.client().history();
        let monitor_create = history
            .iter()
            .position(|c| c.verb == Verb::Create && c.kind == "monitor")
            .unwrap();
        let downtime_create = history
            .iter()
            .position(|c| c.verb == Verb::Create && c.kind == "downtime")
            .unwrap();
        assert!(monitor_create < downtime_create);

        let monitor_id = h.id_of("monitor", "cpu");
        assert_eq!(
            history[downtime_create].payload.get("monitor_id"),
            Some(&json!(monitor_id))
        );
    }

    #[test]
    fn test_failure_is_isolated_and_dependents_skipped() {
        let h = Harness::new(MockClient::new());
        h.client().fail_always(
            Verb::Create,
            "bad",
            ApiError::from_status(400, "invalid query", None),
        );

        let report = h.converge(&[
            monitor("bad", 80.0),
            monitor("good", 80.0),
            monitor("also-good", 70.0),
            downtime("weekend", "bad"),
        ]);

        assert_eq!(report.summary.created, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
        assert!(!report.is_success());

        let weekend = report
            .outcomes
            .iter()
            .find(|o| o.address == ResourceAddress::new("downtime", "weekend"))
            .unwrap();
        assert!(matches!(&weekend.outcome, Outcome::Skipped { reason } if reason.contains("monitor.bad")));
        assert!(h.store.get(&ResourceAddress::new("monitor", "bad")).is_none());
        assert_eq!(h.client().calls(Verb::Create), 3);
    }

    #[test]
    fn test_cycle_rejected_without_remote_calls() {
        let h = Harness::new(MockClient::new());
        let change = |name: &str, dep: &str| PlannedChange {
            address: ResourceAddress::new("monitor", name),
            action: Action::Create,
            deltas: Vec::new(),
            desired: BTreeMap::new(),
            prior: None,
            depends_on: vec![ResourceAddress::new("monitor", dep)],
        };
        let changes = ChangeSet::new(vec![change("a", "b"), change("b", "a")]);

        let err = h
            .reconciler()
            .apply(&changes, &ApplyOptions::default(), &mut NoProgress, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicDependency);
        assert!(h.client().history().is_empty());
    }

    #[test]
    fn test_transient_failures_then_success_creates_once() {
        let h = Harness::new(MockClient::new());
        h.client().fail_next(Verb::Create, None, vec![
            ApiError::from_status(429, "slow down", None),
            ApiError::from_status(429, "slow down", Some(Duration::from_millis(2))),
            ApiError::from_status(429, "slow down", None),
        ]);

        let report = h.converge(&[monitor("cpu", 80.0)]);
        assert_eq!(report.summary.created, 1);
        assert_eq!(h.client().calls(Verb::Create), 4);
        assert_eq!(h.client().object_count("monitor"), 1);
    }

    #[test]
    fn test_create_lost_after_commit_is_not_duplicated() {
        let h = Harness::new(MockClient::new());
        h.client()
            .lose_create_responses(vec![ApiError::from_status(503, "unavailable", None)]);

        let report = h.converge(&[monitor("cpu", 80.0)]);
        assert!(matches!(
            report.outcomes[0].outcome,
            Outcome::Failed { kind: ErrorKind::Transient, .. }
        ));
        assert_eq!(h.client().calls(Verb::Create), 1);
        assert_eq!(h.client().object_count("monitor"), 1);
        assert!(h.store.get(&ResourceAddress::new("monitor", "cpu")).is_none());
    }

    #[test]
    fn test_outcomes_follow_change_set_order() {
        let h = Harness::new(MockClient::new().with_latency(Duration::from_millis(2)));
        let configs: Vec<_> = (0..8).map(|i| monitor(&format!("m{i}"), 80.0)).collect();
        let plan = h.plan(&configs);
        let report = h.apply(&plan);

        let planned: Vec<_> = plan.iter().map(|c| c.address.clone()).collect();
        let reported: Vec<_> = report.outcomes.iter().map(|o| o.address.clone()).collect();
        assert_eq!(planned, reported);
    }

    #[test]
    fn test_cancelled_run_skips_everything() {
        let h = Harness::new(MockClient::new());
        let plan = h.plan(&[monitor("cpu", 80.0), monitor("disk", 80.0)]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = h
            .reconciler()
            .apply(&plan, &ApplyOptions::default(), &mut NoProgress, &cancel)
            .unwrap();
        assert_eq!(report.summary.skipped, 2);
        assert!(h.client().history().is_empty());
    }

    /// Cancels the run as soon as the first resource finishes
    struct CancelAfterFirst(CancelToken);

    impl ProgressCallback for CancelAfterFirst {
        fn on_apply_start(&mut self, _count: usize) {}
        fn on_resource_start(&mut self, _address: &ResourceAddress, _action: Action) {}
        fn on_resource_complete(&mut self, _address: &ResourceAddress, _action: Action, _outcome: &Outcome) {
            self.0.cancel();
        }
        fn on_apply_complete(&mut self, _summary: &ApplySummary) {}
    }

    #[test]
    fn test_cancel_mid_run_skips_undispatched() {
        let h = Harness::new(MockClient::new().with_latency(Duration::from_millis(5)));
        let configs: Vec<_> = (0..6).map(|i| monitor(&format!("m{i}"), 80.0)).collect();
        let plan = h.plan(&configs);
        let cancel = CancelToken::new();
        let options = ApplyOptions { jobs: 2, timeout: None };

        let report = h
            .reconciler()
            .apply(&plan, &options, &mut CancelAfterFirst(cancel.clone()), &cancel)
            .unwrap();

        let summary = &report.summary;
        assert_eq!(summary.created + summary.skipped, 6);
        assert!((1..=2).contains(&summary.created));
        assert!(summary.skipped >= 4);
        assert_eq!(h.client().calls(Verb::Create), summary.created);
        assert!(report.outcomes.iter().all(|o| match &o.outcome {
            Outcome::Skipped { reason } => reason == "apply was cancelled",
            other => other.is_success(),
        }));
    }

    #[test]
    fn test_timeout_stops_dispatching() {
        let h = Harness::new(MockClient::new().with_latency(Duration::from_millis(20)));
        let configs: Vec<_> = (0..6).map(|i| monitor(&format!("m{i}"), 80.0)).collect();
        let plan = h.plan(&configs);
        let options = ApplyOptions {
            jobs: 1,
            timeout: Some(Duration::from_millis(30)),
        };

        let report = h
            .reconciler()
            .apply(&plan, &options, &mut NoProgress, &CancelToken::new())
            .unwrap();

        assert!(report.summary.created < 6);
        assert!(report.summary.skipped > 0);
        assert_eq!(report.summary.created + report.summary.skipped, 6);
        assert_eq!(h.client().calls(Verb::Create), report.summary.created);
        assert!(!report.is_success());
    }

    #[test]
    fn test_workers_bounded_by_jobs() {
        let h = Harness::new(MockClient::new().with_latency(Duration::from_millis(5)));
        let configs: Vec<_> = (0..10).map(|i| monitor(&format!("m{i}"), 80.0)).collect();
        let plan = h.plan(&configs);
        let options = ApplyOptions { jobs: 3, timeout: None };

        let report = h
            .reconciler()
            .apply(&plan, &options, &mut NoProgress, &CancelToken::new())
            .unwrap();

        assert_eq!(report.summary.created, 10);
        let peak = h.client().peak_concurrency();
        assert!((1..=3).contains(&peak), "peak of {peak} calls in flight");
    }

    #[test]
    fn test_unconfirmed_create_records_state() {
        let h = Harness::new(MockClient::new().with_invisible_reads(100));
        let report = h.converge(&[monitor("cpu", 80.0)]);

        assert!(matches!(
            report.outcomes[0].outcome,
            Outcome::Failed { kind: ErrorKind::PartialApply, .. }
        ));
        assert!(h.store.get(&ResourceAddress::new("monitor", "cpu")).is_some());
    }

    #[test]
    fn test_orphan_delete_tolerates_missing_object() {
        let h = Harness::new(MockClient::new());
        h.converge(&[monitor("cpu", 80.0)]);
        let id = h.id_of("monitor", "cpu");
        h.client().remove("monitor", &id);

        let report = h.converge(&[]);
        assert_eq!(report.summary.deleted, 1);
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_state_write_failure_is_storage_outcome() {
        use crate::state::StateBackend;

        struct ReadOnly;
        impl StateBackend for ReadOnly {
            fn load(&self) -> Result<BTreeMap<ResourceAddress, PriorState>> {
                Ok(BTreeMap::new())
            }
            fn save(&self, _: &ResourceAddress, _: Option<&PriorState>) -> Result<()> {
                Err(Error::storage("read-only"))
            }
        }

        let h = Harness {
            registry: registry(),
            adapter: ApiAdapter::new(MockClient::new(), fast_config()),
            store: StateStore::open(Box::new(ReadOnly)).unwrap(),
        };
        let report = h.converge(&[monitor("cpu", 80.0)]);
        assert!(matches!(
            report.outcomes[0].outcome,
            Outcome::Failed { kind: ErrorKind::Storage, .. }
        ));
    }

    #[test]
    fn test_refresh_detects_drift_and_removal() {
        let h = Harness::new(MockClient::new());
        h.converge(&[monitor("cpu", 80.0), monitor("disk", 90.0), monitor("mem", 70.0)]);
        h.client().tamper("monitor", &h.id_of("monitor", "cpu"), "threshold", json!(99));
        h.client().remove("monitor", &h.id_of("monitor", "disk"));

        let report = h.reconciler().refresh();
        assert_eq!(report.drifted, vec![ResourceAddress::new("monitor", "cpu")]);
        assert_eq!(report.removed, vec![ResourceAddress::new("monitor", "disk")]);
        assert_eq!(report.unchanged, vec![ResourceAddress::new("monitor", "mem")]);

        let plan = h.plan(&[monitor("cpu", 80.0), monitor("disk", 90.0), monitor("mem", 70.0)]);
        let actions: Vec<_> = plan.iter().map(|c| (c.address.name.as_str(), c.action)).collect();
        assert!(actions.contains(&("cpu", Action::Update)));
        assert!(actions.contains(&("disk", Action::Create)));
        assert!(actions.contains(&("mem", Action::NoOp)));
    }

    #[test]
    fn test_import_records_state() {
        let h = Harness::new(MockClient::new());
        h.client().seed(
            "monitor",
            "777",
            json!({"name": "legacy", "type": "metric alert", "threshold": 50, "notify_no_data": false})
                .as_object()
                .cloned()
                .unwrap(),
        );

        let address = ResourceAddress::new("monitor", "legacy");
        let state = h.reconciler().import(&address, "777").unwrap();
        assert_eq!(state.id, "777");

        let plan = h.plan(&[desired(
            "monitor",
            "legacy",
            json!({"name": "legacy", "type": "metric alert", "threshold": 50}),
        )]);
        assert_eq!(plan.changes[0].action, Action::NoOp);

        assert!(h.reconciler().import(&address, "777").is_err());
    }
}
