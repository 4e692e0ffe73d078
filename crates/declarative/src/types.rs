//! Core types for planning and applying

use crate::error::ErrorKind;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stable config-level name of a resource instance: `kind.name`
///
/// The remote identity is assigned on create and lives in [`PriorState`];
/// the address is what the caller uses to refer to the instance across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceAddress {
    pub kind: String,
    pub name: String,
}

impl ResourceAddress {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => Ok(Self::new(kind, name)),
            _ => Err(format!("invalid resource address '{s}' (expected kind.name)")),
        }
    }
}

impl From<ResourceAddress> for String {
    fn from(address: ResourceAddress) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A reference to another resource's attribute: `${kind.name.attribute}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub address: ResourceAddress,
    pub attribute: String,
}

impl Reference {
    /// Parse `${kind.name.attribute}`; anything else is a plain string.
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.strip_prefix("${")?.strip_suffix('}')?;
        let (address, attribute) = inner.rsplit_once('.')?;
        let address: ResourceAddress = address.parse().ok()?;
        if attribute.is_empty() || address.name.contains('.') {
            return None;
        }
        Some(Self {
            address,
            attribute: attribute.to_string(),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.address, self.attribute)
    }
}

/// Attributes the caller wants a resource to have
///
/// Values are raw JSON as supplied by the host; they are checked against the
/// kind's schema during planning and discarded afterwards.
#[derive(Debug, Clone)]
pub struct DesiredConfig {
    pub address: ResourceAddress,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl DesiredConfig {
    pub fn new(
        address: ResourceAddress,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            address,
            attributes,
        }
    }
}

/// A desired attribute value, possibly not known until another resource is applied
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedValue {
    Known(Value),
    /// Known after the referenced resource is applied
    Pending(Reference),
}

impl fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Pending(r) => write!(f, "(known after apply: {r})"),
        }
    }
}

/// Last attributes observed from the remote API for one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorState {
    /// Remote identity, immutable after create
    pub id: String,
    pub attributes: BTreeMap<String, Value>,
    /// Resources this one referenced when it was last applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ResourceAddress>,
}

impl PriorState {
    pub fn new(id: impl Into<String>, attributes: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            attributes,
            dependencies: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Planned change for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    /// Delete followed by Create
    Replace,
    NoOp,
}

impl Action {
    /// Plan symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::Replace => "-/+",
            Self::NoOp => " ",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// One attribute that differs between prior state and desired config
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDelta {
    pub name: String,
    pub old: Option<Value>,
    pub new: PlannedValue,
    pub force_new: bool,
    pub sensitive: bool,
}

/// The planned action for a single resource
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub address: ResourceAddress,
    pub action: Action,
    /// Exactly the attributes that change
    pub deltas: Vec<AttributeDelta>,
    /// Every attribute the resource should end up with, used for creates
    pub desired: BTreeMap<String, PlannedValue>,
    pub prior: Option<PriorState>,
    /// Resources that must reach `Applied` before this one is attempted
    pub depends_on: Vec<ResourceAddress>,
}

impl PlannedChange {
    /// Names of the attributes carried by this change
    pub fn changed_attributes(&self) -> Vec<&str> {
        self.deltas.iter().map(|d| d.name.as_str()).collect()
    }

    /// Attributes whose change forced a replacement
    pub fn replacement_reasons(&self) -> Vec<&str> {
        self.deltas
            .iter()
            .filter(|d| d.force_new)
            .map(|d| d.name.as_str())
            .collect()
    }
}

/// Ordered set of planned changes, one per resource instance
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub changes: Vec<PlannedChange>,
}

impl ChangeSet {
    pub fn new(changes: Vec<PlannedChange>) -> Self {
        Self { changes }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether anything other than NoOp is planned
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action.is_change())
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| &c.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter()
    }

    /// Number of changes per action
    pub fn count(&self, action: Action) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }
}

/// Terminal result of one planned action
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The action completed; `state` is the new prior state (None after delete)
    Applied { state: Option<PriorState> },
    Failed { kind: ErrorKind, message: String },
    /// Not attempted (dependency failed, or the run was cancelled)
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Human-readable cause
    pub fn cause(&self) -> String {
        match self {
            Self::Applied { .. } => "applied".to_string(),
            Self::Failed { kind, message } => format!("{kind}: {message}"),
            Self::Skipped { reason } => format!("skipped: {reason}"),
        }
    }
}

/// Outcome for a resource, reported in ChangeSet order
#[derive(Debug, Clone)]
pub struct ResourceOutcome {
    pub address: ResourceAddress,
    pub action: Action,
    pub outcome: Outcome,
}

/// Summary of apply results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ApplySummary {
    /// Build a summary from outcomes
    pub fn from_outcomes(outcomes: &[ResourceOutcome]) -> Self {
        let mut summary = Self::default();
        for o in outcomes {
            summary.add(o.action, &o.outcome);
        }
        summary
    }

    /// Add a result to the summary
    pub fn add(&mut self, action: Action, outcome: &Outcome) {
        match outcome {
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Applied { .. } => match action {
                Action::Create => self.created += 1,
                Action::Update => self.updated += 1,
                Action::Replace => self.replaced += 1,
                Action::Delete => self.deleted += 1,
                Action::NoOp => self.unchanged += 1,
            },
        }
    }

    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Every planned action reached Applied or NoOp
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.failed + self.skipped
    }
}

/// What a plan should converge towards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanMode {
    /// Converge remote objects to the desired config
    #[default]
    Normal,
    /// Delete every resource in state
    Destroy,
}

/// Options for planning
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub mode: PlanMode,
    /// Limit the plan to `kind` or `kind.name` (plus dependencies)
    pub target: Option<String>,
}

/// Options for applying
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Number of parallel workers
    pub jobs: usize,
    /// Stop issuing new operations after this long
    pub timeout: Option<Duration>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout: None,
        }
    }
}
