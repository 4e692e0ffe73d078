//! # Declarative
//!
//! Declarative resource reconciliation against a remote API.
//!
//! Callers declare the attributes each resource should have; the engine
//! compares them with the last state observed from the remote API, plans
//! the minimal set of creates, updates, replacements and deletes, and
//! applies them with bounded parallelism in dependency order.
//!
//! ## Core Concepts
//!
//! - **SchemaRegistry**: the attribute schema of every resource kind, built once
//! - **StateStore**: last observed attributes per resource, written through to a backend
//! - **Planner**: validates desired configs and produces an ordered [`ChangeSet`]
//! - **ApiAdapter**: retries, rate limiting, pagination and post-create read-back
//! - **Reconciler**: applies a [`ChangeSet`] and reports one [`Outcome`] per change
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     AdapterConfig, ApiAdapter, ApplyOptions, CancelToken, NoProgress,
//!     PlanOptions, Reconciler, SchemaRegistry, StateStore,
//! };
//!
//! let registry = SchemaRegistry::builder().register(monitor_schema())?.build();
//! let adapter = ApiAdapter::new(MyClient::new(), AdapterConfig::default());
//! let store = StateStore::in_memory();
//!
//! let reconciler = Reconciler::new(&registry, &adapter, &store);
//! let plan = reconciler.plan(&desired, &PlanOptions::default())?;
//! let report = reconciler.apply(&plan, &ApplyOptions::default(), &mut NoProgress, &CancelToken::new())?;
//! println!("{} changes", report.summary.total_changes());
//! ```

pub mod adapter;
pub mod client;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
mod graph;
pub mod planner;
pub mod ratelimit;
pub mod retry;
pub mod schema;
pub mod state;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use adapter::{AdapterConfig, ApiAdapter, ConfirmConfig};
pub use client::{ApiClient, Page, RawAttributes, RemoteObject};
pub use context::{CancelToken, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, diff_resource, group_by_kind};
pub use error::{ApiError, Error, ErrorCategory, ErrorKind, Result};
pub use executor::{ApplyReport, Reconciler, RefreshReport};
pub use planner::Planner;
pub use ratelimit::{RateLimitConfig, TokenBucket};
pub use retry::{LogCallback, RetryCallback, RetryConfig, with_retry};
pub use schema::{
    AttributeSchema, ID_ATTRIBUTE, OnOmit, Presence, RegistryBuilder, ResourceSchema,
    SchemaRegistry,
};
pub use state::{MemoryBackend, StateBackend, StateStore};
pub use types::{
    Action, ApplyOptions, ApplySummary, AttributeDelta, ChangeSet, DesiredConfig, Outcome,
    PlanMode, PlanOptions, PlannedChange, PlannedValue, PriorState, Reference, ResourceAddress,
    ResourceOutcome,
};
pub use value::{Coercion, Value, ValueType};
