//! In-memory API client for tests

use crate::adapter::{AdapterConfig, ConfirmConfig};
use crate::client::{ApiClient, Page, RawAttributes, RemoteObject};
use crate::error::ApiError;
use crate::ratelimit::RateLimitConfig;
use crate::retry::RetryConfig;
use crate::schema::{AttributeSchema, ResourceSchema, SchemaRegistry};
use crate::types::{DesiredConfig, ResourceAddress};
use crate::value::ValueType;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
    List,
}

/// One recorded remote call
#[derive(Debug, Clone)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub id: Option<String>,
    /// Value of the object's `name` attribute, when known
    pub name: Option<String>,
    pub payload: RawAttributes,
}

struct Script {
    verb: Verb,
    name: Option<String>,
    errors: VecDeque<ApiError>,
    forever: Option<ApiError>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), RawAttributes>,
    next_id: u64,
    calls: Vec<Call>,
    scripts: Vec<Script>,
    invisible_reads: u32,
    /// Errors returned by the next creates after the object was stored
    lost_responses: VecDeque<ApiError>,
}

/// Stores objects in memory, records every call and replays scripted failures
#[derive(Default)]
pub struct MockClient {
    inner: Mutex<Inner>,
    page_size: usize,
    stuck_cursor: bool,
    latency: Duration,
    full_update_kinds: Vec<String>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

pub fn fast_config() -> AdapterConfig {
    AdapterConfig {
        retry: RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        },
        rate_limit: RateLimitConfig {
            capacity: 1000,
            refill_per_sec: 100_000.0,
        },
        confirm: ConfirmConfig {
            attempts: 3,
            interval: Duration::from_millis(1),
        },
    }
}

/// A `monitor` kind and a `downtime` kind that can point at a monitor
pub fn registry() -> SchemaRegistry {
    SchemaRegistry::builder()
        .register(
            ResourceSchema::new("monitor")
                .attribute(AttributeSchema::required("name", ValueType::String))
                .attribute(AttributeSchema::required("type", ValueType::String).force_new())
                .attribute(AttributeSchema::optional("query", ValueType::String))
                .attribute(AttributeSchema::optional("threshold", ValueType::Number))
                .attribute(AttributeSchema::optional("tags", ValueType::set(ValueType::String)))
                .attribute(
                    AttributeSchema::optional("notify_no_data", ValueType::Bool)
                        .reset_to_default(false),
                )
                .attribute(AttributeSchema::computed("creator", ValueType::String)),
        )
        .and_then(|b| {
            b.register(
                ResourceSchema::new("downtime")
                    .attribute(AttributeSchema::required("name", ValueType::String))
                    .attribute(AttributeSchema::required("scope", ValueType::String))
                    .attribute(AttributeSchema::optional("monitor_id", ValueType::String))
                    .attribute(AttributeSchema::optional("message", ValueType::String)),
            )
        })
        .unwrap()
        .build()
}

/// Desired config from a JSON object literal
pub fn desired(kind: &str, name: &str, attributes: serde_json::Value) -> DesiredConfig {
    DesiredConfig::new(
        ResourceAddress::new(kind, name),
        attributes.as_object().cloned().unwrap_or_default(),
    )
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Always hand out the same next-page cursor
    pub fn with_stuck_cursor(mut self) -> Self {
        self.stuck_cursor = true;
        self
    }

    /// The next `n` reads report not-found
    pub fn with_invisible_reads(self, n: u32) -> Self {
        self.lock().invisible_reads = n;
        self
    }

    /// Ids are handed out from `first` upwards
    pub fn starting_id(self, first: u64) -> Self {
        self.lock().next_id = first.saturating_sub(1);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Updates to `kind` overwrite the whole object
    pub fn with_full_update(mut self, kind: &str) -> Self {
        self.full_update_kinds.push(kind.to_string());
        self
    }

    /// Store the next creates, then answer them with these errors
    pub fn lose_create_responses(&self, errors: Vec<ApiError>) {
        self.lock().lost_responses.extend(errors);
    }

    /// Most calls that were ever in progress at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Fail the next calls of `verb` (optionally only for objects named `name`)
    pub fn fail_next(&self, verb: Verb, name: Option<&str>, errors: Vec<ApiError>) {
        self.lock().scripts.push(Script {
            verb,
            name: name.map(String::from),
            errors: errors.into(),
            forever: None,
        });
    }

    /// Fail every call of `verb` for objects named `name`
    pub fn fail_always(&self, verb: Verb, name: &str, error: ApiError) {
        self.lock().scripts.push(Script {
            verb,
            name: Some(name.to_string()),
            errors: VecDeque::new(),
            forever: Some(error),
        });
    }

    /// Put an object straight into the remote store
    pub fn seed(&self, kind: &str, id: &str, attributes: RawAttributes) {
        let mut inner = self.lock();
        let mut attributes = attributes;
        attributes.insert("id".into(), id.into());
        inner.objects.insert((kind.to_string(), id.to_string()), attributes);
    }

    /// Remove an object behind the engine's back
    pub fn remove(&self, kind: &str, id: &str) {
        self.lock().objects.remove(&(kind.to_string(), id.to_string()));
    }

    /// Change an attribute behind the engine's back
    pub fn tamper(&self, kind: &str, id: &str, name: &str, value: serde_json::Value) {
        if let Some(obj) = self.lock().objects.get_mut(&(kind.to_string(), id.to_string())) {
            obj.insert(name.to_string(), value);
        }
    }

    pub fn exists(&self, kind: &str, id: &str) -> bool {
        self.lock().objects.contains_key(&(kind.to_string(), id.to_string()))
    }

    pub fn object(&self, kind: &str, id: &str) -> Option<RawAttributes> {
        self.lock().objects.get(&(kind.to_string(), id.to_string())).cloned()
    }

    pub fn object_count(&self, kind: &str) -> usize {
        self.lock().objects.keys().filter(|(k, _)| k == kind).count()
    }

    pub fn calls(&self, verb: Verb) -> usize {
        self.lock().calls.iter().filter(|c| c.verb == verb).count()
    }

    /// Every call that can change the remote store
    pub fn mutations(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c.verb, Verb::Create | Verb::Update | Verb::Delete))
            .count()
    }

    pub fn history(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record the call, then return a scripted failure if one applies
    fn begin(
        &self,
        verb: Verb,
        kind: &str,
        id: Option<&str>,
        payload: &RawAttributes,
    ) -> Result<(), ApiError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut inner = self.lock();
        let name = payload
            .get("name")
            .or_else(|| {
                id.and_then(|id| inner.objects.get(&(kind.to_string(), id.to_string())))
                    .and_then(|o| o.get("name"))
            })
            .and_then(|v| v.as_str())
            .map(String::from);

        inner.calls.push(Call {
            verb,
            kind: kind.to_string(),
            id: id.map(String::from),
            name: name.clone(),
            payload: payload.clone(),
        });

        for script in &mut inner.scripts {
            if script.verb != verb {
                continue;
            }
            if script.name.is_some() && script.name != name {
                continue;
            }
            if let Some(err) = &script.forever {
                return Err(err.clone());
            }
            if let Some(err) = script.errors.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl ApiClient for MockClient {
    fn create(&self, kind: &str, attributes: &RawAttributes) -> Result<RemoteObject, ApiError> {
        self.begin(Verb::Create, kind, None, attributes)?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id.to_string();

        let mut stored = attributes.clone();
        stored.insert("id".into(), id.clone().into());
        stored.insert("creator".into(), "ci@example.com".into());
        inner.objects.insert((kind.to_string(), id.clone()), stored.clone());

        if let Some(err) = inner.lost_responses.pop_front() {
            return Err(err);
        }
        Ok(RemoteObject {
            id,
            attributes: stored,
        })
    }

    fn read(&self, kind: &str, id: &str) -> Result<RemoteObject, ApiError> {
        self.begin(Verb::Read, kind, Some(id), &RawAttributes::new())?;
        let mut inner = self.lock();
        if inner.invisible_reads > 0 {
            inner.invisible_reads -= 1;
            return Err(ApiError::NotFound(format!("{kind}/{id}")));
        }
        inner
            .objects
            .get(&(kind.to_string(), id.to_string()))
            .map(|attributes| RemoteObject {
                id: id.to_string(),
                attributes: attributes.clone(),
            })
            .ok_or_else(|| ApiError::NotFound(format!("{kind}/{id}")))
    }

    fn update(&self, kind: &str, id: &str, changes: &RawAttributes) -> Result<RemoteObject, ApiError> {
        self.begin(Verb::Update, kind, Some(id), changes)?;
        let mut inner = self.lock();
        let stored = inner
            .objects
            .get_mut(&(kind.to_string(), id.to_string()))
            .ok_or_else(|| ApiError::NotFound(format!("{kind}/{id}")))?;
        for (k, v) in changes {
            stored.insert(k.clone(), v.clone());
        }
        Ok(RemoteObject {
            id: id.to_string(),
            attributes: stored.clone(),
        })
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), ApiError> {
        self.begin(Verb::Delete, kind, Some(id), &RawAttributes::new())?;
        self.lock()
            .objects
            .remove(&(kind.to_string(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("{kind}/{id}")))
    }

    fn replaces_on_update(&self, kind: &str) -> bool {
        self.full_update_kinds.iter().any(|k| k == kind)
    }

    fn list_page(&self, kind: &str, cursor: Option<&str>) -> Result<Page, ApiError> {
        self.begin(Verb::List, kind, None, &RawAttributes::new())?;
        let inner = self.lock();
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let all: Vec<_> = inner
            .objects
            .iter()
            .filter(|((k, _), _)| k == kind)
            .collect();

        let items = all
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|((_, id), attributes)| RemoteObject {
                id: id.clone(),
                attributes: (*attributes).clone(),
            })
            .collect();

        let next = if self.stuck_cursor {
            Some("1".to_string())
        } else if offset + self.page_size < all.len() {
            Some((offset + self.page_size).to_string())
        } else {
            None
        };

        Ok(Page { items, next })
    }
}
