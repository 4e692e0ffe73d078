//! Remote API adapter
//!
//! Wraps an [`ApiClient`] with the shared rate limit, retries for transient
//! failures, pagination, and post-create read-back.

use crate::client::{ApiClient, RawAttributes, RemoteObject};
use crate::error::{ApiError, Error, Result};
use crate::ratelimit::{RateLimitConfig, TokenBucket};
use crate::retry::{LogCallback, RetryConfig, with_retry_if};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

/// How long to wait for a freshly created object to become readable
#[derive(Debug, Clone)]
pub struct ConfirmConfig {
    /// Number of reads; 0 trusts the create response as-is
    pub attempts: u32,
    /// Pause between reads
    pub interval: Duration,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(1),
        }
    }
}

/// Everything that shapes how the adapter talks to the remote API
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub confirm: ConfirmConfig,
}

/// The only component that talks to the remote API
pub struct ApiAdapter<C> {
    client: C,
    retry: RetryConfig,
    confirm: ConfirmConfig,
    limiter: TokenBucket,
}

impl<C: ApiClient> ApiAdapter<C> {
    pub fn new(client: C, config: AdapterConfig) -> Self {
        Self {
            client,
            limiter: TokenBucket::new(&config.rate_limit),
            retry: config.retry,
            confirm: config.confirm,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Create an object.
    ///
    /// Creates are not idempotent, so only failures that prove the request
    /// was not processed (HTTP 429) are resent. A server or connection error
    /// is returned after one attempt, since the object may already exist.
    pub fn create(&self, kind: &str, attributes: &RawAttributes) -> Result<RemoteObject> {
        log::debug!("POST {kind} ({} attributes)", attributes.len());
        let result = self.call_if(
            |e| e.is_retryable() && !e.may_have_taken_effect(),
            || self.client.create(kind, attributes),
        );
        if let Err(Error::Transient { source, .. }) = &result
            && source.may_have_taken_effect()
        {
            log::warn!(
                "Creating {kind} failed with {source}; not resending because it may already exist. \
                 Run refresh or import it before applying again"
            );
        }
        result
    }

    pub fn read(&self, kind: &str, id: &str) -> Result<RemoteObject> {
        log::debug!("GET {kind}/{id}");
        self.call(|| self.client.read(kind, id))
    }

    /// Update an object, sending the current attributes merged with
    /// `changes` when the client replaces whole objects on update.
    pub fn update(&self, kind: &str, id: &str, changes: &RawAttributes) -> Result<RemoteObject> {
        if !self.client.replaces_on_update(kind) {
            log::debug!("PUT {kind}/{id} ({} attributes)", changes.len());
            return self.call(|| self.client.update(kind, id, changes));
        }

        let mut body = self.read(kind, id)?.attributes;
        body.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        log::debug!("PUT {kind}/{id} (full object, {} changed)", changes.len());
        self.call(|| self.client.update(kind, id, &body))
    }

    pub fn delete(&self, kind: &str, id: &str) -> Result<()> {
        log::debug!("DELETE {kind}/{id}");
        self.call(|| self.client.delete(kind, id))
    }

    /// Fetch every object of `kind`, following pagination cursors.
    ///
    /// The full result is materialized before returning.
    pub fn list_all(&self, kind: &str) -> Result<Vec<RemoteObject>> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.call(|| self.client.list_page(kind, cursor.as_deref()))?;
            items.extend(page.items);

            match page.next {
                None => break,
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(Error::Permanent(ApiError::InvalidResponse(format!(
                        "listing {kind} repeated cursor '{next}'"
                    ))));
                }
                Some(next) => cursor = Some(next),
            }
        }

        log::debug!("Listed {} {kind} objects", items.len());
        Ok(items)
    }

    /// Poll until a just-created object is readable.
    ///
    /// Returns `None` if it never became visible within the configured
    /// attempts. Errors other than not-found are returned as-is.
    pub fn confirm_created(&self, kind: &str, created: &RemoteObject) -> Result<Option<RemoteObject>> {
        if self.confirm.attempts == 0 {
            return Ok(Some(created.clone()));
        }

        for attempt in 1..=self.confirm.attempts {
            match self.read(kind, &created.id) {
                Ok(object) => return Ok(Some(object)),
                Err(e) if e.is_not_found() => {
                    log::debug!(
                        "{kind}/{} not readable yet ({attempt}/{})",
                        created.id,
                        self.confirm.attempts
                    );
                    if attempt < self.confirm.attempts {
                        thread::sleep(self.confirm.interval);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        log::warn!("{kind}/{} was created but never became readable", created.id);
        Ok(None)
    }

    /// One logical call: rate limited, retried, and pausing the whole
    /// budget when the server asks us to back off.
    fn call<T>(&self, op: impl FnMut() -> std::result::Result<T, ApiError>) -> Result<T> {
        self.call_if(ApiError::is_retryable, op)
    }

    fn call_if<T>(
        &self,
        retry_when: impl Fn(&ApiError) -> bool,
        mut op: impl FnMut() -> std::result::Result<T, ApiError>,
    ) -> Result<T> {
        with_retry_if(&self.retry, Some(&LogCallback), retry_when, || {
            self.limiter.acquire();
            let result = op();
            if let Err(ApiError::RateLimited {
                retry_after: Some(wait),
                ..
            }) = &result
            {
                self.limiter.pause_for(*wait);
            }
            result
        })
    }
}

impl<C> std::fmt::Debug for ApiAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiAdapter")
            .field("retry", &self.retry)
            .field("confirm", &self.confirm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{MockClient, Verb, fast_config};
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> RawAttributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let adapter = ApiAdapter::new(MockClient::new(), fast_config());
        let created = adapter.create("monitor", &attrs(json!({"name": "cpu"}))).unwrap();
        adapter.client().fail_next(Verb::Update, None, vec![
            ApiError::from_status(503, "unavailable", None),
            ApiError::from_status(502, "bad gateway", None),
            ApiError::Connection("reset".into()),
        ]);

        adapter
            .update("monitor", &created.id, &attrs(json!({"threshold": 90})))
            .unwrap();
        assert_eq!(adapter.client().calls(Verb::Update), 4);
        let stored = adapter.client().object("monitor", &created.id).unwrap();
        assert_eq!(stored.get("threshold"), Some(&json!(90)));
    }

    #[test]
    fn test_create_retried_while_rate_limited() {
        let client = MockClient::new();
        client.fail_next(Verb::Create, None, vec![
            ApiError::from_status(429, "slow down", None),
            ApiError::from_status(429, "slow down", Some(Duration::from_millis(2))),
            ApiError::from_status(429, "slow down", None),
        ]);
        let adapter = ApiAdapter::new(client, fast_config());

        adapter.create("monitor", &attrs(json!({"name": "cpu"}))).unwrap();
        assert_eq!(adapter.client().calls(Verb::Create), 4);
        assert_eq!(adapter.client().object_count("monitor"), 1);
    }

    #[test]
    fn test_create_not_resent_after_server_error() {
        let client = MockClient::new();
        client.lose_create_responses(vec![ApiError::from_status(503, "unavailable", None)]);
        let adapter = ApiAdapter::new(client, fast_config());

        let err = adapter.create("monitor", &attrs(json!({"name": "cpu"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(adapter.client().calls(Verb::Create), 1);
        assert_eq!(adapter.client().object_count("monitor"), 1);
    }

    #[test]
    fn test_full_update_merges_and_spends_budget() {
        let mut config = fast_config();
        config.rate_limit = RateLimitConfig {
            capacity: 10,
            refill_per_sec: 0.001,
        };
        let adapter = ApiAdapter::new(MockClient::new().with_full_update("dashboard"), config);
        let created = adapter
            .create("dashboard", &attrs(json!({"title": "Hosts", "layout_type": "ordered"})))
            .unwrap();

        adapter
            .update("dashboard", &created.id, &attrs(json!({"title": "All hosts"})))
            .unwrap();

        let update = adapter
            .client()
            .history()
            .into_iter()
            .find(|c| c.verb == Verb::Update)
            .unwrap();
        assert_eq!(update.payload.get("title"), Some(&json!("All hosts")));
        assert_eq!(update.payload.get("layout_type"), Some(&json!("ordered")));
        assert_eq!(adapter.client().calls(Verb::Read), 1);
        // create, read and update each took a token
        assert!((adapter.limiter.available() - 7.0).abs() < 0.1);
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let client = MockClient::new();
        client.fail_next(Verb::Create, None, vec![ApiError::from_status(400, "bad query", None)]);
        let adapter = ApiAdapter::new(client, fast_config());

        let err = adapter.create("monitor", &attrs(json!({"name": "cpu"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(adapter.client().calls(Verb::Create), 1);
    }

    #[test]
    fn test_rate_limited_then_ok() {
        let client = MockClient::new();
        client.fail_next(Verb::Read, None, vec![ApiError::from_status(
            429,
            "rate limited",
            Some(Duration::from_millis(5)),
        )]);
        let adapter = ApiAdapter::new(client, fast_config());
        let created = adapter.create("monitor", &attrs(json!({"name": "cpu"}))).unwrap();

        let read = adapter.read("monitor", &created.id).unwrap();
        assert_eq!(read.id, created.id);
        assert_eq!(adapter.client().calls(Verb::Read), 2);
    }

    #[test]
    fn test_list_all_follows_cursors() {
        let client = MockClient::new().with_page_size(2);
        let adapter = ApiAdapter::new(client, fast_config());
        for i in 0..5 {
            adapter
                .create("monitor", &attrs(json!({"name": format!("m{i}")})))
                .unwrap();
        }

        let all = adapter.list_all("monitor").unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(adapter.client().calls(Verb::List), 3);
    }

    #[test]
    fn test_list_all_rejects_cursor_loop() {
        let client = MockClient::new().with_page_size(1).with_stuck_cursor();
        let adapter = ApiAdapter::new(client, fast_config());
        for i in 0..3 {
            adapter
                .create("monitor", &attrs(json!({"name": format!("m{i}")})))
                .unwrap();
        }

        let err = adapter.list_all("monitor").unwrap_err();
        assert!(err.to_string().contains("repeated cursor"));
    }

    #[test]
    fn test_confirm_waits_for_visibility() {
        let client = MockClient::new().with_invisible_reads(2);
        let adapter = ApiAdapter::new(client, fast_config());

        let created = adapter.create("monitor", &attrs(json!({"name": "cpu"}))).unwrap();
        let confirmed = adapter.confirm_created("monitor", &created).unwrap();
        assert!(confirmed.is_some());
        assert_eq!(adapter.client().calls(Verb::Read), 3);
    }

    #[test]
    fn test_confirm_gives_up() {
        let client = MockClient::new().with_invisible_reads(100);
        let adapter = ApiAdapter::new(client, fast_config());

        let created = adapter.create("monitor", &attrs(json!({"name": "cpu"}))).unwrap();
        assert!(adapter.confirm_created("monitor", &created).unwrap().is_none());
    }
}
