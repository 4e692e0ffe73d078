//! Datadog REST client
//!
//! One HTTP request per trait call. Status codes are classified here and
//! handed to the engine as [`ApiError`]s; retrying and rate limiting happen
//! in the adapter wrapping this client.

use super::{Endpoint, endpoint};
use declarative::{ApiClient, ApiError, Page, RawAttributes, RemoteObject};
use serde_json::Value as Json;
use std::time::Duration;

/// Default Datadog site
pub const DEFAULT_API_URL: &str = "https://api.datadoghq.com";

/// Objects requested per page from paginated endpoints
const PAGE_SIZE: usize = 100;

/// Longest error body echoed back in a message
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// [`ApiClient`] speaking the Datadog v1 API over HTTPS
pub struct DatadogClient {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
    app_key: String,
    page_size: usize,
}

impl DatadogClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        app_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .user_agent(concat!("terraform-provider-datadog/", env!("CARGO_PKG_VERSION")))
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            app_key: app_key.into(),
            page_size: PAGE_SIZE,
        }
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, endpoint: &Endpoint, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}{}/{}", self.api_base, endpoint.path, id),
            None => format!("{}{}", self.api_base, endpoint.path),
        }
    }

    /// Send one request and return the parsed body (`Null` when empty).
    fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Json>,
    ) -> Result<Json, ApiError> {
        log::trace!("{method:?} {url}");

        let result = match method {
            Method::Get => {
                let mut request = self.agent.get(url);
                for (key, value) in query {
                    request = request.query(key, value);
                }
                self.authorize(request).call()
            }
            Method::Delete => self.authorize(self.agent.delete(url)).call(),
            Method::Post => self
                .authorize(self.agent.post(url))
                .send_json(body.unwrap_or(&Json::Null)),
            Method::Put => self
                .authorize(self.agent.put(url))
                .send_json(body.unwrap_or(&Json::Null)),
        };

        let mut response = result.map_err(transport_error)?;
        let status = response.status().as_u16();

        if (200..300).contains(&status) {
            let text = response
                .body_mut()
                .read_to_string()
                .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
            if text.trim().is_empty() {
                return Ok(Json::Null);
            }
            return serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()));
        }

        let headers = response.headers();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let wait = retry_after(header("Retry-After"), header("X-RateLimit-Reset"));
        let body = response.body_mut().read_to_string().unwrap_or_default();

        Err(ApiError::from_status(status, error_message(status, &body), wait))
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        request
            .header("DD-API-KEY", self.api_key.as_str())
            .header("DD-APPLICATION-KEY", self.app_key.as_str())
            .header("Accept", "application/json")
    }
}

impl std::fmt::Debug for DatadogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatadogClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl ApiClient for DatadogClient {
    fn create(&self, kind: &str, attributes: &RawAttributes) -> Result<RemoteObject, ApiError> {
        let endpoint = lookup(kind)?;
        let body = encode_payload(endpoint, attributes);
        let response = self.send(Method::Post, &self.url(endpoint, None), &[], Some(&body))?;
        decode_object(endpoint, response)
    }

    fn read(&self, kind: &str, id: &str) -> Result<RemoteObject, ApiError> {
        let endpoint = lookup(kind)?;
        let response = self.send(Method::Get, &self.url(endpoint, Some(id)), &[], None)?;
        decode_object(endpoint, response)
    }

    fn update(&self, kind: &str, id: &str, changes: &RawAttributes) -> Result<RemoteObject, ApiError> {
        let endpoint = lookup(kind)?;
        let body = encode_payload(endpoint, changes);
        let response = self.send(Method::Put, &self.url(endpoint, Some(id)), &[], Some(&body))?;
        decode_object(endpoint, response)
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), ApiError> {
        let endpoint = lookup(kind)?;
        self.send(Method::Delete, &self.url(endpoint, Some(id)), &[], None)?;
        Ok(())
    }

    fn replaces_on_update(&self, kind: &str) -> bool {
        endpoint(kind).is_some_and(|e| e.full_update)
    }

    fn list_page(&self, kind: &str, cursor: Option<&str>) -> Result<Page, ApiError> {
        let endpoint = lookup(kind)?;
        let url = self.url(endpoint, None);

        if !endpoint.paginated {
            let response = self.send(Method::Get, &url, &[], None)?;
            return Ok(Page {
                items: decode_list(endpoint, response)?,
                next: None,
            });
        }

        let page: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| ApiError::InvalidResponse(format!("bad page cursor '{c}'")))?,
            None => 0,
        };
        let query = [("page", page.to_string()), ("page_size", self.page_size.to_string())];
        let response = self.send(Method::Get, &url, &query, None)?;
        let items = decode_list(endpoint, response)?;

        Ok(Page {
            next: next_cursor(page, items.len(), self.page_size),
            items,
        })
    }
}

fn lookup(kind: &str) -> Result<&'static Endpoint, ApiError> {
    endpoint(kind).ok_or_else(|| ApiError::InvalidResponse(format!("no Datadog endpoint for kind '{kind}'")))
}

fn transport_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Json(e) => ApiError::InvalidResponse(e.to_string()),
        other => ApiError::Connection(other.to_string()),
    }
}

/// A full page means there may be another one.
fn next_cursor(page: usize, received: usize, page_size: usize) -> Option<String> {
    (received >= page_size).then(|| (page + 1).to_string())
}

/// Server-requested wait from `Retry-After` (seconds or HTTP date), falling
/// back to Datadog's `X-RateLimit-Reset` (seconds until the window resets).
fn retry_after(retry_after: Option<&str>, reset: Option<&str>) -> Option<Duration> {
    if let Some(value) = retry_after.map(str::trim) {
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
            let wait = date.signed_duration_since(chrono::Utc::now());
            return Some(wait.to_std().unwrap_or(Duration::ZERO));
        }
    }
    reset
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Datadog reports failures as `{"errors": ["..."]}`.
fn error_message(status: u16, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Json>(body)
        && let Some(errors) = parsed.get("errors").and_then(Json::as_array)
    {
        let messages: Vec<String> = errors
            .iter()
            .map(|e| e.as_str().map_or_else(|| e.to_string(), String::from))
            .collect();
        if !messages.is_empty() {
            return messages.join("; ");
        }
    }

    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {status}");
    }
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// Reference ids travel as strings inside the engine; the API wants integers.
fn encode_payload(endpoint: &Endpoint, attributes: &RawAttributes) -> Json {
    let mut body = attributes.clone();
    for field in endpoint.numeric_ids {
        if let Some(Json::String(s)) = body.get(*field)
            && let Ok(n) = s.parse::<i64>()
        {
            body.insert((*field).to_string(), Json::from(n));
        }
    }
    Json::Object(body)
}

fn decode_object(endpoint: &Endpoint, response: Json) -> Result<RemoteObject, ApiError> {
    let response = match (endpoint.envelope, response) {
        (Some(key), Json::Object(mut wrapper)) if wrapper.contains_key(key) => {
            wrapper.remove(key).unwrap_or(Json::Null)
        }
        (_, response) => response,
    };

    let Json::Object(mut attributes) = response else {
        return Err(ApiError::InvalidResponse(format!(
            "expected a {} object",
            endpoint.kind
        )));
    };

    let id = match attributes.get(endpoint.id_field) {
        Some(Json::String(s)) => s.clone(),
        Some(Json::Number(n)) => n.to_string(),
        _ => {
            return Err(ApiError::InvalidResponse(format!(
                "{} object has no '{}'",
                endpoint.kind, endpoint.id_field
            )));
        }
    };

    for field in endpoint.numeric_ids {
        if let Some(Json::Number(n)) = attributes.get(*field) {
            let as_string = n.to_string();
            attributes.insert((*field).to_string(), Json::String(as_string));
        }
    }

    Ok(RemoteObject { id, attributes })
}

fn decode_list(endpoint: &Endpoint, response: Json) -> Result<Vec<RemoteObject>, ApiError> {
    let list = match endpoint.list_key {
        Some(key) => response.get(key).cloned().unwrap_or(Json::Null),
        None => response,
    };

    match list {
        Json::Array(items) => items
            .into_iter()
            .map(|item| decode_object(endpoint, item))
            .collect(),
        Json::Null => Ok(Vec::new()),
        _ => Err(ApiError::InvalidResponse(format!(
            "expected a list of {} objects",
            endpoint.kind
        ))),
    }
}
