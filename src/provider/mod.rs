//! Datadog resource kinds
//!
//! Each kind contributes its attribute schema and the shape of its REST
//! endpoint. The engine only ever sees the schemas; the HTTP client uses the
//! endpoint descriptions.

pub mod client;
mod dashboard;
mod downtime;
mod monitor;
mod user;

pub use client::DatadogClient;

use declarative::SchemaRegistry;

/// How one kind is exposed over the Datadog REST API
#[derive(Debug)]
pub struct Endpoint {
    pub kind: &'static str,
    /// Collection path, e.g. `/api/v1/monitor`
    pub path: &'static str,
    /// Key wrapping single-object responses (`{"user": {...}}`)
    pub envelope: Option<&'static str>,
    /// Key holding the list in list responses; `None` for a bare array
    pub list_key: Option<&'static str>,
    /// Response field carrying the remote identity
    pub id_field: &'static str,
    /// Whether listing takes `page`/`page_size` query parameters
    pub paginated: bool,
    /// Reference-carrying fields the API wants as integers
    pub numeric_ids: &'static [&'static str],
    /// PUT replaces the whole object, so updates must send every field
    pub full_update: bool,
}

const ENDPOINTS: [&Endpoint; 4] = [
    &monitor::ENDPOINT,
    &downtime::ENDPOINT,
    &dashboard::ENDPOINT,
    &user::ENDPOINT,
];

/// Endpoint description for a registered kind
pub fn endpoint(kind: &str) -> Option<&'static Endpoint> {
    ENDPOINTS.iter().copied().find(|e| e.kind == kind)
}

/// Registry holding every Datadog kind this provider manages
pub fn registry() -> declarative::Result<SchemaRegistry> {
    Ok(SchemaRegistry::builder()
        .register(monitor::schema())?
        .register(downtime::schema())?
        .register(dashboard::schema())?
        .register(user::schema())?
        .build())
}
