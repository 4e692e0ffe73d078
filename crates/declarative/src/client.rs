//! Remote API client trait
//!
//! Implement this trait to connect the engine to a concrete API. Calls are
//! made once each; retrying, rate limiting and pagination belong to the
//! [`ApiAdapter`](crate::adapter::ApiAdapter) wrapping the client.

use crate::error::ApiError;

/// Raw JSON attributes as the remote API speaks them
pub type RawAttributes = serde_json::Map<String, serde_json::Value>;

/// An object as returned by the remote API
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    /// Remote identity, normalized to a string
    pub id: String,
    pub attributes: RawAttributes,
}

/// One page of a list call
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RemoteObject>,
    /// Cursor for the next page, `None` on the last page
    pub next: Option<String>,
}

/// The four verbs plus paged listing, one remote call each
pub trait ApiClient: Send + Sync {
    fn create(&self, kind: &str, attributes: &RawAttributes) -> Result<RemoteObject, ApiError>;

    fn read(&self, kind: &str, id: &str) -> Result<RemoteObject, ApiError>;

    /// Apply the given attributes to an existing object
    fn update(
        &self,
        kind: &str,
        id: &str,
        changes: &RawAttributes,
    ) -> Result<RemoteObject, ApiError>;

    fn delete(&self, kind: &str, id: &str) -> Result<(), ApiError>;

    /// Whether an update to `kind` overwrites the whole object, so it must
    /// carry every attribute instead of only the changed ones
    fn replaces_on_update(&self, _kind: &str) -> bool {
        false
    }

    /// Fetch one page; `cursor` is `None` for the first page
    fn list_page(&self, kind: &str, cursor: Option<&str>) -> Result<Page, ApiError>;
}
