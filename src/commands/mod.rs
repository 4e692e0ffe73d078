//! Command implementations
//!
//! Every command opens a [`Session`]: provider config, the schema registry
//! and the state file. Commands that talk to Datadog additionally build an
//! adapter, which is the only step that needs credentials.

pub mod plan;
pub mod remote;
pub mod schema;
pub mod state;

use crate::Context;
use crate::config::ProviderConfig;
use crate::provider::{self, DatadogClient};
use crate::state::JsonFileBackend;
use anyhow::{Context as AnyhowContext, Result};
use declarative::{ApiAdapter, SchemaRegistry, StateStore};
use std::path::PathBuf;

/// Config, schemas and state shared by every command
pub struct Session {
    pub config: ProviderConfig,
    pub registry: SchemaRegistry,
    pub store: StateStore,
    pub state_path: PathBuf,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let config = ProviderConfig::load(ctx.config.as_deref())?;
        let registry = provider::registry().context("Failed to register Datadog resource kinds")?;

        let state_path = match &ctx.state {
            Some(path) => path.clone(),
            None => config.state_path()?,
        };
        let store = StateStore::open(Box::new(JsonFileBackend::new(&state_path)))
            .with_context(|| format!("Failed to open state file: {}", state_path.display()))?;
        log::debug!("Using state file {} ({} entries)", state_path.display(), store.len());

        Ok(Self {
            config,
            registry,
            store,
            state_path,
        })
    }

    /// Adapter for the configured Datadog site
    pub fn adapter(&self, ctx: &Context) -> Result<ApiAdapter<DatadogClient>> {
        let (api_key, app_key) = self
            .config
            .credentials(ctx.api_key.as_deref(), ctx.app_key.as_deref())?;
        let client = DatadogClient::new(
            self.config.api_url(),
            api_key,
            app_key,
            self.config.request_timeout(),
        );
        log::debug!("Talking to {}", client.api_base());
        Ok(ApiAdapter::new(client, self.config.adapter_config()))
    }
}
