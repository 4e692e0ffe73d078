//! Commands that read from Datadog: `refresh`, `import`, `list`

use super::Session;
use crate::{Context, render, ui};
use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use declarative::{Reconciler, RemoteObject, ResourceAddress};
use rayon::prelude::*;

/// Attributes tried in order to label a remote object in listings
const LABEL_ATTRIBUTES: [&str; 4] = ["name", "title", "handle", "message"];

fn label(object: &RemoteObject) -> String {
    LABEL_ATTRIBUTES
        .iter()
        .find_map(|key| object.attributes.get(*key).and_then(|v| v.as_str()))
        .map(|s| ui::truncate(s, 60))
        .unwrap_or_default()
}

pub fn refresh(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    if session.store.is_empty() {
        if !ctx.quiet {
            ui::info("State is empty, nothing to refresh");
        }
        return Ok(());
    }

    let adapter = session.adapter(ctx)?;
    let report = Reconciler::new(&session.registry, &adapter, &session.store).refresh();
    render::refresh(&report);

    if !report.failed.is_empty() {
        bail!("Could not refresh {} resources", report.failed.len());
    }
    Ok(())
}

pub fn import(ctx: &Context, address: &ResourceAddress, id: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let adapter = session.adapter(ctx)?;
    let reconciler = Reconciler::new(&session.registry, &adapter, &session.store);

    let state = reconciler
        .import(address, id)
        .with_context(|| format!("Failed to import {} {id} as {address}", address.kind))?;

    if !ctx.quiet {
        ui::success(&format!(
            "Imported {address} ({} attributes recorded)",
            state.attributes.len()
        ));
        ui::dim("Add a matching [[resource]] entry, or the next apply will plan to delete it");
    }
    Ok(())
}

/// List remote objects; several kinds are fetched in parallel
pub fn list(ctx: &Context, kind: Option<&str>, json: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let kinds: Vec<&str> = match kind {
        Some(kind) => vec![session.registry.lookup(kind)?.kind.as_str()],
        None => session.registry.kinds().collect(),
    };
    let adapter = session.adapter(ctx)?;

    let listings: Vec<(&str, declarative::Result<Vec<RemoteObject>>)> = kinds
        .par_iter()
        .map(|kind| (*kind, adapter.list_all(kind)))
        .collect();

    let mut failures = 0;
    let mut dump = serde_json::Map::new();
    for (kind, listing) in listings {
        let objects = match listing {
            Ok(objects) => objects,
            Err(e) => {
                ui::error(&format!("Failed to list {kind}: {e}"));
                failures += 1;
                continue;
            }
        };

        if json {
            let items = objects
                .into_iter()
                .map(|o| serde_json::Value::Object(o.attributes))
                .collect();
            dump.insert(kind.to_string(), serde_json::Value::Array(items));
            continue;
        }

        ui::section(&format!("{kind} ({})", objects.len()));
        for object in &objects {
            println!("  {:<24} {}", object.id.dimmed(), label(object));
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }
    if failures > 0 {
        bail!("{failures} kinds could not be listed");
    }
    Ok(())
}
