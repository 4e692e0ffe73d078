//! `state list|show|rm`

use super::Session;
use crate::{Context, ui};
use anyhow::{Result, bail};
use colored::Colorize;
use declarative::ResourceAddress;

pub fn list(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let entries = session.store.entries();

    if entries.is_empty() {
        if !ctx.quiet {
            ui::info(&format!("No resources in {}", session.state_path.display()));
        }
        return Ok(());
    }

    for (address, state) in entries {
        println!("{:<40} {}", address.to_string(), state.id.dimmed());
    }
    Ok(())
}

pub fn show(ctx: &Context, address: &ResourceAddress, json: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let Some(state) = session.store.get(address) else {
        bail!("{address} is not in state");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let schema = session.registry.for_address(address).ok();
    ui::header(&address.to_string());
    ui::kv("id", &state.id);
    for (name, value) in &state.attributes {
        if name == declarative::ID_ATTRIBUTE {
            continue;
        }
        let sensitive = schema
            .and_then(|s| s.get(name))
            .is_some_and(|a| a.sensitive);
        let shown = if sensitive {
            "(sensitive)".to_string()
        } else {
            value.to_string()
        };
        ui::kv(name, &shown);
    }

    if !state.dependencies.is_empty() {
        ui::section("Depends on");
        for dependency in &state.dependencies {
            ui::dim(&dependency.to_string());
        }
    }
    Ok(())
}

/// Forget resources; the Datadog objects stay untouched
pub fn rm(ctx: &Context, addresses: &[ResourceAddress]) -> Result<()> {
    let session = Session::open(ctx)?;

    let missing: Vec<String> = addresses
        .iter()
        .filter(|a| session.store.get(a).is_none())
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        bail!("Not in state: {}", missing.join(", "));
    }

    for address in addresses {
        session.store.delete(address)?;
        if !ctx.quiet {
            ui::success(&format!("Removed {address} from state"));
        }
    }
    Ok(())
}
