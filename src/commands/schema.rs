//! `schema [kind]`

use crate::{provider, ui};
use anyhow::Result;
use colored::Colorize;
use declarative::{AttributeSchema, OnOmit, Presence};

fn flags(attr: &AttributeSchema) -> String {
    let mut flags = vec![match attr.presence {
        Presence::Required => "required".to_string(),
        Presence::Optional => "optional".to_string(),
        Presence::Computed => "computed".to_string(),
    }];
    if attr.force_new {
        flags.push("forces replacement".to_string());
    }
    if attr.sensitive {
        flags.push("sensitive".to_string());
    }
    if let OnOmit::ResetToDefault(default) = &attr.on_omit {
        flags.push(format!("default {default}"));
    }
    flags.join(", ")
}

pub fn run(kind: Option<&str>) -> Result<()> {
    let registry = provider::registry()?;

    let Some(kind) = kind else {
        ui::header("Resource kinds");
        for schema in registry.schemas() {
            println!("  {:<12} {}", schema.kind.bold(), schema.description.dimmed());
        }
        return Ok(());
    };

    let schema = registry.lookup(kind)?;
    ui::header(&schema.kind);
    if !schema.description.is_empty() {
        ui::dim(&schema.description);
    }
    println!();
    for attr in schema.attributes() {
        println!(
            "  {:<20} {:<14} {}",
            attr.name,
            attr.value_type.to_string(),
            flags(attr).dimmed()
        );
    }
    Ok(())
}
