//! Plan, outcome and summary display

use colored::{ColoredString, Colorize};
use declarative::{
    Action, ApplyReport, ApplySummary, AttributeDelta, ChangeSet, DiffSummary, Outcome,
    PlannedValue, RefreshReport, Value, group_by_kind,
};

const MAX_VALUE_LEN: usize = 60;
const REDACTED: &str = "(sensitive)";

fn symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Delete => "-".red(),
        Action::Replace => "-/+".red(),
        Action::NoOp => " ".normal(),
    }
}

fn show_value(value: &Value, sensitive: bool) -> String {
    if sensitive {
        return REDACTED.to_string();
    }
    crate::ui::truncate(&value.to_string(), MAX_VALUE_LEN)
}

fn show_planned(value: &PlannedValue, sensitive: bool) -> String {
    match value {
        PlannedValue::Known(v) => show_value(v, sensitive),
        PlannedValue::Pending(_) => value.to_string(),
    }
}

/// One attribute line: `name: old → new`
pub fn format_delta(delta: &AttributeDelta) -> String {
    let new = show_planned(&delta.new, delta.sensitive);
    let line = match &delta.old {
        Some(old) => format!("{}: {} → {}", delta.name, show_value(old, delta.sensitive), new),
        None => format!("{}: {}", delta.name, new),
    };
    if delta.force_new {
        format!("{line} # forces replacement")
    } else {
        line
    }
}

/// Print the plan grouped by kind; unchanged resources only when `show_unchanged`
pub fn plan(changes: &ChangeSet, show_unchanged: bool) {
    let summary = DiffSummary::from_changes(changes);
    if !summary.has_changes() {
        println!();
        println!("  {} No changes. Remote objects match the configuration.", "✓".green());
        return;
    }

    let grouped = group_by_kind(changes);
    let mut kinds: Vec<_> = grouped.keys().copied().collect();
    kinds.sort_unstable();

    println!();
    println!("┌─ {} ─────────────────────────────────────────┐", "Execution Plan".bold());
    println!("│");

    for kind in kinds {
        let kind_changes: Vec<_> = grouped[kind]
            .iter()
            .filter(|c| show_unchanged || c.action.is_change())
            .collect();
        if kind_changes.is_empty() {
            continue;
        }
        println!("│ {}", kind.bold());

        for change in kind_changes {
            let id = change
                .prior
                .as_ref()
                .map(|p| format!(" (id {})", p.id))
                .unwrap_or_default();
            println!(
                "│   {} {}{} {}",
                symbol(change.action),
                change.address,
                id.dimmed(),
                format!("will be {}", past_tense(change.action)).dimmed()
            );
            if change.action != Action::Delete {
                for delta in &change.deltas {
                    println!("│       {}", format_delta(delta));
                }
            }
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!("│ {}", summary_line(&summary));
    println!("└─────────────────────────────────────────────────────┘");
}

fn past_tense(action: Action) -> &'static str {
    match action {
        Action::Create => "created",
        Action::Update => "updated in place",
        Action::Delete => "destroyed",
        Action::Replace => "replaced",
        Action::NoOp => "left unchanged",
    }
}

/// `Plan: 1 to add, 2 to change, 0 to replace, 1 to destroy.`
pub fn summary_line(summary: &DiffSummary) -> String {
    format!(
        "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.replacements.to_string().red(),
        summary.removals.to_string().red()
    )
}

/// Print every change that did not apply cleanly
pub fn outcomes(report: &ApplyReport) {
    let problems: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| !o.outcome.is_success())
        .collect();
    if problems.is_empty() {
        return;
    }

    println!();
    for o in problems {
        let marker = match o.outcome {
            Outcome::Skipped { .. } => "⊘".yellow(),
            _ => "✗".red(),
        };
        println!("  {} {} ({}): {}", marker, o.address, o.action, o.outcome.cause());
    }
}

/// Print final summary
pub fn summary(summary: &ApplySummary) {
    println!();
    if summary.is_success() {
        println!("  {} Apply complete!", "✓".green().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }

    let lines = [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "destroyed"),
        (summary.unchanged, "unchanged"),
        (summary.skipped, "skipped"),
    ];
    for (count, label) in lines {
        if count > 0 {
            println!("    • {count} resources {label}");
        }
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

/// Print what a refresh found
pub fn refresh(report: &RefreshReport) {
    for address in &report.drifted {
        println!("  {} {} {}", "~".yellow(), address, "drifted, state updated".dimmed());
    }
    for address in &report.removed {
        println!("  {} {} {}", "-".red(), address, "deleted outside of the provider".dimmed());
    }
    for (address, message) in &report.failed {
        println!("  {} {}: {}", "✗".red(), address, message);
    }

    println!();
    println!(
        "  {} unchanged, {} drifted, {} removed, {} failed",
        report.unchanged.len(),
        report.drifted.len().to_string().yellow(),
        report.removed.len().to_string().red(),
        report.failed.len()
    );
}
