//! `plan` and `apply`

use super::Session;
use crate::cli::{ApplyArgs, PlanArgs};
use crate::config;
use crate::progress::ApplyProgress;
use crate::{Context, render, ui};
use anyhow::{Result, bail};
use declarative::{
    ApiClient, ApplyOptions, CancelToken, DesiredConfig, PlanMode, PlanOptions, Planner,
    Reconciler,
};
use std::time::Duration;

fn plan_options(args: &PlanArgs) -> PlanOptions {
    PlanOptions {
        mode: if args.destroy {
            PlanMode::Destroy
        } else {
            PlanMode::Normal
        },
        target: args.target.clone(),
    }
}

/// Destroy plans ignore the resource file entirely.
fn desired(args: &PlanArgs) -> Result<Vec<DesiredConfig>> {
    if args.destroy {
        return Ok(Vec::new());
    }
    config::load_resources(&args.file)
}

fn refresh_state<C: ApiClient>(ctx: &Context, reconciler: &Reconciler<'_, C>) -> Result<()> {
    if !ctx.quiet {
        ui::info("Refreshing state...");
    }
    let report = reconciler.refresh();
    if !ctx.quiet && (!report.drifted.is_empty() || !report.removed.is_empty()) {
        render::refresh(&report);
    }
    if !report.failed.is_empty() {
        bail!(
            "Refresh failed for {} resources; not planning against stale state",
            report.failed.len()
        );
    }
    Ok(())
}

/// Show what apply would change
pub fn plan(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let desired = desired(args)?;

    if args.refresh {
        let adapter = session.adapter(ctx)?;
        refresh_state(ctx, &Reconciler::new(&session.registry, &adapter, &session.store))?;
    }

    let changes = Planner::new(&session.registry, &session.store).plan(&desired, &plan_options(args))?;
    render::plan(&changes, ctx.verbose > 0);
    Ok(())
}

/// Plan, confirm and apply
pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let desired = desired(&args.plan)?;
    let adapter = session.adapter(ctx)?;
    let reconciler = Reconciler::new(&session.registry, &adapter, &session.store);

    if args.plan.refresh {
        refresh_state(ctx, &reconciler)?;
    }

    let changes = reconciler.plan(&desired, &plan_options(&args.plan))?;
    render::plan(&changes, ctx.verbose > 0);
    if !changes.has_changes() {
        return Ok(());
    }

    let prompt = if args.plan.destroy {
        "Destroy every resource listed above?"
    } else {
        "Apply these changes?"
    };
    if !args.yes && !ui::confirm(prompt)? {
        println!();
        ui::warn("Apply cancelled, nothing was changed");
        return Ok(());
    }

    let options = ApplyOptions {
        jobs: args.jobs.unwrap_or_else(|| session.config.jobs()).max(1),
        timeout: args.timeout.map(Duration::from_secs),
    };
    let mut progress = ApplyProgress::new(ctx.quiet);
    let report = reconciler.apply(&changes, &options, &mut progress, &CancelToken::new())?;

    render::outcomes(&report);
    render::summary(&report.summary);

    if !report.is_success() {
        bail!(
            "{} resources failed and {} were skipped",
            report.summary.failed,
            report.summary.skipped
        );
    }
    Ok(())
}
