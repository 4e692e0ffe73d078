mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod provider;
mod render;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, StateCommand};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub api_key: Option<String>,
    pub app_key: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state: cli.state,
        api_key: cli.api_key,
        app_key: cli.app_key,
    };

    match cli.command {
        Command::Plan(args) => commands::plan::plan(&ctx, &args),
        Command::Apply(args) => commands::plan::apply(&ctx, &args),
        Command::Refresh => commands::remote::refresh(&ctx),
        Command::Import { address, id } => commands::remote::import(&ctx, &address, &id),
        Command::List { kind, json } => commands::remote::list(&ctx, kind.as_deref(), json),
        Command::State(cmd) => match cmd {
            StateCommand::List => commands::state::list(&ctx),
            StateCommand::Show { address, json } => commands::state::show(&ctx, &address, json),
            StateCommand::Rm { addresses } => commands::state::rm(&ctx, &addresses),
        },
        Command::Schema { kind } => commands::schema::run(kind.as_deref()),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "terraform-provider-datadog", &mut io::stdout());
            Ok(())
        }
    }
}
