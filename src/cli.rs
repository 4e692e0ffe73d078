use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use declarative::ResourceAddress;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "terraform-provider-datadog")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative management of Datadog monitors, downtimes, dashboards and users", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Provider config file [default: ~/.config/datadog-provider/config.toml]
    #[arg(long, global = true, env = "DATADOG_PROVIDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// State file, overriding `state_path` from the config
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Datadog API key
    #[arg(long, global = true, env = "DATADOG_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Datadog application key
    #[arg(long, global = true, env = "DATADOG_APP_KEY", hide_env_values = true)]
    pub app_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Converge Datadog to the resource file
    Apply(ApplyArgs),

    /// Compare state with Datadog and record drift
    Refresh,

    /// Bring an existing Datadog object under management
    Import {
        /// Address to record it under (kind.name)
        address: ResourceAddress,
        /// Datadog id (a handle for users)
        id: String,
    },

    /// List remote objects of a kind (every kind if omitted)
    List {
        kind: Option<String>,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or edit the state file
    #[command(subcommand)]
    State(StateCommand),

    /// Describe resource kinds and their attributes
    Schema {
        kind: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Resource file
    #[arg(short, long, default_value = "resources.toml")]
    pub file: PathBuf,

    /// Plan to delete everything in state
    #[arg(long)]
    pub destroy: bool,

    /// Only `kind` or `kind.name`, plus what it depends on
    #[arg(short, long)]
    pub target: Option<String>,

    /// Refresh state from Datadog before planning
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Parallel workers, overriding `jobs` from the config
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop starting new operations after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

// ============================================================================
// State
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List managed addresses
    List,

    /// Show the recorded attributes of one resource
    Show {
        address: ResourceAddress,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget resources without deleting them from Datadog
    Rm {
        #[arg(required = true)]
        addresses: Vec<ResourceAddress>,
    },
}
