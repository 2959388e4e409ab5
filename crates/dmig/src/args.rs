use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Project-driven data migrations between heterogeneous stores.
#[derive(Debug, Parser)]
#[command(name = "dmig", version, about)]
pub struct Cli {
    /// Project machine name; the project file is
    /// `<directory>/<project>-dmk.yml`.
    #[arg(short = 'p', long)]
    pub project: String,

    /// Directory holding the project file and the persistent KV stores.
    #[arg(short = 'd', long, default_value = ".")]
    pub directory: PathBuf,

    /// Accept any SSH host key instead of checking known_hosts.
    #[arg(long)]
    pub insecure_host_keys: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a migration.
    Run(RunArgs),
    /// List project components.
    List {
        #[arg(value_enum, default_value_t = ComponentKind::Migrations)]
        kind: ComponentKind,
    },
    /// Describe one component as YAML.
    Describe {
        #[arg(value_enum)]
        kind: ComponentKind,
        machine_name: String,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Traverse the source without writing to the destination.
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Per-record and setup-detail events.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Omit timestamps and zero durations (deterministic output).
    #[arg(short = 'n', long)]
    pub no_time: bool,

    /// Only errors and the terminal event.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Emit events as JSON lines instead of human text.
    #[arg(short = 'l', long)]
    pub log_out: bool,

    /// Stop after N destination writes (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub limit: u64,

    /// Migration machine name.
    pub migration: String,

    /// Positional source-query args.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ComponentKind {
    Databases,
    Tunnels,
    Migrations,
}
