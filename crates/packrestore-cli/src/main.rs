mod command_flows;
mod completion;
mod config;
mod dispatch;
mod render;
mod restore_flows;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::command_flows::LocalsTarget;
use crate::completion::CliCompletionShell;
use crate::dispatch::run_cli;

const LOG_ENV: &str = "PACKRESTORE_LOG";

#[derive(Parser, Debug)]
#[command(name = "packrestore")]
#[command(version, about = "Restore, push and inspect NuGet packages", long_about = None)]
struct Cli {
    /// Config file to use instead of `packrestore.toml` in the config home.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = Verbosity::Normal)]
    verbosity: Verbosity,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Verbosity {
    Quiet,
    Normal,
    Detailed,
}

impl Verbosity {
    fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Detailed => "debug",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Restore packages for a solution, project or packages.config.
    Restore(RestoreArgs),
    /// Push a package to a source.
    Push {
        package: PathBuf,
        #[arg(long, short = 's')]
        source: String,
        #[arg(long, short = 'k')]
        api_key: Option<String>,
        #[arg(long)]
        skip_duplicate: bool,
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show the latest or every available version of a package.
    List {
        id: String,
        #[arg(long)]
        prerelease: bool,
        #[arg(long)]
        all_versions: bool,
        #[arg(long, short = 's')]
        source: Vec<String>,
    },
    Sources {
        #[command(subcommand)]
        command: SourcesCommands,
    },
    Locals {
        #[command(subcommand)]
        command: LocalsCommands,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct RestoreArgs {
    /// Solution, project, packages.config or a directory holding one.
    path: Option<PathBuf>,
    /// Replaces the configured sources. Repeatable.
    #[arg(long, short = 's')]
    source: Vec<String>,
    #[arg(long)]
    packages_directory: Option<PathBuf>,
    #[arg(long)]
    fallback_source: Vec<PathBuf>,
    #[arg(long)]
    disable_parallel: bool,
    /// Skip the machine-wide http cache.
    #[arg(long)]
    no_cache: bool,
    /// Project-to-project closure timeout, in seconds.
    #[arg(long, value_name = "SECONDS")]
    p2p_timeout: Option<u64>,
    /// Restore even when inputs are unchanged.
    #[arg(long)]
    force: bool,
    #[arg(long)]
    non_interactive: bool,
}

#[derive(Subcommand, Debug)]
enum SourcesCommands {
    Add {
        name: String,
        location: String,
        #[arg(long)]
        protocol: Option<String>,
    },
    List,
    Remove {
        name: String,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum LocalsCommands {
    Clear {
        #[arg(value_enum)]
        target: LocalsTarget,
    },
}

fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests;
