use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use packrestore_feeds::{
    HttpTransport, PackageSource, PushOutcome, ReqwestTransport, SourceProtocol, SourceStore,
};
use packrestore_projects::MsBuildProjectLoader;

use crate::command_flows::{
    add_source, clear_locals, format_push_outcome, format_source_lines, run_list, run_push,
    select_push_source,
};
use crate::completion::write_completions_script;
use crate::config::Settings;
use crate::render::TerminalRenderer;
use crate::restore_flows::{discover_inputs, run_restore, RestoreOptions, RestoreSummary};
use crate::session::Session;
use crate::{Cli, Commands, LocalsCommands, RestoreArgs, SourcesCommands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let env = |name: &str| std::env::var(name).ok();
    let settings = Settings::load(cli.config.as_deref(), &env)?;
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Restore(args) => {
            let transport = Arc::new(ReqwestTransport::new(settings.http_timeout)?);
            let summary = execute_restore(settings, args, transport, renderer)?;
            for line in format_restore_summary(&summary) {
                renderer.print_status(line.0, &line.1);
            }
        }
        Commands::Push {
            package,
            source,
            api_key,
            skip_duplicate,
            non_interactive,
        } => {
            let available = configured_sources(&settings)?;
            let target = select_push_source(&available, &source);
            let transport = Arc::new(ReqwestTransport::new(settings.http_timeout)?);
            let session = Session::open(&settings, vec![target.clone()], transport, non_interactive, false)?;
            let outcome = run_push(&session, &package, &target, api_key.as_deref(), skip_duplicate)?;
            let status = match outcome {
                PushOutcome::Created => "ok",
                PushOutcome::AlreadyExists => "warn",
            };
            renderer.print_status(status, &format_push_outcome(outcome, &package, &target));
        }
        Commands::List {
            id,
            prerelease,
            all_versions,
            source,
        } => {
            let sources = if source.is_empty() {
                configured_sources(&settings)?
            } else {
                sources_from_args(&configured_sources(&settings)?, &source)
            };
            let transport = Arc::new(ReqwestTransport::new(settings.http_timeout)?);
            let session = Session::open(&settings, sources, transport, true, true)?;
            let lines = run_list(&session, &id, prerelease, all_versions)?;
            if lines.is_empty() {
                println!("No package found: {id}");
            } else {
                renderer.print_lines(&lines);
            }
        }
        Commands::Sources { command } => {
            let store = SourceStore::new(&settings.config_home);
            match command {
                SourcesCommands::Add {
                    name,
                    location,
                    protocol,
                } => {
                    let protocol = protocol.as_deref().map(parse_protocol).transpose()?;
                    add_source(&store, &name, &location, protocol)?;
                    renderer.print_status("ok", &format!("added source {name}"));
                }
                SourcesCommands::List => {
                    let sources = settings.merged_sources(&store.list_sources()?);
                    if sources.is_empty() {
                        println!("No sources configured");
                    } else {
                        renderer.print_lines(&format_source_lines(&sources));
                    }
                }
                SourcesCommands::Remove { name } => {
                    store.remove_source(&name)?;
                    renderer.print_status("ok", &format!("removed source {name}"));
                }
                SourcesCommands::Enable { name } => {
                    store.set_enabled(&name, true)?;
                    renderer.print_status("ok", &format!("enabled source {name}"));
                }
                SourcesCommands::Disable { name } => {
                    store.set_enabled(&name, false)?;
                    renderer.print_status("ok", &format!("disabled source {name}"));
                }
            }
        }
        Commands::Locals { command } => match command {
            LocalsCommands::Clear { target } => {
                for line in clear_locals(&settings, target)? {
                    renderer.print_status("ok", &format!("cleared {line}"));
                }
            }
        },
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout();
            write_completions_script(shell, &mut stdout)?;
        }
    }

    Ok(())
}

/// Runs `restore` against an explicit transport; command-line flags are
/// layered over `settings` here.
pub(crate) fn execute_restore(
    mut settings: Settings,
    args: RestoreArgs,
    transport: Arc<dyn HttpTransport>,
    renderer: TerminalRenderer,
) -> Result<RestoreSummary> {
    let target = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let inputs = discover_inputs(&target)?;

    if let Some(directory) = &args.packages_directory {
        settings.global_packages_folder = directory.clone();
    }
    if !args.fallback_source.is_empty() {
        settings.fallback_package_folders = args.fallback_source.clone();
    }
    let sources = if args.source.is_empty() {
        configured_sources(&settings)?
    } else {
        sources_from_args(&configured_sources(&settings)?, &args.source)
    };

    let options = RestoreOptions {
        parallel: !(args.disable_parallel || settings.disable_parallel),
        force: args.force,
        p2p_timeout: args
            .p2p_timeout
            .map(Duration::from_secs)
            .or(settings.p2p_timeout),
        packages_directory: args.packages_directory,
    };
    let session = Session::open(&settings, sources, transport, args.non_interactive, !args.no_cache)?;
    run_restore(&session, &MsBuildProjectLoader, &inputs, &options, renderer)
}

pub(crate) fn configured_sources(settings: &Settings) -> Result<Vec<PackageSource>> {
    let persisted = SourceStore::new(&settings.config_home).list_sources()?;
    Ok(settings.effective_sources(&persisted))
}

/// `--source` values: a configured name selects that source, anything else
/// is a location.
pub(crate) fn sources_from_args(configured: &[PackageSource], args: &[String]) -> Vec<PackageSource> {
    args.iter()
        .enumerate()
        .map(|(index, value)| {
            configured
                .iter()
                .find(|source| source.name.eq_ignore_ascii_case(value))
                .cloned()
                .unwrap_or_else(|| PackageSource::new(format!("source{}", index + 1), value.clone()))
        })
        .collect()
}

pub(crate) fn parse_protocol(value: &str) -> Result<SourceProtocol> {
    match value.trim().to_ascii_lowercase().as_str() {
        "v2" => Ok(SourceProtocol::V2),
        "v3" => Ok(SourceProtocol::V3),
        "folder" => Ok(SourceProtocol::Folder),
        other => bail!("unsupported source protocol '{other}'; supported: v2, v3, folder"),
    }
}

pub(crate) fn format_restore_summary(summary: &RestoreSummary) -> Vec<(&'static str, String)> {
    let mut lines = Vec::new();
    for skipped in &summary.skipped {
        lines.push((
            "warn",
            format!("skipped {}: {}", skipped.path.display(), skipped.reason),
        ));
    }
    for warning in &summary.warnings {
        lines.push(("warn", warning.clone()));
    }
    if !summary.legacy_installed.is_empty() {
        lines.push((
            "ok",
            format!("installed {} packages.config package(s)", summary.legacy_installed.len()),
        ));
    }
    if !summary.tools.is_empty() {
        lines.push(("ok", format!("restored tools: {}", summary.tools.join(", "))));
    }
    for name in &summary.restored {
        lines.push(("ok", format!("restored {name}")));
    }
    for name in &summary.up_to_date {
        lines.push(("ok", format!("{name} is up to date")));
    }
    if lines.is_empty() {
        lines.push(("ok", "nothing to restore".to_string()));
    }
    lines
}
