use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use packrestore_core::{
    find_restore_error, PackageArchiveBuilder, PackageManifest, PackageVersion, RestoreError,
};
use packrestore_feeds::{HttpMethod, HttpResponse, MemoryTransport, PackageSource, PushOutcome, SourceProtocol};
use tempfile::TempDir;

use super::*;
use crate::command_flows::{clear_locals, format_source_lines, run_list, run_push, select_push_source};
use crate::completion::write_completions_script;
use crate::config::{parse_config, ConfigFile, Settings, ENV_CONFIG_HOME, ENV_FALLBACK_PACKAGES, ENV_PACKAGES};
use crate::dispatch::{execute_restore, format_restore_summary, parse_protocol, sources_from_args};
use crate::render::{render_status_line, OutputStyle, TerminalRenderer};
use crate::restore_flows::{discover_inputs, RestoreSummary};
use crate::session::Session;

fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("path must have a parent")).expect("must create dirs");
    fs::write(&path, content).expect("must write file");
    path
}

fn version(raw: &str) -> PackageVersion {
    PackageVersion::parse(raw).expect("version must parse")
}

fn publish(feed: &Path, manifest: PackageManifest) {
    let id = manifest.id.to_string();
    let name = format!("{}.nupkg", manifest.identity().file_stem());
    let bytes = PackageArchiveBuilder::new(manifest)
        .file(format!("lib/{id}.dll"), "x")
        .file(format!("build/{id}.targets"), "<Project />")
        .build()
        .expect("must build package");
    fs::write(feed.join(name), bytes).expect("must write package");
}

fn sdk_project(framework: &str, packages: &[(&str, &str)], references: &[&str], tools: &[(&str, &str)]) -> String {
    let mut out = format!(
        "<Project Sdk=\"Microsoft.NET.Sdk\">\n  <PropertyGroup>\n    <TargetFramework>{framework}</TargetFramework>\n  </PropertyGroup>\n  <ItemGroup>\n"
    );
    for (id, version) in packages {
        out.push_str(&format!("    <PackageReference Include=\"{id}\" Version=\"{version}\" />\n"));
    }
    for reference in references {
        out.push_str(&format!("    <ProjectReference Include=\"{reference}\" />\n"));
    }
    for (id, version) in tools {
        out.push_str(&format!("    <DotNetCliToolReference Include=\"{id}\" Version=\"{version}\" />\n"));
    }
    out.push_str("  </ItemGroup>\n</Project>\n");
    out
}

struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Self {
            root: TempDir::new().expect("must create temp dir"),
        };
        fs::create_dir_all(workspace.feed()).expect("must create feed dir");
        workspace
    }

    fn feed(&self) -> PathBuf {
        self.root.path().join("feed")
    }

    fn home(&self) -> PathBuf {
        self.root.path().join("home")
    }

    fn repo(&self) -> PathBuf {
        self.root.path().join("repo")
    }

    fn global(&self) -> PathBuf {
        self.home().join("packages")
    }

    fn settings(&self) -> Settings {
        let home = self.home().display().to_string();
        let env = move |name: &str| (name == ENV_CONFIG_HOME).then(|| home.clone());
        Settings::load(None, &env).expect("must load settings")
    }

    fn args(&self, path: PathBuf) -> RestoreArgs {
        RestoreArgs {
            path: Some(path),
            source: vec![self.feed().display().to_string()],
            non_interactive: true,
            ..RestoreArgs::default()
        }
    }

    fn restore(&self, args: RestoreArgs) -> anyhow::Result<RestoreSummary> {
        execute_restore(
            self.settings(),
            args,
            Arc::new(MemoryTransport::new()),
            TerminalRenderer::from_style(OutputStyle::Plain),
        )
    }
}

#[test]
fn restore_command_parses_flags() {
    let cli = Cli::try_parse_from([
        "packrestore",
        "restore",
        "App.sln",
        "--source",
        "https://feed.test/index.json",
        "-s",
        "./local",
        "--packages-directory",
        "pkgs",
        "--fallback-source",
        "/opt/fallback",
        "--disable-parallel",
        "--no-cache",
        "--p2p-timeout",
        "30",
        "--force",
        "--non-interactive",
        "--verbosity",
        "detailed",
    ])
    .expect("command must parse");

    assert_eq!(cli.verbosity, Verbosity::Detailed);
    match cli.command {
        Commands::Restore(args) => {
            assert_eq!(args.path, Some(PathBuf::from("App.sln")));
            assert_eq!(args.source, vec!["https://feed.test/index.json", "./local"]);
            assert_eq!(args.packages_directory, Some(PathBuf::from("pkgs")));
            assert_eq!(args.fallback_source, vec![PathBuf::from("/opt/fallback")]);
            assert!(args.disable_parallel);
            assert!(args.no_cache);
            assert_eq!(args.p2p_timeout, Some(30));
            assert!(args.force);
            assert!(args.non_interactive);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn other_commands_parse() {
    let cli = Cli::try_parse_from([
        "packrestore",
        "push",
        "pkg.1.0.0.nupkg",
        "--source",
        "internal",
        "--api-key",
        "secret",
        "--skip-duplicate",
    ])
    .expect("push must parse");
    match cli.command {
        Commands::Push {
            package,
            source,
            api_key,
            skip_duplicate,
            non_interactive,
        } => {
            assert_eq!(package, PathBuf::from("pkg.1.0.0.nupkg"));
            assert_eq!(source, "internal");
            assert_eq!(api_key.as_deref(), Some("secret"));
            assert!(skip_duplicate);
            assert!(!non_interactive);
        }
        other => panic!("unexpected command: {other:?}"),
    }

    let cli = Cli::try_parse_from(["packrestore", "sources", "add", "internal", "https://feed.test/", "--protocol", "v2"])
        .expect("sources add must parse");
    assert!(matches!(
        cli.command,
        Commands::Sources {
            command: SourcesCommands::Add { ref protocol, .. }
        } if protocol.as_deref() == Some("v2")
    ));

    let cli = Cli::try_parse_from(["packrestore", "locals", "clear", "http-cache"]).expect("locals must parse");
    assert!(matches!(
        cli.command,
        Commands::Locals {
            command: LocalsCommands::Clear {
                target: LocalsTarget::HttpCache
            }
        }
    ));

    let err = Cli::try_parse_from(["packrestore", "locals", "clear", "everything"]).expect_err("unknown target must fail");
    assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
}

#[test]
fn settings_default_to_config_home() {
    let home = PathBuf::from("/home/dev/.packrestore");
    let settings = Settings::resolve(ConfigFile::default(), home.clone(), &|_| None).expect("must resolve settings");

    assert_eq!(settings.global_packages_folder, home.join("packages"));
    assert_eq!(settings.machine_cache_folder, home.join("http-cache"));
    assert!(settings.fallback_package_folders.is_empty());
    assert_eq!(settings.http.max_tries, 3);
    assert_eq!(settings.http.max_redirects, 50);

    let sources = settings.effective_sources(&[]);
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "nuget.org");
    assert_eq!(sources[0].resolved_protocol(), SourceProtocol::V3);
}

#[test]
fn settings_layer_file_then_environment() {
    let file = parse_config(
        r#"
global_packages_folder = "/data/packages"
fallback_package_folders = ["/opt/a"]
dependency_version = "highest-minor"
disable_parallel = true
p2p_timeout_secs = 30

[http]
max_tries = 5
max_redirects = 3

[[sources]]
name = "internal"
location = "https://feed.test/v3/index.json"

[[credential_providers]]
name = "corp"
path = "/usr/local/bin/corp-auth"
args = ["-U"]
timeout_secs = 10
"#,
    )
    .expect("config must parse");

    let settings = Settings::resolve(file.clone(), PathBuf::from("/cfg"), &|_| None).expect("must resolve");
    assert_eq!(settings.global_packages_folder, PathBuf::from("/data/packages"));
    assert_eq!(settings.fallback_package_folders, vec![PathBuf::from("/opt/a")]);
    assert_eq!(settings.dependency_behavior, packrestore_core::DependencyBehavior::HighestMinor);
    assert!(settings.disable_parallel);
    assert_eq!(settings.p2p_timeout, Some(std::time::Duration::from_secs(30)));
    assert_eq!(settings.http.max_tries, 5);
    assert_eq!(settings.http.max_redirects, 3);
    assert_eq!(settings.credential_providers[0].timeout(), std::time::Duration::from_secs(10));
    assert_eq!(settings.effective_sources(&[])[0].name, "internal");

    let env = |name: &str| match name {
        ENV_PACKAGES => Some("/env/packages".to_string()),
        ENV_FALLBACK_PACKAGES => Some("/env/one; /env/two;".to_string()),
        _ => None,
    };
    let settings = Settings::resolve(file, PathBuf::from("/cfg"), &env).expect("must resolve");
    assert_eq!(settings.global_packages_folder, PathBuf::from("/env/packages"));
    assert_eq!(
        settings.fallback_package_folders,
        vec![PathBuf::from("/env/one"), PathBuf::from("/env/two")]
    );
}

#[test]
fn invalid_config_values_are_rejected() {
    let err = parse_config("unknown_key = 1").expect_err("unknown keys must fail");
    assert!(err.to_string().contains("failed parsing toml"));

    let file = parse_config("dependency_version = \"newest\"").expect("config must parse");
    let err = Settings::resolve(file, PathBuf::from("/cfg"), &|_| None).expect_err("behavior must be known");
    assert!(err.to_string().contains("unsupported dependency version behavior 'newest'"));

    let err = Settings::load(Some(Path::new("/definitely/missing.toml")), &|_| Some("/tmp".to_string()))
        .expect_err("explicit config must exist");
    assert!(err.to_string().contains("config file does not exist"));
}

#[test]
fn persisted_sources_merge_after_file_sources() {
    let mut file = ConfigFile::default();
    file.sources.push(PackageSource::new("internal", "https://feed.test/index.json"));
    let settings = Settings::resolve(file, PathBuf::from("/cfg"), &|_| None).expect("must resolve");

    let mut disabled = PackageSource::new("old", "/srv/old");
    disabled.enabled = false;
    let persisted = vec![
        PackageSource::new("INTERNAL", "https://shadowed.test/"),
        PackageSource::new("local", "/srv/local"),
        disabled,
    ];

    let names = |sources: Vec<PackageSource>| sources.into_iter().map(|source| source.name).collect::<Vec<_>>();
    assert_eq!(names(settings.merged_sources(&persisted)), vec!["internal", "local", "old"]);
    assert_eq!(names(settings.effective_sources(&persisted)), vec!["internal", "local"]);

    let lines = format_source_lines(&settings.merged_sources(&persisted));
    assert_eq!(lines[2], "3. old [folder, disabled] /srv/old");
}

#[test]
fn source_arguments_select_configured_names_or_locations() {
    let configured = vec![PackageSource::new("internal", "https://feed.test/index.json")];
    let sources = sources_from_args(&configured, &["Internal".to_string(), "/srv/feed".to_string()]);
    assert_eq!(sources[0].location, "https://feed.test/index.json");
    assert_eq!(sources[1].name, "source2");
    assert_eq!(sources[1].resolved_protocol(), SourceProtocol::Folder);

    assert_eq!(parse_protocol("V2").expect("v2 must parse"), SourceProtocol::V2);
    let err = parse_protocol("v4").expect_err("v4 is unknown");
    assert!(err.to_string().contains("unsupported source protocol 'v4'"));
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "restored App"),
        "restored App"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "skipped Broken.csproj"),
        "[WARN] skipped Broken.csproj"
    );
}

#[test]
fn empty_restore_summary_says_so() {
    let lines = format_restore_summary(&RestoreSummary::default());
    assert_eq!(lines, vec![("ok", "nothing to restore".to_string())]);
}

#[test]
fn completions_script_names_the_binary() {
    let mut out = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &mut out).expect("must write completions");
    let script = String::from_utf8(out).expect("script must be utf-8");
    assert!(script.contains("packrestore"));
    assert!(script.contains("restore"));
}

#[test]
fn discovers_restore_inputs_from_directories() {
    let tmp = TempDir::new().expect("must create temp dir");
    let solution = write(
        tmp.path(),
        "App.sln",
        "Project(\"{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}\") = \"App\", \"App\\App.csproj\", \"{11111111-1111-1111-1111-111111111111}\"\nEndProject\n",
    );
    write(tmp.path(), ".nuget/packages.config", "<packages />");

    let from_dir = discover_inputs(tmp.path()).expect("solution dir must resolve");
    let from_file = discover_inputs(&solution).expect("solution must resolve");
    assert_eq!(from_dir, from_file);
    assert_eq!(from_file.projects, vec![tmp.path().join("App").join("App.csproj")]);
    assert_eq!(from_file.packages_configs, vec![tmp.path().join(".nuget").join("packages.config")]);

    let projects = TempDir::new().expect("must create temp dir");
    write(projects.path(), "A.csproj", "<Project />");
    write(projects.path(), "B.csproj", "<Project />");
    let err = discover_inputs(projects.path()).expect_err("two projects are ambiguous");
    assert!(err.to_string().contains("multiple project files found"));

    let empty = TempDir::new().expect("must create temp dir");
    let err = discover_inputs(empty.path()).expect_err("nothing to restore");
    assert!(err.to_string().contains("no solution, project or packages.config found"));
}

#[test]
fn restore_writes_outputs_and_then_no_ops() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("packageB", version("1.0.0")));
    let mut a = PackageManifest::new("packageA", version("1.0.0"));
    a.dependency_groups.push(packrestore_core::DependencyGroup {
        target_framework: None,
        dependencies: vec![packrestore_core::PackageDependency::new(
            "packageB",
            packrestore_core::VersionConstraint::parse("1.0.0").expect("range must parse"),
        )],
    });
    publish(&ws.feed(), a);
    let project = write(&ws.repo(), "App/App.csproj", &sdk_project("net45", &[("packageA", "1.0.0")], &[], &[]));

    let summary = ws.restore(ws.args(project.clone())).expect("restore must succeed");
    assert_eq!(summary.restored, vec!["App"]);

    let obj = ws.repo().join("App").join("obj");
    let assets = fs::read_to_string(obj.join("project.assets.json")).expect("assets file must exist");
    assert!(assets.contains("packageA/1.0.0"));
    assert!(assets.contains("packageB/1.0.0"));
    let targets = fs::read(obj.join("App.nuget.g.targets")).expect("targets must exist");
    let props = fs::read(obj.join("App.nuget.g.props")).expect("props must exist");
    let targets_text = String::from_utf8_lossy(&targets).to_string();
    let b_import = targets_text.find("packageB.targets").expect("packageB import");
    let a_import = targets_text.find("packageA.targets").expect("packageA import");
    assert!(b_import < a_import, "dependency imports come first");
    assert!(ws.global().join("packagea").join("1.0.0").join("packagea.1.0.0.nupkg.sha512").is_file());

    let summary = ws.restore(ws.args(project.clone())).expect("second restore must succeed");
    assert_eq!(summary.up_to_date, vec!["App"]);
    assert!(summary.restored.is_empty());

    for _ in 0..2 {
        let mut args = ws.args(project.clone());
        args.force = true;
        let summary = ws.restore(args).expect("forced restore must succeed");
        assert_eq!(summary.restored, vec!["App"]);
        assert_eq!(fs::read(obj.join("App.nuget.g.targets")).expect("targets"), targets);
        assert_eq!(fs::read(obj.join("App.nuget.g.props")).expect("props"), props);
    }
}

#[test]
fn restore_reruns_when_an_installed_package_disappears() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("packageA", version("1.0.0")));
    let project = write(&ws.repo(), "App/App.csproj", &sdk_project("net45", &[("packageA", "1.0.0")], &[], &[]));

    ws.restore(ws.args(project.clone())).expect("restore must succeed");
    fs::remove_dir_all(ws.global().join("packagea")).expect("must remove install");

    let summary = ws.restore(ws.args(project)).expect("restore must succeed again");
    assert_eq!(summary.restored, vec!["App"]);
    assert!(ws.global().join("packagea").join("1.0.0").is_dir());
}

#[test]
fn cached_pin_survives_deletion_from_the_feed() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("x", version("1.0.0")));
    publish(&ws.feed(), PackageManifest::new("x", version("2.0.0")));
    let b = write(&ws.repo(), "B/B.csproj", &sdk_project("net45", &[("x", "1.0.0")], &[], &[]));
    ws.restore(ws.args(b.clone())).expect("B must restore");

    fs::remove_file(ws.feed().join("x.1.0.0.nupkg")).expect("must delete from feed");
    let a = write(&ws.repo(), "A/A.csproj", &sdk_project("net45", &[("x", "2.0.0")], &[], &[]));
    ws.restore(ws.args(a)).expect("A must restore");

    let mut args = ws.args(b);
    args.force = true;
    ws.restore(args).expect("B must still restore from the global folder");
    let assets = fs::read_to_string(ws.repo().join("B").join("obj").join("project.assets.json")).expect("assets");
    assert!(assets.contains("x/1.0.0"));
}

#[test]
fn min_client_version_violation_fails_restore() {
    let ws = Workspace::new();
    let mut manifest = PackageManifest::new("packageA", version("1.0.0"));
    manifest.min_client_version = Some(version("9.9.9"));
    publish(&ws.feed(), manifest);
    let project = write(&ws.repo(), "App/App.csproj", &sdk_project("net45", &[("packageA", "1.0.0")], &[], &[]));

    let err = ws.restore(ws.args(project)).expect_err("restore must fail");
    assert!(matches!(
        find_restore_error(&err),
        Some(RestoreError::MinClientVersion { required, .. }) if required == "9.9.9"
    ));
    let message = format!("{err:#}");
    assert!(message.contains("'packageA 1.0.0' package requires client version '9.9.9' or above"));
    assert!(!ws.repo().join("App").join("obj").join("project.assets.json").exists());
}

#[test]
fn duplicate_solution_packages_config_entries_fail() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("packageA", version("1.0.0")));
    publish(&ws.feed(), PackageManifest::new("packageA", version("3.0.0")));
    write(
        &ws.repo(),
        ".nuget/packages.config",
        r#"<packages>
  <package id="packageA" version="1.0.0" />
  <package id="packageA" version="3.0.0" />
</packages>"#,
    );
    write(&ws.repo(), "Empty.sln", "");

    let err = ws.restore(ws.args(ws.repo().join("Empty.sln"))).expect_err("restore must fail");
    assert!(err
        .to_string()
        .contains("There are duplicate packages: packageA.1.0.0, packageA.3.0.0"));
    assert!(!ws.repo().join("packages").exists());
}

#[test]
fn packages_config_restores_into_solution_packages_folder() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("packageA", version("1.0.0")));
    publish(&ws.feed(), PackageManifest::new("packageB", version("2.0.0")));
    write(
        &ws.repo(),
        "Legacy/Legacy.csproj",
        "<Project ToolsVersion=\"15.0\">\n  <PropertyGroup>\n    <TargetFrameworkVersion>v4.5</TargetFrameworkVersion>\n  </PropertyGroup>\n</Project>\n",
    );
    write(
        &ws.repo(),
        "Legacy/packages.config",
        r#"<packages><package id="packageA" version="1.0.0" targetFramework="net45" /></packages>"#,
    );
    write(
        &ws.repo(),
        ".nuget/packages.config",
        r#"<packages><package id="packageB" version="2.0.0" /></packages>"#,
    );
    let solution = write(
        &ws.repo(),
        "Legacy.sln",
        "Project(\"{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}\") = \"Legacy\", \"Legacy\\Legacy.csproj\", \"{22222222-2222-2222-2222-222222222222}\"\nEndProject\n",
    );

    let summary = ws.restore(ws.args(solution.clone())).expect("restore must succeed");
    let mut installed = summary.legacy_installed.clone();
    installed.sort();
    assert_eq!(installed, vec!["packageA.1.0.0", "packageB.2.0.0"]);
    assert!(ws
        .repo()
        .join("packages")
        .join("packageA.1.0.0")
        .join("packageA.1.0.0.nupkg")
        .is_file());
    assert!(summary.restored.is_empty());
    assert!(!ws.repo().join("Legacy").join("obj").exists());

    let summary = ws.restore(ws.args(solution)).expect("second restore must succeed");
    assert!(summary.legacy_installed.is_empty());
}

#[test]
fn shared_tool_reference_installs_once() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("Tool.Cli", version("1.0.0")));

    let mut solution = String::new();
    for index in 0..10 {
        let name = format!("P{index}");
        write(
            &ws.repo(),
            &format!("{name}/{name}.csproj"),
            &sdk_project("netcoreapp2.1", &[], &[], &[("Tool.Cli", "1.0.0")]),
        );
        solution.push_str(&format!(
            "Project(\"{{9A19103F-16F7-4668-BE54-9A1E7A4F7556}}\") = \"{name}\", \"{name}\\{name}.csproj\", \"{{00000000-0000-0000-0000-00000000000{index}}}\"\nEndProject\n"
        ));
    }
    let solution = write(&ws.repo(), "Tools.sln", &solution);

    let summary = ws.restore(ws.args(solution)).expect("restore must succeed");
    assert_eq!(summary.tools, vec!["Tool.Cli.1.0.0"]);
    assert_eq!(summary.restored.len(), 10);

    let installs = fs::read_dir(ws.global().join("tool.cli"))
        .expect("tool must be installed")
        .count();
    assert_eq!(installs, 1);
    let tool_dirs = fs::read_dir(ws.global().join(".tools").join("tool.cli"))
        .expect("tool assets must exist")
        .count();
    assert_eq!(tool_dirs, 1);
    assert!(ws
        .global()
        .join(".tools/tool.cli/1.0.0/netcoreapp2.1/project.assets.json")
        .is_file());
}

#[test]
fn unknown_intermediate_project_passes_references_through() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("leaf-dep", version("1.0.0")));
    let app = write(
        &ws.repo(),
        "App/App.csproj",
        &sdk_project("netcoreapp2.1", &[], &["../Native/Native.csproj"], &[]),
    );
    write(
        &ws.repo(),
        "Native/Native.csproj",
        "<Project>\n  <ItemGroup>\n    <ProjectReference Include=\"..\\Leaf\\Leaf.csproj\" />\n  </ItemGroup>\n</Project>\n",
    );
    write(
        &ws.repo(),
        "Leaf/Leaf.csproj",
        &sdk_project("netcoreapp2.1", &[("leaf-dep", "1.0.0")], &[], &[]),
    );

    let summary = ws.restore(ws.args(app)).expect("restore must succeed");
    let mut restored = summary.restored.clone();
    restored.sort();
    assert_eq!(restored, vec!["App", "Leaf"]);
    assert!(ws.repo().join("App/obj/project.assets.json").is_file());
    assert!(ws.repo().join("Leaf/obj/project.assets.json").is_file());
    assert!(!ws.repo().join("Native/obj/project.assets.json").exists());

    let assets = fs::read_to_string(ws.repo().join("App/obj/project.assets.json")).expect("assets");
    assert!(assets.contains("leaf-dep/1.0.0"));
}

#[test]
fn broken_project_is_skipped_with_warning() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("packageA", version("1.0.0")));
    write(&ws.repo(), "Good/Good.csproj", &sdk_project("net45", &[("packageA", "1.0.0")], &[], &[]));
    write(&ws.repo(), "Broken/Broken.csproj", "<Project><PropertyGroup>");
    let solution = write(
        &ws.repo(),
        "Mixed.sln",
        "Project(\"{9A19103F-16F7-4668-BE54-9A1E7A4F7556}\") = \"Good\", \"Good\\Good.csproj\", \"{1}\"\nEndProject\nProject(\"{9A19103F-16F7-4668-BE54-9A1E7A4F7556}\") = \"Broken\", \"Broken\\Broken.csproj\", \"{2}\"\nEndProject\n",
    );

    let mut args = ws.args(solution);
    args.disable_parallel = true;
    let summary = ws.restore(args).expect("restore must tolerate a broken project");
    assert_eq!(summary.restored, vec!["Good"]);
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].path.ends_with("Broken.csproj"));

    let lines = format_restore_summary(&summary);
    assert_eq!(lines[0].0, "warn");
    assert!(lines[0].1.starts_with("skipped "));
}

#[test]
fn push_redirect_loop_fails_with_redirect_error() {
    let ws = Workspace::new();
    let package = ws.root.path().join("packageA.1.0.0.nupkg");
    let bytes = PackageArchiveBuilder::new(PackageManifest::new("packageA", version("1.0.0")))
        .file("lib/packageA.dll", "x")
        .build()
        .expect("must build package");
    fs::write(&package, bytes).expect("must write package");

    let url = "https://push.test/api/v2/package/";
    let transport = Arc::new(MemoryTransport::new().route(HttpMethod::Put, url, move |_| {
        HttpResponse::new(302).with_header("Location", url)
    }));
    let source = select_push_source(&[], "https://push.test/");
    let session = Session::open(&ws.settings(), vec![source.clone()], transport.clone(), true, false)
        .expect("session must open");

    let err = run_push(&session, &package, &source, Some("key"), false).expect_err("push must fail");
    assert!(matches!(
        find_restore_error(&err),
        Some(RestoreError::TooManyRedirects { .. })
    ));
    assert!(format!("{err:#}").contains("Too many automatic redirections were attempted"));
    assert_eq!(transport.request_count(url), 51);
}

#[test]
fn push_to_folder_then_list_versions() {
    let ws = Workspace::new();
    for raw in ["1.0.0", "1.1.0-beta"] {
        let package = ws.root.path().join(format!("packageA.{raw}.nupkg"));
        let bytes = PackageArchiveBuilder::new(PackageManifest::new("packageA", version(raw)))
            .file("lib/packageA.dll", "x")
            .build()
            .expect("must build package");
        fs::write(&package, bytes).expect("must write package");

        let source = PackageSource::new("local", ws.feed().display().to_string());
        let session = Session::open(&ws.settings(), vec![source.clone()], Arc::new(MemoryTransport::new()), true, false)
            .expect("session must open");
        let outcome = run_push(&session, &package, &source, None, false).expect("push must succeed");
        assert_eq!(outcome, PushOutcome::Created);
        let again = run_push(&session, &package, &source, None, true).expect("duplicate push is skipped");
        assert_eq!(again, PushOutcome::AlreadyExists);
    }

    let source = PackageSource::new("local", ws.feed().display().to_string());
    let session = Session::open(&ws.settings(), vec![source], Arc::new(MemoryTransport::new()), true, false)
        .expect("session must open");
    assert_eq!(
        run_list(&session, "packageA", false, false).expect("list must succeed"),
        vec!["packageA 1.0.0"]
    );
    assert_eq!(
        run_list(&session, "packageA", true, true).expect("list must succeed"),
        vec!["packageA 1.0.0", "packageA 1.1.0-beta"]
    );
    assert!(run_list(&session, "missing", true, false).expect("list must succeed").is_empty());
}

#[test]
fn locals_clear_empties_selected_stores() {
    let ws = Workspace::new();
    publish(&ws.feed(), PackageManifest::new("packageA", version("1.0.0")));
    let project = write(&ws.repo(), "App/App.csproj", &sdk_project("net45", &[("packageA", "1.0.0")], &[], &[]));
    ws.restore(ws.args(project)).expect("restore must succeed");
    assert!(ws.global().join("packagea").is_dir());

    let settings = ws.settings();
    let cleared = clear_locals(&settings, LocalsTarget::GlobalPackages).expect("clear must succeed");
    assert_eq!(cleared.len(), 1);
    assert!(cleared[0].starts_with("global-packages: "));
    assert!(!ws.global().join("packagea").exists());

    let cleared = clear_locals(&settings, LocalsTarget::All).expect("clear must succeed");
    assert_eq!(cleared.len(), 2);
}
