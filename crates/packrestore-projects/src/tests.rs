use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use packrestore_core::{find_restore_error, PackageVersion, RestoreError, TargetFramework, VersionConstraint};
use tempfile::TempDir;

use super::*;

fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("path must have a parent")).expect("must create dirs");
    fs::write(&path, content).expect("must write file");
    path
}

fn sdk_project(framework: &str, packages: &[(&str, &str)], references: &[&str]) -> String {
    let mut out = String::from("<Project Sdk=\"Microsoft.NET.Sdk\">\n  <PropertyGroup>\n");
    out.push_str(&format!(
        "    <TargetFramework>{framework}</TargetFramework>\n  </PropertyGroup>\n  <ItemGroup>\n"
    ));
    for (id, version) in packages {
        out.push_str(&format!(
            "    <PackageReference Include=\"{id}\" Version=\"{version}\" />\n"
        ));
    }
    for reference in references {
        out.push_str(&format!("    <ProjectReference Include=\"{reference}\" />\n"));
    }
    out.push_str("  </ItemGroup>\n</Project>\n");
    out
}

fn legacy_project() -> String {
    "<Project ToolsVersion=\"15.0\">\n  <PropertyGroup>\n    <TargetFrameworkVersion>v4.5</TargetFrameworkVersion>\n  </PropertyGroup>\n</Project>\n"
        .to_string()
}

fn framework(name: &str) -> TargetFramework {
    TargetFramework::parse(name).expect("framework must parse")
}

fn constraint(range: &str) -> VersionConstraint {
    VersionConstraint::parse(range).expect("range must parse")
}

fn walk(entries: &[PathBuf]) -> anyhow::Result<ProjectClosure> {
    walk_projects(&MsBuildProjectLoader, entries, &WalkOptions::default())
}

#[test]
fn loads_package_reference_project_items_and_properties() {
    let tmp = TempDir::new().expect("must create temp dir");
    write(tmp.path(), "Lib/Lib.csproj", &sdk_project("net45", &[], &[]));
    let project = write(
        tmp.path(),
        "App/App.csproj",
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFrameworks>net45;netstandard2.0</TargetFrameworks>
    <RuntimeIdentifiers>win7-x86;win7-x64</RuntimeIdentifiers>
    <PackageTargetFallback>$(PackageTargetFallback);portable-net45+win8</PackageTargetFallback>
  </PropertyGroup>
  <PropertyGroup Condition="'$(Configuration)' == 'Debug'">
    <TargetFramework>net46</TargetFramework>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="9.0.1" />
    <PackageReference Include="Analyzer">
      <Version>[1.0.0]</Version>
      <PrivateAssets>All</PrivateAssets>
    </PackageReference>
    <ProjectReference Include="..\Lib\Lib.csproj">
      <ReferenceOutputAssembly>false</ReferenceOutputAssembly>
    </ProjectReference>
    <DotNetCliToolReference Include="Tool.Cli" Version="1.0.0" />
  </ItemGroup>
  <ItemGroup Condition=" '$(TargetFramework)' == 'net45' ">
    <PackageReference Include="Legacy.Only" Version="2.0.0" />
  </ItemGroup>
</Project>
"#,
    );

    let node = MsBuildProjectLoader.load(&project).expect("project must load");
    assert_eq!(node.name, "App");
    assert_eq!(node.style, ProjectStyle::PackageReference);
    assert_eq!(
        node.frameworks
            .iter()
            .map(|entry| entry.framework.short_folder_name())
            .collect::<Vec<_>>(),
        vec!["net45", "netstandard2.0"]
    );
    assert_eq!(node.frameworks[0].fallbacks, vec![framework("portable-net45+win8")]);
    assert_eq!(node.runtime_identifiers, vec!["win7-x86", "win7-x64"]);

    assert_eq!(node.dependencies.len(), 2);
    assert_eq!(node.dependencies[0].id, "Newtonsoft.Json");
    assert_eq!(node.dependencies[0].constraint, constraint("9.0.1"));
    assert!(!node.dependencies[0].private_assets);
    assert_eq!(node.dependencies[1].constraint, constraint("[1.0.0]"));
    assert!(node.dependencies[1].private_assets);

    let net45 = node.dependencies_for(&framework("net45"));
    assert_eq!(
        net45.iter().map(|reference| reference.id.as_str()).collect::<Vec<_>>(),
        vec!["Newtonsoft.Json", "Analyzer", "Legacy.Only"]
    );
    assert_eq!(node.dependencies_for(&framework("netstandard2.0")).len(), 2);

    assert_eq!(node.references.len(), 1);
    assert_eq!(node.references[0].path, tmp.path().join("Lib").join("Lib.csproj"));
    assert!(!node.references[0].flows);
    assert_eq!(node.tools.len(), 1);
    assert_eq!(node.tools[0].id, "Tool.Cli");
}

#[test]
fn classifies_projects_by_their_package_markers() {
    let tmp = TempDir::new().expect("must create temp dir");

    let sdk = write(tmp.path(), "Sdk/Sdk.csproj", &sdk_project("netcoreapp2.1", &[], &[]));
    let unknown = write(tmp.path(), "Native/Native.csproj", &legacy_project());
    let config = write(tmp.path(), "Config/Config.csproj", &legacy_project());
    write(
        tmp.path(),
        "Config/packages.config",
        r#"<packages><package id="packageA" version="1.0.0" targetFramework="net45" /></packages>"#,
    );
    write(
        tmp.path(),
        "Config/packages.Config.config",
        r#"<packages><package id="packageB" version="2.0.0" /></packages>"#,
    );
    let json = write(tmp.path(), "Json/Json.csproj", &legacy_project());
    write(
        tmp.path(),
        "Json/project.json",
        r#"{"dependencies": {"packageA": "1.0.0"}, "frameworks": {"net45": {}}}"#,
    );
    let forced = write(
        tmp.path(),
        "Forced/Forced.csproj",
        "<Project>\n  <PropertyGroup>\n    <RestoreProjectStyle>PackageReference</RestoreProjectStyle>\n    <TargetFrameworkVersion>v4.6</TargetFrameworkVersion>\n  </PropertyGroup>\n</Project>\n",
    );

    let load = |path: &Path| MsBuildProjectLoader.load(path).expect("project must load");

    assert_eq!(load(&sdk).style, ProjectStyle::PackageReference);

    let unknown = load(&unknown);
    assert_eq!(unknown.style, ProjectStyle::Unknown);
    assert_eq!(unknown.frameworks[0].framework, framework("net45"));

    let config = load(&config);
    assert_eq!(config.style, ProjectStyle::PackagesConfig);
    assert_eq!(
        config.package_spec_path.as_deref(),
        Some(tmp.path().join("Config").join("packages.Config.config").as_path())
    );
    assert_eq!(config.packages_config.len(), 1);
    assert_eq!(config.packages_config[0].identity.id.as_str(), "packageB");

    let json = load(&json);
    assert_eq!(json.style, ProjectStyle::ProjectJson);
    assert_eq!(json.dependencies[0].id, "packageA");

    let forced = load(&forced);
    assert_eq!(forced.style, ProjectStyle::PackageReference);
    assert_eq!(forced.frameworks[0].framework, framework("net46"));
}

#[test]
fn reads_packages_config_entries() {
    let entries = parse_packages_config(
        r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="packageA" version="1.0.0" targetFramework="net45" />
  <package id="packageB" version="2.0.0-beta" developmentDependency="true" allowedVersions="[2.0,3.0)" />
</packages>
"#,
    )
    .expect("packages config must parse");

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].identity.to_string(), "packageA 1.0.0");
    assert_eq!(entries[0].target_framework, Some(framework("net45")));
    assert!(!entries[0].development_dependency);
    assert_eq!(
        entries[1].identity.version,
        PackageVersion::parse("2.0.0-beta").expect("version must parse")
    );
    assert!(entries[1].development_dependency);
    assert_eq!(entries[1].allowed_versions, Some(constraint("[2.0,3.0)")));

    let err = parse_packages_config(r#"<packages><package id="packageA" version="one" /></packages>"#)
        .expect_err("invalid version must fail");
    assert!(err.to_string().contains("package 'packageA' has an invalid version"));

    let err = parse_packages_config("<dependencies />").expect_err("wrong root must fail");
    assert!(err.to_string().contains("expected a <packages> root element"));
}

#[test]
fn reads_project_json_dependencies_frameworks_and_imports() {
    let parsed = parse_project_json(
        r#"{
  "dependencies": {
    "packageA": "1.0.0",
    "packageB": { "version": "2.0.0", "suppressParent": "all" }
  },
  "frameworks": {
    "netstandard1.3": { "imports": ["portable-net45+win8", "netcore50"] },
    "net45": { "dependencies": { "packageC": "[3.0.0]" }, "imports": "portable-net45+win8" }
  },
  "runtimes": { "win7-x86": {}, "win10-x64": {} },
  "tools": { "tool.cli": "1.0.0-*" }
}"#,
    )
    .expect("project.json must parse");

    assert_eq!(parsed.dependencies.len(), 2);
    assert!(!parsed.dependencies[0].private_assets);
    assert!(parsed.dependencies[1].private_assets);
    assert_eq!(parsed.frameworks.len(), 2);

    let net45 = parsed
        .frameworks
        .iter()
        .find(|entry| entry.framework == framework("net45"))
        .expect("net45 must be declared");
    assert_eq!(net45.dependencies[0].constraint, constraint("[3.0.0]"));
    assert_eq!(net45.fallbacks, vec![framework("portable-net45+win8")]);

    let standard = parsed
        .frameworks
        .iter()
        .find(|entry| entry.framework == framework("netstandard1.3"))
        .expect("netstandard1.3 must be declared");
    assert_eq!(standard.fallbacks.len(), 2);

    assert_eq!(parsed.runtime_identifiers, vec!["win10-x64", "win7-x86"]);
    assert!(parsed.tools[0].constraint.is_floating());

    let err = parse_project_json(r#"{"dependencies": {}}"#).expect_err("no frameworks must fail");
    assert!(err.to_string().contains("declares no frameworks"));
}

#[test]
fn reads_solution_projects_and_skips_folders() {
    let tmp = TempDir::new().expect("must create temp dir");
    let solution = write(
        tmp.path(),
        "App.sln",
        r#"
Microsoft Visual Studio Solution File, Format Version 12.00
Project("{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}") = "App", "src\App\App.csproj", "{11111111-1111-1111-1111-111111111111}"
EndProject
Project("{2150E333-8FDC-42A3-9474-1A3956D46DE8}") = "tests", "tests", "{22222222-2222-2222-2222-222222222222}"
EndProject
Project("{9A19103F-16F7-4668-BE54-9A1E7A4F7556}") = "Lib", "src\Lib\Lib.csproj", "{33333333-3333-3333-3333-333333333333}"
EndProject
"#,
    );

    let projects = read_solution(&solution).expect("solution must read");
    assert_eq!(
        projects,
        vec![
            tmp.path().join("src").join("App").join("App.csproj"),
            tmp.path().join("src").join("Lib").join("Lib.csproj"),
        ]
    );
}

#[test]
fn walks_references_dependency_first() {
    let tmp = TempDir::new().expect("must create temp dir");
    let a = write(tmp.path(), "A/A.csproj", &sdk_project("net45", &[], &["..\\B\\B.csproj"]));
    write(tmp.path(), "B/B.csproj", &sdk_project("net45", &[], &["..\\C\\C.csproj"]));
    write(tmp.path(), "C/C.csproj", &sdk_project("net45", &[], &[]));

    let closure = walk(&[a.clone()]).expect("walk must succeed");
    assert_eq!(
        closure.projects().map(|node| node.name.as_str()).collect::<Vec<_>>(),
        vec!["C", "B", "A"]
    );
    assert_eq!(closure.entries(), &[a.clone()]);

    let shallow = walk_projects(
        &MsBuildProjectLoader,
        &[a],
        &WalkOptions {
            recursive: false,
            timeout: None,
        },
    )
    .expect("walk must succeed");
    assert_eq!(
        shallow.projects().map(|node| node.name.as_str()).collect::<Vec<_>>(),
        vec!["B", "A"]
    );
}

#[test]
fn skips_projects_that_fail_to_load() {
    let tmp = TempDir::new().expect("must create temp dir");
    let a = write(
        tmp.path(),
        "A/A.csproj",
        &sdk_project("net45", &[("packageA", "1.0.0")], &["../B/B.csproj", "../C/C.csproj"]),
    );
    write(tmp.path(), "B/B.csproj", "<Project><PropertyGroup>");
    write(tmp.path(), "C/C.csproj", &sdk_project("net45", &[("packageC", "1.0.0")], &[]));

    let closure = walk(&[a.clone()]).expect("a broken sibling must not abort the walk");
    assert_eq!(closure.len(), 2);
    assert_eq!(closure.skipped().len(), 1);
    assert_eq!(closure.skipped()[0].path, tmp.path().join("B").join("B.csproj"));
    assert!(closure.skipped()[0].reason.contains("invalid project file"));

    let request = closure.restore_request(&a).expect("request must build");
    let projects = &request.frameworks[0].projects;
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, "C");
}

#[test]
fn missing_reference_is_fatal() {
    let tmp = TempDir::new().expect("must create temp dir");
    let a = write(tmp.path(), "A/A.csproj", &sdk_project("net45", &[], &["..\\Moved\\Moved.csproj"]));

    let err = walk(&[a.clone()]).expect_err("missing reference must fail");
    match find_restore_error(&err) {
        Some(RestoreError::MissingProjectReference { project, reference }) => {
            assert_eq!(project, &a);
            assert_eq!(reference, &tmp.path().join("Moved").join("Moved.csproj"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = walk(&[tmp.path().join("Nope.csproj")]).expect_err("missing entry must fail");
    assert!(err.to_string().contains("project file does not exist"));
}

#[test]
fn reference_cycle_is_fatal() {
    let tmp = TempDir::new().expect("must create temp dir");
    let a = write(tmp.path(), "A/A.csproj", &sdk_project("net45", &[], &["../B/B.csproj"]));
    write(tmp.path(), "B/B.csproj", &sdk_project("net45", &[], &["../A/A.csproj"]));

    let err = walk(&[a]).expect_err("cycle must fail");
    match find_restore_error(&err) {
        Some(RestoreError::ProjectReferenceCycle { chain }) => assert_eq!(chain.len(), 3),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("project reference cycle detected"));
}

#[test]
fn exhausted_timeout_aborts_the_walk() {
    let tmp = TempDir::new().expect("must create temp dir");
    let a = write(tmp.path(), "A/A.csproj", &sdk_project("net45", &[], &[]));

    let err = walk_projects(
        &MsBuildProjectLoader,
        &[a],
        &WalkOptions {
            recursive: true,
            timeout: Some(Duration::ZERO),
        },
    )
    .expect_err("zero timeout must fail");
    assert!(matches!(
        find_restore_error(&err),
        Some(RestoreError::ProjectClosureTimeout { .. })
    ));
}

#[test]
fn closure_timeout_scales_with_project_count() {
    assert_eq!(closure_timeout(None, 1), MIN_CLOSURE_TIMEOUT);
    assert_eq!(closure_timeout(None, 20), MIN_CLOSURE_TIMEOUT);
    assert_eq!(closure_timeout(None, 100), Duration::from_secs(600));
    assert_eq!(
        closure_timeout(Some(Duration::from_secs(5)), 100),
        Duration::from_secs(5)
    );
}

#[test]
fn private_assets_and_non_output_references_do_not_flow() {
    let tmp = TempDir::new().expect("must create temp dir");
    let a = write(
        tmp.path(),
        "A/A.csproj",
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>net45</TargetFramework>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="a-dep" Version="1.0.0" />
    <ProjectReference Include="..\B\B.csproj" />
    <ProjectReference Include="..\D\D.csproj" ReferenceOutputAssembly="false" />
  </ItemGroup>
</Project>
"#,
    );
    write(
        tmp.path(),
        "B/B.csproj",
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>net45</TargetFramework>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="x" Version="1.0.0" />
    <PackageReference Include="y" Version="2.0.0" PrivateAssets="all" />
    <ProjectReference Include="..\C\C.csproj" />
  </ItemGroup>
</Project>
"#,
    );
    write(tmp.path(), "C/C.csproj", &sdk_project("net45", &[("z", "3.0.0")], &[]));
    write(tmp.path(), "D/D.csproj", &sdk_project("net45", &[("w", "1.0.0")], &[]));

    let closure = walk(&[a.clone()]).expect("walk must succeed");
    assert_eq!(closure.len(), 4, "non-flowing references are still walked");

    let request = closure.restore_request(&a).expect("request must build");
    assert_eq!(request.frameworks.len(), 1);
    let net45 = &request.frameworks[0];
    assert_eq!(
        net45.dependencies.iter().map(|request| request.id.as_str()).collect::<Vec<_>>(),
        vec!["a-dep"]
    );

    let names = net45
        .projects
        .iter()
        .map(|project| project.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["B", "C"]);

    let b = &net45.projects[0];
    assert_eq!(b.path, "../B/B.csproj");
    assert_eq!(b.references, vec!["C"]);
    assert_eq!(
        b.dependencies.iter().map(|request| request.id.as_str()).collect::<Vec<_>>(),
        vec!["x"]
    );
    assert_eq!(net45.projects[1].dependencies[0].id.as_str(), "z");
}

#[test]
fn unknown_projects_pass_references_through() {
    let tmp = TempDir::new().expect("must create temp dir");
    let app = write(
        tmp.path(),
        "App/App.csproj",
        &sdk_project("netcoreapp2.1", &[], &["../Native/Native.csproj"]),
    );
    write(
        tmp.path(),
        "Native/Native.csproj",
        "<Project>\n  <ItemGroup>\n    <ProjectReference Include=\"..\\Leaf\\Leaf.csproj\" />\n  </ItemGroup>\n</Project>\n",
    );
    write(
        tmp.path(),
        "Leaf/Leaf.csproj",
        &sdk_project("netcoreapp2.1", &[("leaf-dep", "1.0.0")], &[]),
    );

    let closure = walk(&[app.clone()]).expect("walk must succeed");
    let native = closure
        .node(&tmp.path().join("Native").join("Native.csproj"))
        .expect("unknown project must be loaded");
    assert_eq!(native.style, ProjectStyle::Unknown);
    assert_eq!(
        closure.restorable().map(|node| node.name.as_str()).collect::<Vec<_>>(),
        vec!["Leaf", "App"]
    );

    let err = closure
        .restore_request(&native.path)
        .expect_err("unknown projects have no restore graph");
    assert!(err.to_string().contains("Unknown restore"));

    let request = closure.restore_request(&app).expect("request must build");
    let projects = &request.frameworks[0].projects;
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].name, "Leaf");
    assert_eq!(projects[0].dependencies[0].id.as_str(), "leaf-dep");
    assert_eq!(projects[1].name, "Native");
    assert!(projects[1].dependencies.is_empty());
    assert_eq!(projects[1].references, vec!["Leaf"]);
}

#[test]
fn relative_paths_are_slash_separated() {
    assert_eq!(
        relative_path(Path::new("/repo/src/App"), Path::new("/repo/src/Lib/Lib.csproj")),
        "../Lib/Lib.csproj"
    );
    assert_eq!(
        relative_path(Path::new("/repo"), Path::new("/repo/a/./b/../c.csproj")),
        "a/c.csproj"
    );
    assert_eq!(
        resolve_include(Path::new("/repo/App"), "..\\Lib\\Lib.csproj"),
        PathBuf::from("/repo/Lib/Lib.csproj")
    );
}
