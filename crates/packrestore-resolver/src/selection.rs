use packrestore_core::TargetFramework;

/// Asset paths picked out of one package for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedAssets {
    pub compile: Vec<String>,
    pub runtime: Vec<String>,
    pub native: Vec<String>,
    pub build: Vec<String>,
    pub build_cross_targeting: Vec<String>,
    pub framework: Option<String>,
}

/// Files of one asset folder grouped by framework subfolder. Files placed
/// directly in the folder belong to the `any` group; files nested below a
/// framework folder are not assets of that group.
fn framework_groups(files: &[String], folder: &str) -> Vec<(TargetFramework, Vec<String>)> {
    let prefix = format!("{folder}/");
    let mut groups: Vec<(TargetFramework, Vec<String>)> = Vec::new();
    for file in files {
        let Some(rest) = strip_prefix_ignore_case(file, &prefix) else {
            continue;
        };
        let framework = match rest.split_once('/') {
            None => TargetFramework::any(),
            Some((folder, tail)) if !tail.contains('/') && !tail.is_empty() => {
                match TargetFramework::parse(folder) {
                    Ok(framework) => framework,
                    Err(_) => continue,
                }
            }
            Some(_) => continue,
        };
        match groups.iter_mut().find(|(existing, _)| *existing == framework) {
            Some((_, members)) => members.push(file.clone()),
            None => groups.push((framework, vec![file.clone()])),
        }
    }
    groups
}

fn nearest_group(
    groups: &[(TargetFramework, Vec<String>)],
    framework: &TargetFramework,
    fallbacks: &[TargetFramework],
) -> Option<(TargetFramework, Vec<String>)> {
    let frameworks = groups.iter().map(|(fw, _)| fw.clone()).collect::<Vec<_>>();
    let nearest = framework.get_nearest_with_fallback(fallbacks, &frameworks)?;
    groups
        .iter()
        .find(|(candidate, _)| candidate == nearest)
        .cloned()
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &value[prefix.len()..])
}

fn has_extension(file: &str, extensions: &[&str]) -> bool {
    let lower = file.to_ascii_lowercase();
    extensions
        .iter()
        .any(|extension| lower.ends_with(&format!(".{extension}")))
}

fn is_assembly(file: &str) -> bool {
    file.ends_with("/_._") || has_extension(file, &["dll", "exe", "winmd"])
}

fn is_msbuild_file(file: &str) -> bool {
    has_extension(file, &["props", "targets"])
}

/// Picks compile, runtime and build assets of a package for `framework`.
///
/// Returns `None` when the package has framework-specific assets and none
/// of them is compatible with `framework` or any fallback.
pub fn select_assets(
    files: &[String],
    framework: &TargetFramework,
    fallbacks: &[TargetFramework],
    runtime_identifier: Option<&str>,
) -> Option<SelectedAssets> {
    let lib = framework_groups(files, "lib");
    let reference = framework_groups(files, "ref");
    let build = framework_groups(files, "build");

    let lib_match = nearest_group(&lib, framework, fallbacks);
    let ref_match = nearest_group(&reference, framework, fallbacks);
    let build_match = nearest_group(&build, framework, fallbacks);

    let has_framework_assets = !lib.is_empty() || !reference.is_empty() || !build.is_empty();
    if has_framework_assets && lib_match.is_none() && ref_match.is_none() && build_match.is_none() {
        return None;
    }

    let mut selected = SelectedAssets::default();
    let compile_group = if reference.is_empty() { &lib_match } else { &ref_match };
    if let Some((fw, members)) = compile_group {
        selected.compile = members.iter().filter(|f| is_assembly(f)).cloned().collect();
        selected.framework = Some(fw.short_folder_name());
    }
    if let Some((fw, members)) = &lib_match {
        selected.runtime = members.iter().filter(|f| is_assembly(f)).cloned().collect();
        selected.framework.get_or_insert_with(|| fw.short_folder_name());
    }

    if let Some(rid) = runtime_identifier {
        let runtime_lib = framework_groups(files, &format!("runtimes/{rid}/lib"));
        if let Some((_, members)) = nearest_group(&runtime_lib, framework, fallbacks) {
            selected.runtime = members.iter().filter(|f| is_assembly(f)).cloned().collect();
        }
        let native_prefix = format!("runtimes/{rid}/native/");
        selected.native = files
            .iter()
            .filter(|file| {
                strip_prefix_ignore_case(file, &native_prefix).is_some_and(|rest| !rest.contains('/'))
            })
            .cloned()
            .collect();
    }

    if let Some((_, members)) = build_match {
        selected.build = members.into_iter().filter(|f| is_msbuild_file(f)).collect();
    }
    selected.build_cross_targeting = files
        .iter()
        .filter(|file| {
            strip_prefix_ignore_case(file, "buildCrossTargeting/").is_some_and(|rest| !rest.contains('/'))
                && is_msbuild_file(file)
        })
        .cloned()
        .collect();

    for list in [
        &mut selected.compile,
        &mut selected.runtime,
        &mut selected.native,
        &mut selected.build,
        &mut selected.build_cross_targeting,
    ] {
        list.sort();
    }
    Some(selected)
}
