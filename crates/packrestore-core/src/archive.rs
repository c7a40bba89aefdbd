use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::identity::PackageIdentity;
use crate::manifest::PackageManifest;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="nuspec" ContentType="application/octet" /></Types>
"#;

/// An in-memory `.nupkg` with its manifest already parsed.
#[derive(Debug, Clone)]
pub struct PackageArchive {
    bytes: Vec<u8>,
    manifest: PackageManifest,
    nuspec_name: String,
    files: Vec<String>,
}

impl PackageArchive {
    pub fn from_bytes(bytes: Vec<u8>) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes.as_slice()))
            .context("package is not a valid zip archive")?;

        let mut nuspec = None;
        let mut files = Vec::new();
        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .with_context(|| format!("failed reading package entry {index}"))?;
            let name = entry.name().replace('\\', "/");
            if name.ends_with('/') {
                continue;
            }
            if !name.contains('/') && name.to_ascii_lowercase().ends_with(".nuspec") {
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .with_context(|| format!("failed reading package manifest '{name}'"))?;
                nuspec = Some((name, content));
                continue;
            }
            if is_packaging_file(&name) {
                continue;
            }
            files.push(name);
        }

        drop(zip);
        let (nuspec_name, content) =
            nuspec.ok_or_else(|| anyhow!("package does not contain a .nuspec manifest"))?;
        let manifest = PackageManifest::parse(content.trim_start_matches('\u{feff}'))?;
        files.sort();

        Ok(Self {
            bytes,
            manifest,
            nuspec_name,
            files,
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read package: {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("invalid package: {}", path.display()))
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    pub fn identity(&self) -> PackageIdentity {
        self.manifest.identity()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Package content paths with `/` separators, excluding the manifest and
    /// OPC packaging files.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn nuspec_name(&self) -> &str {
        &self.nuspec_name
    }

    pub fn read_file(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        let mut zip = ZipArchive::new(Cursor::new(self.bytes.as_slice()))
            .context("package is not a valid zip archive")?;
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            if entry.name().replace('\\', "/") == name {
                let mut buf = Vec::new();
                entry
                    .read_to_end(&mut buf)
                    .with_context(|| format!("failed reading package entry '{name}'"))?;
                return Ok(buf);
            }
        }
        Err(anyhow!("package {} has no file '{name}'", self.identity()))
    }

    /// Writes every content file below `destination` and returns the written
    /// paths. Entries that would escape `destination` are rejected.
    pub fn extract_to(&self, destination: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut zip = ZipArchive::new(Cursor::new(self.bytes.as_slice()))
            .context("package is not a valid zip archive")?;
        let mut written = Vec::new();
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            let name = entry.name().replace('\\', "/");
            if name.ends_with('/') || name == self.nuspec_name || is_packaging_file(&name) {
                continue;
            }
            let relative = safe_relative_path(&name)?;
            let target = destination.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory: {}", parent.display()))?;
            }
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .with_context(|| format!("failed reading package entry '{name}'"))?;
            fs::write(&target, &buf)
                .with_context(|| format!("failed to write file: {}", target.display()))?;
            written.push(target);
        }
        Ok(written)
    }
}

fn is_packaging_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "[content_types].xml"
        || lower.starts_with("_rels/")
        || lower.starts_with("package/")
        || lower.ends_with(".psmdcp")
}

fn safe_relative_path(name: &str) -> anyhow::Result<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(anyhow!("package entry '{name}' escapes the install directory")),
        }
    }
    if out.as_os_str().is_empty() || name.contains(':') {
        return Err(anyhow!("package entry '{name}' has an invalid path"));
    }
    Ok(out)
}

/// Assembles `.nupkg` bytes from a manifest and a set of files.
#[derive(Debug, Clone)]
pub struct PackageArchiveBuilder {
    manifest: PackageManifest,
    files: Vec<(String, Vec<u8>)>,
}

impl PackageArchiveBuilder {
    pub fn new(manifest: PackageManifest) -> Self {
        Self {
            manifest,
            files: Vec::new(),
        }
    }

    pub fn file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), content.into()));
        self
    }

    pub fn build(&self) -> anyhow::Result<Vec<u8>> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        let nuspec_name = format!("{}.nuspec", self.manifest.id);
        zip.start_file(nuspec_name.as_str(), options)
            .with_context(|| format!("failed writing '{nuspec_name}'"))?;
        zip.write_all(self.manifest.to_nuspec_xml()?.as_bytes())
            .with_context(|| format!("failed writing '{nuspec_name}'"))?;

        zip.start_file("[Content_Types].xml", options)
            .context("failed writing content types")?;
        zip.write_all(CONTENT_TYPES.as_bytes())
            .context("failed writing content types")?;

        for (path, content) in &self.files {
            let name = path.replace('\\', "/");
            safe_relative_path(&name)?;
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("failed writing '{name}'"))?;
            zip.write_all(content)
                .with_context(|| format!("failed writing '{name}'"))?;
        }

        let cursor = zip.finish().context("failed finishing package archive")?;
        Ok(cursor.into_inner())
    }
}
