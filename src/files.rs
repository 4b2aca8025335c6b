use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

const BINARY_CHECK_BYTES: usize = 4096;

/// Script, resource descriptor and project manifest files.
pub const PROJECT_EXTENSIONS: [&str; 3] = [".gml", ".yy", ".yyp"];

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub is_probably_binary: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub skip_hidden: bool,
    pub exclude: Vec<String>,
}

/// Entries yielded by the walk: either a candidate file or a path that could
/// not be inspected. Unreadable entries do not stop discovery.
#[derive(Debug)]
pub enum Discovered {
    File(FileEntry),
    Unreadable { path: PathBuf, error: anyhow::Error },
}

pub fn is_project_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| PROJECT_EXTENSIONS.iter().any(|ext| name.ends_with(ext)))
        .unwrap_or(false)
}

pub fn discover_project_files(root: &Path, options: &DiscoveryOptions) -> Result<Vec<Discovered>> {
    if !root.is_dir() {
        bail!("project root {} is not a directory", root.display());
    }
    let exclude = build_exclude_globs(&options.exclude)?;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !options.skip_hidden || entry.depth() == 0 || !is_hidden(entry));

    let mut found = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                found.push(Discovered::Unreadable {
                    path,
                    error: anyhow!(err),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        if !is_project_file(&path) || is_excluded(&path, root, exclude.as_ref()) {
            continue;
        }

        match inspect(&path) {
            Ok(metadata) => found.push(Discovered::File(FileEntry { path, metadata })),
            Err(error) => found.push(Discovered::Unreadable { path, error }),
        }
    }

    Ok(found)
}

fn inspect(path: &Path) -> Result<FileMetadata> {
    Ok(FileMetadata {
        is_probably_binary: detect_binary(path)?,
    })
}

fn is_excluded(path: &Path, root: &Path, exclude: Option<&GlobSet>) -> bool {
    let Some(set) = exclude else {
        return false;
    };
    let relative = path.strip_prefix(root).unwrap_or(path);
    set.is_match(normalize_slashes(relative).as_str())
        || set.is_match(normalize_slashes(path).as_str())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

pub fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn detect_binary(path: &Path) -> Result<bool> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("opening '{}' for binary detection", path.display()))?;
    let mut buf = [0u8; BINARY_CHECK_BYTES];
    let read = file.read(&mut buf)?;
    // UTF-16 text is full of NULs; a BOM marks it as text.
    if buf[..read].starts_with(&[0xFF, 0xFE]) || buf[..read].starts_with(&[0xFE, 0xFF]) {
        return Ok(false);
    }
    Ok(buf[..read].contains(&0))
}

fn build_exclude_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).map_err(|err| anyhow!("invalid exclude glob '{pattern}': {err}"))?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|err| anyhow!("unable to build exclude globs: {err}"))
}
