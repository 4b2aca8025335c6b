use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use time::OffsetDateTime;

use crate::encoding::{DecodedText, EncodingStrategy};
use crate::files::FileEntry;
use crate::mapping::SpriteMap;
use crate::patterns::{Substitution, rewrite_line};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacementRecord {
    pub path: PathBuf,
    /// 1-based.
    pub line: usize,
    /// Which variable shape matched.
    pub shape: &'static str,
    pub variable: String,
    pub old_id: String,
    pub new_id: String,
    pub original: String,
    pub updated: String,
}

impl ReplacementRecord {
    fn from_substitution(path: &Path, line: usize, hit: Substitution) -> Self {
        Self {
            path: path.to_path_buf(),
            line,
            shape: hit.pattern.label(),
            variable: hit.variable,
            old_id: hit.old_id,
            new_id: hit.new_id,
            original: hit.original,
            updated: hit.updated,
        }
    }

    /// `[<file>:<line>] <before> → <after>`
    pub fn log_line(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| self.path.to_string_lossy());
        format!(
            "[{}:{}] {} → {}",
            name,
            self.line,
            self.original.trim(),
            self.updated.trim()
        )
    }
}

/// The pure result of running every pattern over a file's text.
#[derive(Debug, Clone)]
pub struct RewritePlan {
    pub new_text: String,
    pub replacements: Vec<ReplacementRecord>,
    pub changed: bool,
}

pub fn plan_rewrite(path: &Path, text: &str, map: &SpriteMap) -> RewritePlan {
    let mut new_text = String::with_capacity(text.len());
    let mut replacements = Vec::new();
    let mut changed = false;

    for (idx, line) in split_lines_inclusive(text).enumerate() {
        let rewrite = rewrite_line(line, map);
        changed |= rewrite.changed(line);
        new_text.push_str(&rewrite.text);
        replacements.extend(
            rewrite
                .substitutions
                .into_iter()
                .map(|hit| ReplacementRecord::from_substitution(path, idx + 1, hit)),
        );
    }

    RewritePlan {
        new_text,
        replacements,
        changed,
    }
}

/// Splits after each `\n`, `\r\n` or lone `\r`, keeping the terminator on
/// the line it ends.
fn split_lines_inclusive(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut idx = 0usize;
    std::iter::from_fn(move || {
        while idx < bytes.len() {
            let end = match bytes[idx] {
                b'\n' => idx + 1,
                b'\r' if bytes.get(idx + 1) == Some(&b'\n') => idx + 2,
                b'\r' => idx + 1,
                _ => {
                    idx += 1;
                    continue;
                }
            };
            let line = &text[start..end];
            start = end;
            idx = end;
            return Some(line);
        }
        if start < bytes.len() {
            let line = &text[start..];
            start = bytes.len();
            return Some(line);
        }
        None
    })
}

#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub changed: bool,
    pub replacements: Vec<ReplacementRecord>,
    pub skipped: Option<SkipReason>,
    pub warnings: Vec<String>,
    pub backup: Option<PathBuf>,
    /// Original and rewritten text, kept only when a caller asked for diffs.
    pub texts: Option<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteOptions {
    pub dry_run: bool,
    pub keep_texts: bool,
}

pub struct RewriteContext<'a> {
    pub entry: &'a FileEntry,
    pub encoding: &'a EncodingStrategy,
    pub map: &'a SpriteMap,
    pub options: RewriteOptions,
}

/// Rewrites one file in place when at least one id was replaced.
///
/// Unchanged files are never opened for writing. The `.bak` copy is taken
/// before the first write and never refreshed afterwards.
pub fn rewrite_file(ctx: &RewriteContext<'_>) -> Result<FileOutcome> {
    let path = &ctx.entry.path;
    let mut outcome = FileOutcome {
        path: path.clone(),
        changed: false,
        replacements: Vec::new(),
        skipped: None,
        warnings: Vec::new(),
        backup: None,
        texts: None,
    };

    if ctx.entry.metadata.is_probably_binary {
        outcome.skipped = Some(SkipReason::Binary);
        return Ok(outcome);
    }

    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let decoded = ctx.encoding.decode(&bytes);
    if decoded.had_errors {
        outcome.warnings.push(format!(
            "decoding errors encountered for {} ({}, {}); continuing",
            path.display(),
            decoded.encoding.name(),
            decoded.decision.source
        ));
    }

    let plan = plan_rewrite(path, &decoded.text, ctx.map);
    outcome.changed = plan.changed;
    outcome.replacements = plan.replacements;
    if !plan.changed {
        return Ok(outcome);
    }

    // Undecodable bytes would come back as U+FFFD on lines nothing matched.
    if decoded.had_errors {
        bail!(
            "{} is not valid {} ({}); refusing to rewrite it",
            path.display(),
            decoded.encoding.name(),
            decoded.decision.source
        );
    }

    if !ctx.options.dry_run {
        outcome.backup = commit(path, &bytes, &decoded, &plan.new_text)?;
    }
    if ctx.options.keep_texts {
        outcome.texts = Some((decoded.text, plan.new_text));
    }
    Ok(outcome)
}

fn commit(
    path: &Path,
    original: &[u8],
    decoded: &DecodedText,
    new_text: &str,
) -> Result<Option<PathBuf>> {
    let encoded = decoded.encode(new_text);
    if encoded.had_errors {
        bail!(
            "a replacement for {} cannot be represented in {}",
            path.display(),
            decoded.encoding.name()
        );
    }
    let backup = create_backup_once(path, original)?;
    write_via_temp(path, &encoded.bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(backup)
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Copies the pre-rewrite bytes to `<path>.bak` unless that file exists.
fn create_backup_once(path: &Path, original: &[u8]) -> Result<Option<PathBuf>> {
    let backup = backup_path(path);
    if backup.exists() {
        return Ok(None);
    }
    fs::write(&backup, original).with_context(|| format!("creating backup {}", backup.display()))?;
    Ok(Some(backup))
}

fn write_via_temp(path: &Path, data: &[u8]) -> Result<()> {
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".spriteswap-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    stage_temp(&temp_path, |file| {
        file.write_all(data)?;
        file.sync_all()
    })?;
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&temp_path, meta.permissions());
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })?;
    Ok(())
}

/// Creates `temp_path` and fills it; the file is removed again if filling
/// fails.
fn stage_temp<F>(temp_path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut fs::File) -> io::Result<()>,
{
    let mut file = fs::File::create(temp_path)
        .with_context(|| format!("creating temp file {}", temp_path.display()))?;
    if let Err(err) = fill(&mut file) {
        drop(file);
        let _ = fs::remove_file(temp_path);
        return Err(err).with_context(|| format!("writing temp file {}", temp_path.display()));
    }
    Ok(())
}
