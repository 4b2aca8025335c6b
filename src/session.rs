use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const LOG_FILE: &str = "spritereplacement_log.txt";

/// Receives progress while a run is underway. Both hooks default to no-ops,
/// and `()` is the reporter that ignores everything.
pub trait Reporter {
    /// A human-readable progress or log line.
    fn message(&mut self, _line: &str) {}

    /// A short state string such as `Scanning: <path>` or `Done.`.
    fn status(&mut self, _status: &str) {}
}

impl Reporter for () {}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn message(&mut self, line: &str) {
        (**self).message(line);
    }

    fn status(&mut self, status: &str) {
        (**self).status(status);
    }
}

/// `spritereplacement_log.txt` next to the running executable.
pub fn default_log_path() -> Result<PathBuf> {
    let exe = env::current_exe().context("locating the running executable")?;
    let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(dir.join(LOG_FILE))
}

/// Per-run audit trail: one line per substitution plus a summary line.
///
/// Created with truncation, so every run starts from an empty file. The
/// writer is flushed when the log is finished or dropped.
pub struct SessionLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl SessionLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating session log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, line: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .with_context(|| format!("session log {} already closed", self.path.display()))?;
        writeln!(writer, "{line}")
            .with_context(|| format!("writing session log {}", self.path.display()))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("flushing session log {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for SessionLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
