use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use serde_json::{Value as JsonValue, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

mod diff;
mod encoding;
mod files;
mod mapping;
mod patterns;
mod rewrite;
mod scan;
mod session;

use encoding::EncodingStrategy;
use files::DiscoveryOptions;
use rewrite::{FileOutcome, ReplacementRecord};
use scan::{FileFailure, ScanListener, ScanOptions, scan_and_replace};
use session::Reporter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(cmd) => handle_run(cmd),
    }
}

fn handle_run(cmd: RunCommand) -> Result<()> {
    let encoding = EncodingStrategy::new(cmd.encoding.as_deref())?;
    if !cmd.json {
        print_command_summary(&cmd, &encoding);
    }
    let options = ScanOptions {
        log_path: cmd.log.clone(),
        encoding,
        discovery: DiscoveryOptions {
            skip_hidden: cmd.skip_hidden,
            exclude: cmd.exclude.clone(),
        },
        dry_run: cmd.dry_run,
        keep_texts: cmd.diff,
    };

    let mut console = ConsoleReporter {
        json: cmd.json,
        diff_context: cmd.diff.then_some(cmd.context),
    };
    let report = scan_and_replace(&cmd.project, &cmd.mapping, &options, &mut console)?;

    if !cmd.json {
        println!(
            "scanned={}, changed={}, replacements={}, skipped={}, failed={}",
            report.scanned,
            report.changed_files.len(),
            report.replacements.len(),
            report.skipped.len(),
            report.failures.len()
        );
        println!("session log: {}", report.log_path.display());
    }
    if !report.failures.is_empty() {
        bail!(
            "{} file(s) could not be processed; see the messages above",
            report.failures.len()
        );
    }
    Ok(())
}

fn print_command_summary(cmd: &RunCommand, encoding: &EncodingStrategy) {
    println!("command: run");
    println!("mode: {}", if cmd.dry_run { "dry-run" } else { "apply" });
    println!("project: {}", cmd.project.display());
    println!("mapping: {}", cmd.mapping.display());
    println!("encoding strategy: {}", encoding.describe());
    if cmd.skip_hidden {
        println!("hidden directories: skipped");
    }
    if !cmd.exclude.is_empty() {
        println!("exclude globs: {:?}", cmd.exclude);
    }
    if let Some(log) = &cmd.log {
        println!("session log: {}", log.display());
    }
    println!("---");
}

/// Prints progress on stdout and status on stderr, or one JSON object per
/// event with `--json`.
struct ConsoleReporter {
    json: bool,
    diff_context: Option<usize>,
}

impl ConsoleReporter {
    fn emit(&self, mut event: JsonValue) {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        if let Some(map) = event.as_object_mut() {
            map.insert("timestamp".into(), JsonValue::String(timestamp));
        }
        println!("{event}");
    }
}

impl Reporter for ConsoleReporter {
    fn message(&mut self, line: &str) {
        if !self.json {
            println!("{line}");
        }
    }

    fn status(&mut self, status: &str) {
        if !self.json {
            eprintln!("status: {status}");
        }
    }
}

impl ScanListener for ConsoleReporter {
    fn replacement(&mut self, record: &ReplacementRecord) {
        if self.json {
            self.emit(json!({ "event": "replacement", "record": record }));
        } else {
            self.message(&record.log_line());
        }
    }

    fn failure(&mut self, failure: &FileFailure) {
        if self.json {
            self.emit(json!({
                "event": "failure",
                "path": failure.path.display().to_string(),
                "error": format!("{:#}", failure.error),
            }));
        } else {
            eprintln!("Failed: {}: {:#}", failure.path.display(), failure.error);
        }
    }

    fn file_finished(&mut self, outcome: &FileOutcome) {
        if self.json {
            if outcome.changed {
                self.emit(json!({
                    "event": "file",
                    "path": outcome.path.display().to_string(),
                    "replacements": outcome.replacements.len(),
                    "backup": outcome.backup.as_ref().map(|p| p.display().to_string()),
                }));
            }
            return;
        }
        if let Some(backup) = &outcome.backup {
            println!(
                "backup saved: {} -> {}",
                outcome.path.display(),
                backup.display()
            );
        }
        if let (Some(context), Some((old, new))) = (self.diff_context, &outcome.texts) {
            print!("{}", diff::render_diff(&outcome.path, old, new, context));
        }
    }

    fn summary(&mut self, line: &str) {
        if self.json {
            self.emit(json!({ "event": "summary", "message": line }));
        } else {
            println!();
            println!("{line}");
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "spriteswap",
    version,
    about = "Rewrite numeric sprite ids in GameMaker projects"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace mapped sprite ids in every .gml, .yy and .yyp file.
    Run(RunCommand),
}

#[derive(Debug, Args)]
struct RunCommand {
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    project: PathBuf,
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    mapping: PathBuf,
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    log: Option<PathBuf>,
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
    #[arg(long = "skip-hidden", action = ArgAction::SetTrue)]
    skip_hidden: bool,
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    diff: bool,
    #[arg(long, default_value_t = 2)]
    context: usize,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}
