use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::encoding::EncodingStrategy;
use crate::files::{Discovered, DiscoveryOptions, discover_project_files};
use crate::mapping::{SpriteMap, load_sprite_map};
use crate::rewrite::{
    FileOutcome, ReplacementRecord, RewriteContext, RewriteOptions, SkipReason, rewrite_file,
};
use crate::session::{Reporter, SessionLog, default_log_path};

/// Hooks a run reports through. Everything funnels into [`Reporter`] by
/// default; callers override the structured hooks when they want more than
/// formatted lines.
pub trait ScanListener: Reporter {
    fn replacement(&mut self, record: &ReplacementRecord) {
        self.message(&record.log_line());
    }

    fn failure(&mut self, failure: &FileFailure) {
        self.message(&format!("Failed: {}: {:#}", failure.path.display(), failure.error));
    }

    fn file_finished(&mut self, _outcome: &FileOutcome) {}

    fn summary(&mut self, line: &str) {
        self.message(line);
    }
}

impl ScanListener for () {}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Defaults to the fixed log name next to the executable.
    pub log_path: Option<PathBuf>,
    pub encoding: EncodingStrategy,
    pub discovery: DiscoveryOptions,
    pub dry_run: bool,
    pub keep_texts: bool,
}

#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub changed_files: Vec<PathBuf>,
    pub replacements: Vec<ReplacementRecord>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
    pub log_path: PathBuf,
}

/// Loads the mapping, walks `project`, and rewrites every eligible file.
///
/// Configuration problems fail the whole run before any file is touched.
/// A file that cannot be read or written is recorded in
/// [`ScanReport::failures`] and the walk moves on.
pub fn scan_and_replace(
    project: &Path,
    mapping: &Path,
    options: &ScanOptions,
    listener: &mut dyn ScanListener,
) -> Result<ScanReport> {
    if !project.is_dir() {
        bail!("project folder {} is not a directory", project.display());
    }
    if !mapping.is_file() {
        bail!("mapping file {} does not exist", mapping.display());
    }
    let map = load_sprite_map(mapping)?;
    if map.is_empty() {
        listener.message(&format!(
            "warning: {} contains no `id-name` entries; nothing will be replaced",
            mapping.display()
        ));
    } else {
        listener.message(&format!(
            "Loaded {} mapping entries from {}",
            map.len(),
            mapping.display()
        ));
    }
    let found = discover_project_files(project, &options.discovery)?;
    let log_path = match &options.log_path {
        Some(path) => path.clone(),
        None => default_log_path()?,
    };

    let mut log = SessionLog::create(&log_path)?;
    let session = Session {
        map: &map,
        encoding: &options.encoding,
        options: RewriteOptions {
            dry_run: options.dry_run,
            keep_texts: options.keep_texts,
        },
    };
    let report = session.run(found, &mut log, listener)?;
    log.finish()?;
    listener.status("Done.");
    Ok(report)
}

struct Session<'a> {
    map: &'a SpriteMap,
    encoding: &'a EncodingStrategy,
    options: RewriteOptions,
}

impl Session<'_> {
    fn run(
        &self,
        found: Vec<Discovered>,
        log: &mut SessionLog,
        listener: &mut dyn ScanListener,
    ) -> Result<ScanReport> {
        let mut report = ScanReport {
            log_path: log.path().to_path_buf(),
            ..ScanReport::default()
        };

        for item in found {
            let entry = match item {
                Discovered::File(entry) => entry,
                Discovered::Unreadable { path, error } => {
                    let failure = FileFailure { path, error };
                    listener.failure(&failure);
                    report.failures.push(failure);
                    continue;
                }
            };

            listener.status(&format!("Scanning: {}", entry.path.display()));
            listener.message(&format!("Checking: {}", entry.path.display()));
            report.scanned += 1;

            let ctx = RewriteContext {
                entry: &entry,
                encoding: self.encoding,
                map: self.map,
                options: self.options,
            };
            let outcome = match rewrite_file(&ctx) {
                Ok(outcome) => outcome,
                Err(error) => {
                    let failure = FileFailure {
                        path: entry.path.clone(),
                        error,
                    };
                    listener.failure(&failure);
                    report.failures.push(failure);
                    continue;
                }
            };

            for warning in &outcome.warnings {
                listener.message(&format!("warning: {warning}"));
            }
            if outcome.skipped == Some(SkipReason::Binary) {
                listener.message(&format!(
                    "skipping {} (suspected binary file)",
                    outcome.path.display()
                ));
                report.skipped.push(outcome.path.clone());
            }
            for record in &outcome.replacements {
                listener.replacement(record);
                log.append(&record.log_line())?;
            }
            listener.file_finished(&outcome);

            if outcome.changed {
                report.changed_files.push(outcome.path);
            }
            report.replacements.extend(outcome.replacements);
        }

        let summary = summary_line(report.changed_files.len(), log.path(), self.options.dry_run);
        listener.summary(&summary);
        log.append(&summary)?;
        Ok(report)
    }
}

fn summary_line(changed: usize, log_path: &Path, dry_run: bool) -> String {
    if dry_run {
        format!(
            "Dry run: replacements pending in {changed} files. Log saved to {}",
            log_path.display()
        )
    } else {
        format!(
            "Replacements done in {changed} files. Log saved to {}",
            log_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{FileEntry, FileMetadata};
    use crate::mapping::parse_sprite_map;
    use crate::rewrite::backup_path;
    use crate::session::LOG_FILE;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct Recorder {
        messages: Vec<String>,
        statuses: Vec<String>,
        finished: usize,
    }

    impl Reporter for Recorder {
        fn message(&mut self, line: &str) {
            self.messages.push(line.to_string());
        }

        fn status(&mut self, status: &str) {
            self.statuses.push(status.to_string());
        }
    }

    impl ScanListener for Recorder {
        fn file_finished(&mut self, _outcome: &FileOutcome) {
            self.finished += 1;
        }
    }

    struct Fixture {
        _temp: TempDir,
        project: PathBuf,
        mapping: PathBuf,
        log: PathBuf,
    }

    impl Fixture {
        fn new(mapping: &str) -> Self {
            let temp = tempdir().expect("temp dir");
            let project = temp.path().join("Game");
            fs::create_dir_all(project.join("objects/obj_player")).expect("dirs");
            fs::create_dir_all(project.join("scripts/scr_enemy")).expect("dirs");
            let mapping_path = temp.path().join("mapping.txt");
            fs::write(&mapping_path, mapping).expect("write mapping");
            let log = temp.path().join(LOG_FILE);
            Self {
                project,
                mapping: mapping_path,
                log,
                _temp: temp,
            }
        }

        fn write(&self, relative: &str, contents: &str) -> PathBuf {
            let path = self.project.join(relative);
            fs::write(&path, contents).expect("write project file");
            path
        }

        fn options(&self) -> ScanOptions {
            ScanOptions {
                log_path: Some(self.log.clone()),
                ..ScanOptions::default()
            }
        }

        fn run(&self, listener: &mut dyn ScanListener) -> ScanReport {
            scan_and_replace(&self.project, &self.mapping, &self.options(), listener)
                .expect("scan")
        }

        fn log_lines(&self) -> Vec<String> {
            fs::read_to_string(&self.log)
                .expect("read log")
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    const MAPPING: &str = "# ids exported from the old project\n\n12-spr_player_idle\n4-spr_enemy_walk\n";

    #[test]
    fn full_run_rewrites_and_reports() {
        let fx = Fixture::new(MAPPING);
        let create = fx.write(
            "objects/obj_player/Create_0.gml",
            "sprite_index = 12;\nimage_speed = 1;\nsprite_index = 13;\n",
        );
        let enemy = fx.write(
            "scripts/scr_enemy/scr_enemy.gml",
            "var walk_spr = 4; sprite_index = 12;\n",
        );
        let untouched = fx.write("scripts/scr_enemy/scr_enemy.yy", "{\"name\":\"scr_enemy\"}\n");

        let mut recorder = Recorder::default();
        let report = fx.run(&mut recorder);

        assert_eq!(report.scanned, 3);
        assert_eq!(report.changed_files, vec![create.clone(), enemy.clone()]);
        assert_eq!(report.replacements.len(), 3);
        assert!(report.failures.is_empty());
        assert_eq!(report.log_path, fx.log);

        assert_eq!(
            fs::read_to_string(&create).unwrap(),
            "sprite_index = spr_player_idle;\nimage_speed = 1;\nsprite_index = 13;\n"
        );
        assert_eq!(
            fs::read_to_string(&enemy).unwrap(),
            "var walk_spr = spr_enemy_walk; sprite_index = spr_player_idle;\n"
        );
        assert!(!backup_path(&untouched).exists());

        let lines = fx.log_lines();
        assert_eq!(lines.len(), report.replacements.len() + 1);
        assert_eq!(
            lines[0],
            "[Create_0.gml:1] sprite_index = 12; → sprite_index = spr_player_idle;"
        );
        assert_eq!(
            lines[1],
            "[scr_enemy.gml:1] var walk_spr = 4; sprite_index = 12; → var walk_spr = 4; sprite_index = spr_player_idle;"
        );
        assert_eq!(
            lines[3],
            format!("Replacements done in 2 files. Log saved to {}", fx.log.display())
        );

        for line in &lines[..3] {
            assert!(recorder.messages.contains(line));
        }
        assert_eq!(recorder.messages.last(), lines.last());
        assert_eq!(recorder.finished, 3);
        assert_eq!(recorder.statuses.last().map(String::as_str), Some("Done."));
        assert!(
            recorder
                .statuses
                .contains(&format!("Scanning: {}", create.display()))
        );
        assert!(
            recorder
                .messages
                .contains(&format!("Checking: {}", create.display()))
        );
    }

    #[test]
    fn second_run_is_a_no_op() {
        let fx = Fixture::new(MAPPING);
        let path = fx.write("objects/obj_player/Step_0.gml", "my_spr_var = 4;\n");

        let first = fx.run(&mut ());
        assert_eq!(first.changed_files, vec![path.clone()]);

        let second = fx.run(&mut ());
        assert!(second.changed_files.is_empty());
        assert!(second.replacements.is_empty());
        assert_eq!(fx.log_lines().len(), 1);
    }

    #[test]
    fn backup_holds_pre_run_content() {
        let fx = Fixture::new(MAPPING);
        let original = "// step\r\nsprite_index = 12;\r\n";
        let path = fx.write("objects/obj_player/Step_0.gml", original);

        let report = fx.run(&mut ());
        for changed in &report.changed_files {
            assert_eq!(fs::read_to_string(backup_path(changed)).unwrap(), original);
        }
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "// step\r\nsprite_index = spr_player_idle;\r\n"
        );
    }

    #[test]
    fn unrecognized_extensions_are_never_written() {
        let fx = Fixture::new(MAPPING);
        let notes = fx.write("notes.txt", "sprite_index = 12;\n");
        let shader = fx.write("objects/obj_player/shader.fsh", "spr = 4;\n");

        let report = fx.run(&mut ());
        assert_eq!(report.scanned, 0);
        assert_eq!(fs::read_to_string(&notes).unwrap(), "sprite_index = 12;\n");
        assert_eq!(fs::read_to_string(&shader).unwrap(), "spr = 4;\n");
        assert!(!backup_path(&notes).exists());
    }

    #[test]
    fn dry_run_logs_but_keeps_files() {
        let fx = Fixture::new(MAPPING);
        let path = fx.write("Game.yyp", "sprite_index = 12;\n");

        let options = ScanOptions {
            dry_run: true,
            ..fx.options()
        };
        let report =
            scan_and_replace(&fx.project, &fx.mapping, &options, &mut ()).expect("scan");
        assert_eq!(report.changed_files, vec![path.clone()]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "sprite_index = 12;\n");
        assert!(!backup_path(&path).exists());
        let lines = fx.log_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("Dry run: replacements pending in 1 files."));
    }

    #[test]
    fn missing_project_is_a_configuration_error() {
        let fx = Fixture::new(MAPPING);
        let err = scan_and_replace(
            &fx.project.join("nope"),
            &fx.mapping,
            &fx.options(),
            &mut (),
        )
        .unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
        assert!(!fx.log.exists());
    }

    #[test]
    fn missing_mapping_is_a_configuration_error() {
        let fx = Fixture::new(MAPPING);
        let path = fx.write("Game.yyp", "sprite_index = 12;\n");
        let err = scan_and_replace(
            &fx.project,
            &fx.project.join("missing.txt"),
            &fx.options(),
            &mut (),
        )
        .unwrap_err();
        assert!(err.to_string().contains("mapping file"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "sprite_index = 12;\n");
        assert!(!fx.log.exists());
    }

    #[test]
    fn per_file_failure_does_not_stop_the_walk() {
        let fx = Fixture::new(MAPPING);
        let good = fx.write("objects/obj_player/Create_0.gml", "sprite_index = 12;\n");
        let missing = fx.project.join("objects/obj_player/Gone_0.gml");

        let entry = |path: &Path| {
            Discovered::File(FileEntry {
                path: path.to_path_buf(),
                metadata: FileMetadata {
                    is_probably_binary: false,
                },
            })
        };
        let map = parse_sprite_map(MAPPING);
        let encoding = EncodingStrategy::new(None).expect("strategy");
        let session = Session {
            map: &map,
            encoding: &encoding,
            options: RewriteOptions::default(),
        };
        let mut log = SessionLog::create(&fx.log).expect("log");
        let mut recorder = Recorder::default();

        let report = session
            .run(vec![entry(&missing), entry(&good)], &mut log, &mut recorder)
            .expect("run");
        log.finish().expect("finish");

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, missing);
        assert_eq!(report.changed_files, vec![good.clone()]);
        assert!(
            recorder
                .messages
                .iter()
                .any(|line| line.starts_with(&format!("Failed: {}", missing.display())))
        );
        assert_eq!(fx.log_lines().len(), 2);
    }

    #[test]
    fn undecodable_file_is_a_failure_not_a_rewrite() {
        let fx = Fixture::new(MAPPING);
        let bad = fx.project.join("Step_0.gml");
        let bytes = b"// \xff\nsprite_index = 12;\n".to_vec();
        fs::write(&bad, &bytes).expect("write");
        let good = fx.write("Create_0.gml", "sprite_index = 12;\n");

        let options = ScanOptions {
            encoding: EncodingStrategy::new(Some("utf-8")).expect("strategy"),
            ..fx.options()
        };
        let report =
            scan_and_replace(&fx.project, &fx.mapping, &options, &mut ()).expect("scan");

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, bad);
        assert_eq!(report.changed_files, vec![good]);
        assert_eq!(fs::read(&bad).expect("read"), bytes);
        assert!(!backup_path(&bad).exists());
        assert_eq!(fx.log_lines().len(), 2);
    }
}
