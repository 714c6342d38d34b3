//! Executes one batch: the sorted formatter sequence shared by a batch key,
//! run in order against its buffered files.

use crate::cache::Stamp;
use crate::formatter::Formatter;
use crate::stats::Stats;
use filetime::FileTime;
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// One file queued for a batch, carrying the stamp recorded at walk time.
pub struct Entry {
    /// Absolute path passed to the formatter.
    pub abs_path: PathBuf,
    /// Path relative to the project root, used as the cache key.
    pub rel_path: PathBuf,
    /// Stamp observed by the walker, before formatting.
    pub before: Stamp,
}

/// What to do with the cache once a batch finishes: `recorded` entries got
/// a fresh post-formatting stamp, `forgotten` ones should lose whatever
/// stamp they had so they're retried next run.
#[derive(Default)]
pub struct BatchOutcome {
    /// Paths that finished formatting and their fresh stamp.
    pub recorded: Vec<(PathBuf, Stamp)>,
    /// Paths that should lose any cache entry they had.
    pub forgotten: Vec<PathBuf>,
}

/// Run `entries` through `formatters` in order. Formatter `k+1` only starts
/// after `k` has finished over the whole batch; there is no per-file
/// repartitioning mid-batch. A non-zero exit or spawn failure is logged and
/// aborts the rest of the sequence for this batch only — other in-flight
/// batches are unaffected, and the entries are reported as forgotten so
/// they're retried next run.
pub fn run_batch(formatters: &[&Formatter], entries: &[Entry], stats: &Stats) -> BatchOutcome {
    if entries.is_empty() {
        return BatchOutcome::default();
    }
    let paths: Vec<PathBuf> = entries.iter().map(|e| e.abs_path.clone()).collect();

    for formatter in formatters {
        match formatter.invoke(&paths) {
            Ok(output) if output.status.success() => {
                debug!("{}: ran {} files", formatter, paths.len());
            }
            Ok(output) => {
                warn!(
                    "{}: exited with {}: {}",
                    formatter,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim(),
                );
                return BatchOutcome {
                    recorded: Vec::new(),
                    forgotten: entries.iter().map(|e| e.rel_path.clone()).collect(),
                };
            }
            Err(err) => {
                warn!("{}: failed to run: {}", formatter, err);
                return BatchOutcome {
                    recorded: Vec::new(),
                    forgotten: entries.iter().map(|e| e.rel_path.clone()).collect(),
                };
            }
        }
    }

    stats.add_formatted(entries.len());
    let mut outcome = BatchOutcome::default();
    for entry in entries {
        match stat(&entry.abs_path) {
            Some(after) => {
                if after != entry.before {
                    stats.add_changed(1);
                }
                outcome.recorded.push((entry.rel_path.clone(), after));
            }
            None => outcome.forgotten.push(entry.rel_path.clone()),
        }
    }
    outcome
}

fn stat(path: &Path) -> Option<Stamp> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = FileTime::from_last_modification_time(&meta).unix_seconds();
    Some(Stamp {
        size: meta.len() as i64,
        mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FmtConfig;

    fn touch(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn successful_batch_records_every_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let file_a = tmp.path().join("a.txt");
        let file_b = tmp.path().join("b.txt");
        touch(&file_a, "hello");
        touch(&file_b, "hello");

        let cfg = FmtConfig {
            command: "true".into(),
            options: vec![],
            includes: vec!["*.txt".into()],
            excludes: vec![],
            priority: 0,
        };
        let formatter = Formatter::from_config("noop", &cfg, &[]).unwrap();
        let stats = Stats::new();

        let entries = vec![
            Entry {
                abs_path: file_a,
                rel_path: PathBuf::from("a.txt"),
                before: Stamp { size: 999, mtime: 0 },
            },
            Entry {
                abs_path: file_b,
                rel_path: PathBuf::from("b.txt"),
                before: Stamp { size: 5, mtime: 0 },
            },
        ];

        let outcome = run_batch(&[&formatter], &entries, &stats);
        assert_eq!(outcome.recorded.len(), 2);
        assert!(outcome.forgotten.is_empty());
        assert!(stats.summary().contains("formatted 2"));
    }

    #[test]
    fn failing_formatter_forgets_every_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let file_a = tmp.path().join("a.txt");
        touch(&file_a, "hello");

        let cfg = FmtConfig {
            command: "false".into(),
            options: vec![],
            includes: vec!["*.txt".into()],
            excludes: vec![],
            priority: 0,
        };
        let formatter = Formatter::from_config("noop", &cfg, &[]).unwrap();
        let stats = Stats::new();

        let entries = vec![Entry {
            abs_path: file_a,
            rel_path: PathBuf::from("a.txt"),
            before: Stamp { size: 5, mtime: 0 },
        }];

        let outcome = run_batch(&[&formatter], &entries, &stats);
        assert!(outcome.recorded.is_empty());
        assert_eq!(outcome.forgotten, vec![PathBuf::from("a.txt")]);
        assert!(stats.summary().contains("formatted 0"));
    }
}
