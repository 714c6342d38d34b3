//! Ties the Walker, Matcher, Cache, and Runner together into one pass over
//! a project: walk, filter against the cache, assign batch keys, dispatch a
//! bounded worker pool, and drain.

use crate::cache::{Cache, Stamp};
use crate::config::{self, OnUnmatched, Root};
use crate::formatter::{self, BatchKey, Formatter, FormatterName};
use crate::runner::{self, Entry};
use crate::stats::Stats;
use crate::walk::{self, File};
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Everything a run needs besides the parsed config.
pub struct Options {
    /// Absolute path to the project root.
    pub tree_root: PathBuf,
    /// Directory holding the cache file.
    pub cache_dir: PathBuf,
    /// Restrict the walk to these paths; empty means the whole tree.
    pub paths: Vec<PathBuf>,
    /// Restrict to these formatter names; `None` means every configured one.
    pub selected_formatters: Option<Vec<String>>,
    /// Bypass the cache entirely.
    pub no_cache: bool,
    /// Discard the cache before this run.
    pub clear_cache: bool,
    /// Whether the caller wants a non-zero exit when files changed.
    pub fail_on_change: bool,
    /// Drop rather than error on an unresolvable formatter command.
    pub allow_missing_formatter: bool,
    /// Overrides the config's `on-unmatched` policy when set.
    pub on_unmatched: Option<OnUnmatched>,
    /// Checked at batch boundaries to abort early on SIGINT/SIGTERM.
    pub cancelled: Arc<AtomicBool>,
}

/// What a run accomplished, handed back to the CLI layer for exit-code and
/// summary-printing decisions.
pub struct Outcome {
    /// Accumulated counters for this run.
    pub stats: Stats,
}

/// Load every `[formatter.*]` entry, applying `selected_formatters` and
/// `allow_missing_formatter`. Errors if a requested formatter is missing
/// and missing formatters aren't allowed.
pub fn load_formatters(
    root: &Root,
    allow_missing_formatter: bool,
    selected_formatters: &Option<Vec<String>>,
) -> Result<BTreeMap<FormatterName, Formatter>> {
    let global_excludes = root.global.as_ref().map(|g| g.excludes.clone()).unwrap_or_default();
    let mut formatters = BTreeMap::new();

    if let Some(names) = selected_formatters {
        let unknown: Vec<&String> = names.iter().filter(|n| !root.formatter.contains_key(*n)).collect();
        if !unknown.is_empty() {
            return Err(anyhow!(
                "unknown formatter name(s) passed to --formatters: {}",
                unknown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
    }

    for (name, cfg) in &root.formatter {
        match Formatter::from_config(name, cfg, &global_excludes) {
            Ok(fmt) => {
                let wanted = match selected_formatters {
                    Some(names) => names.contains(name),
                    None => true,
                };
                if wanted {
                    formatters.insert(fmt.name.clone(), fmt);
                }
            }
            // Only a missing executable may be silently dropped; a bad
            // glob or an empty include list is a configuration mistake and
            // stays fatal regardless of --allow-missing-formatter.
            Err(err) if allow_missing_formatter && err.is_droppable() => {
                warn!("ignoring formatter #{} due to error: {}", name, err);
            }
            Err(err) => return Err(anyhow!("failed to load formatter #{}: {}", name, err)),
        }
    }

    Ok(formatters)
}

/// Resolve the project's tree root: explicit override, else `tree_root_file`
/// marker ascent from the config file's directory, else the config file's
/// own directory.
pub fn resolve_tree_root(root: &Root, config_file: &Path) -> Result<PathBuf> {
    let config_dir = config_file
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", config_file.display()))?;

    if let Some(explicit) = &root.tree_root {
        return Ok(crate::util::expand_path(explicit, config_dir));
    }
    if let Some(marker) = &root.tree_root_file {
        return config::lookup_marker(config_dir, marker)
            .ok_or_else(|| anyhow!("tree-root-file {} not found above {}", marker, config_dir.display()));
    }
    Ok(config_dir.to_path_buf())
}

/// Run one full pass: walk, match, filter against the cache, format, and
/// flush. Returns the accumulated stats; `fail_on_change` is left for the
/// caller to check against `outcome.stats.any_changed()`.
pub fn run(root: Root, opts: Options) -> Result<Outcome> {
    assert!(opts.tree_root.is_absolute());
    let stats = Stats::new();

    let formatters = load_formatters(&root, opts.allow_missing_formatter, &opts.selected_formatters)?;
    if formatters.is_empty() {
        warn!("no formatters configured, nothing to do");
        return Ok(Outcome { stats });
    }
    let formatter_refs: Vec<&Formatter> = formatters.values().collect();

    let mut cache = Cache::open(&opts.cache_dir, &opts.tree_root, opts.no_cache, opts.clear_cache)?;
    cache.check_fingerprint(&formatter_refs)?;

    let strategy = walk::resolve_strategy(root.walk, &opts.tree_root);
    let walk_paths = if opts.paths.is_empty() {
        vec![opts.tree_root.clone()]
    } else {
        opts.paths.clone()
    };
    let files = walk::walk(strategy, &opts.tree_root, &walk_paths)?;
    stats.add_traversed(files.len());

    if opts.cancelled.load(Ordering::Relaxed) {
        return Ok(Outcome { stats });
    }

    let on_unmatched = opts.on_unmatched.unwrap_or(root.on_unmatched);

    let mut batches: BTreeMap<BatchKey, (Vec<&Formatter>, Vec<Entry>)> = BTreeMap::new();
    for file in files {
        let (chosen, key) = match formatter::select(&formatter_refs, &file) {
            Some(x) => x,
            None => {
                report_unmatched(on_unmatched, &file)?;
                continue;
            }
        };

        let stamp = Stamp {
            size: file.size,
            mtime: file.mtime,
        };
        if cache.is_unchanged(&file.rel_path, stamp) {
            continue;
        }
        stats.add_matched(1);

        let entry = Entry {
            abs_path: file.abs_path,
            rel_path: file.rel_path,
            before: stamp,
        };
        let slot = batches.entry(key).or_insert_with(|| (chosen, Vec::new()));
        slot.1.push(entry);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
        .build()?;

    let capacity_groups: Vec<(Vec<&Formatter>, Vec<Vec<Entry>>)> = batches
        .into_values()
        .map(|(chosen, entries)| {
            let capacity = formatter::batch_capacity(&chosen).max(1);
            let chunks = entries
                .into_iter()
                .fold(Vec::<Vec<Entry>>::new(), |mut sum, entry| {
                    match sum.last_mut() {
                        Some(last) if last.len() < capacity => last.push(entry),
                        _ => sum.push(vec![entry]),
                    }
                    sum
                });
            (chosen, chunks)
        })
        .collect();

    let cache = Mutex::new(cache);
    let cancelled = opts.cancelled;

    pool.install(|| {
        capacity_groups.par_iter().for_each(|(chosen, chunks)| {
            chunks.par_iter().for_each(|chunk| {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                let outcome = runner::run_batch(chosen, chunk, &stats);
                let mut cache = cache.lock().expect("cache mutex poisoned");
                for (rel_path, stamp) in outcome.recorded {
                    cache.record(rel_path, stamp);
                }
                for rel_path in outcome.forgotten {
                    cache.forget(&rel_path);
                }
            });
        });
    });

    debug!("{}", stats.summary());
    cache.into_inner().expect("cache mutex poisoned").flush()?;

    Ok(Outcome { stats })
}

/// Raised when `on-unmatched = fatal` fires, so the driver layer can map it
/// to a distinct exit code instead of the generic error code.
#[derive(Debug, thiserror::Error)]
#[error("no formatter matched {0}")]
pub struct UnmatchedFatal(pub String);

fn report_unmatched(policy: OnUnmatched, file: &File) -> Result<()> {
    let msg = format!("no formatter matched {}", file.rel_path.display());
    match policy {
        OnUnmatched::Debug => debug!("{}", msg),
        OnUnmatched::Info => info!("{}", msg),
        OnUnmatched::Warn => warn!("{}", msg),
        OnUnmatched::Error => error!("{}", msg),
        OnUnmatched::Fatal => return Err(UnmatchedFatal(file.rel_path.display().to_string()).into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_exe(path: &Path) {
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(path, perms).unwrap();
        }
    }

    #[test]
    fn resolve_tree_root_defaults_to_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config_file = tmp.path().join("treefmt.toml");
        fs::write(&config_file, "").unwrap();
        let root = config::from_string("").unwrap();
        assert_eq!(resolve_tree_root(&root, &config_file).unwrap(), tmp.path());
    }

    #[test]
    fn run_formats_matched_files_and_flushes_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let noop = tmp.path().join("noop.sh");
        write_exe(&noop);
        fs::write(tmp.path().join("main.rs"), "fn main() {}").unwrap();

        let config = format!(
            "[formatter.rust]\ncommand = {:?}\nincludes = [\"*.rs\"]\n",
            noop
        );
        let root = config::from_string(&config).unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let cancelled = std::sync::Arc::new(AtomicBool::new(false));

        let opts = Options {
            tree_root: tmp.path().to_path_buf(),
            cache_dir: cache_dir.path().to_path_buf(),
            paths: vec![],
            selected_formatters: None,
            no_cache: false,
            clear_cache: false,
            fail_on_change: false,
            allow_missing_formatter: false,
            on_unmatched: None,
            cancelled,
        };

        let outcome = run(root, opts).unwrap();
        assert_eq!(outcome.stats.summary().contains("matched 1"), true);
    }

    #[test]
    fn load_formatters_rejects_unknown_selected_name() {
        let config = "[formatter.rust]\ncommand = \"true\"\nincludes = [\"*.rs\"]\n";
        let root = config::from_string(config).unwrap();
        let selected = Some(vec!["nonexistent".to_string()]);
        let err = load_formatters(&root, false, &selected).unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }
}
