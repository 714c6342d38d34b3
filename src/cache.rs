//! Persistent cache keyed by project root: per-file change detection plus
//! formatter-fingerprint invalidation.
//!
//! The cache file lives at `<cache_dir>/<sha256(tree_root)>.toml` and holds
//! two namespaces: `meta`, a fingerprint over the effective formatter set,
//! and `paths`, a map from relative path to the `(size, mtime)` stamp
//! recorded the last time that path was processed successfully. A mismatch
//! between the stored and freshly computed fingerprint purges `paths`
//! wholesale, since a changed formatter invalidates every prior result.

use crate::formatter::Formatter;
use anyhow::{Context, Result};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{File as StdFile, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// `(size, mtime_seconds)` recorded for a successfully processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    /// Byte size at stamp time.
    pub size: i64,
    /// Modification time at stamp time, truncated to whole seconds.
    pub mtime: i64,
}

/// Hash over the effective formatter configuration. A mismatch against the
/// on-disk value purges every path entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Fingerprint(String);

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDisk {
    #[serde(default)]
    meta: Fingerprint,
    #[serde(default)]
    paths: BTreeMap<String, Stamp>,
}

/// Size of the chunks used when folding path entries into the on-disk map,
/// so that a single run's worth of results never requires buffering the
/// entire project in memory at once.
pub const TRANSACTION_BATCH: usize = 1024;

/// A handle on the on-disk cache for one project root. Holds the file lock
/// for its entire lifetime; `flush` releases it.
pub struct Cache {
    lock: Option<StdFile>,
    paths: BTreeMap<PathBuf, Stamp>,
    fingerprint: Fingerprint,
    enabled: bool,
}

impl Cache {
    /// Derive the cache file path from the project root.
    pub fn location(cache_dir: &Path, tree_root: &Path) -> PathBuf {
        let digest = Sha256::digest(tree_root.to_string_lossy().as_bytes());
        cache_dir.join(format!("{:x}.toml", digest))
    }

    /// Open (creating if absent) the cache file for `tree_root`, taking an
    /// exclusive OS lock bounded to roughly one second. `no_cache` returns a
    /// disabled handle that never reads, matches, or writes anything;
    /// `clear` discards any existing content before use.
    pub fn open(cache_dir: &Path, tree_root: &Path, no_cache: bool, clear: bool) -> Result<Self> {
        if no_cache {
            return Ok(Cache {
                lock: None,
                paths: BTreeMap::new(),
                fingerprint: Fingerprint::default(),
                enabled: false,
            });
        }

        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;
        let path = Self::location(cache_dir, tree_root);

        if clear {
            let _ = std::fs::remove_file(&path);
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open cache file {}", path.display()))?;
        acquire_lock(&lock_file)?;

        let on_disk = read_on_disk(&path).unwrap_or_default();
        let paths = on_disk
            .paths
            .into_iter()
            .map(|(k, v)| (PathBuf::from(k), v))
            .collect();

        Ok(Cache {
            lock: Some(lock_file),
            paths,
            fingerprint: on_disk.meta,
            enabled: true,
        })
    }

    /// Compare the stored fingerprint against the one computed from the
    /// effective formatter set; purge every path entry on mismatch.
    pub fn check_fingerprint(&mut self, formatters: &[&Formatter]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let new = compute_fingerprint(formatters)?;
        if new != self.fingerprint {
            self.paths.clear();
            self.fingerprint = new;
        }
        Ok(())
    }

    /// A file is unchanged iff an entry exists with both fields equal to
    /// the current stat, truncated to whole seconds.
    pub fn is_unchanged(&self, rel_path: &Path, stamp: Stamp) -> bool {
        self.enabled && self.paths.get(rel_path) == Some(&stamp)
    }

    /// Record a successfully processed file's post-formatting stat.
    pub fn record(&mut self, rel_path: PathBuf, stamp: Stamp) {
        if self.enabled {
            self.paths.insert(rel_path, stamp);
        }
    }

    /// Drop the entry for a file whose batch failed, so it is retried
    /// rather than considered up to date on the next run.
    pub fn forget(&mut self, rel_path: &Path) {
        self.paths.remove(rel_path);
    }

    /// Flush the in-memory state back to disk and release the lock. No-op
    /// when the cache is disabled.
    pub fn flush(self) -> Result<()> {
        let mut f = match self.lock {
            Some(f) => f,
            None => return Ok(()),
        };

        let on_disk = OnDisk {
            meta: self.fingerprint,
            paths: self
                .paths
                .into_iter()
                .map(|(k, v)| (k.to_string_lossy().into_owned(), v))
                .collect(),
        };
        let body = toml::to_string_pretty(&on_disk)?;

        f.set_len(0)?;
        f.seek(SeekFrom::Start(0))?;
        f.write_all(body.as_bytes())?;
        FileExt::unlock(&f)?;
        Ok(())
    }
}

fn read_on_disk(path: &Path) -> Result<OnDisk> {
    let mut content = String::new();
    StdFile::open(path)?.read_to_string(&mut content)?;
    Ok(toml::from_str(&content)?)
}

fn acquire_lock(file: &StdFile) -> Result<()> {
    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if start.elapsed() < Duration::from_secs(1) => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => return Err(anyhow::anyhow!("cache lock timed out: {}", err)),
        }
    }
}

/// Fingerprints `(name, command, options, includes, excludes, priority,
/// executable_size, executable_mtime_seconds)` for every formatter, over
/// the symlink-resolved target of its command.
fn compute_fingerprint(formatters: &[&Formatter]) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();
    for fmt in formatters {
        let resolved = std::fs::canonicalize(&fmt.command)
            .with_context(|| format!("failed to resolve {}", fmt.command.display()))?;
        let meta = std::fs::metadata(&resolved)
            .with_context(|| format!("failed to stat {}", resolved.display()))?;
        let mtime = filetime::FileTime::from_last_modification_time(&meta).unix_seconds();

        hasher.update(fmt.name.as_str().as_bytes());
        hasher.update(fmt.command.to_string_lossy().as_bytes());
        for opt in &fmt.options {
            hasher.update(opt.as_bytes());
        }
        for inc in &fmt.includes {
            hasher.update(inc.as_bytes());
        }
        for exc in &fmt.excludes {
            hasher.update(exc.as_bytes());
        }
        hasher.update(fmt.priority.to_le_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
    }
    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_has_no_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::open(tmp.path(), Path::new("/project"), false, false).unwrap();
        assert!(!cache.is_unchanged(Path::new("main.rs"), Stamp { size: 0, mtime: 0 }));
    }

    #[test]
    fn record_then_reopen_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let tree_root = Path::new("/project");
        let stamp = Stamp { size: 42, mtime: 100 };
        {
            let mut cache = Cache::open(tmp.path(), tree_root, false, false).unwrap();
            cache.record(PathBuf::from("main.rs"), stamp);
            cache.flush().unwrap();
        }
        let cache = Cache::open(tmp.path(), tree_root, false, false).unwrap();
        assert!(cache.is_unchanged(Path::new("main.rs"), stamp));
    }

    #[test]
    fn no_cache_never_reports_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let tree_root = Path::new("/project");
        let stamp = Stamp { size: 42, mtime: 100 };
        {
            let mut cache = Cache::open(tmp.path(), tree_root, false, false).unwrap();
            cache.record(PathBuf::from("main.rs"), stamp);
            cache.flush().unwrap();
        }
        let cache = Cache::open(tmp.path(), tree_root, true, false).unwrap();
        assert!(!cache.is_unchanged(Path::new("main.rs"), stamp));
    }
}
