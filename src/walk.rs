//! Enumerates candidate files under the project root.
//!
//! Two strategies are supported: `git`, which streams regular files tracked
//! in the enclosing repository's index, and `filesystem`, a recursive
//! directory walk. `auto` picks `git` when the root is inside a repository.

use crate::config::WalkMode;
use anyhow::{anyhow, Context, Result};
use filetime::FileTime;
use ignore::WalkBuilder;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

/// A file discovered by the Walker. Immutable for the duration of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Path relative to the project root, used as the cache key.
    pub rel_path: PathBuf,
    /// Byte size at traversal time.
    pub size: i64,
    /// Modification time at traversal time, truncated to whole seconds.
    pub mtime: i64,
}

impl File {
    fn from_metadata(abs_path: PathBuf, rel_path: PathBuf, metadata: &Metadata) -> Self {
        let mtime = FileTime::from_last_modification_time(metadata);
        File {
            abs_path,
            rel_path,
            size: metadata.len() as i64,
            mtime: mtime.unix_seconds(),
        }
    }
}

/// Concrete strategy, after `auto` has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Entries tracked in the index of the enclosing git repository.
    Git,
    /// Recursive directory walk.
    Filesystem,
}

/// Resolve `WalkMode::Auto` against whether `tree_root` is inside a repo.
pub fn resolve_strategy(mode: WalkMode, tree_root: &Path) -> Strategy {
    match mode {
        WalkMode::Git => Strategy::Git,
        WalkMode::Filesystem => Strategy::Filesystem,
        WalkMode::Auto => {
            if git2::Repository::discover(tree_root).is_ok() {
                Strategy::Git
            } else {
                Strategy::Filesystem
            }
        }
    }
}

/// Walk `paths` (absolute, already filtered to live under `tree_root`) and
/// return every regular file found.
pub fn walk(strategy: Strategy, tree_root: &Path, paths: &[PathBuf]) -> Result<Vec<File>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    match strategy {
        Strategy::Git => walk_git(tree_root, paths),
        Strategy::Filesystem => walk_filesystem(tree_root, paths),
    }
}

/// Relativize `abs` against `tree_root`: fast-path prefix stripping when
/// `abs` begins with `tree_root`, else fall back to the path as given.
fn relativize(tree_root: &Path, abs: &Path) -> PathBuf {
    match abs.strip_prefix(tree_root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => abs.to_path_buf(),
    }
}

// Regular-file bits of a git index entry's mode, matching `Mode::IsRegular`:
// 0o100644 (non-executable) or 0o100755 (executable).
const GIT_FILEMODE_MASK: u32 = 0o170000;
const GIT_FILEMODE_REGULAR: u32 = 0o100000;

fn walk_git(tree_root: &Path, paths: &[PathBuf]) -> Result<Vec<File>> {
    let repo = git2::Repository::discover(tree_root)
        .with_context(|| format!("{} is not inside a git repository", tree_root.display()))?;
    let workdir = repo
        .workdir()
        .ok_or_else(|| anyhow!("git repository {} has no working directory", tree_root.display()))?
        .to_path_buf();
    let index = repo.index()?;

    // The whole index is streamed when every path argument is the root;
    // a narrower argument filters entries by path prefix.
    let whole_tree = paths.iter().all(|p| p == tree_root);

    let mut files = Vec::new();
    for entry in index.iter() {
        if entry.mode & GIT_FILEMODE_MASK != GIT_FILEMODE_REGULAR {
            continue;
        }
        let rel_to_workdir = PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned());
        let abs = workdir.join(&rel_to_workdir);

        if !whole_tree && !paths.iter().any(|p| abs.starts_with(p)) {
            continue;
        }

        let metadata = std::fs::symlink_metadata(&abs).with_context(|| {
            format!(
                "{} is tracked by git but missing on disk",
                abs.display()
            )
        })?;
        if !metadata.is_file() {
            continue;
        }
        let rel = relativize(tree_root, &abs);
        files.push(File::from_metadata(abs, rel, &metadata));
    }
    Ok(files)
}

fn walk_filesystem(tree_root: &Path, paths: &[PathBuf]) -> Result<Vec<File>> {
    // For some reason the WalkBuilder must start with one path, but can add
    // more paths later.
    let mut builder = WalkBuilder::new(&paths[0]);
    for path in &paths[1..] {
        builder.add(path);
    }
    builder.follow_links(false);

    let mut files = Vec::new();
    for walk_entry in builder.build() {
        let dir_entry =
            walk_entry.map_err(|err| anyhow!("traversal error under {}: {}", tree_root.display(), err))?;
        let file_type = match dir_entry.file_type() {
            Some(ft) => ft,
            None => continue,
        };
        // Directories and symlinks are skipped; regular files only.
        if file_type.is_dir() || file_type.is_symlink() {
            continue;
        }
        let abs = dir_entry.path().to_path_buf();
        let metadata = dir_entry
            .metadata()
            .with_context(|| format!("failed to stat {}", abs.display()))?;
        let rel = relativize(tree_root, &abs);
        files.push(File::from_metadata(abs, rel, &metadata));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn filesystem_skips_dirs_and_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        write(&root.join("a.txt"), "a");
        fs::create_dir_all(root.join("dir")).unwrap();
        write(&root.join("dir/b.txt"), "b");

        let files = walk(Strategy::Filesystem, &root, &[root.clone()]).unwrap();
        let mut rels: Vec<_> = files.iter().map(|f| f.rel_path.clone()).collect();
        rels.sort();
        assert_eq!(rels, vec![PathBuf::from("a.txt"), PathBuf::from("dir/b.txt")]);
    }

    #[test]
    fn resolve_auto_without_git_picks_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_strategy(WalkMode::Auto, tmp.path()),
            Strategy::Filesystem
        );
    }
}
