//! Contains the project configuration schema and parsing.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

/// Name of the config file
pub const FILENAME: &str = "treefmt.toml";
/// Dotted variant that is also recognized.
pub const DOTTED_FILENAME: &str = ".treefmt.toml";

/// How a file that no formatter wants is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnmatched {
    /// Log at debug level.
    Debug,
    /// Log at info level.
    Info,
    /// Log at warn level.
    Warn,
    /// Log at error level.
    Error,
    /// Abort the run immediately.
    Fatal,
}

impl Default for OnUnmatched {
    fn default() -> Self {
        OnUnmatched::Warn
    }
}

/// Which strategy the Walker uses to enumerate candidate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkMode {
    /// Pick `git` if the root is inside a repository, else `filesystem`.
    Auto,
    /// Enumerate files tracked in the enclosing repository's index.
    Git,
    /// Recursive directory walk.
    Filesystem,
}

impl Default for WalkMode {
    fn default() -> Self {
        WalkMode::Auto
    }
}

/// `[global]` table.
#[derive(Debug, Default, Deserialize)]
pub struct Global {
    /// Exclude globs applied to every formatter, in addition to its own.
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Config for one `[formatter.<name>]` table.
#[derive(Debug, Deserialize)]
pub struct FmtConfig {
    /// Command formatter to run
    pub command: String,
    /// Argument for formatter
    #[serde(default)]
    pub options: Vec<String>,
    /// File or Folder that is included to be formatted
    #[serde(default)]
    pub includes: Vec<String>,
    /// File or Folder that is excluded to be formatted
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Lower runs earlier; ties break by name ascending.
    #[serde(default)]
    pub priority: i32,
}

/// Top-level `treefmt.toml` structure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Root {
    /// `[global]` table.
    #[serde(default)]
    pub global: Option<Global>,
    /// One entry per `[formatter.<name>]` table.
    #[serde(default)]
    pub formatter: BTreeMap<String, FmtConfig>,
    /// Restrict to these formatter names. Unknown names are fatal at load.
    pub formatters: Option<Vec<String>>,
    /// Policy for files no formatter wants.
    #[serde(default)]
    pub on_unmatched: OnUnmatched,
    /// Explicit tree root. Mutually exclusive with `tree_root_file`.
    pub tree_root: Option<String>,
    /// Ascend from the config file until a file with this name exists; use
    /// its directory as the tree root. Mutually exclusive with `tree_root`.
    pub tree_root_file: Option<String>,
    /// Walker strategy.
    #[serde(default)]
    pub walk: WalkMode,
    /// Exit non-zero if any file changed.
    #[serde(default)]
    pub fail_on_change: bool,
    /// Bypass the cache entirely.
    #[serde(default)]
    pub no_cache: bool,
    /// Drop rather than error on an unresolvable formatter command.
    #[serde(default)]
    pub allow_missing_formatter: bool,
}

/// Find the directory that contains `treefmt.toml` (or `.treefmt.toml`).
/// From the current folder, and up.
pub fn lookup(dir: &Path) -> Option<PathBuf> {
    let mut cwd = dir.to_path_buf();
    loop {
        if cwd.join(FILENAME).exists() {
            return Some(cwd.join(FILENAME));
        }
        if cwd.join(DOTTED_FILENAME).exists() {
            return Some(cwd.join(DOTTED_FILENAME));
        }
        cwd = match cwd.parent() {
            Some(x) => x.to_path_buf(),
            // None is returned when .parent() is already the root folder. In
            // that case we have exhausted the search space.
            None => return None,
        };
    }
}

/// Ascend from `start` looking for a file named `filename`, returning the
/// directory that contains it. Used to resolve `tree_root_file`.
pub fn lookup_marker(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut cwd = start.to_path_buf();
    loop {
        if cwd.join(filename).exists() {
            return Some(cwd);
        }
        cwd = match cwd.parent() {
            Some(x) => x.to_path_buf(),
            None => return None,
        };
    }
}

/// Parses and validates a config already read into memory.
pub fn from_string(content: &str) -> Result<Root> {
    let root: Root = toml::from_str(content)?;
    if root.tree_root.is_some() && root.tree_root_file.is_some() {
        return Err(anyhow!(
            "tree-root and tree-root-file are mutually exclusive"
        ));
    }
    Ok(root)
}

/// Loads the treefmt.toml config from the given file path.
pub fn from_path(path: &Path) -> Result<Root> {
    let content = read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    from_string(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_lenient() {
        let root = from_string("").unwrap();
        assert_eq!(root.formatter.len(), 0);
        assert_eq!(root.on_unmatched, OnUnmatched::Warn);
        assert_eq!(root.walk, WalkMode::Auto);
    }

    #[test]
    fn tree_root_and_tree_root_file_are_exclusive() {
        let toml = r#"
        tree-root = "."
        tree-root-file = "flake.nix"
        "#;
        assert!(from_string(toml).is_err());
    }

    #[test]
    fn formatter_priority_defaults_to_zero() {
        let toml = r#"
        [formatter.nix]
        command = "nixpkgs-fmt"
        includes = ["*.nix"]
        "#;
        let root = from_string(toml).unwrap();
        assert_eq!(root.formatter["nix"].priority, 0);
    }
}
