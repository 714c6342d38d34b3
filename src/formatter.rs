//! Utilities for the formatters themselves.

use crate::config::FmtConfig;
use crate::matcher::{glob_set, MatchResult, Matcher};
use crate::walk::File;
use anyhow::Result;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::{fmt, path::Path};
use thiserror::Error;
use which::which;

/// Errors loading one `[formatter.<name>]` entry.
///
/// `NotFound` is the only variant `--allow-missing-formatter` is allowed to
/// turn into a silent drop; the others are configuration mistakes and stay
/// fatal no matter what that flag says.
#[derive(Debug, Error)]
pub enum FormatterError {
    /// The configured `command` could not be resolved on `$PATH`.
    #[error("formatter #{name} command {command} not found: {source}")]
    NotFound {
        /// Name of the formatter entry.
        name: String,
        /// The unresolved command string from the config.
        command: String,
        /// Underlying `which` lookup failure.
        #[source]
        source: which::Error,
    },
    /// The formatter has no include patterns, so it can never want a file.
    #[error("formatter #{0} doesn't have any includes")]
    NoIncludes(String),
    /// One of the formatter's glob patterns failed to compile.
    #[error("formatter #{0} has an invalid include/exclude pattern: {1}")]
    InvalidGlob(String, globset::Error),
}

impl FormatterError {
    /// Whether `--allow-missing-formatter` may silently drop this error
    /// rather than aborting the run.
    pub fn is_droppable(&self) -> bool {
        matches!(self, FormatterError::NotFound { .. })
    }
}

/// Newtype for the formatter name, used as a map key and a batch-key
/// component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatterName(String);

impl FormatterName {
    /// Wrap a plain name.
    pub fn new(name: impl Into<String>) -> Self {
        FormatterName(name.into())
    }

    /// Borrow the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Display formatters as "#name"
impl fmt::Display for FormatterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The number of paths passed to a formatter invocation when no smaller
/// `batch_size` is configured.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// An instance of a formatter respecting the formatter record described by
/// the project config.
pub struct Formatter {
    /// Name of the formatter for display purposes.
    pub name: FormatterName,
    /// Resolved, absolute path to the formatter's command.
    pub command: PathBuf,
    /// Extra arguments passed before the file paths.
    pub options: Vec<String>,
    /// Lower runs earlier; ties break by name ascending.
    pub priority: i32,
    /// Maximum number of paths passed to one invocation.
    pub batch_size: usize,
    /// Raw include patterns, kept around for cache fingerprinting.
    pub includes: Vec<String>,
    /// Raw exclude patterns, kept around for cache fingerprinting.
    pub excludes: Vec<String>,
    matcher: Matcher,
}

impl Formatter {
    /// Load a formatter from a config fragment. `global_excludes` is unioned
    /// with the formatter's own excludes.
    pub fn from_config(name: &str, cfg: &FmtConfig, global_excludes: &[String]) -> Result<Self, FormatterError> {
        let command = which(&cfg.command).map_err(|source| FormatterError::NotFound {
            name: name.to_string(),
            command: cfg.command.clone(),
            source,
        })?;
        assert!(command.is_absolute());

        if cfg.includes.is_empty() {
            return Err(FormatterError::NoIncludes(name.to_string()));
        }

        let mut excludes = cfg.excludes.clone();
        excludes.extend(global_excludes.iter().cloned());

        let includes_set =
            glob_set(&cfg.includes).map_err(|err| FormatterError::InvalidGlob(name.to_string(), err))?;
        let excludes_set =
            glob_set(&excludes).map_err(|err| FormatterError::InvalidGlob(name.to_string(), err))?;
        let matcher = Matcher::Composite(vec![
            Matcher::GlobExclude(excludes_set),
            Matcher::GlobInclude(includes_set),
        ]);

        Ok(Formatter {
            name: FormatterName::new(name),
            command,
            options: cfg.options.clone(),
            priority: cfg.priority,
            batch_size: DEFAULT_BATCH_SIZE,
            includes: cfg.includes.clone(),
            excludes,
            matcher,
        })
    }

    /// Whether this formatter wants `file`.
    pub fn wants(&self, file: &File) -> bool {
        matches!(self.matcher.eval(file), MatchResult::Wanted)
    }

    /// Invoke the formatter on a batch of absolute file paths.
    // TODO: handle E2BIG for very large batches.
    pub fn invoke(&self, paths: &[PathBuf]) -> Result<Output> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.options);
        cmd.args(paths);
        Ok(cmd.output()?)
    }
}

/// Display formatters as "#name"
impl fmt::Display for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)
    }
}

/// Separator used to join sorted formatter names into a batch key. Chosen
/// to never appear in a formatter name (TOML table keys can't contain it).
pub const BATCH_KEY_SEPARATOR: &str = "\u{1f}";

/// The deterministic key identifying which formatters, and in which order,
/// a set of files share.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey(String);

impl BatchKey {
    /// Borrow the joined representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Select the formatters that want `file`, sorted by `(priority asc, name
/// asc)`, and derive their batch key. Returns `None` if none want it.
pub fn select<'a>(formatters: &[&'a Formatter], file: &File) -> Option<(Vec<&'a Formatter>, BatchKey)> {
    let mut wanting: Vec<&Formatter> = formatters.iter().copied().filter(|f| f.wants(file)).collect();
    if wanting.is_empty() {
        return None;
    }
    wanting.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    let key = wanting
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(BATCH_KEY_SEPARATOR);
    Some((wanting, BatchKey(key)))
}

/// Capacity of the buffer backing a batch key: the smallest `batch_size`
/// among its formatters.
pub fn batch_capacity(formatters: &[&Formatter]) -> usize {
    formatters
        .iter()
        .map(|f| f.batch_size)
        .min()
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(includes: &[&str], priority: i32) -> FmtConfig {
        FmtConfig {
            command: "true".into(),
            options: vec![],
            includes: includes.iter().map(|s| s.to_string()).collect(),
            excludes: vec![],
            priority,
        }
    }

    #[test]
    fn batch_key_orders_by_priority_then_name() {
        let c1 = cfg(&["*.rs"], 5);
        let f1 = Formatter::from_config("zeta", &c1, &[]).unwrap();
        let c2 = cfg(&["*.rs"], 1);
        let f2 = Formatter::from_config("alpha", &c2, &[]).unwrap();
        let c3 = cfg(&["*.rs"], 1);
        let f3 = Formatter::from_config("beta", &c3, &[]).unwrap();

        let file = File {
            abs_path: PathBuf::from("main.rs"),
            rel_path: PathBuf::from("main.rs"),
            size: 0,
            mtime: 0,
        };
        let (chosen, key) = select(&[&f1, &f2, &f3], &file).unwrap();
        let names: Vec<_> = chosen.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
        assert_eq!(key.as_str(), "alpha\u{1f}beta\u{1f}zeta");
    }

    #[test]
    fn select_returns_none_when_nothing_wants_it() {
        let c = cfg(&["*.nix"], 0);
        let f = Formatter::from_config("nix", &c, &[]).unwrap();
        let file = File {
            abs_path: PathBuf::from("main.rs"),
            rel_path: PathBuf::from("main.rs"),
            size: 0,
            mtime: 0,
        };
        assert!(select(&[&f], &file).is_none());
    }
}
