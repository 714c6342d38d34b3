//! Command-line surface: flags, their `TREEFMT_`-prefixed env mirrors, and
//! the glue that turns a parsed invocation into a `scheduler::run` call.

use crate::config::{self, OnUnmatched, WalkMode};
use crate::scheduler;
use crate::util::expand_path;
use anyhow::anyhow;
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use log::warn;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

/// A formatter multiplexer: one command to run every language's formatter
/// over a project tree.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Create a new treefmt.toml in the working directory.
    #[arg(short, long, default_value_t = false)]
    pub init: bool,

    /// Format the content passed on stdin and write the result to stdout.
    #[arg(long, default_value_t = false, conflicts_with("init"))]
    pub stdin: bool,

    /// Ignore the cache entirely. Useful for CI.
    #[arg(long, env = "TREEFMT_NO_CACHE", conflicts_with("init"))]
    pub no_cache: bool,

    /// Reset the cache before running.
    #[arg(short, long, env = "TREEFMT_CLEAR_CACHE", default_value_t = false)]
    pub clear_cache: bool,

    /// Exit with an error if any file was changed. Useful for CI.
    #[arg(
        long,
        env = "TREEFMT_FAIL_ON_CHANGE",
        default_value_t = false,
        conflicts_with("stdin"),
        conflicts_with("init")
    )]
    pub fail_on_change: bool,

    /// Do not exit with error when a configured formatter's command is not
    /// found; drop it instead.
    #[arg(long, env = "TREEFMT_ALLOW_MISSING_FORMATTER", default_value_t = false)]
    pub allow_missing_formatter: bool,

    /// How to enumerate candidate files.
    #[arg(long, env = "TREEFMT_WALK", value_enum, default_value_t = WalkArg::Auto)]
    pub walk: WalkArg,

    /// Shortcut for the flags a CI pipeline typically wants:
    /// `--no-cache --fail-on-change`.
    #[arg(long, default_value_t = false)]
    pub ci: bool,

    /// Log verbosity is based off the number of `v` used.
    #[clap(flatten)]
    pub verbose: Verbosity,

    /// Run as if started in <working-directory> instead of the actual
    /// current working directory.
    #[arg(short = 'C', long = "working-directory", default_value = ".", value_parser = parse_path)]
    pub working_directory: PathBuf,

    /// Path to the project root. Defaults to the directory holding the
    /// config file, or the directory found via `tree-root-file`.
    #[arg(long, env = "TREEFMT_TREE_ROOT", value_parser = parse_path, conflicts_with = "tree_root_file")]
    pub tree_root: Option<PathBuf>,

    /// Ascend from the config file's directory until a file with this name
    /// is found; use its directory as the tree root.
    #[arg(long, env = "TREEFMT_TREE_ROOT_FILE")]
    pub tree_root_file: Option<String>,

    /// Run with the given config file, which need not live inside the tree
    /// being formatted.
    #[arg(long, env = "TREEFMT_CONFIG_FILE", value_parser = parse_path)]
    pub config_file: Option<PathBuf>,

    /// Paths to format. Defaults to the whole tree.
    #[arg()]
    pub paths: Vec<PathBuf>,

    /// Restrict to these formatter names. Defaults to every configured
    /// formatter. Unknown names are a fatal error.
    #[arg(short, long, env = "TREEFMT_FORMATTERS", value_delimiter = ',')]
    pub formatters: Option<Vec<String>>,

    /// How to handle a file that no formatter wants.
    #[arg(short = 'u', long, env = "TREEFMT_ON_UNMATCHED", value_enum)]
    pub on_unmatched: Option<OnUnmatchedArg>,

    /// Write a wall-clock phase breakdown of this run to the given path.
    #[arg(long, env = "TREEFMT_CPU_PROFILE", value_parser = parse_path)]
    pub cpu_profile: Option<PathBuf>,
}

/// Mirrors `config::OnUnmatched`, as a `clap::ValueEnum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OnUnmatchedArg {
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

impl From<OnUnmatchedArg> for OnUnmatched {
    fn from(arg: OnUnmatchedArg) -> Self {
        match arg {
            OnUnmatchedArg::Debug => OnUnmatched::Debug,
            OnUnmatchedArg::Info => OnUnmatched::Info,
            OnUnmatchedArg::Warn => OnUnmatched::Warn,
            OnUnmatchedArg::Error => OnUnmatched::Error,
            OnUnmatchedArg::Fatal => OnUnmatched::Fatal,
        }
    }
}

/// Mirrors `config::WalkMode`, as a `clap::ValueEnum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WalkArg {
    /// Pick `git` if the root is inside a repository, else `filesystem`.
    Auto,
    /// Enumerate files tracked in the enclosing repository's index.
    Git,
    /// Recursive directory walk.
    Filesystem,
}

impl From<WalkArg> for WalkMode {
    fn from(arg: WalkArg) -> Self {
        match arg {
            WalkArg::Auto => WalkMode::Auto,
            WalkArg::Git => WalkMode::Git,
            WalkArg::Filesystem => WalkMode::Filesystem,
        }
    }
}

fn current_dir() -> anyhow::Result<PathBuf> {
    env::var("PWD").map(PathBuf::from).or_else(|_| {
        warn!("PWD environment variable not set, if the current directory is a symlink it will be dereferenced");
        env::current_dir()
    }).map_err(anyhow::Error::new)
}

fn parse_path(s: &str) -> anyhow::Result<PathBuf> {
    let cwd = current_dir()?;
    assert!(cwd.is_absolute());
    Ok(expand_path(Path::new(s), &cwd))
}

/// Parse argv, then resolve the config file if the user didn't pass one
/// explicitly.
pub fn parse() -> anyhow::Result<Cli> {
    let mut cli = Cli::parse();
    match &cli.config_file {
        None => cli.config_file = config::lookup(&cli.working_directory),
        Some(_) if cli.tree_root.is_none() && cli.tree_root_file.is_none() => {
            return Err(anyhow!(
                "if --config-file is set, --tree-root or --tree-root-file must also be set"
            ))
        }
        Some(_) => {}
    }
    Ok(cli)
}

/// Execute the parsed CLI. Returns `Ok(true)` when the run should exit
/// non-zero because of `--fail-on-change`/`--ci`.
pub fn run(cli: &Cli) -> anyhow::Result<bool> {
    if cli.init {
        return crate::init::init_cmd(&cli.working_directory).map(|_| false);
    }

    let config_file = cli.config_file.clone().ok_or_else(|| {
        anyhow!(
            "{} could not be found in {} and up. Use --init to create one, or pass --config-file.",
            config::FILENAME,
            cli.working_directory.display(),
        )
    })?;

    let tree_root_override = match (&cli.tree_root, &cli.tree_root_file) {
        (Some(explicit), _) => Some(explicit.clone()),
        (None, Some(marker)) => {
            let config_dir = config_file
                .parent()
                .ok_or_else(|| anyhow!("{} has no parent directory", config_file.display()))?;
            Some(
                config::lookup_marker(config_dir, marker)
                    .ok_or_else(|| anyhow!("tree-root-file {} not found above {}", marker, config_dir.display()))?,
            )
        }
        (None, None) => None,
    };

    if cli.stdin {
        crate::stdin::stdin_cmd(&tree_root_override, &cli.working_directory, &config_file, &cli.paths, &cli.formatters)?;
        return Ok(false);
    }

    let root = config::from_path(&config_file)?;
    let tree_root = match &tree_root_override {
        Some(explicit) => explicit.clone(),
        None => scheduler::resolve_tree_root(&root, &config_file)?,
    };

    let proj_dirs = directories::ProjectDirs::from("com", "treefmt", "treefmt")
        .ok_or_else(|| anyhow!("could not determine the cache directory; is $HOME set?"))?;
    let cache_dir = proj_dirs.cache_dir().join("eval-cache");

    let no_cache = cli.no_cache || root.no_cache || cli.ci;
    let fail_on_change = cli.fail_on_change || root.fail_on_change || cli.ci;
    let allow_missing_formatter = cli.allow_missing_formatter || root.allow_missing_formatter;
    let on_unmatched = cli.on_unmatched.map(OnUnmatched::from);
    // `-f/--formatters` on the command line takes precedence over the
    // config file's own top-level `formatters` restriction.
    let selected_formatters = cli.formatters.clone().or_else(|| root.formatters.clone());

    let cancelled = std::sync::Arc::new(AtomicBool::new(false));
    crate::signal::install(std::sync::Arc::clone(&cancelled))?;

    let opts = scheduler::Options {
        tree_root,
        cache_dir,
        paths: cli.paths.clone(),
        selected_formatters,
        no_cache,
        clear_cache: cli.clear_cache,
        fail_on_change,
        allow_missing_formatter,
        on_unmatched,
        cancelled,
    };

    let started = Instant::now();
    let outcome = scheduler::run(root, opts)?;
    let elapsed = started.elapsed();

    if let Some(path) = &cli.cpu_profile {
        write_cpu_profile(path, elapsed, &outcome.stats)?;
    }

    println!("{}", outcome.stats.summary());
    Ok(fail_on_change && outcome.stats.any_changed())
}

/// Best-effort wall-clock phase dump; not a real sampling profiler, just
/// enough to tell a slow run apart from a slow formatter.
fn write_cpu_profile(path: &Path, elapsed: std::time::Duration, stats: &crate::stats::Stats) -> anyhow::Result<()> {
    let body = format!("total_wall_time_ms {}\n{}\n", elapsed.as_millis(), stats.summary());
    std::fs::write(path, body).map_err(anyhow::Error::new)
}

#[cfg(test)]
mod tests {
    #[test]
    fn current_dir_prefers_pwd_env_var() {
        use super::current_dir;
        use std::env;
        use std::path::PathBuf;

        let expected_pwd = "/tmp";
        let prev_pwd = env::var("PWD").ok();
        env::set_var("PWD", expected_pwd);

        let result = current_dir().unwrap();

        match prev_pwd {
            Some(p) => env::set_var("PWD", p),
            None => env::remove_var("PWD"),
        }

        assert_eq!(result, PathBuf::from(expected_pwd));
    }

    #[test]
    fn on_unmatched_arg_converts_to_config_enum() {
        use super::OnUnmatchedArg;
        use crate::config::OnUnmatched;

        assert_eq!(OnUnmatched::from(OnUnmatchedArg::Fatal), OnUnmatched::Fatal);
        assert_eq!(OnUnmatched::from(OnUnmatchedArg::Debug), OnUnmatched::Debug);
    }
}
