//! `--stdin <path>`: format a buffer read from stdin as if it lived at
//! `path`, writing the result back to stdout. Used by editor integrations
//! that don't want to touch the file on disk directly.

use crate::config;
use crate::formatter;
use crate::scheduler;
use crate::util::expand_path;
use crate::walk::File as WalkFile;
use anyhow::anyhow;
use log::{info, warn};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Run the formatter sequence that would apply to `paths[0]` against stdin.
pub fn stdin_cmd(
    tree_root: &Option<PathBuf>,
    work_dir: &Path,
    config_file: &Path,
    paths: &[PathBuf],
    selected_formatters: &Option<Vec<String>>,
) -> anyhow::Result<()> {
    let root = config::from_path(config_file)?;

    let tree_root = match tree_root {
        Some(x) => x.clone(),
        None => scheduler::resolve_tree_root(&root, config_file)?,
    };

    if paths.is_empty() {
        return Err(anyhow!("--stdin requires the path of the target file as an argument"));
    } else if paths.len() > 1 {
        return Err(anyhow!("--stdin requires one path but was given {}", paths.len()));
    }
    let path = expand_path(&paths[0], work_dir);

    let selected_formatters = selected_formatters.clone().or_else(|| root.formatters.clone());
    let formatters = scheduler::load_formatters(&root, false, &selected_formatters)?;
    let formatter_refs: Vec<_> = formatters.values().collect();

    let rel_path = path.strip_prefix(&tree_root).unwrap_or(&path).to_path_buf();
    let probe = WalkFile {
        abs_path: path.clone(),
        rel_path,
        size: 0,
        mtime: 0,
    };

    let chosen = match formatter::select(&formatter_refs, &probe) {
        Some((chosen, _key)) => chosen,
        None => {
            warn!("no formatter matched {}", path.display());
            io::copy(&mut io::stdin().lock(), &mut io::stdout().lock())?;
            return Ok(());
        }
    };
    info!(
        "running {} formatter(s): {}",
        chosen.len(),
        chosen.iter().map(|f| f.name.to_string()).collect::<Vec<_>>().join(", ")
    );

    let parent = path.parent().ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    let suffix = path.file_name().ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    let mut tmpfile = tempfile::Builder::new().prefix("_tmp").suffix(suffix).tempfile_in(parent)?;

    let run = || -> anyhow::Result<()> {
        io::copy(&mut io::stdin().lock(), &mut tmpfile)?;
        tmpfile.flush()?;

        let tmp_path = tmpfile.path().to_path_buf();
        for formatter in &chosen {
            formatter.invoke(&[tmp_path.clone()])?;
        }

        let mut out = File::open(&tmp_path)?;
        io::copy(&mut out, &mut io::stdout().lock())?;
        Ok(())
    };

    let result = run();
    tmpfile.close()?;
    result
}
