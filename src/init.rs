//! `--init`: scaffold a starter `treefmt.toml`.

use anyhow::Context;
use console::style;
use std::fs;
use std::path::Path;

/// Write a starter config into `dir`, unless one already exists there.
pub fn init_cmd(dir: &Path) -> anyhow::Result<()> {
    let file_path = dir.join("treefmt.toml");
    if file_path.exists() {
        log::warn!("{} already exists, leaving it alone", file_path.display());
        return Ok(());
    }

    fs::write(
        &file_path,
        r#"[formatter.mylanguage]
# Formatter to run.
command = "command-to-run"
# Command-line arguments, passed before the file paths.
options = []
# Glob patterns of files to include.
includes = [ "*.<language-extension>" ]
# Glob patterns of files to exclude, in addition to [global] excludes.
excludes = []
# Lower runs earlier; formatters are invoked one at a time, in order of
# priority then name, against each batch of matching files.
priority = 0
"#,
    )
    .with_context(|| {
        format!(
            "{} `{}`",
            style("failed to write").bold().red(),
            style(file_path.display()).bold()
        )
    })?;

    log::info!("generated a starter config at {}", file_path.display());
    Ok(())
}
