use fmtmux::{cli, scheduler};

/// Generic failure: configuration error, walk/cache/formatter-load error.
const EXIT_ERROR: i32 = 1;
/// `--fail-on-change` (or `--ci`) observed at least one changed file.
const EXIT_CHANGED: i32 = 2;
/// `on-unmatched = fatal` fired.
const EXIT_UNMATCHED_FATAL: i32 = 3;

fn main() {
    match run() {
        Ok(true) => std::process::exit(EXIT_CHANGED),
        Ok(false) => {}
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = if err.downcast_ref::<scheduler::UnmatchedFatal>().is_some() {
                EXIT_UNMATCHED_FATAL
            } else {
                EXIT_ERROR
            };
            std::process::exit(code);
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let args = cli::parse()?;
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();
    cli::run(&args)
}
