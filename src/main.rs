//! Entry point for the `ftk` command-line toolkit.

use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;

use colored::Colorize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ftk::cancel::{self, CancelToken};
use ftk::cli::{self, ColorChoice};
use ftk::cli_runner;
use ftk::error::{ErrorKind, ErrorList};

/// Environment variable holding a full `tracing` filter directive.
const LOG_ENV: &str = "FTK_LOG";

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let trace = Backtrace::force_capture();
        eprintln!("{} {}\n{}", "internal error:".red().bold(), info, trace);
    }));
}

fn report(errors: &ErrorList) {
    for err in errors.iter() {
        let line = format!("error: {}", err);
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => eprintln!("{}", line.yellow()),
            _ => eprintln!("{}", line.red()),
        }
    }
    if errors.dropped() > 0 {
        eprintln!("... and {} more", errors.dropped());
    }
}

fn main() -> ExitCode {
    let args = cli::parse();
    init_logging(args.verbose);

    match args.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
        ColorChoice::Auto => {}
    }
    let color = colored::control::SHOULD_COLORIZE.should_colorize();
    install_panic_hook();

    let cancel = CancelToken::new();
    if let Err(e) = cancel::install_signal_handler(&cancel) {
        warn!("{}", e);
    }

    let command = args.command;
    match panic::catch_unwind(AssertUnwindSafe(|| cli_runner::run(command, color, &cancel))) {
        Ok(Ok(true)) => ExitCode::SUCCESS,
        Ok(Ok(false)) => ExitCode::FAILURE,
        Ok(Err(errors)) => {
            report(&errors);
            ExitCode::FAILURE
        }
        // the hook already printed the message and trace
        Err(_) => ExitCode::FAILURE,
    }
}
