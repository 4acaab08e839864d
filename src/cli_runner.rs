//! Dispatcher shared by the binary and the integration tests: one
//! subcommand runs one subsystem, and the outcome becomes a process status.
//!
//! Results go to stdout; progress lines and diagnostics go to stderr.

use std::io::{self, BufWriter, Write};
use std::time::Duration;

use tracing::{debug, info};

use crate::archive::{self, ArchiveReport};
use crate::cancel::CancelToken;
use crate::cli::{self, Commands};
use crate::error::{ErrorList, ToolError};
use crate::find::Searcher;
use crate::hash;
use crate::humansize;
use crate::list;
use crate::progress::{self, ProgressStyle, ProgressTracker};
use crate::size;
use crate::verify::{self, CheckOptions};
use crate::watch;

/// `Ok(true)` success, `Ok(false)` a reported failure (e.g. a digest
/// mismatch), `Err` for errors the caller should print.
pub type RunResult = std::result::Result<bool, ErrorList>;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

fn tracker(enabled: bool, operation: &str, style: ProgressStyle) -> ProgressTracker {
    if enabled {
        ProgressTracker::with_callback(progress::terminal_callback(operation, style), PROGRESS_INTERVAL)
    } else {
        ProgressTracker::disabled()
    }
}

fn emit(text: &str) -> std::result::Result<(), ToolError> {
    let mut out = io::stdout().lock();
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn archive_summary(verb: &str, report: &ArchiveReport, target: &std::path::Path) -> String {
    let mut line = format!(
        "{} {} entries ({}) {} {}",
        verb,
        report.entries,
        humansize::format_size(report.bytes),
        if verb == "packed" { "into" } else { "to" },
        target.display()
    );
    if report.skipped > 0 {
        line.push_str(&format!(", {} filtered out", report.skipped));
    }
    line.push('\n');
    line
}

/// Run one subcommand to completion.
pub fn run(command: Commands, color: bool, cancel: &CancelToken) -> RunResult {
    match command {
        Commands::Hash(args) => {
            let opts = args.into_options();
            let mut out = BufWriter::new(io::stdout());
            let report = hash::hash_paths(&opts, &mut out, cancel);
            out.flush().map_err(ToolError::from)?;
            let report = report?;
            if let Some(path) = report.manifest {
                emit(&format!("wrote {} digests to {}\n", report.summary.hashed, path.display()))?;
            }
            debug!("hashed {} files, {} bytes", report.summary.hashed, report.summary.bytes);
            Ok(true)
        }

        Commands::Check(args) => {
            let quiet = args.quiet;
            let report = verify::verify_manifest(&args.into_options(), cancel)?;
            emit(&report.render(quiet, color))?;
            Ok(report.is_success())
        }

        Commands::Diff(args) => {
            if args.left.is_file() {
                debug!("{} is a manifest, checking it against {}", args.left.display(), args.right.display());
                let opts = CheckOptions { manifest: args.left, dir: Some(args.right), quiet: args.quiet };
                let report = verify::verify_manifest(&opts, cancel)?;
                emit(&report.render(opts.quiet, color))?;
                return Ok(report.is_success());
            }
            let jobs = cli::resolve_jobs(args.jobs);
            let report = verify::diff_trees(&args.left, &args.right, args.algo, args.hidden, jobs, cancel)?;
            emit(&report.render(color))?;
            Ok(report.is_success())
        }

        Commands::Find(args) => {
            let opts = args.into_options(color)?;
            let count_only = opts.count_only;
            let searcher = Searcher::new(opts, BufWriter::new(io::stdout()), cancel.clone())?;
            let (report, mut out) = searcher.run();
            out.flush().map_err(ToolError::from)?;
            if count_only {
                emit(&format!("found: {}\n", report.matched))?;
            }
            report.into_result()?;
            Ok(true)
        }

        Commands::List(args) => {
            let opts = args.into_options(color);
            let listing = list::scan(&opts, cancel);
            emit(&list::render_groups(&listing.groups, listing.show_headers, &opts))?;
            listing.errors.into_result()?;
            Ok(true)
        }

        Commands::Size(args) => {
            let progress_enabled = args.progress;
            let opts = args.into_options();
            let progress = tracker(progress_enabled, "size", ProgressStyle::Text);
            let report = size::size_paths(&opts, cancel, &progress);
            progress.finish();
            emit(&report.render(&opts))?;
            report.errors.into_result()?;
            Ok(true)
        }

        Commands::Pack(args) => {
            let opts = args.options()?;
            let progress = tracker(opts.progress, "pack", opts.progress_style);
            let report = archive::pack(&args.archive, &args.sources, &opts, cancel, &progress)?;
            info!("packed {} as {}", args.archive.display(), report.format.unwrap_or("?"));
            emit(&archive_summary("packed", &report, &args.archive))?;
            Ok(true)
        }

        Commands::Unpack(args) => {
            let opts = args.options()?;
            let progress = tracker(opts.progress, "unpack", opts.progress_style);
            let report = archive::unpack(&args.archive, &args.dest, &opts, cancel, &progress)?;
            emit(&archive_summary("unpacked", &report, &args.dest))?;
            Ok(true)
        }

        Commands::Preview(args) => {
            let entries = archive::preview(&args.archive)?;
            if args.json {
                let json = serde_json::to_string_pretty(&entries)
                    .map_err(|e| ToolError::Internal { path: args.archive.clone(), message: e.to_string() })?;
                emit(&format!("{}\n", json))?;
            } else {
                emit(&archive::render_preview(&entries, args.table_style))?;
            }
            Ok(true)
        }

        Commands::Watch(args) => {
            let opts = args.into_options()?;
            let report = watch::watch(&opts, &mut io::stdout(), cancel)?;
            debug!("watch finished after {} runs ({} failed, {} timed out)", report.runs, report.failures, report.timeouts);
            Ok(true)
        }
    }
}
