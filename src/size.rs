//! # Size Accumulator
//!
//! `size` of a file is its `lstat` size. `size` of a directory is the sum
//! of every non-directory entry below it, computed by a walker feeding paths
//! to a pool of `lstat` workers that add into a mutex-protected total.
//!
//! Permission-denied and vanished entries are logged as warnings; any other
//! failure is collected (at most [`MAX_REPORTED_ERRORS`] distinct ones) and
//! returned alongside the partial total.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{ErrorList, ToolError};
use crate::humansize;
use crate::pathx;
use crate::platform;
use crate::progress::ProgressTracker;
use crate::walk::{WalkControl, WalkOptions, Walker};

/// Upper bound on sizing workers.
pub const MAX_SIZE_WORKERS: usize = 20;

/// Distinct errors kept per input.
pub const MAX_REPORTED_ERRORS: usize = 5;

/// `0` selects twice the CPU count; clamped to `[1, MAX_SIZE_WORKERS]`.
pub fn worker_count(jobs: usize) -> usize {
    let jobs = if jobs == 0 { 2 * num_cpus::get() } else { jobs };
    jobs.clamp(1, MAX_SIZE_WORKERS)
}

/// Options for the `size` command.
#[derive(Debug, Clone, Default)]
pub struct SizeOptions {
    pub paths: Vec<String>,
    pub hidden: bool,
    pub jobs: usize,
    /// Append a total line.
    pub total: bool,
    /// Largest first.
    pub sort: bool,
    /// Print plain byte counts.
    pub raw: bool,
}

/// Total for one input plus whatever went wrong computing it.
#[derive(Debug)]
pub struct SizeOutcome {
    pub bytes: u64,
    pub errors: ErrorList,
}

pub struct SizeAccumulator<'a> {
    jobs: usize,
    hidden: bool,
    cancel: &'a CancelToken,
    progress: &'a ProgressTracker,
}

impl<'a> SizeAccumulator<'a> {
    pub fn new(jobs: usize, hidden: bool, cancel: &'a CancelToken, progress: &'a ProgressTracker) -> Self {
        Self { jobs: worker_count(jobs), hidden, cancel, progress }
    }

    /// Size of `path`, a file or a directory.
    pub fn size_of(&self, path: &Path) -> SizeOutcome {
        let mut errors = ErrorList::with_cap(MAX_REPORTED_ERRORS);
        let md = match fs::symlink_metadata(path) {
            Ok(md) => md,
            Err(e) => {
                errors.push(ToolError::from_io(e, path));
                return SizeOutcome { bytes: 0, errors };
            }
        };
        if !md.is_dir() {
            self.progress.record_file(md.len());
            return SizeOutcome { bytes: md.len(), errors };
        }
        self.dir_size(path)
    }

    fn dir_size(&self, root: &Path) -> SizeOutcome {
        let (tx, rx) = bounded::<PathBuf>(self.jobs * 64);
        let total = Mutex::new(0u64);
        let errors = Mutex::new(ErrorList::with_cap(MAX_REPORTED_ERRORS));
        debug!("sizing {} with {} workers", root.display(), self.jobs);

        thread::scope(|s| {
            for _ in 0..self.jobs {
                let rx = rx.clone();
                let (total, errors) = (&total, &errors);
                s.spawn(move || {
                    for path in rx {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        if !self.hidden && platform::is_hidden(&path) {
                            continue;
                        }
                        match fs::symlink_metadata(&path) {
                            Ok(md) if md.is_dir() => {}
                            Ok(md) => {
                                *total.lock().unwrap_or_else(PoisonError::into_inner) += md.len();
                                self.progress.record_file(md.len());
                            }
                            Err(e) => self.note(ToolError::from_io(e, &path), errors),
                        }
                    }
                });
            }
            drop(rx);

            let opts = WalkOptions { max_depth: -1, hidden: self.hidden, follow_links: false };
            let walked = Walker::new(root, opts).walk(self.cancel, |entry| {
                if entry.depth > 0 && !entry.is_dir() && tx.send(entry.path.clone()).is_err() {
                    return Err(ToolError::Cancelled("size workers exited".into()));
                }
                Ok(WalkControl::Continue)
            });
            drop(tx);
            if let Err(e) = walked {
                self.note(e, &errors);
            }
        });

        SizeOutcome {
            bytes: total.into_inner().unwrap_or_else(PoisonError::into_inner),
            errors: errors.into_inner().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn note(&self, err: ToolError, errors: &Mutex<ErrorList>) {
        if err.is_warning() {
            warn!("{}", err);
            return;
        }
        errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
    }
}

/// One line of `size` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeLine {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Default)]
pub struct SizeReport {
    pub lines: Vec<SizeLine>,
    pub total: u64,
    pub errors: ErrorList,
}

impl SizeReport {
    /// Render as `<size>\t<path>` lines.
    pub fn render(&self, opts: &SizeOptions) -> String {
        let fmt = |n: u64| if opts.raw { n.to_string() } else { humansize::format_size(n) };
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&format!("{}\t{}\n", fmt(line.bytes), line.path.display()));
        }
        if opts.total {
            out.push_str(&format!("{}\ttotal\n", fmt(self.total)));
        }
        out
    }
}

/// Run the `size` command over every input.
pub fn size_paths(opts: &SizeOptions, cancel: &CancelToken, progress: &ProgressTracker) -> SizeReport {
    let raw = if opts.paths.is_empty() { vec![".".to_string()] } else { opts.paths.clone() };
    let mut report = SizeReport { errors: ErrorList::with_cap(MAX_REPORTED_ERRORS), ..SizeReport::default() };
    let paths = match pathx::expand(&raw) {
        Ok(p) => p,
        Err(e) => {
            report.errors.push(e);
            return report;
        }
    };

    let acc = SizeAccumulator::new(opts.jobs, opts.hidden, cancel, progress);
    for path in paths {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = pathx::reject_system_path(&path) {
            report.errors.push(e);
            continue;
        }
        let outcome = acc.size_of(&path);
        report.total += outcome.bytes;
        report.errors.extend(outcome.errors);
        report.lines.push(SizeLine { path, bytes: outcome.bytes });
    }
    if let Err(e) = cancel.check() {
        report.errors.push(e);
    }
    progress.finish();

    if opts.sort {
        report.lines.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.path.cmp(&b.path)));
    }
    report
}
