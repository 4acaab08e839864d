//! # Find Engine
//!
//! Walks one or more roots and runs every entry through the [`Matcher`] and,
//! on a match, the [`ActionDispatcher`].
//!
//! Two strategies share the same per-entry pipeline:
//!
//! - **serial**: the walker thread matches and acts inline.
//! - **concurrent**: the walker feeds paths into a bounded channel
//!   (`workers × 100`); workers re-stat each path and act on it. When the
//!   channel is full the walker processes the entry itself instead of
//!   blocking.
//!
//! Per-entry failures are collected (deduplicated, at most
//! [`MAX_REPORTED_ERRORS`] distinct ones) and never stop the search;
//! cancellation does.

use std::fs::{self, Metadata};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{bounded, TrySendError};
use tracing::debug;

use crate::action::{Action, ActionDispatcher};
use crate::cancel::CancelToken;
use crate::classify;
use crate::error::{ErrorList, Result, ToolError};
use crate::matcher::{Candidate, FindCriteria, Matcher};
use crate::pathx;
use crate::walk::{WalkControl, WalkEntry, WalkOptions, Walker};

/// Distinct errors reported at the end of a search.
pub const MAX_REPORTED_ERRORS: usize = 5;

/// Paths buffered per worker.
const QUEUE_PER_WORKER: usize = 100;

/// An entry reaching the filter pipeline, either straight from the walker or
/// rebuilt from a fresh `stat` by a worker.
#[derive(Debug)]
pub enum EntryView {
    FromReaddir(WalkEntry),
    FromStat { path: PathBuf, metadata: Metadata },
}

impl EntryView {
    /// Re-stat `path` into a view.
    pub fn stat(path: PathBuf) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(&path)?;
        Ok(EntryView::FromStat { path, metadata })
    }

    pub fn path(&self) -> &Path {
        match self {
            EntryView::FromReaddir(e) => &e.path,
            EntryView::FromStat { path, .. } => path,
        }
    }

    pub fn name(&self) -> String {
        match self {
            EntryView::FromReaddir(e) => e.file_name(),
            EntryView::FromStat { path, .. } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        }
    }

    pub fn is_dir(&self) -> bool {
        match self {
            EntryView::FromReaddir(e) => e.is_dir(),
            EntryView::FromStat { metadata, .. } => metadata.is_dir(),
        }
    }

    pub fn metadata(&self) -> io::Result<Metadata> {
        match self {
            EntryView::FromReaddir(e) => e.metadata(),
            EntryView::FromStat { metadata, .. } => Ok(metadata.clone()),
        }
    }
}

/// Options for the `find` command.
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub roots: Vec<String>,
    pub criteria: FindCriteria,
    pub hidden: bool,
    pub max_depth: isize,
    pub follow_links: bool,
    pub action: Action,
    pub count_only: bool,
    pub full_path: bool,
    pub color: bool,
    /// `0` runs the serial searcher.
    pub workers: usize,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            criteria: FindCriteria::default(),
            hidden: false,
            max_depth: -1,
            follow_links: false,
            action: Action::Print,
            count_only: false,
            full_path: false,
            color: false,
            workers: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct FindReport {
    /// Entries that passed every filter and were acted upon.
    pub matched: u64,
    pub errors: ErrorList,
}

impl FindReport {
    pub fn into_result(self) -> std::result::Result<u64, ErrorList> {
        if self.errors.is_empty() {
            Ok(self.matched)
        } else {
            Err(self.errors)
        }
    }
}

/// Default concurrent worker count.
pub fn default_workers() -> usize {
    2 * num_cpus::get()
}

/// Search state shared by the walker and the workers.
pub struct Searcher<W: Write + Send> {
    opts: FindOptions,
    matcher: Matcher,
    dispatcher: ActionDispatcher<W>,
    errors: Mutex<ErrorList>,
    cancel: CancelToken,
}

impl<W: Write + Send> Searcher<W> {
    pub fn new(opts: FindOptions, out: W, cancel: CancelToken) -> Result<Self> {
        let matcher = Matcher::new(&opts.criteria)?;
        let dispatcher = ActionDispatcher::new(opts.action.clone(), out)
            .count_only(opts.count_only)
            .full_path(opts.full_path)
            .color(opts.color);
        Ok(Self { opts, matcher, dispatcher, errors: Mutex::new(ErrorList::with_cap(MAX_REPORTED_ERRORS)), cancel })
    }

    /// Search every root and return the report. Cancellation is reported as
    /// an error in the list.
    pub fn run(self) -> (FindReport, W) {
        let roots = if self.opts.roots.is_empty() { vec![".".to_string()] } else { self.opts.roots.clone() };
        match pathx::expand(&roots) {
            Ok(paths) => {
                for root in paths {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let result = pathx::reject_system_path(&root).and_then(|_| {
                        if self.opts.workers == 0 {
                            self.search_serial(&root)
                        } else {
                            self.search_concurrent(&root, self.opts.workers)
                        }
                    });
                    if let Err(e) = result {
                        self.record(e);
                    }
                }
            }
            Err(e) => self.record(e),
        }

        if let Err(e) = self.dispatcher.flush() {
            self.record(e);
        }
        let Searcher { matcher, dispatcher, errors, .. } = self;
        let report = FindReport {
            matched: matcher.matched(),
            errors: errors.into_inner().unwrap_or_else(PoisonError::into_inner),
        };
        (report, dispatcher.into_inner())
    }

    fn walk_options(&self) -> WalkOptions {
        WalkOptions { max_depth: self.opts.max_depth, hidden: self.opts.hidden, follow_links: self.opts.follow_links }
    }

    fn search_serial(&self, root: &Path) -> Result<()> {
        Walker::new(root, self.walk_options()).walk(&self.cancel, |entry| {
            if entry.depth == 0 && entry.is_dir() {
                return Ok(WalkControl::Continue);
            }
            Ok(self.process(EntryView::FromReaddir(entry.clone())))
        })
    }

    fn search_concurrent(&self, root: &Path, workers: usize) -> Result<()> {
        let (path_tx, path_rx) = bounded::<PathBuf>(workers * QUEUE_PER_WORKER);
        let (err_tx, err_rx) = bounded::<ToolError>(workers * QUEUE_PER_WORKER);
        debug!("concurrent find over {} with {} workers", root.display(), workers);

        let walked = thread::scope(|s| {
            for _ in 0..workers {
                let path_rx = path_rx.clone();
                let err_tx = err_tx.clone();
                s.spawn(move || {
                    for path in path_rx {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process_path(path.clone())));
                        let failure = match outcome {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(e),
                            Err(payload) => Some(ToolError::from_panic(payload, &path)),
                        };
                        if let Some(e) = failure {
                            // error channel full: the report is capped anyway
                            let _ = err_tx.try_send(e);
                        }
                    }
                });
            }
            drop(path_rx);
            drop(err_tx);

            let walked = Walker::new(root, self.walk_options()).walk(&self.cancel, |entry| {
                if entry.depth == 0 && entry.is_dir() {
                    return Ok(WalkControl::Continue);
                }
                if entry.is_dir() && self.matcher.is_excluded(&entry.file_name(), &entry.path.to_string_lossy()) {
                    return Ok(WalkControl::SkipDir);
                }
                // directories are matched inline so SkipDir can take effect
                if entry.is_dir() {
                    return Ok(self.process(EntryView::FromReaddir(entry.clone())));
                }
                match path_tx.try_send(entry.path.clone()) {
                    Ok(()) => Ok(WalkControl::Continue),
                    Err(TrySendError::Full(_)) => Ok(self.process(EntryView::FromReaddir(entry.clone()))),
                    Err(TrySendError::Disconnected(_)) => Err(ToolError::Cancelled("find workers exited".into())),
                }
            });
            drop(path_tx);
            walked
        });

        for e in err_rx.try_iter() {
            self.record(e);
        }
        walked
    }

    fn process_path(&self, path: PathBuf) -> Result<()> {
        let view = match fs::symlink_metadata(&path) {
            Ok(metadata) => EntryView::FromStat { path, metadata },
            // raced with a delete
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ToolError::from_io(e, &path)),
        };
        self.apply(&view).map(|_| ())
    }

    /// Serial pipeline step: failures go to the error list, the walk goes on.
    fn process(&self, view: EntryView) -> WalkControl {
        match self.apply(&view) {
            Ok(control) => control,
            Err(e) => {
                self.record(e);
                if view.is_dir() {
                    WalkControl::SkipDir
                } else {
                    WalkControl::Continue
                }
            }
        }
    }

    fn apply(&self, view: &EntryView) -> Result<WalkControl> {
        let name = view.name();
        let path = view.path();
        let is_dir = view.is_dir();

        if self.matcher.is_excluded(&name, &path.to_string_lossy()) {
            return Ok(if is_dir { WalkControl::SkipDir } else { WalkControl::Continue });
        }

        let metadata = match view.metadata() {
            Ok(md) => md,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WalkControl::Continue),
            Err(e) => return Err(ToolError::from_io(e, path)),
        };
        if !self.matcher.matches(&Candidate { name: &name, path, metadata: &metadata }) {
            return Ok(WalkControl::Continue);
        }

        let tag = classify::classify(path, &metadata);
        self.dispatcher.dispatch(path, tag)?;
        self.matcher.record_match();

        if is_dir && !self.opts.count_only && self.dispatcher.action().relocates() {
            return Ok(WalkControl::SkipDir);
        }
        Ok(WalkControl::Continue)
    }

    fn record(&self, err: ToolError) {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
    }
}

/// Run a search writing matches to `out`.
pub fn find<W: Write + Send>(opts: FindOptions, out: W, cancel: &CancelToken) -> Result<FindReport> {
    let searcher = Searcher::new(opts, out, cancel.clone())?;
    let (report, _) = searcher.run();
    Ok(report)
}
