//! Concurrent hashing.
//!
//! A producer feeds [`HashInput`]s into a bounded channel; each worker hashes
//! one file at a time and writes its line through a single mutex-guarded
//! writer, so lines never interleave but their order is not defined.
//!
//! ```text
//! producer ──bounded──▶ worker 0..N ──mutex──▶ Writer (stdout | manifest)
//! ```
//!
//! The first non-warning failure (or a captured panic) cancels the shared
//! token; the producer stops dispatching and idle workers exit.

use std::fs;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, warn};

use super::{checksum, HashAlgo};
use crate::cancel::CancelToken;
use crate::error::{ErrorList, ToolError};
use crate::manifest;

/// Upper bound on hashing workers.
pub const MAX_HASH_WORKERS: usize = 20;

/// One file to hash: where to read it and how to name it in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashInput {
    pub path: PathBuf,
    pub display: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HashSummary {
    /// Lines written.
    pub hashed: usize,
    /// Symlinks skipped.
    pub skipped: usize,
    pub bytes: u64,
}

pub struct HashPool {
    algo: HashAlgo,
    jobs: usize,
    cancel: CancelToken,
}

impl HashPool {
    /// `jobs == 0` selects twice the CPU count; the result is clamped to
    /// `[1, MAX_HASH_WORKERS]`.
    pub fn new(algo: HashAlgo, jobs: usize, cancel: CancelToken) -> Self {
        let jobs = if jobs == 0 { 2 * num_cpus::get() } else { jobs };
        Self { algo, jobs: jobs.clamp(1, MAX_HASH_WORKERS), cancel }
    }

    /// Workers actually spawned for `files` inputs.
    pub fn worker_count(&self, files: usize) -> usize {
        files.min(self.jobs).max(1)
    }

    /// Hash every input and write `<digest>\t"<path>"` lines to `out`.
    ///
    /// Returns the de-duplicated list of failures if any input failed or the
    /// operation was cancelled.
    pub fn run<W>(&self, inputs: Vec<HashInput>, out: &mut W) -> Result<HashSummary, ErrorList>
    where
        W: Write + Send + ?Sized,
    {
        self.run_with(inputs, out, |job| self.hash_one(job))
    }

    /// [`run`](Self::run) with the per-file step supplied by the caller.
    pub(crate) fn run_with<W, F>(&self, inputs: Vec<HashInput>, out: &mut W, hash_one: F) -> Result<HashSummary, ErrorList>
    where
        W: Write + Send + ?Sized,
        F: Fn(&HashInput) -> Result<Option<(String, u64)>, ToolError> + Sync,
    {
        let workers = self.worker_count(inputs.len());
        debug!("hashing {} files with {} workers ({})", inputs.len(), workers, self.algo);

        let (job_tx, job_rx) = bounded::<HashInput>(workers * 4);
        let writer = Mutex::new(out);
        let errors = Mutex::new(ErrorList::new());
        let hashed = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);

        thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let (writer, errors, hashed, skipped, bytes, hash_one) =
                    (&writer, &errors, &hashed, &skipped, &bytes, &hash_one);
                s.spawn(move || {
                    for job in job_rx {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| hash_one(&job)));
                        let result = match outcome {
                            Ok(r) => r,
                            Err(payload) => Err(ToolError::from_panic(payload, &job.path)),
                        };
                        match result {
                            Ok(None) => {
                                skipped.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(Some((digest, len))) => {
                                let line = manifest::format_line(&digest, &job.display);
                                let mut w = writer.lock().unwrap_or_else(PoisonError::into_inner);
                                if let Err(e) = w.write_all(line.as_bytes()) {
                                    drop(w);
                                    self.fail(ToolError::from_io(e, "<output>"), errors);
                                    continue;
                                }
                                hashed.fetch_add(1, Ordering::Relaxed);
                                bytes.fetch_add(len, Ordering::Relaxed);
                            }
                            Err(e) => self.fail(e, errors),
                        }
                    }
                });
            }
            drop(job_rx);

            for job in inputs {
                if self.cancel.is_cancelled() {
                    break;
                }
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        let mut errors = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.into_inner().unwrap_or_else(PoisonError::into_inner).flush() {
            errors.push(ToolError::from_io(e, "<output>"));
        }
        if errors.is_empty() && self.cancel.is_cancelled() {
            errors.push(ToolError::Cancelled(self.cancel.cause().unwrap_or_else(|| "hashing cancelled".into())));
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(HashSummary {
            hashed: hashed.into_inner(),
            skipped: skipped.into_inner(),
            bytes: bytes.into_inner(),
        })
    }

    /// `Ok(None)` for symlinks, which are skipped silently.
    fn hash_one(&self, job: &HashInput) -> Result<Option<(String, u64)>, ToolError> {
        let md = fs::symlink_metadata(&job.path).map_err(|e| ToolError::from_io(e, &job.path))?;
        if md.file_type().is_symlink() {
            return Ok(None);
        }
        let digest = checksum(&job.path, self.algo)?;
        Ok(Some((digest, md.len())))
    }

    fn fail(&self, err: ToolError, errors: &Mutex<ErrorList>) {
        if err.is_warning() {
            warn!("{}", err);
        } else {
            self.cancel.cancel(err.to_string());
        }
        errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
    }
}
