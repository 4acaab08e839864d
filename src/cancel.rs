//! Cooperative cancellation.
//!
//! Every operation owns a [`CancelToken`]. Workers poll it before starting a
//! new unit of work; in-flight I/O is never interrupted. The first caller to
//! cancel records the cause, later calls keep it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Result, ToolError};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    cause: Mutex<Option<String>>,
}

/// Shared cancellation flag with an attached cause.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Only the first cause is kept.
    pub fn cancel(&self, cause: impl Into<String>) {
        let mut slot = self.inner.cause.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(cause.into());
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    pub fn cause(&self) -> Option<String> {
        self.inner.cause.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ToolError::Cancelled(self.cause().unwrap_or_else(|| "operation cancelled".into())))
        } else {
            Ok(())
        }
    }
}

/// Routes SIGINT/SIGTERM (Ctrl-C / Ctrl-Break on Windows) to `token`.
///
/// The handler only flips the token; the top level decides the exit code
/// after workers have drained.
pub fn install_signal_handler(token: &CancelToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            eprintln!("\ninterrupted, stopping...");
        }
        token.cancel("interrupted by signal");
    })
    .map_err(|e| ToolError::invalid(format!("failed to install signal handler: {}", e)))
}
