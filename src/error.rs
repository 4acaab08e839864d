//! Error taxonomy shared by every subsystem.
//!
//! Worker pools collect per-item failures into an [`ErrorList`], which keeps
//! the first occurrence of each distinct message and optionally caps the
//! number of categories reported back to the user.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The primary error type for all operations in the `ftk` crate.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The path does not exist. Usually ignored during walks.
    #[error("no such file or directory: '{}'", path.display())]
    NotFound { path: PathBuf },

    /// Access was refused by the operating system.
    #[error("permission denied: '{}'", path.display())]
    PermissionDenied { path: PathBuf },

    /// Bad user input: malformed flag value, conflicting options, unsafe target.
    #[error("{0}")]
    InvalidInput(String),

    /// Any other I/O failure, with the path where it happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: io::Error, path: PathBuf },

    /// The operation was stopped by a signal or by a failing peer.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A manifest header or body line could not be parsed.
    #[error("line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// Archive format or compression setting not available.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A panic captured at a task boundary.
    #[error("internal error while processing '{}': {message}", path.display())]
    Internal { path: PathBuf, message: String },
}

/// Coarse classification of a [`ToolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidInput,
    Io,
    Cancelled,
    Format,
    Unsupported,
    Internal,
}

pub type Result<T> = std::result::Result<T, ToolError>;

impl ToolError {
    /// Attaches `path` to an I/O error, promoting not-found and permission
    /// failures to their dedicated variants.
    pub fn from_io(source: io::Error, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => ToolError::NotFound { path },
            io::ErrorKind::PermissionDenied => ToolError::PermissionDenied { path },
            _ => ToolError::Io { source, path },
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ToolError::InvalidInput(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound { .. } => ErrorKind::NotFound,
            ToolError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            ToolError::InvalidInput(_) => ErrorKind::InvalidInput,
            ToolError::Io { .. } => ErrorKind::Io,
            ToolError::Cancelled(_) => ErrorKind::Cancelled,
            ToolError::Format { .. } => ErrorKind::Format,
            ToolError::Unsupported(_) => ErrorKind::Unsupported,
            ToolError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Not-found and permission-denied are reported but never cancel a pool.
    pub fn is_warning(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied)
    }

    /// Builds an `Internal` error from a payload returned by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>, path: impl AsRef<Path>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked".to_string()
        };
        ToolError::Internal { path: path.as_ref().to_path_buf(), message }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for ToolError {
    fn from(err: io::Error) -> Self {
        ToolError::from_io(err, PathBuf::new())
    }
}

impl From<walkdir::Error> for ToolError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        match err.into_io_error() {
            Some(io_err) => ToolError::from_io(io_err, path),
            None => ToolError::InvalidInput(format!("filesystem loop detected at '{}'", path.display())),
        }
    }
}

impl From<zip::result::ZipError> for ToolError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ToolError::from(e),
            zip::result::ZipError::UnsupportedArchive(msg) => ToolError::Unsupported(msg.to_string()),
            other => ToolError::InvalidInput(format!("zip: {}", other)),
        }
    }
}

impl From<regex::Error> for ToolError {
    fn from(err: regex::Error) -> Self {
        ToolError::InvalidInput(format!("invalid regular expression: {}", err))
    }
}

impl From<globset::Error> for ToolError {
    fn from(err: globset::Error) -> Self {
        ToolError::InvalidInput(format!("invalid glob: {}", err))
    }
}

/// An ordered, de-duplicated collection of errors.
///
/// Two errors with the same display string are counted once. When a cap is
/// set, errors beyond the cap are counted in [`ErrorList::dropped`] only.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<ToolError>,
    seen: HashSet<String>,
    cap: Option<usize>,
    dropped: usize,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `cap` distinct errors.
    pub fn with_cap(cap: usize) -> Self {
        Self { cap: Some(cap), ..Self::default() }
    }

    /// Returns `true` if the error was recorded (new and under the cap).
    pub fn push(&mut self, err: ToolError) -> bool {
        let key = err.to_string();
        if self.seen.contains(&key) {
            return false;
        }
        if let Some(cap) = self.cap {
            if self.errors.len() >= cap {
                self.dropped += 1;
                return false;
            }
        }
        self.seen.insert(key);
        self.errors.push(err);
        true
    }

    pub fn extend(&mut self, other: ErrorList) {
        for e in other.errors {
            self.push(e);
        }
        self.dropped += other.dropped;
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Number of distinct errors rejected because the cap was reached.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolError> {
        self.errors.iter()
    }

    pub fn has_internal(&self) -> bool {
        self.errors.iter().any(|e| e.kind() == ErrorKind::Internal)
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> std::result::Result<(), ErrorList> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<ToolError> for ErrorList {
    fn from(err: ToolError) -> Self {
        let mut list = ErrorList::new();
        list.push(err);
        list
    }
}

impl IntoIterator for ErrorList {
    type Item = ToolError;
    type IntoIter = std::vec::IntoIter<ToolError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        if self.dropped > 0 {
            write!(f, "\n... and {} more error(s)", self.dropped)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let nf = ToolError::from_io(io::Error::from(io::ErrorKind::NotFound), "/x");
        assert_eq!(nf.kind(), ErrorKind::NotFound);
        assert!(nf.is_warning());

        let other = ToolError::from_io(io::Error::new(io::ErrorKind::Other, "boom"), "/x");
        assert_eq!(other.kind(), ErrorKind::Io);
        assert!(!other.is_warning());
    }

    #[test]
    fn error_list_dedups_by_message() {
        let mut list = ErrorList::new();
        assert!(list.push(ToolError::invalid("same")));
        assert!(!list.push(ToolError::invalid("same")));
        assert!(list.push(ToolError::invalid("other")));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn error_list_cap_counts_dropped() {
        let mut list = ErrorList::with_cap(2);
        for i in 0..5 {
            list.push(ToolError::invalid(format!("e{}", i)));
        }
        assert_eq!(list.len(), 2);
        assert_eq!(list.dropped(), 3);
        assert!(list.to_string().contains("3 more"));
    }

    #[test]
    fn panic_payload_becomes_internal() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("kaboom");
        let err = ToolError::from_panic(payload, "a.txt");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("kaboom"));
        assert!(err.to_string().contains("a.txt"));
    }
}
