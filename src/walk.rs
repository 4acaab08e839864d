//! # Directory Walker
//!
//! Depth-limited traversal on top of `walkdir` with a hidden-entry gate,
//! a system-path blocklist and bounded symlink-loop detection.
//!
//! Depth is counted from the input root: the root is depth 0, its children
//! depth 1, and so on. A visitor may answer [`WalkControl::SkipDir`] for a
//! directory, after which none of its children are visited.
//!
//! Error policy: permission-denied entries are logged and skipped, vanished
//! entries are ignored (concurrent deletes), anything else stops the walk.

use std::collections::HashSet;
use std::fs::{self, FileType};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::{Result, ToolError};
use crate::pathx;
use crate::platform;

/// Default bound on the number of links followed when checking for a loop.
pub const MAX_LINK_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Deepest level visited; `-1` means unbounded.
    pub max_depth: isize,
    /// Visit hidden entries (and descend into hidden directories).
    pub hidden: bool,
    /// Descend through symlinks that point at directories.
    pub follow_links: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self { max_depth: -1, hidden: false, follow_links: false }
    }
}

/// Visitor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Do not descend into this directory. Ignored for non-directories.
    SkipDir,
}

/// An entry as seen by the walker.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path as reached from the root (through followed links, if any).
    pub path: PathBuf,
    pub depth: usize,
    /// Type of the entry itself, not of a link target.
    pub file_type: FileType,
    /// Set for symlinks whose chain loops back on itself.
    pub link_loop: bool,
}

impl WalkEntry {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn metadata(&self) -> io::Result<fs::Metadata> {
        fs::symlink_metadata(&self.path)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }
}

pub struct Walker {
    root: PathBuf,
    opts: WalkOptions,
}

impl Walker {
    pub fn new(root: impl AsRef<Path>, opts: WalkOptions) -> Self {
        Self { root: root.as_ref().to_path_buf(), opts }
    }

    /// Walk the tree, calling `visit` once per entry (root included).
    pub fn walk<F>(&self, cancel: &CancelToken, mut visit: F) -> Result<()>
    where
        F: FnMut(&WalkEntry) -> Result<WalkControl>,
    {
        let mut followed = HashSet::new();
        if let Ok(canon) = fs::canonicalize(&self.root) {
            followed.insert(canon);
        }
        self.walk_from(&self.root, &self.root, 0, cancel, &mut followed, &mut visit)
    }

    fn walk_from<F>(
        &self,
        real_root: &Path,
        logical_root: &Path,
        base_depth: usize,
        cancel: &CancelToken,
        followed: &mut HashSet<PathBuf>,
        visit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&WalkEntry) -> Result<WalkControl>,
    {
        let mut walker = WalkDir::new(real_root).follow_links(false);
        if self.opts.max_depth >= 0 {
            let remaining = (self.opts.max_depth as usize).saturating_sub(base_depth);
            walker = walker.max_depth(remaining);
        }
        // a followed link was already reported by the parent walk
        let min_depth = usize::from(base_depth > 0);
        let mut it = walker.min_depth(min_depth).into_iter();

        while let Some(next) = it.next() {
            cancel.check()?;

            let entry = match next {
                Ok(e) => e,
                Err(err) => {
                    self.handle_error(err)?;
                    continue;
                }
            };

            let depth = base_depth + entry.depth();
            let rel = entry.path().strip_prefix(real_root).unwrap_or_else(|_| Path::new(""));
            let path = if rel.as_os_str().is_empty() { logical_root.to_path_buf() } else { logical_root.join(rel) };
            let file_type = entry.file_type();

            if depth > 0 && !self.opts.hidden && platform::is_hidden(&path) {
                if file_type.is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }

            if depth > 0 && file_type.is_dir() && pathx::is_system_path(&path) {
                debug!("not descending into system path {}", path.display());
                it.skip_current_dir();
                continue;
            }

            let link_loop = file_type.is_symlink() && is_symlink_loop(entry.path(), MAX_LINK_DEPTH);
            if link_loop {
                debug!("symlink loop at {}", path.display());
            }

            let walk_entry = WalkEntry { path: path.clone(), depth, file_type, link_loop };
            let control = visit(&walk_entry)?;

            if file_type.is_dir() {
                if control == WalkControl::SkipDir {
                    it.skip_current_dir();
                }
                continue;
            }

            if file_type.is_symlink() && !link_loop && self.opts.follow_links && control == WalkControl::Continue {
                let within_depth = self.opts.max_depth < 0 || (depth as isize) < self.opts.max_depth;
                if within_depth {
                    self.follow(entry.path(), &path, depth, cancel, followed, visit)?;
                }
            }
        }
        Ok(())
    }

    fn follow<F>(
        &self,
        link: &Path,
        logical: &Path,
        depth: usize,
        cancel: &CancelToken,
        followed: &mut HashSet<PathBuf>,
        visit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&WalkEntry) -> Result<WalkControl>,
    {
        let target = match fs::canonicalize(link) {
            Ok(t) => t,
            Err(_) => return Ok(()), // dangling
        };
        if !target.is_dir() {
            return Ok(());
        }
        // a link back to a directory already on the walk would recurse forever
        if !followed.insert(target.clone()) {
            debug!("already visited {}, not following {}", target.display(), link.display());
            return Ok(());
        }
        self.walk_from(&target, logical, depth, cancel, followed, visit)
    }

    fn handle_error(&self, err: walkdir::Error) -> Result<()> {
        if err.loop_ancestor().is_some() {
            return Ok(());
        }
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        match err.io_error().map(io::Error::kind) {
            Some(io::ErrorKind::NotFound) => Ok(()),
            Some(io::ErrorKind::PermissionDenied) => {
                warn!("permission denied: {}", path.display());
                Ok(())
            }
            _ => Err(ToolError::from(err)),
        }
    }
}

/// Follow the link chain starting at `path` for at most `max_depth` hops.
///
/// Returns true only when a path is revisited. Running out of hops, a broken
/// link or a non-link target all count as "no loop".
pub fn is_symlink_loop(path: &Path, max_depth: usize) -> bool {
    let mut visited = HashSet::new();
    let mut current = pathx::absolute(path);

    for _ in 0..max_depth {
        if !visited.insert(current.clone()) {
            return true;
        }
        let md = match fs::symlink_metadata(&current) {
            Ok(md) => md,
            Err(_) => return false,
        };
        if !md.file_type().is_symlink() {
            return false;
        }
        let target = match fs::read_link(&current) {
            Ok(t) => t,
            Err(_) => return false,
        };
        let next = if target.is_absolute() {
            target
        } else {
            current.parent().map(|p| p.join(&target)).unwrap_or(target)
        };
        current = pathx::clean(&next);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("top.txt"), b"1").unwrap();
        fs::write(dir.path().join("a/one.txt"), b"1").unwrap();
        fs::write(dir.path().join("a/b/two.txt"), b"2").unwrap();
        fs::write(dir.path().join("a/b/c/three.txt"), b"3").unwrap();
        fs::write(dir.path().join(".hidden/secret.txt"), b"s").unwrap();
        dir
    }

    fn collect(root: &Path, opts: WalkOptions) -> Vec<(String, usize)> {
        let mut seen = Vec::new();
        Walker::new(root, opts)
            .walk(&CancelToken::new(), |e| {
                let rel = pathx::relative_slash(&e.path, root).unwrap_or_default();
                seen.push((rel, e.depth));
                Ok(WalkControl::Continue)
            })
            .unwrap();
        seen.sort();
        seen
    }

    #[test]
    fn respects_max_depth() {
        let dir = tree();
        let seen = collect(dir.path(), WalkOptions { max_depth: 1, ..Default::default() });
        assert!(seen.iter().all(|(_, d)| *d <= 1));
        assert!(seen.iter().any(|(p, _)| p == "top.txt"));
        assert!(!seen.iter().any(|(p, _)| p == "a/one.txt"));
    }

    #[test]
    fn unbounded_walk_visits_everything_once() {
        let dir = tree();
        let seen = collect(dir.path(), WalkOptions::default());
        let names: Vec<_> = seen.iter().map(|(p, _)| p.as_str()).collect();
        assert!(names.contains(&"a/b/c/three.txt"));
        let mut dedup = names.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
        // hidden gate closed
        assert!(!names.iter().any(|n| n.contains("secret")));
    }

    #[test]
    fn hidden_gate_opens() {
        let dir = tree();
        let seen = collect(dir.path(), WalkOptions { hidden: true, ..Default::default() });
        assert!(seen.iter().any(|(p, _)| p == ".hidden/secret.txt"));
    }

    #[test]
    fn skip_dir_prunes_children() {
        let dir = tree();
        let mut seen = Vec::new();
        Walker::new(dir.path(), WalkOptions::default())
            .walk(&CancelToken::new(), |e| {
                seen.push(e.path.clone());
                if e.path.ends_with("a/b") {
                    return Ok(WalkControl::SkipDir);
                }
                Ok(WalkControl::Continue)
            })
            .unwrap();
        assert!(seen.iter().any(|p| p.ends_with("a/b")));
        assert!(!seen.iter().any(|p| p.starts_with(dir.path().join("a/b/c"))));
        assert!(!seen.iter().any(|p| p.ends_with("two.txt")));
    }

    #[test]
    fn cancelled_walk_stops() {
        let dir = tree();
        let token = CancelToken::new();
        token.cancel("test");
        let err = Walker::new(dir.path(), WalkOptions::default())
            .walk(&token, |_| Ok(WalkControl::Continue))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
    }

    #[cfg(unix)]
    #[test]
    fn detects_self_loop() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("loop");
        std::os::unix::fs::symlink("loop", &link).unwrap();
        assert!(is_symlink_loop(&link, MAX_LINK_DEPTH));

        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::os::unix::fs::symlink("b", &a).unwrap();
        std::os::unix::fs::symlink("a", &b).unwrap();
        assert!(is_symlink_loop(&a, MAX_LINK_DEPTH));
    }

    #[cfg(unix)]
    #[test]
    fn chains_without_cycles_are_not_loops() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file"), b"x").unwrap();
        std::os::unix::fs::symlink("file", dir.path().join("l1")).unwrap();
        std::os::unix::fs::symlink("l1", dir.path().join("l2")).unwrap();
        std::os::unix::fs::symlink("missing", dir.path().join("dangling")).unwrap();
        assert!(!is_symlink_loop(&dir.path().join("l2"), MAX_LINK_DEPTH));
        assert!(!is_symlink_loop(&dir.path().join("dangling"), MAX_LINK_DEPTH));
        // depth exhaustion is not a loop
        assert!(!is_symlink_loop(&dir.path().join("l2"), 1));
    }

    #[cfg(unix)]
    #[test]
    fn followed_links_do_not_recurse_forever() {
        let dir = tree();
        std::os::unix::fs::symlink("..", dir.path().join("a/up")).unwrap();
        std::os::unix::fs::symlink("loop", dir.path().join("loop")).unwrap();
        let seen = collect(dir.path(), WalkOptions { follow_links: true, ..Default::default() });
        let loops = seen.iter().filter(|(p, _)| p == "loop").count();
        assert_eq!(loops, 1);
        assert!(seen.len() < 100);
    }
}
