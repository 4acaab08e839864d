//! Path expansion and safety rules.
//!
//! User-supplied paths are cleaned lexically, glob patterns are expanded
//! (including `{a,b}` alternatives, which the `glob` crate does not handle),
//! duplicates are dropped in input order, and well-known system locations are
//! refused.

use std::collections::HashSet;
use std::env;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, ToolError};

/// Longest path accepted in a manifest entry.
pub const MAX_MANIFEST_PATH: usize = 4096;

#[cfg(unix)]
const SYSTEM_PATHS: &[&str] = &["/proc", "/sys", "/dev", "/run", "/boot", "/lost+found"];

#[cfg(windows)]
const SYSTEM_PATHS: &[&str] = &[
    "C:\\Windows",
    "C:\\$Recycle.Bin",
    "C:\\System Volume Information",
    "C:\\Recovery",
    "C:\\pagefile.sys",
    "C:\\hiberfil.sys",
];

#[cfg(not(any(unix, windows)))]
const SYSTEM_PATHS: &[&str] = &[];

/// Lexically resolve `.` and `..` and collapse repeated separators.
///
/// `..` at the start of a relative path is kept; `..` above the root is
/// dropped. An empty result becomes `.`.
pub fn clean(path: &Path) -> PathBuf {
    let mut prefix: Option<PathBuf> = None;
    let mut has_root = false;
    let mut parts: Vec<std::ffi::OsString> = Vec::new();

    for comp in path.components() {
        match comp {
            Component::Prefix(p) => prefix = Some(PathBuf::from(p.as_os_str())),
            Component::RootDir => has_root = true,
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_real = parts.last().map(|p| p != "..").unwrap_or(false);
                if last_is_real {
                    parts.pop();
                } else if !has_root {
                    parts.push("..".into());
                }
            }
            Component::Normal(n) => parts.push(n.to_os_string()),
        }
    }

    let mut out = prefix.unwrap_or_default();
    if has_root {
        out.push(Component::RootDir.as_os_str());
    }
    for p in parts {
        out.push(p);
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// Clean a `/`-or-`\` separated string the same way, keeping `/` as the
/// output separator. Used for manifest paths, which may come from any OS.
pub fn clean_str(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().map(|p| *p != "..").unwrap_or(false) {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Absolute, cleaned form of `path` (no symlink resolution).
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        clean(path)
    } else {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        clean(&cwd.join(path))
    }
}

/// Does `pattern` contain any glob metacharacter?
pub fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', ']', '{', '}'])
}

/// Expand the first `{a,b,...}` group recursively. Unbalanced braces are
/// returned untouched.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let mut depth = 0usize;
    let mut close = None;
    for (i, ch) in pattern[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let head = &pattern[..open];
    let body = &pattern[open + 1..close];
    let tail = &pattern[close + 1..];

    // split body on top-level commas only
    let mut alts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in body.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                alts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    alts.push(&body[start..]);

    alts.into_iter()
        .flat_map(|alt| expand_braces(&format!("{}{}{}", head, alt, tail)))
        .collect()
}

/// Expand user inputs into concrete paths.
///
/// Literal paths are cleaned and kept even if they do not exist (the caller
/// reports that). Patterns that match nothing produce a warning.
pub fn expand(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for raw in inputs {
        if !has_glob_meta(raw) {
            let p = clean(Path::new(raw));
            if seen.insert(p.clone()) {
                out.push(p);
            }
            continue;
        }

        let mut matched = 0usize;
        for pattern in expand_braces(raw) {
            let paths = glob::glob(&pattern)
                .map_err(|e| ToolError::invalid(format!("invalid pattern '{}': {}", pattern, e)))?;
            for entry in paths {
                match entry {
                    Ok(p) => {
                        matched += 1;
                        let p = clean(&p);
                        if seen.insert(p.clone()) {
                            out.push(p);
                        }
                    }
                    Err(e) => debug!("glob: skipping unreadable path: {}", e),
                }
            }
        }
        if matched == 0 {
            warn!("pattern '{}' matched no files", raw);
        }
    }
    Ok(out)
}

/// True for well-known OS locations that are never walked.
pub fn is_system_path(path: &Path) -> bool {
    let abs = absolute(path);
    SYSTEM_PATHS.iter().any(|sys| {
        let sys = Path::new(sys);
        #[cfg(windows)]
        {
            let a = abs.to_string_lossy().to_ascii_lowercase();
            let s = sys.to_string_lossy().to_ascii_lowercase();
            a == s || a.starts_with(&format!("{}\\", s))
        }
        #[cfg(not(windows))]
        {
            abs.starts_with(sys)
        }
    })
}

/// Refuse an input that explicitly names a system location.
pub fn reject_system_path(path: &Path) -> Result<()> {
    if is_system_path(path) {
        Err(ToolError::invalid(format!("refusing to operate on system path '{}'", path.display())))
    } else {
        Ok(())
    }
}

/// Validate a manifest entry path. Returns the cleaned path.
pub fn validate_manifest_path(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(ToolError::invalid("empty path"));
    }
    if raw.len() > MAX_MANIFEST_PATH {
        return Err(ToolError::invalid(format!("path longer than {} bytes", MAX_MANIFEST_PATH)));
    }
    let cleaned = clean_str(raw);
    if cleaned.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(ToolError::invalid(format!("path escapes its root: '{}'", raw)));
    }
    Ok(cleaned)
}

/// Path relative to `base`, with `/` separators. `None` if not under `base`.
pub fn relative_slash(path: &Path, base: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    Some(parts.join("/"))
}

/// Whether `child` is `parent` itself or lies below it (component-wise).
pub fn is_within(child: &Path, parent: &Path) -> bool {
    absolute(child).starts_with(absolute(parent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn clean_resolves_dots() {
        assert_eq!(clean(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean(Path::new("./")), PathBuf::from("."));
        assert_eq!(clean(Path::new("../x")), PathBuf::from("../x"));
        #[cfg(unix)]
        assert_eq!(clean(Path::new("/../etc//passwd")), PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn clean_str_handles_both_separators() {
        assert_eq!(clean_str("a\\b/./c"), "a/b/c");
        assert_eq!(clean_str("a/../../b"), "../b");
        assert_eq!(clean_str("/x/../y"), "/y");
        assert_eq!(clean_str(""), ".");
    }

    #[test]
    fn braces_expand_in_order() {
        assert_eq!(expand_braces("*.{rs,toml}"), vec!["*.rs", "*.toml"]);
        assert_eq!(expand_braces("a{b,c{d,e}}f"), vec!["abf", "acdf", "acef"]);
        assert_eq!(expand_braces("a{b"), vec!["a{b"]);
    }

    #[test]
    fn expand_dedups_and_globs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), b"").unwrap();
        fs::write(dir.path().join("b.toml"), b"").unwrap();
        fs::write(dir.path().join("c.txt"), b"").unwrap();
        let base = dir.path().to_string_lossy().to_string();
        let inputs = vec![
            format!("{}/*.{{rs,toml}}", base),
            format!("{}/a.rs", base),
            format!("{}/*.none", base),
        ];
        let out = expand(&inputs).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].ends_with("a.rs"));
        assert!(out[1].ends_with("b.toml"));
    }

    #[test]
    fn manifest_paths_reject_escapes() {
        assert!(validate_manifest_path("a/../../etc/passwd").is_err());
        assert!(validate_manifest_path("..\\x").is_err());
        assert_eq!(validate_manifest_path("./a/b.txt").unwrap(), "a/b.txt");
        assert!(validate_manifest_path(&"a".repeat(MAX_MANIFEST_PATH + 1)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn system_paths_are_flagged() {
        assert!(is_system_path(Path::new("/proc/self")));
        assert!(is_system_path(Path::new("/sys")));
        assert!(!is_system_path(Path::new("/home")));
        assert!(reject_system_path(Path::new("/proc")).is_err());
    }

    #[test]
    fn within_checks_components() {
        assert!(is_within(Path::new("src/child"), Path::new("src")));
        assert!(is_within(Path::new("src"), Path::new("src")));
        assert!(!is_within(Path::new("srcx"), Path::new("src")));
    }
}
