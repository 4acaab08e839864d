//! # Manifest Verification and Tree Diff
//!
//! `check` recomputes every digest listed in a manifest against the live
//! tree and reports mismatches, missing files and (informational) extra
//! files. `diff` either delegates to `check` when its first argument is a
//! manifest, or hashes two directories into LOCAL-keyed maps and compares
//! them structurally.
//!
//! Digests are recomputed on a rayon pool with one thread per CPU. Results
//! are collected and printed in key order.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use colored::Colorize;
use rayon::prelude::*;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{ErrorList, Result, ToolError};
use crate::hash::{self, HashAlgo, HashOptions, HashPool};
use crate::manifest::{Manifest, ManifestEntry, ManifestHeader, ManifestMode, VirtualHashMap, VIRTUAL_ROOT};
use crate::pathx;
use crate::platform;
use crate::walk::{WalkControl, WalkOptions, Walker};

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub manifest: PathBuf,
    /// Root to verify against. PORTABLE manifests default to the directory
    /// holding the manifest, LOCAL ones to `<basepath>/<root name>`.
    pub dir: Option<PathBuf>,
    pub quiet: bool,
}

/// Result of checking one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Mismatch { expected: String, actual: String },
    Missing,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CheckLine {
    /// Path as recorded in the manifest.
    pub path: String,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub lines: Vec<CheckLine>,
    /// Files under the verified directories that the manifest does not list.
    pub extra: Vec<String>,
    pub malformed: usize,
}

fn tail8(digest: &str) -> &str {
    &digest[digest.len().saturating_sub(8)..]
}

impl CheckReport {
    pub fn total(&self) -> usize {
        self.lines.len()
    }

    pub fn passed(&self) -> usize {
        self.lines.iter().filter(|l| l.outcome == Outcome::Passed).count()
    }

    /// Every entry passed and every body line parsed. A manifest that
    /// verifies nothing is a failure; extras are not.
    pub fn is_success(&self) -> bool {
        self.malformed == 0 && self.total() > 0 && self.passed() == self.total()
    }

    pub fn render(&self, quiet: bool, color: bool) -> String {
        let tag = |label: &str, ok: bool| -> String {
            let padded = format!("{:<8}", label);
            match (color, ok) {
                (false, _) => padded,
                (true, true) => padded.green().to_string(),
                (true, false) => padded.red().bold().to_string(),
            }
        };

        let mut out = String::new();
        for line in &self.lines {
            match &line.outcome {
                Outcome::Passed => {
                    if !quiet {
                        let _ = writeln!(out, "{}{}", tag("OK", true), line.path);
                    }
                }
                Outcome::Mismatch { expected, actual } => {
                    let _ = writeln!(
                        out,
                        "{}{}  (expected ...{}, got ...{})",
                        tag("FAILED", false),
                        line.path,
                        tail8(expected),
                        tail8(actual)
                    );
                }
                Outcome::Missing => {
                    let _ = writeln!(out, "{}{}", tag("MISSING", false), line.path);
                }
                Outcome::Failed(reason) => {
                    let _ = writeln!(out, "{}{}  ({})", tag("FAILED", false), line.path, reason);
                }
            }
        }
        if !quiet {
            for path in &self.extra {
                let label = if color { format!("{:<8}", "EXTRA").yellow().to_string() } else { format!("{:<8}", "EXTRA") };
                let _ = writeln!(out, "{}{}", label, path);
            }
        }
        if self.malformed > 0 {
            let _ = writeln!(out, "skipped {} malformed line(s)", self.malformed);
        }
        let _ = writeln!(out, "completed: {}/{} passed", self.passed(), self.total());
        out
    }
}

/// Where each manifest entry lives on disk.
struct Resolver {
    mode: ManifestMode,
    base: PathBuf,
}

impl Resolver {
    fn new(manifest: &Manifest, manifest_path: &Path, dir: Option<&Path>) -> Result<Self> {
        let base = match (manifest.mode(), dir) {
            (_, Some(dir)) => dir.to_path_buf(),
            (ManifestMode::Portable, None) => match manifest_path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            },
            (ManifestMode::Local, None) => {
                let base_path = manifest.header.base_path.as_deref().ok_or_else(|| {
                    ToolError::invalid("LOCAL manifest has no base path; pass --dir")
                })?;
                let root_name = manifest
                    .entries
                    .iter()
                    .next()
                    .and_then(|(_, e)| e.real_path.split(['/', '\\']).find(|s| !s.is_empty()).map(str::to_string))
                    .unwrap_or_default();
                Path::new(base_path).join(root_name)
            }
        };
        Ok(Self { mode: manifest.mode(), base })
    }

    fn resolve(&self, key: &str) -> PathBuf {
        match self.mode {
            ManifestMode::Portable => {
                let p = Path::new(key);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    self.base.join(p)
                }
            }
            ManifestMode::Local => {
                let rest = key.strip_prefix(VIRTUAL_ROOT).unwrap_or(key).trim_start_matches('/');
                if rest.is_empty() {
                    self.base.clone()
                } else {
                    self.base.join(rest)
                }
            }
        }
    }
}

fn check_one(path: &Path, entry: &ManifestEntry, algo: HashAlgo, cancel: &CancelToken) -> Outcome {
    if let Err(e) = cancel.check() {
        return Outcome::Failed(e.to_string());
    }
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Outcome::Missing,
        Err(e) => return Outcome::Failed(ToolError::from_io(e, path).to_string()),
        Ok(md) if !md.is_file() => return Outcome::Failed("not a regular file".into()),
        Ok(_) => {}
    }
    match hash::checksum(path, algo) {
        Ok(actual) if actual == entry.digest => Outcome::Passed,
        Ok(actual) => Outcome::Mismatch { expected: entry.digest.clone(), actual },
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

fn thread_pool() -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get().max(1))
        .build()
        .map_err(|e| ToolError::Internal { path: PathBuf::new(), message: e.to_string() })
}

/// Verify a manifest file against the live tree.
pub fn verify_manifest(opts: &CheckOptions, cancel: &CancelToken) -> Result<CheckReport> {
    let manifest = Manifest::load(&opts.manifest)?;
    let resolver = Resolver::new(&manifest, &opts.manifest, opts.dir.as_deref())?;
    debug!(
        "checking {} entries ({}, {}) against {}",
        manifest.entries.len(),
        manifest.algo(),
        manifest.mode().as_str(),
        resolver.base.display()
    );

    let jobs: Vec<(&String, &ManifestEntry, PathBuf)> =
        manifest.entries.iter().map(|(key, entry)| (key, entry, resolver.resolve(key))).collect();
    let algo = manifest.algo();

    let lines: Vec<CheckLine> = thread_pool()?.install(|| {
        jobs.par_iter()
            .map(|(_, entry, path)| CheckLine { path: entry.real_path.clone(), outcome: check_one(path, entry, algo, cancel) })
            .collect()
    });
    cancel.check()?;

    let extra = find_extras(&manifest, &resolver, &pathx::absolute(&opts.manifest), &jobs, cancel)?;
    Ok(CheckReport { lines, extra, malformed: manifest.malformed })
}

/// Unlisted files. LOCAL manifests cover the whole root; PORTABLE ones only
/// the directories their entries live in.
fn find_extras(
    manifest: &Manifest,
    resolver: &Resolver,
    manifest_abs: &Path,
    jobs: &[(&String, &ManifestEntry, PathBuf)],
    cancel: &CancelToken,
) -> Result<Vec<String>> {
    let mut extra = Vec::new();

    match manifest.mode() {
        ManifestMode::Local => {
            let root = &resolver.base;
            if !root.is_dir() {
                return Ok(extra);
            }
            let opts = WalkOptions { max_depth: -1, hidden: false, follow_links: false };
            Walker::new(root, opts).walk(cancel, |entry| {
                if !entry.file_type.is_file() || pathx::absolute(&entry.path) == manifest_abs {
                    return Ok(WalkControl::Continue);
                }
                if let Some(rel) = pathx::relative_slash(&entry.path, root) {
                    let key = format!("{}/{}", VIRTUAL_ROOT, rel);
                    if !manifest.entries.contains_key(&key) {
                        extra.push(pathx::clean(&entry.path).to_string_lossy().into_owned());
                    }
                }
                Ok(WalkControl::Continue)
            })?;
        }
        ManifestMode::Portable => {
            let dirs: HashSet<PathBuf> =
                jobs.iter().filter_map(|(_, _, p)| p.parent().map(pathx::absolute)).collect();
            let base_abs = pathx::absolute(&resolver.base);
            let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
            dirs.sort();
            for dir in dirs {
                let Ok(read) = fs::read_dir(&dir) else { continue };
                for item in read.flatten() {
                    let path = item.path();
                    let is_file = item.file_type().map(|t| t.is_file()).unwrap_or(false);
                    if !is_file || path == manifest_abs || platform::is_hidden(&path) {
                        continue;
                    }
                    let absolute = path.to_string_lossy().into_owned();
                    let relative = pathx::relative_slash(&path, &base_abs);
                    let listed = manifest.entries.contains_key(&absolute)
                        || relative.as_deref().map(|r| manifest.entries.contains_key(r)).unwrap_or(false);
                    if !listed {
                        extra.push(relative.unwrap_or(absolute));
                    }
                }
            }
        }
    }
    extra.sort();
    Ok(extra)
}

/// Hash `root` recursively into a LOCAL manifest held in memory.
pub fn hash_tree(root: &Path, algo: HashAlgo, hidden: bool, jobs: usize, cancel: &CancelToken) -> std::result::Result<Manifest, ErrorList> {
    let opts = HashOptions {
        paths: vec![root.to_string_lossy().into_owned()],
        algo,
        recursive: true,
        hidden,
        write: false,
        output: None,
        local: true,
        jobs,
    };
    let (inputs, base) = hash::collect_inputs(&opts, None, cancel)?;
    let header = ManifestHeader::now(algo, ManifestMode::Local, base.map(|b| b.to_string_lossy().into_owned()));

    let mut buf = format!("{}\n", header).into_bytes();
    HashPool::new(algo, jobs, cancel.clone()).run(inputs, &mut buf)?;
    Manifest::read(&buf[..]).map_err(ErrorList::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffKind {
    Differs,
    OnlyLeft,
    OnlyRight,
}

#[derive(Debug, Clone)]
pub struct DiffLine {
    pub kind: DiffKind,
    pub path: String,
}

#[derive(Debug, Default)]
pub struct DiffReport {
    pub lines: Vec<DiffLine>,
    pub identical: usize,
}

impl DiffReport {
    pub fn is_success(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self, color: bool) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let (label, painted) = match line.kind {
                DiffKind::Differs => ("DIFFERS", format!("{:<10}", "DIFFERS").red().bold()),
                DiffKind::OnlyLeft => ("ONLY-A", format!("{:<10}", "ONLY-A").yellow()),
                DiffKind::OnlyRight => ("ONLY-B", format!("{:<10}", "ONLY-B").yellow()),
            };
            if color {
                let _ = writeln!(out, "{}{}", painted, line.path);
            } else {
                let _ = writeln!(out, "{:<10}{}", label, line.path);
            }
        }
        let total = self.identical + self.lines.len();
        let _ = writeln!(out, "completed: {}/{} identical", self.identical, total);
        out
    }
}

/// Compare two maps keyed the same way.
pub fn compare_maps(left: &VirtualHashMap, right: &VirtualHashMap) -> DiffReport {
    let mut report = DiffReport::default();
    for (key, l) in left.iter() {
        match right.get(key) {
            Some(r) if r.digest == l.digest => report.identical += 1,
            Some(_) => report.lines.push(DiffLine { kind: DiffKind::Differs, path: l.real_path.clone() }),
            None => report.lines.push(DiffLine { kind: DiffKind::OnlyLeft, path: l.real_path.clone() }),
        }
    }
    for (key, r) in right.iter() {
        if !left.contains_key(key) {
            report.lines.push(DiffLine { kind: DiffKind::OnlyRight, path: r.real_path.clone() });
        }
    }
    report
}

/// Structural comparison of two directory trees.
pub fn diff_trees(
    left: &Path,
    right: &Path,
    algo: HashAlgo,
    hidden: bool,
    jobs: usize,
    cancel: &CancelToken,
) -> std::result::Result<DiffReport, ErrorList> {
    for side in [left, right] {
        if !side.is_dir() {
            return Err(ToolError::invalid(format!("'{}' is not a directory", side.display())).into());
        }
    }
    let a = hash_tree(left, algo, hidden, jobs, cancel)?;
    let b = hash_tree(right, algo, hidden, jobs, cancel)?;
    Ok(compare_maps(&a.entries, &b.entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::format_line;
    use tempfile::tempdir;

    const HI_MD5: &str = "49f68a5c8493ec2c0bf489821c21fc3b";
    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn write_manifest(dir: &Path, header: &str, lines: &[(&str, &str)]) -> PathBuf {
        let mut body = format!("{}\n", header);
        for (d, p) in lines {
            body.push_str(&format_line(d, p));
        }
        let path = dir.join("checksum.md5");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn portable_manifest_passes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        fs::write(dir.path().join("b.txt"), b"").unwrap();
        let manifest =
            write_manifest(dir.path(), "#md5#2024-01-01 10:00:00", &[(HI_MD5, "a.txt"), (EMPTY_MD5, "b.txt")]);

        let opts = CheckOptions { manifest, dir: None, quiet: false };
        let report = verify_manifest(&opts, &CancelToken::new()).unwrap();
        assert!(report.is_success());
        assert!(report.extra.is_empty());
        assert!(report.render(false, false).ends_with("completed: 2/2 passed\n"));
    }

    #[test]
    fn tampered_and_missing_files_fail() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"bye").unwrap();
        fs::write(dir.path().join("new.txt"), b"n").unwrap();
        let manifest =
            write_manifest(dir.path(), "#md5#2024-01-01 10:00:00", &[(HI_MD5, "a.txt"), (EMPTY_MD5, "b.txt")]);

        let opts = CheckOptions { manifest, dir: None, quiet: true };
        let report = verify_manifest(&opts, &CancelToken::new()).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.extra, vec!["new.txt".to_string()]);

        let text = report.render(true, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("FAILED") && lines[0].contains("a.txt"));
        assert!(lines[0].contains(&format!("expected ...{}", &HI_MD5[24..])));
        assert!(lines[1].starts_with("MISSING") && lines[1].ends_with("b.txt"));
        assert_eq!(lines[2], "completed: 0/2 passed");
    }

    #[test]
    fn local_manifest_checks_another_root() {
        let dir = tempdir().unwrap();
        let copy = dir.path().join("copy");
        fs::create_dir_all(copy.join("sub")).unwrap();
        fs::write(copy.join("sub/a.txt"), b"hi").unwrap();
        fs::write(copy.join("extra.txt"), b"x").unwrap();
        let manifest = write_manifest(
            dir.path(),
            "#md5#2024-01-01 10:00:00#LOCAL#/elsewhere",
            &[(HI_MD5, "orig/sub/a.txt")],
        );

        let opts = CheckOptions { manifest, dir: Some(copy.clone()), quiet: false };
        let report = verify_manifest(&opts, &CancelToken::new()).unwrap();
        assert!(report.is_success());
        assert_eq!(report.extra.len(), 1);
        assert!(report.extra[0].ends_with("extra.txt"));
    }

    #[test]
    fn local_manifest_without_base_is_rejected() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("m.md5");
        fs::write(&manifest, format!("#md5#2024-01-01 10:00:00#LOCAL\n{}", format_line(HI_MD5, "r/a.txt"))).unwrap();
        let opts = CheckOptions { manifest, dir: None, quiet: false };
        assert!(verify_manifest(&opts, &CancelToken::new()).is_err());
    }

    fn hash_opts(paths: &[&Path], output: PathBuf, local: bool) -> HashOptions {
        HashOptions {
            paths: paths.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
            algo: HashAlgo::Md5,
            recursive: true,
            hidden: false,
            write: true,
            output: Some(output),
            local,
            jobs: 2,
        }
    }

    fn check(manifest: PathBuf) -> CheckReport {
        verify_manifest(&CheckOptions { manifest, dir: None, quiet: false }, &CancelToken::new()).unwrap()
    }

    #[test]
    fn written_manifest_verifies_from_anywhere() {
        let dir = tempdir().unwrap();
        let other = dir.path().join("other");
        fs::create_dir_all(other.join("sub")).unwrap();
        fs::write(other.join("a.txt"), b"hi").unwrap();
        fs::write(other.join("sub/b.txt"), b"").unwrap();
        let work = dir.path().join("work");
        fs::create_dir(&work).unwrap();

        // inputs outside the manifest's directory are recorded absolute
        let outside = work.join("outside.md5");
        hash::hash_paths(&hash_opts(&[&other], outside.clone(), false), &mut Vec::new(), &CancelToken::new()).unwrap();
        let text = fs::read_to_string(&outside).unwrap();
        assert!(!text.contains("\"../"));
        let report = check(outside);
        assert_eq!((report.passed(), report.total(), report.malformed), (2, 2, 0));
        assert!(report.is_success());

        // inputs under it are recorded relative to it, not to the working directory
        let inside = other.join("inside.md5");
        hash::hash_paths(&hash_opts(&[&other], inside.clone(), false), &mut Vec::new(), &CancelToken::new()).unwrap();
        let text = fs::read_to_string(&inside).unwrap();
        assert!(text.contains(&format!("{}\t\"a.txt\"", HI_MD5)));
        assert!(text.contains(&format!("{}\t\"sub/b.txt\"", EMPTY_MD5)));
        assert!(check(inside).is_success());
    }

    #[test]
    fn local_manifest_checks_through_its_base_path() {
        let dir = tempdir().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(proj.join("sub")).unwrap();
        fs::write(proj.join("a.txt"), b"hi").unwrap();
        fs::write(proj.join("sub/b.txt"), b"").unwrap();
        let manifest = dir.path().join("local.md5");
        hash::hash_paths(&hash_opts(&[&proj], manifest.clone(), true), &mut Vec::new(), &CancelToken::new()).unwrap();

        let loaded = Manifest::load(&manifest).unwrap();
        assert_eq!(loaded.mode(), ManifestMode::Local);
        assert_eq!(loaded.entries.len(), 2);
        assert!(loaded.entries.contains_key("/ROOTDIR/sub/b.txt"));

        let report = check(manifest.clone());
        assert_eq!(report.passed(), 2);
        assert!(report.is_success());

        fs::write(proj.join("a.txt"), b"changed").unwrap();
        assert!(!check(manifest).is_success());
    }

    #[test]
    fn local_mode_refuses_ambiguous_inputs() {
        let dir = tempdir().unwrap();
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        fs::write(a.join("x.txt"), b"x").unwrap();
        let out = dir.path().join("m.md5");

        for inputs in [vec![a.join("x.txt")], vec![a.clone(), b.clone()]] {
            let refs: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
            let err = hash::hash_paths(&hash_opts(&refs, out.clone(), true), &mut Vec::new(), &CancelToken::new())
                .unwrap_err();
            assert!(err.to_string().contains("--local"));
        }
        assert!(!out.exists());
    }

    #[test]
    fn manifest_with_only_malformed_lines_fails() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let manifest = dir.path().join("bad.md5");
        fs::write(&manifest, format!("#md5#2024-01-01 10:00:00\nzzzz\t\"a.txt\"\n{}\t\"../a.txt\"\n", HI_MD5)).unwrap();

        let report = check(manifest);
        assert_eq!(report.total(), 0);
        assert_eq!(report.malformed, 2);
        assert!(!report.is_success());
        assert!(report.render(false, false).contains("skipped 2 malformed line(s)"));
    }

    #[test]
    fn empty_manifest_body_is_not_a_pass() {
        let dir = tempdir().unwrap();
        let manifest = write_manifest(dir.path(), "#md5#2024-01-01 10:00:00", &[]);
        assert!(!check(manifest).is_success());
    }

    #[test]
    fn diff_of_two_trees() {
        let dir = tempdir().unwrap();
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        for root in [&a, &b] {
            fs::create_dir_all(root.join("sub")).unwrap();
            fs::write(root.join("same.txt"), b"same").unwrap();
        }
        fs::write(a.join("sub/changed.txt"), b"one").unwrap();
        fs::write(b.join("sub/changed.txt"), b"two").unwrap();
        fs::write(a.join("left-only.txt"), b"l").unwrap();
        fs::write(b.join("sub/right-only.txt"), b"r").unwrap();

        let report = diff_trees(&a, &b, HashAlgo::Sha256, false, 2, &CancelToken::new()).unwrap();
        assert_eq!(report.identical, 1);
        let kinds: Vec<(DiffKind, &str)> =
            report.lines.iter().map(|l| (l.kind.clone(), l.path.as_str())).collect();
        assert!(kinds.contains(&(DiffKind::Differs, "a/sub/changed.txt")));
        assert!(kinds.contains(&(DiffKind::OnlyLeft, "a/left-only.txt")));
        assert!(kinds.contains(&(DiffKind::OnlyRight, "b/sub/right-only.txt")));
        assert!(report.render(false).ends_with("completed: 1/4 identical\n"));
    }

    #[test]
    fn identical_trees_have_no_lines() {
        let dir = tempdir().unwrap();
        let (a, b) = (dir.path().join("x"), dir.path().join("y"));
        for root in [&a, &b] {
            fs::create_dir(root).unwrap();
            fs::write(root.join("f"), b"data").unwrap();
        }
        let report = diff_trees(&a, &b, HashAlgo::Md5, false, 1, &CancelToken::new()).unwrap();
        assert!(report.is_success());
    }
}
