//! # Directory Listing
//!
//! Scans inputs into groups of [`FileEntry`], one group per listed
//! directory, then hands them to [`render`] for grid or table output.
//!
//! - Files named on the command line are collected into a leading group
//!   without a header.
//! - A directory contributes its children (all descendants with `-r`, each
//!   subdirectory forming its own group), or itself with `-d`.
//! - Headers are shown when recursing or when more than one input was given.

pub mod render;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::classify::{FileTag, TYPE_LETTERS};
use crate::common::FileEntry;
use crate::error::{ErrorList, ToolError};
use crate::pathx;
use crate::pretty::TableStyle;
use crate::walk::{WalkControl, WalkOptions, Walker};

pub use render::render_groups;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortKey {
    /// Case-insensitive name.
    #[default]
    Name,
    /// Largest first.
    Size,
    /// Newest first.
    Time,
}

/// Options for the `list` command.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub paths: Vec<String>,
    pub long: bool,
    pub recursive: bool,
    /// List directories themselves, not their contents.
    pub dir_itself: bool,
    pub hidden: bool,
    pub sort: SortKey,
    pub reverse: bool,
    /// Add owner and group columns to the long format.
    pub owner: bool,
    pub types: Vec<char>,
    pub icons: bool,
    pub table_style: TableStyle,
    pub color: bool,
    /// Grid width; the terminal width when unset.
    pub width: Option<usize>,
}

/// Entries listed under one heading.
#[derive(Debug, Clone)]
pub struct ListGroup {
    /// Directory shown above the entries; `None` for loose files.
    pub header: Option<String>,
    pub entries: Vec<FileEntry>,
}

#[derive(Debug)]
pub struct Listing {
    pub groups: Vec<ListGroup>,
    pub show_headers: bool,
    pub errors: ErrorList,
}

fn type_allowed(types: &[char], tag: FileTag) -> bool {
    types.is_empty() || types.iter().any(|t| tag.matches_letter(*t))
}

fn display_of(path: &Path) -> String {
    pathx::clean(path).to_string_lossy().into_owned()
}

/// Scan every input path.
pub fn scan(opts: &ListOptions, cancel: &CancelToken) -> Listing {
    let mut errors = ErrorList::new();
    if let Some(bad) = opts.types.iter().find(|t| !TYPE_LETTERS.contains(**t)) {
        errors.push(ToolError::invalid(format!("unknown type '{}' (expected one of {})", bad, TYPE_LETTERS)));
        return Listing { groups: Vec::new(), show_headers: false, errors };
    }

    let raw = if opts.paths.is_empty() { vec![".".to_string()] } else { opts.paths.clone() };
    let inputs = match pathx::expand(&raw) {
        Ok(p) => p,
        Err(e) => {
            errors.push(e);
            return Listing { groups: Vec::new(), show_headers: false, errors };
        }
    };

    let mut loose = ListGroup { header: None, entries: Vec::new() };
    let mut groups = Vec::new();

    for input in &inputs {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = pathx::reject_system_path(input) {
            errors.push(e);
            continue;
        }
        let abs = pathx::absolute(input);
        let md = match fs::symlink_metadata(&abs) {
            Ok(md) => md,
            Err(e) => {
                errors.push(ToolError::from_io(e, input));
                continue;
            }
        };
        let entry = FileEntry::from_metadata(&abs, &md).with_name(display_of(input));

        if !md.is_dir() || opts.dir_itself {
            if type_allowed(&opts.types, entry.tag) {
                loose.entries.push(entry);
            }
            continue;
        }

        match scan_dir(input, &abs, opts, cancel) {
            Ok(mut found) => groups.append(&mut found),
            Err(e) => {
                errors.push(e);
            }
        }
    }

    if let Err(e) = cancel.check() {
        errors.push(e);
    }

    let show_headers = opts.recursive || inputs.len() > 1;
    let mut all = Vec::with_capacity(groups.len() + 1);
    if !loose.entries.is_empty() {
        all.push(loose);
    }
    all.extend(groups);
    for group in &mut all {
        sort_entries(&mut group.entries, opts.sort, opts.reverse);
    }
    Listing { groups: all, show_headers, errors }
}

/// Children of `dir` (one level, or every level when recursive), grouped
/// by parent directory in walk order.
fn scan_dir(shown: &Path, abs: &Path, opts: &ListOptions, cancel: &CancelToken) -> Result<Vec<ListGroup>, ToolError> {
    let walk_opts = WalkOptions {
        max_depth: if opts.recursive { -1 } else { 1 },
        hidden: opts.hidden,
        follow_links: false,
    };
    let mut groups = vec![ListGroup { header: Some(display_of(shown)), entries: Vec::new() }];
    let mut index: HashMap<PathBuf, usize> = HashMap::new();
    index.insert(abs.to_path_buf(), 0);

    Walker::new(abs, walk_opts).walk(cancel, |walked| {
        if walked.depth == 0 {
            return Ok(WalkControl::Continue);
        }
        let md = match walked.metadata() {
            Ok(md) => md,
            Err(e) => {
                debug!("vanished during listing: {}: {}", walked.path.display(), e);
                return Ok(WalkControl::Continue);
            }
        };
        let entry = FileEntry::from_metadata(&walked.path, &md);

        if opts.recursive && walked.is_dir() {
            let rel = walked.path.strip_prefix(abs).unwrap_or(&walked.path);
            let header = display_of(&shown.join(rel));
            index.insert(walked.path.clone(), groups.len());
            groups.push(ListGroup { header: Some(header), entries: Vec::new() });
        }

        if type_allowed(&opts.types, entry.tag) {
            let parent = walked.path.parent().map(Path::to_path_buf).unwrap_or_default();
            if let Some(&slot) = index.get(&parent) {
                groups[slot].entries.push(entry);
            }
        }
        Ok(WalkControl::Continue)
    })?;

    Ok(groups)
}

/// Sort by one key; `reverse` inverts the key's natural order.
pub fn sort_entries(entries: &mut [FileEntry], key: SortKey, reverse: bool) {
    entries.sort_by(|a, b| {
        let by_name = || a.name.to_lowercase().cmp(&b.name.to_lowercase()).then_with(|| a.name.cmp(&b.name));
        let ord = match key {
            SortKey::Name => by_name(),
            SortKey::Size => b.size.cmp(&a.size).then_with(by_name),
            SortKey::Time => b.modified.cmp(&a.modified).then_with(by_name),
        };
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), vec![0u8; 30]).unwrap();
        fs::write(dir.path().join("A.md"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join(".secret"), b"s").unwrap();
        fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        fs::write(dir.path().join("sub/c.rs"), vec![0u8; 20]).unwrap();
        dir
    }

    fn opts(dir: &Path) -> ListOptions {
        ListOptions { paths: vec![dir.to_string_lossy().into_owned()], ..Default::default() }
    }

    fn names(group: &ListGroup) -> Vec<&str> {
        group.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn lists_one_level_sorted_by_name() {
        let dir = tree();
        let listing = scan(&opts(dir.path()), &CancelToken::new());
        assert!(listing.errors.is_empty());
        assert!(!listing.show_headers);
        assert_eq!(listing.groups.len(), 1);
        assert_eq!(names(&listing.groups[0]), vec!["A.md", "b.txt", "sub"]);
    }

    #[test]
    fn hidden_and_type_filters() {
        let dir = tree();
        let mut o = opts(dir.path());
        o.hidden = true;
        o.types = vec!['f'];
        let listing = scan(&o, &CancelToken::new());
        assert_eq!(names(&listing.groups[0]), vec![".secret", "A.md", "b.txt"]);
    }

    #[test]
    fn recursive_groups_per_directory() {
        let dir = tree();
        let mut o = opts(dir.path());
        o.recursive = true;
        let listing = scan(&o, &CancelToken::new());
        assert!(listing.show_headers);
        let headers: Vec<String> = listing.groups.iter().filter_map(|g| g.header.clone()).collect();
        assert_eq!(headers.len(), 3);
        assert!(headers[1].ends_with("sub"));
        assert_eq!(names(&listing.groups[1]), vec!["c.rs", "deep"]);
        assert!(listing.groups[2].entries.is_empty());
    }

    #[test]
    fn size_sort_and_reverse() {
        let dir = tree();
        let mut o = opts(dir.path());
        o.sort = SortKey::Size;
        o.types = vec!['f'];
        let listing = scan(&o, &CancelToken::new());
        assert_eq!(names(&listing.groups[0]), vec!["b.txt", "A.md"]);
        o.reverse = true;
        let listing = scan(&o, &CancelToken::new());
        assert_eq!(names(&listing.groups[0]), vec!["A.md", "b.txt"]);
    }

    #[test]
    fn directory_itself_and_loose_files() {
        let dir = tree();
        let file = dir.path().join("b.txt");
        let o = ListOptions {
            paths: vec![dir.path().to_string_lossy().into_owned(), file.to_string_lossy().into_owned()],
            dir_itself: true,
            ..Default::default()
        };
        let listing = scan(&o, &CancelToken::new());
        assert_eq!(listing.groups.len(), 1);
        assert_eq!(listing.groups[0].entries.len(), 2);
        assert!(listing.groups[0].header.is_none());
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tree();
        let listing = scan(&opts(&dir.path().join("nope")), &CancelToken::new());
        assert_eq!(listing.errors.len(), 1);
    }
}
