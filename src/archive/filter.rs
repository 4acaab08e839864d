//! Include/exclude/size rules applied to archive entries.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::Result;

/// User-facing filter settings.
#[derive(Debug, Clone, Default)]
pub struct FilterRules {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Smallest accepted size, `0` for no bound.
    pub min_size: u64,
    /// Largest accepted size, `0` for no bound.
    pub max_size: u64,
}

/// Compiled [`FilterRules`].
#[derive(Debug, Clone)]
pub struct EntryFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    min_size: u64,
    max_size: u64,
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        builder.add(Glob::new(p)?);
    }
    Ok(Some(builder.build()?))
}

impl EntryFilter {
    pub fn new(rules: &FilterRules) -> Result<Self> {
        Ok(Self {
            include: build_set(&rules.include)?,
            exclude: build_set(&rules.exclude)?,
            min_size: rules.min_size,
            max_size: rules.max_size,
        })
    }

    /// Accepts everything.
    pub fn allow_all() -> Self {
        Self { include: None, exclude: None, min_size: 0, max_size: 0 }
    }

    /// `name` is the `/`-separated path inside the archive.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.as_ref().map(|s| s.is_match(name)).unwrap_or(false)
    }

    /// Full rule for a regular entry: matches an include (if any), no
    /// exclude, and lies within the size bounds.
    pub fn accepts(&self, name: &str, size: u64) -> bool {
        if let Some(inc) = &self.include {
            if !inc.is_match(name) {
                return false;
            }
        }
        !self.is_excluded(name) && self.accepts_size(size)
    }

    pub fn accepts_size(&self, size: u64) -> bool {
        (self.min_size == 0 || size >= self.min_size) && (self.max_size == 0 || size <= self.max_size)
    }

    /// Include/exclude only, for entries whose size is not known up front.
    pub fn accepts_name(&self, name: &str) -> bool {
        self.include.as_ref().map(|s| s.is_match(name)).unwrap_or(true) && !self.is_excluded(name)
    }

    /// Directories are kept unless excluded; with include rules they are
    /// only created implicitly by the files below them.
    pub fn accepts_dir(&self, name: &str) -> bool {
        !self.is_excluded(name.trim_end_matches('/')) && self.include.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str], min: u64, max: u64) -> EntryFilter {
        EntryFilter::new(&FilterRules {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            min_size: min,
            max_size: max,
        })
        .unwrap()
    }

    #[test]
    fn empty_rules_accept_everything() {
        let f = filter(&[], &[], 0, 0);
        assert!(f.accepts("a/b.txt", 0));
        assert!(f.accepts_dir("a/"));
    }

    #[test]
    fn include_and_exclude() {
        let f = filter(&["*.txt"], &["secret*"], 0, 0);
        assert!(f.accepts("docs/a.txt", 1));
        assert!(!f.accepts("docs/a.md", 1));
        assert!(!f.accepts("secret.txt", 1));
        assert!(!f.accepts_dir("docs"));
    }

    #[test]
    fn size_bounds() {
        let f = filter(&[], &[], 10, 100);
        assert!(!f.accepts("a", 5));
        assert!(f.accepts("a", 10));
        assert!(f.accepts("a", 100));
        assert!(!f.accepts("a", 101));
        assert!(f.accepts_size(50));
        assert!(!f.accepts_size(9));
    }

    #[test]
    fn bad_glob_is_an_error() {
        let rules = FilterRules { include: vec!["a[".into()], ..Default::default() };
        assert!(EntryFilter::new(&rules).is_err());
    }
}
