//! # Matcher
//!
//! Builds the `find` predicate from [`FindCriteria`]: name/path patterns
//! (substring, whole word, glob or regex), exclusions, extension set, type
//! letters, size and modification-time tests.
//!
//! Compiled regexes live in a bounded [`RegexCache`] owned by the matcher.

use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};

use crate::classify::{self, FileTag, TYPE_LETTERS};
use crate::error::{Result, ToolError};

/// Default number of compiled regexes kept.
pub const DEFAULT_REGEX_CACHE: usize = 100;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Bounded pattern -> compiled regex cache. On overflow an arbitrary entry
/// is evicted.
#[derive(Debug)]
pub struct RegexCache {
    map: RwLock<HashMap<String, Regex>>,
    capacity: usize,
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(DEFAULT_REGEX_CACHE)
    }
}

impl RegexCache {
    pub fn new(capacity: usize) -> Self {
        Self { map: RwLock::new(HashMap::new()), capacity: capacity.max(1) }
    }

    pub fn get(&self, pattern: &str, case_sensitive: bool) -> Result<Regex> {
        let key = if case_sensitive { pattern.to_string() } else { format!("(?i){}", pattern) };
        if let Some(re) = self.map.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Ok(re.clone());
        }

        let compiled = RegexBuilder::new(pattern).case_insensitive(!case_sensitive).build()?;

        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        // another thread may have compiled it meanwhile
        if let Some(re) = map.get(&key) {
            return Ok(re.clone());
        }
        if map.len() >= self.capacity {
            if let Some(victim) = map.keys().next().cloned() {
                map.remove(&victim);
            }
        }
        map.insert(key, compiled.clone());
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain-data search criteria, as parsed from the command line.
#[derive(Debug, Clone, Default)]
pub struct FindCriteria {
    pub name: String,
    pub path: String,
    pub ex_name: String,
    pub ex_path: String,
    pub is_regex: bool,
    pub whole_word: bool,
    pub case_sensitive: bool,
    /// Combine `name` and `path` with OR instead of AND.
    pub use_or: bool,
    pub extensions: Vec<String>,
    pub size: Option<String>,
    pub mtime: Option<String>,
    /// `--type` letters, see [`classify::TYPE_LETTERS`].
    pub types: Vec<char>,
}

/// `[+-]<num>[BKMG]`: `+` greater than, `-` less than, no sign equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeFilter {
    pub cmp: std::cmp::Ordering,
    pub bytes: u64,
}

impl SizeFilter {
    pub fn parse(spec: &str) -> Result<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^([+-]?)(\d+(?:\.\d+)?)([BKMGbkmg]?)$").expect("static regex"));
        let caps = re
            .captures(spec.trim())
            .ok_or_else(|| ToolError::invalid(format!("invalid size filter '{}' (expected [+-]N[BKMG])", spec)))?;
        let value: f64 = caps[2].parse().map_err(|_| ToolError::invalid(format!("invalid size '{}'", spec)))?;
        let unit: u64 = match caps[3].to_ascii_uppercase().as_str() {
            "K" => 1 << 10,
            "M" => 1 << 20,
            "G" => 1 << 30,
            _ => 1,
        };
        let cmp = match &caps[1] {
            "+" => std::cmp::Ordering::Greater,
            "-" => std::cmp::Ordering::Less,
            _ => std::cmp::Ordering::Equal,
        };
        Ok(Self { cmp, bytes: (value * unit as f64).round() as u64 })
    }

    pub fn matches(&self, size: u64) -> bool {
        size.cmp(&self.bytes) == self.cmp
    }
}

/// `[+-]<days>`: `+N` modified after now-N days, `-N` before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFilter {
    pub newer: bool,
    pub threshold: SystemTime,
}

impl TimeFilter {
    pub fn parse(spec: &str, now: SystemTime) -> Result<Self> {
        let spec = spec.trim();
        let (newer, digits) = match spec.as_bytes().first() {
            Some(b'-') => (false, &spec[1..]),
            Some(b'+') => (true, &spec[1..]),
            _ => (true, spec),
        };
        let days: u64 = digits
            .parse()
            .map_err(|_| ToolError::invalid(format!("invalid time filter '{}' (expected [+-]DAYS)", spec)))?;
        let threshold = now
            .checked_sub(Duration::from_secs(days * SECS_PER_DAY))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(Self { newer, threshold })
    }

    pub fn matches(&self, modified: SystemTime) -> bool {
        if self.newer {
            modified > self.threshold
        } else {
            modified < self.threshold
        }
    }
}

/// Normalize `txt`, `.TXT`, ` md ` to `.txt`, `.md`.
pub fn normalize_extensions(exts: &[String]) -> HashSet<String> {
    exts.iter()
        .flat_map(|e| e.split(','))
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e != ".")
        .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
        .collect()
}

#[derive(Debug, Default)]
struct Pattern {
    raw: String,
    regex: Option<Regex>,
    glob: Option<GlobMatcher>,
}

/// What the matcher needs to know about one entry.
pub struct Candidate<'a> {
    pub name: &'a str,
    pub path: &'a Path,
    pub metadata: &'a Metadata,
}

/// Compiled form of [`FindCriteria`] plus the shared match counter.
#[derive(Debug)]
pub struct Matcher {
    cache: RegexCache,
    name: Pattern,
    path: Pattern,
    ex_name: Pattern,
    ex_path: Pattern,
    is_regex: bool,
    whole_word: bool,
    case_sensitive: bool,
    use_or: bool,
    ext_set: HashSet<String>,
    size: Option<SizeFilter>,
    mtime: Option<TimeFilter>,
    types: Vec<char>,
    matched: AtomicU64,
}

impl Matcher {
    pub fn new(criteria: &FindCriteria) -> Result<Self> {
        Self::with_now(criteria, SystemTime::now())
    }

    /// Like [`Matcher::new`] with an explicit reference time for `--mtime`.
    pub fn with_now(criteria: &FindCriteria, now: SystemTime) -> Result<Self> {
        for t in &criteria.types {
            if !TYPE_LETTERS.contains(*t) {
                return Err(ToolError::invalid(format!("unknown type '{}' (expected one of {})", t, TYPE_LETTERS)));
            }
        }

        let mut m = Matcher {
            cache: RegexCache::default(),
            name: Pattern::default(),
            path: Pattern::default(),
            ex_name: Pattern::default(),
            ex_path: Pattern::default(),
            is_regex: criteria.is_regex,
            whole_word: criteria.whole_word,
            case_sensitive: criteria.case_sensitive,
            use_or: criteria.use_or,
            ext_set: normalize_extensions(&criteria.extensions),
            size: criteria.size.as_deref().map(SizeFilter::parse).transpose()?,
            mtime: criteria.mtime.as_deref().map(|s| TimeFilter::parse(s, now)).transpose()?,
            types: criteria.types.clone(),
            matched: AtomicU64::new(0),
        };
        m.name = m.compile(&criteria.name)?;
        m.path = m.compile(&criteria.path)?;
        m.ex_name = m.compile(&criteria.ex_name)?;
        m.ex_path = m.compile(&criteria.ex_path)?;
        Ok(m)
    }

    fn compile(&self, raw: &str) -> Result<Pattern> {
        let mut p = Pattern { raw: raw.to_string(), ..Pattern::default() };
        if raw.is_empty() {
            return Ok(p);
        }
        if self.is_regex {
            p.regex = Some(self.cache.get(raw, self.case_sensitive)?);
        } else if raw.contains(['*', '?', '[']) {
            let glob = GlobBuilder::new(raw).case_insensitive(!self.case_sensitive).build()?;
            p.glob = Some(glob.compile_matcher());
        }
        Ok(p)
    }

    fn match_pattern(&self, p: &Pattern, input: &str) -> bool {
        if p.raw.is_empty() {
            return false;
        }
        if self.is_regex {
            if let Some(re) = &p.regex {
                return re.is_match(input);
            }
        }
        if let Some(glob) = &p.glob {
            return glob.is_match(input);
        }
        let (pattern, input) = if self.case_sensitive {
            (p.raw.clone(), input.to_string())
        } else {
            (p.raw.to_lowercase(), input.to_lowercase())
        };
        if self.whole_word {
            pattern == input
        } else {
            input.contains(&pattern)
        }
    }

    /// Name/path test with AND/OR combination. No patterns matches all.
    pub fn matches_name_path(&self, name: &str, path: &str) -> bool {
        let has_name = !self.name.raw.is_empty();
        let has_path = !self.path.raw.is_empty();
        match (has_name, has_path) {
            (true, true) => {
                let n = self.match_pattern(&self.name, name);
                let p = self.match_pattern(&self.path, path);
                if self.use_or {
                    n || p
                } else {
                    n && p
                }
            }
            (true, false) => self.match_pattern(&self.name, name),
            (false, true) => self.match_pattern(&self.path, path),
            (false, false) => true,
        }
    }

    /// Excluded by `--ex-name` or `--ex-path`. Excluded directories are not
    /// descended into.
    pub fn is_excluded(&self, name: &str, path: &str) -> bool {
        self.match_pattern(&self.ex_name, name) || self.match_pattern(&self.ex_path, path)
    }

    pub fn matches_extension(&self, path: &Path) -> bool {
        self.ext_set.is_empty() || self.ext_set.contains(&classify::extension_of(path))
    }

    pub fn matches_type(&self, tag: FileTag) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| tag.matches_letter(*t))
    }

    /// Full predicate.
    pub fn matches(&self, c: &Candidate<'_>) -> bool {
        let path_str = c.path.to_string_lossy();
        if self.is_excluded(c.name, &path_str) {
            return false;
        }
        if !self.matches_name_path(c.name, &path_str) {
            return false;
        }
        if !self.matches_extension(c.path) {
            return false;
        }
        if !self.types.is_empty() && !self.matches_type(classify::classify(c.path, c.metadata)) {
            return false;
        }
        if let Some(size) = &self.size {
            if !size.matches(c.metadata.len()) {
                return false;
            }
        }
        if let Some(mtime) = &self.mtime {
            match c.metadata.modified() {
                Ok(t) if mtime.matches(t) => {}
                _ => return false,
            }
        }
        true
    }

    pub fn record_match(&self) -> u64 {
        self.matched.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }

    pub fn cached_regexes(&self) -> usize {
        self.cache.len()
    }
}
