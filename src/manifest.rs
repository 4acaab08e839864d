//! # Checksum Manifests
//!
//! A manifest is a line-oriented text file:
//!
//! ```text
//! #md5#2024-01-01 10:00:00
//! c34652066a18513105ac1ab96fcbef8e	"path/to/file.txt"
//! ```
//!
//! The header is the first non-empty line: `#<algo>#<timestamp>` optionally
//! followed by `#<mode>` and, for `LOCAL` manifests, `#<basepath>`. Body
//! lines are `<hex-digest><TAB>"<path>"`; the reader also accepts any run of
//! whitespace as the separator and unquoted paths. Blank lines and lines
//! starting with `#` are skipped.
//!
//! In `LOCAL` mode every path's first segment is replaced with
//! [`VIRTUAL_ROOT`] to form the lookup key, so two trees rooted at different
//! directories can be compared entry by entry.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use tracing::warn;

use crate::error::{Result, ToolError};
use crate::hash::HashAlgo;
use crate::pathx;

/// Synthetic first segment of LOCAL-mode keys.
pub const VIRTUAL_ROOT: &str = "/ROOTDIR";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How body paths are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestMode {
    /// Paths are used literally.
    #[default]
    Portable,
    /// The first path segment is a stand-in for an arbitrary root.
    Local,
}

impl ManifestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestMode::Portable => "PORTABLE",
            ManifestMode::Local => "LOCAL",
        }
    }
}

/// Parsed or to-be-written header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHeader {
    pub algo: HashAlgo,
    pub timestamp: String,
    pub mode: ManifestMode,
    /// Present iff `mode` is `Local`.
    pub base_path: Option<String>,
}

impl ManifestHeader {
    /// Header stamped with the current local time.
    pub fn now(algo: HashAlgo, mode: ManifestMode, base_path: Option<String>) -> Self {
        let base_path = if mode == ManifestMode::Local { base_path.or_else(|| Some(".".into())) } else { None };
        Self { algo, timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(), mode, base_path }
    }

    /// Parse a header line (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self> {
        static HEADER_RE: OnceLock<Regex> = OnceLock::new();
        let re = HEADER_RE.get_or_init(|| Regex::new(r"^#(\w+)#(.+)$").expect("static regex"));

        let line = line.trim_end_matches(['\r', '\n']);
        let caps = re
            .captures(line)
            .ok_or_else(|| ToolError::Format { line: 1, reason: format!("invalid manifest header '{}'", line) })?;
        let algo = HashAlgo::from_name(&caps[1])
            .ok_or_else(|| ToolError::Format { line: 1, reason: format!("unknown algorithm '{}'", &caps[1]) })?;

        // basepath may itself contain '#'
        let mut rest = caps[2].splitn(3, '#');
        let timestamp = rest.next().unwrap_or_default().trim().to_string();
        let mode = match rest.next().map(str::trim) {
            None | Some("") | Some("PORTABLE") => ManifestMode::Portable,
            Some("LOCAL") => ManifestMode::Local,
            Some(other) => {
                return Err(ToolError::Format { line: 1, reason: format!("unknown manifest mode '{}'", other) })
            }
        };
        let base_path = rest.next().map(str::to_string).filter(|s| !s.is_empty());

        match (mode, &base_path) {
            (ManifestMode::Local, None) => {
                Err(ToolError::Format { line: 1, reason: "LOCAL manifest without base path".into() })
            }
            (ManifestMode::Portable, Some(_)) => {
                Err(ToolError::Format { line: 1, reason: "base path is only valid in LOCAL mode".into() })
            }
            _ => Ok(Self { algo, timestamp, mode, base_path }),
        }
    }
}

impl fmt::Display for ManifestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}#{}", self.algo.name(), self.timestamp)?;
        if self.mode == ManifestMode::Local {
            write!(f, "#{}#{}", self.mode.as_str(), self.base_path.as_deref().unwrap_or("."))?;
        }
        Ok(())
    }
}

/// Render one body line, including the trailing newline.
pub fn format_line(digest: &str, path: &str) -> String {
    format!("{}\t\"{}\"\n", digest, path.replace('\\', "\\\\"))
}

/// Parse one body line into `(digest, cleaned path)`.
pub fn parse_body_line(line: &str, algo: HashAlgo, line_no: usize) -> Result<(String, String)> {
    let fail = |reason: String| ToolError::Format { line: line_no, reason };

    let line = line.trim_start();
    let split = line.find(char::is_whitespace).unwrap_or(line.len());
    let (digest, rest) = line.split_at(split);
    if digest.is_empty() {
        return Err(fail("empty line".into()));
    }
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(fail("missing path".into()));
    }

    if digest.len() != algo.hex_len() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(fail(format!("invalid {} digest '{}'", algo.name(), digest)));
    }

    // quoted paths are taken verbatim; bare ones have their whitespace runs collapsed
    let raw_path = match rest.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
        Some(inner) => inner.to_string(),
        None => rest.split_whitespace().collect::<Vec<_>>().join(" "),
    };
    if raw_path.is_empty() {
        return Err(fail("missing path".into()));
    }
    let unquoted = raw_path.replace("\\\\", "\\");
    let path = pathx::validate_manifest_path(&unquoted).map_err(|e| fail(e.to_string()))?;
    Ok((digest.to_ascii_lowercase(), path))
}

/// Map key for `path` under `mode`.
pub fn virtual_key(path: &str, mode: ManifestMode) -> String {
    match mode {
        ManifestMode::Portable => path.to_string(),
        ManifestMode::Local => {
            let mut segments = path.split(['/', '\\']).filter(|s| !s.is_empty());
            segments.next();
            let rest: Vec<&str> = segments.collect();
            if rest.is_empty() {
                VIRTUAL_ROOT.to_string()
            } else {
                format!("{}/{}", VIRTUAL_ROOT, rest.join("/"))
            }
        }
    }
}

/// A digest and the path it was recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub real_path: String,
    pub digest: String,
}

/// Canonical key to entry map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualHashMap {
    entries: BTreeMap<String, ManifestEntry>,
}

impl VirtualHashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `path` keyed according to `mode`. Returns the previous entry for the key.
    pub fn insert(&mut self, path: &str, digest: &str, mode: ManifestMode) -> Option<ManifestEntry> {
        let key = virtual_key(path, mode);
        self.entries.insert(key, ManifestEntry { real_path: path.to_string(), digest: digest.to_string() })
    }

    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub header: ManifestHeader,
    pub entries: VirtualHashMap,
    /// Body lines rejected by the parser.
    pub malformed: usize,
}

impl Manifest {
    pub fn new(header: ManifestHeader) -> Self {
        Self { header, entries: VirtualHashMap::new(), malformed: 0 }
    }

    pub fn mode(&self) -> ManifestMode {
        self.header.mode
    }

    pub fn algo(&self) -> HashAlgo {
        self.header.algo
    }

    /// Read a manifest. Malformed body lines are logged and skipped.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines().enumerate();

        // header: first non-empty line
        let mut manifest = loop {
            let Some((idx, line)) = lines.next() else {
                return Err(ToolError::Format { line: 0, reason: "manifest is empty".into() });
            };
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let header = ManifestHeader::parse(trimmed).map_err(|e| match e {
                ToolError::Format { reason, .. } => ToolError::Format { line: idx + 1, reason },
                other => other,
            })?;
            break Manifest::new(header);
        };

        for (idx, line) in lines {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_body_line(trimmed, manifest.header.algo, idx + 1) {
                Ok((digest, path)) => {
                    manifest.entries.insert(&path, &digest, manifest.header.mode);
                }
                Err(e) => {
                    warn!("skipping malformed manifest entry: {}", e);
                    manifest.malformed += 1;
                }
            }
        }

        Ok(manifest)
    }

    /// Open and read a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ToolError::from_io(e, path))?;
        Self::read(BufReader::new(file))
    }

    /// Emit header and body in key order.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{}", self.header)?;
        for (_, entry) in self.entries.iter() {
            w.write_all(format_line(&entry.digest, &entry.real_path).as_bytes())?;
        }
        Ok(())
    }
}

/// A manifest being written to disk. The header is emitted on creation;
/// body lines are appended through the [`Write`] impl.
pub struct ManifestFile {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ManifestFile {
    /// Create (truncating) `path` with mode `0644` and write the header.
    pub fn create(path: &Path, header: &ManifestHeader) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        let file = opts.open(path).map_err(|e| ToolError::from_io(e, path))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", header).map_err(|e| ToolError::from_io(e, path))?;
        Ok(Self { path: path.to_path_buf(), out })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered lines and sync the file.
    pub fn close(mut self) -> Result<()> {
        let path = self.path.clone();
        self.out.flush().map_err(|e| ToolError::from_io(e, &path))?;
        self.out.get_ref().sync_all().map_err(|e| ToolError::from_io(e, &path))
    }
}

impl Write for ManifestFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
