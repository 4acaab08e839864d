//! # Archive Façade
//!
//! One entry point per operation, [`pack`], [`unpack`] and [`preview`],
//! dispatching on the format detected from the archive's extension:
//!
//! | extension            | back-end | contents                |
//! |----------------------|----------|-------------------------|
//! | `.zip`               | `zip`    | tree                    |
//! | `.tar`               | `tar`    | tree                    |
//! | `.tar.gz`, `.tgz`    | `tar`    | tree, gzip compressed   |
//! | `.gz`                | `stream` | one file                |
//! | `.bz2`, `.bzip2`     | `stream` | one file                |
//! | `.zlib`              | `stream` | one file                |
//!
//! Packing writes into a temporary file next to the destination and renames
//! it into place only on success, so an interrupted run leaves nothing behind
//! unless `keep_partial` is set. Unpacking rejects absolute and `..` entry
//! names unless validation is disabled.

pub mod filter;
mod stream;
mod tar;
mod zip;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use clap::ValueEnum;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, ToolError};
use crate::humansize;
use crate::pathx;
use crate::platform;
use crate::pretty::{Align, Table, TableStyle};
use crate::progress::{ProgressStyle, ProgressTracker};
use crate::walk::{WalkControl, WalkOptions, Walker};

pub use filter::{EntryFilter, FilterRules};

/// Container formats, detected by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    Gz,
    Bz2,
    Zlib,
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase()).unwrap_or_default();
        let format = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else if name.ends_with(".zip") {
            ArchiveFormat::Zip
        } else if name.ends_with(".tar") {
            ArchiveFormat::Tar
        } else if name.ends_with(".gz") {
            ArchiveFormat::Gz
        } else if name.ends_with(".bz2") || name.ends_with(".bzip2") {
            ArchiveFormat::Bz2
        } else if name.ends_with(".zlib") {
            ArchiveFormat::Zlib
        } else {
            return Err(ToolError::Unsupported(format!("unknown archive format: '{}'", path.display())));
        };
        Ok(format)
    }

    /// Formats that hold a single compressed file rather than a tree.
    pub fn is_single_stream(self) -> bool {
        matches!(self, ArchiveFormat::Gz | ArchiveFormat::Bz2 | ArchiveFormat::Zlib)
    }

    pub fn name(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Gz => "gz",
            ArchiveFormat::Bz2 => "bz2",
            ArchiveFormat::Zlib => "zlib",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested compression. Formats without a matching setting use the
/// closest one they have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CompressionLevel {
    #[default]
    Default,
    None,
    Fast,
    Best,
    /// Huffman-only coding; no back-end exposes it, so it maps to `Fast`.
    Huffman,
}

impl CompressionLevel {
    pub(crate) fn flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast | CompressionLevel::Huffman => flate2::Compression::fast(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }

    pub(crate) fn bzip2(self) -> bzip2::Compression {
        match self {
            CompressionLevel::Default => bzip2::Compression::default(),
            // bzip2 cannot store
            CompressionLevel::None | CompressionLevel::Fast | CompressionLevel::Huffman => bzip2::Compression::fast(),
            CompressionLevel::Best => bzip2::Compression::best(),
        }
    }
}

/// Options shared by pack and unpack.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub level: CompressionLevel,
    pub overwrite: bool,
    pub progress: bool,
    pub progress_style: ProgressStyle,
    /// Accept absolute and `..` entry names when unpacking.
    pub no_validate: bool,
    /// Keep whatever was written when packing fails.
    pub keep_partial: bool,
    pub filter: FilterRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    pub fn letter(self) -> char {
        match self {
            EntryKind::File => 'f',
            EntryKind::Dir => 'd',
            EntryKind::Symlink => 'l',
        }
    }
}

/// A file-system entry selected for packing.
#[derive(Debug, Clone)]
pub struct PackEntry {
    pub source: PathBuf,
    /// `/`-separated name inside the archive.
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<SystemTime>,
}

/// One line of `preview`.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntryInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    pub modified: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub format: Option<&'static str>,
    /// Entries written or extracted.
    pub entries: usize,
    pub bytes: u64,
    /// Entries rejected by the filter rules.
    pub skipped: usize,
}

/// What the back-ends need from the caller.
pub(crate) struct Ctx<'a> {
    pub filter: EntryFilter,
    pub level: CompressionLevel,
    pub overwrite: bool,
    pub validate: bool,
    pub cancel: &'a CancelToken,
    pub progress: &'a ProgressTracker,
}

impl<'a> Ctx<'a> {
    fn new(opts: &ArchiveOptions, cancel: &'a CancelToken, progress: &'a ProgressTracker) -> Result<Self> {
        Ok(Self {
            filter: EntryFilter::new(&opts.filter)?,
            level: opts.level,
            overwrite: opts.overwrite,
            validate: !opts.no_validate,
            cancel,
            progress,
        })
    }
}

/// Reader that reports every byte to the progress tracker.
pub(crate) struct CountingReader<'a, R> {
    inner: R,
    progress: &'a ProgressTracker,
}

impl<'a, R: Read> CountingReader<'a, R> {
    pub fn new(inner: R, progress: &'a ProgressTracker) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.record_bytes(n as u64);
        Ok(n)
    }
}

/// Join an archive entry name onto `dest`.
///
/// With validation on, absolute names, drive prefixes and `..` components
/// are refused.
pub(crate) fn safe_join(dest: &Path, name: &str, validate: bool) -> Result<PathBuf> {
    let name = name.replace('\\', "/");
    if !validate {
        return Ok(dest.join(name.trim_start_matches('/')));
    }
    let mut out = dest.to_path_buf();
    for comp in Path::new(&name).components() {
        match comp {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::invalid(format!("unsafe path in archive: '{}'", name)));
            }
        }
    }
    Ok(out)
}

/// Symlink targets must stay inside the extraction root.
pub(crate) fn check_link_target(name: &str, target: &Path, validate: bool) -> Result<()> {
    if !validate {
        return Ok(());
    }
    let escapes = target.is_absolute() || target.components().any(|c| matches!(c, Component::ParentDir));
    if escapes {
        return Err(ToolError::invalid(format!(
            "unsafe link in archive: '{}' -> '{}'",
            name,
            target.display()
        )));
    }
    Ok(())
}

/// Make room for an extracted file at `target`.
pub(crate) fn prepare_output(target: &Path, overwrite: bool) -> Result<()> {
    if let Ok(md) = fs::symlink_metadata(target) {
        if md.is_dir() {
            return Err(ToolError::invalid(format!("'{}' exists and is a directory", target.display())));
        }
        if !overwrite {
            return Err(ToolError::invalid(format!("'{}' already exists (use --overwrite)", target.display())));
        }
        fs::remove_file(target).map_err(|e| ToolError::from_io(e, target))?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| ToolError::from_io(e, parent))?;
    }
    Ok(())
}

/// Entries to pack. Directory sources contribute their contents with names
/// relative to the directory; file sources are stored under their file name.
pub fn collect_entries(sources: &[PathBuf], skip: &Path, filter: &EntryFilter, cancel: &CancelToken) -> Result<Vec<PackEntry>> {
    let mut entries = Vec::new();

    for src in sources {
        pathx::reject_system_path(src)?;
        let md = fs::symlink_metadata(src).map_err(|e| ToolError::from_io(e, src))?;

        if !md.is_dir() {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ToolError::invalid(format!("cannot pack '{}'", src.display())))?;
            if filter.accepts(&name, md.len()) {
                entries.push(pack_entry(src, name, &md));
            }
            continue;
        }

        let opts = WalkOptions { max_depth: -1, hidden: true, follow_links: false };
        Walker::new(src, opts).walk(cancel, |walked| {
            if walked.depth == 0 {
                return Ok(WalkControl::Continue);
            }
            if pathx::absolute(&walked.path) == skip {
                return Ok(WalkControl::Continue);
            }
            let Some(name) = pathx::relative_slash(&walked.path, src) else {
                return Ok(WalkControl::Continue);
            };
            let md = match walked.metadata() {
                Ok(md) => md,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WalkControl::Continue),
                Err(e) => return Err(ToolError::from_io(e, &walked.path)),
            };
            if walked.is_dir() {
                if filter.is_excluded(&name) {
                    return Ok(WalkControl::SkipDir);
                }
                if filter.accepts_dir(&name) {
                    entries.push(pack_entry(&walked.path, name, &md));
                }
                return Ok(WalkControl::Continue);
            }
            if filter.accepts(&name, md.len()) {
                entries.push(pack_entry(&walked.path, name, &md));
            }
            Ok(WalkControl::Continue)
        })?;
    }
    Ok(entries)
}

fn pack_entry(path: &Path, name: String, md: &fs::Metadata) -> PackEntry {
    let kind = if md.file_type().is_symlink() {
        EntryKind::Symlink
    } else if md.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    };
    PackEntry {
        source: path.to_path_buf(),
        name,
        kind,
        size: if kind == EntryKind::File { md.len() } else { 0 },
        mode: platform::mode_bits(md),
        modified: md.modified().ok(),
    }
}

/// Create `archive` from `sources`.
pub fn pack(
    archive: &Path,
    sources: &[PathBuf],
    opts: &ArchiveOptions,
    cancel: &CancelToken,
    progress: &ProgressTracker,
) -> Result<ArchiveReport> {
    let format = ArchiveFormat::detect(archive)?;
    if sources.is_empty() {
        return Err(ToolError::invalid("nothing to pack"));
    }
    if fs::symlink_metadata(archive).is_ok() && !opts.overwrite {
        return Err(ToolError::invalid(format!("'{}' already exists (use --overwrite)", archive.display())));
    }

    let ctx = Ctx::new(opts, cancel, progress)?;
    let entries = collect_entries(sources, &pathx::absolute(archive), &ctx.filter, cancel)?;
    if format.is_single_stream() {
        let files = entries.iter().filter(|e| e.kind == EntryKind::File).count();
        if entries.len() != 1 || files != 1 {
            return Err(ToolError::invalid(format!("{} archives hold exactly one regular file", format)));
        }
    }

    let files = entries.iter().filter(|e| e.kind == EntryKind::File).count() as u64;
    let total: u64 = entries.iter().map(|e| e.size).sum();
    progress.set_totals(files, total);
    debug!("packing {} entries ({} bytes) into {} ({})", entries.len(), total, archive.display(), format);

    let dir = match archive.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| ToolError::from_io(e, &dir))?;
    let tmp = NamedTempFile::new_in(&dir).map_err(|e| ToolError::from_io(e, &dir))?;

    let written = write_archive(format, tmp.as_file(), &entries, &ctx);
    match written {
        Ok(mut report) => {
            tmp.persist(archive).map_err(|e| ToolError::from_io(e.error, archive))?;
            progress.finish();
            report.format = Some(format.name());
            Ok(report)
        }
        Err(e) => {
            if opts.keep_partial {
                match tmp.persist(archive) {
                    Ok(_) => warn!("partial archive kept at {}", archive.display()),
                    Err(pe) => warn!("could not keep partial archive: {}", pe.error),
                }
            }
            Err(e)
        }
    }
}

fn write_archive(format: ArchiveFormat, file: &File, entries: &[PackEntry], ctx: &Ctx<'_>) -> Result<ArchiveReport> {
    let io_err = |e: io::Error| ToolError::from_io(e, "<archive>");
    match format {
        ArchiveFormat::Zip => self::zip::write(file, entries, ctx),
        ArchiveFormat::Tar => {
            let (w, report) = self::tar::write(BufWriter::new(file), entries, ctx)?;
            w.into_inner().map_err(|e| io_err(e.into_error()))?.sync_all().map_err(io_err)?;
            Ok(report)
        }
        ArchiveFormat::TarGz => {
            let encoder = GzEncoder::new(BufWriter::new(file), ctx.level.flate2());
            let (encoder, report) = self::tar::write(encoder, entries, ctx)?;
            let mut w = encoder.finish().map_err(io_err)?;
            w.flush().map_err(io_err)?;
            Ok(report)
        }
        ArchiveFormat::Gz | ArchiveFormat::Bz2 | ArchiveFormat::Zlib => {
            self::stream::compress(format, &entries[0], BufWriter::new(file), ctx)
        }
    }
}

/// Extract `archive` below `dest`.
pub fn unpack(
    archive: &Path,
    dest: &Path,
    opts: &ArchiveOptions,
    cancel: &CancelToken,
    progress: &ProgressTracker,
) -> Result<ArchiveReport> {
    let format = ArchiveFormat::detect(archive)?;
    let ctx = Ctx::new(opts, cancel, progress)?;
    let file = File::open(archive).map_err(|e| ToolError::from_io(e, archive))?;
    fs::create_dir_all(dest).map_err(|e| ToolError::from_io(e, dest))?;
    let _finish = scopeguard::guard((), |_| progress.finish());
    debug!("unpacking {} ({}) into {}", archive.display(), format, dest.display());

    let mut report = match format {
        ArchiveFormat::Zip => self::zip::extract(file, dest, &ctx),
        ArchiveFormat::Tar => self::tar::extract(BufReader::new(file), dest, &ctx),
        ArchiveFormat::TarGz => self::tar::extract(MultiGzDecoder::new(BufReader::new(file)), dest, &ctx),
        ArchiveFormat::Gz | ArchiveFormat::Bz2 | ArchiveFormat::Zlib => {
            self::stream::decompress(format, file, &self::stream::stripped_name(archive), dest, &ctx)
        }
    }?;
    report.format = Some(format.name());
    Ok(report)
}

/// List the entries of `archive` without extracting.
pub fn preview(archive: &Path) -> Result<Vec<ArchiveEntryInfo>> {
    let format = ArchiveFormat::detect(archive)?;
    let file = File::open(archive).map_err(|e| ToolError::from_io(e, archive))?;
    match format {
        ArchiveFormat::Zip => self::zip::list(file),
        ArchiveFormat::Tar => self::tar::list(BufReader::new(file)),
        ArchiveFormat::TarGz => self::tar::list(MultiGzDecoder::new(BufReader::new(file))),
        ArchiveFormat::Gz | ArchiveFormat::Bz2 | ArchiveFormat::Zlib => {
            let modified = file.metadata().ok().and_then(|m| m.modified().ok());
            self::stream::list(format, file, &self::stream::stripped_name(archive), modified)
        }
    }
}

/// Table plus a one-line summary.
pub fn render_preview(entries: &[ArchiveEntryInfo], style: TableStyle) -> String {
    let mut table = Table::new(["Type", "Size", "Unit", "ModTime", "Name"], style).align(1, Align::Right);
    let mut total = 0u64;
    for e in entries {
        let (value, unit) = if e.kind == EntryKind::Dir {
            ("-".to_string(), "")
        } else {
            humansize::split_size(e.size)
        };
        total += e.size;
        table.push_row(vec![
            e.kind.letter().to_string(),
            value,
            unit.to_string(),
            e.modified.clone().unwrap_or_else(|| "-".into()),
            e.name.clone(),
        ]);
    }
    format!("{}{} entries, {} total\n", table.render(), entries.len(), humansize::format_size(total))
}

pub(crate) fn format_system_time(t: SystemTime) -> String {
    chrono::DateTime::<chrono::Local>::from(t).format("%Y-%m-%d %H:%M").to_string()
}
