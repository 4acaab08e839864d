//! `.zip` back-end.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

use ::zip::write::FileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};
use tracing::debug;

use super::{
    check_link_target, prepare_output, safe_join, ArchiveEntryInfo, ArchiveReport, CompressionLevel, Ctx,
    CountingReader, EntryKind, PackEntry,
};
use crate::error::{Result, ToolError};
use crate::platform;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn options_for(level: CompressionLevel) -> FileOptions {
    let base = FileOptions::default();
    match level {
        CompressionLevel::None => base.compression_method(CompressionMethod::Stored),
        CompressionLevel::Default => base.compression_method(CompressionMethod::Deflated),
        CompressionLevel::Fast | CompressionLevel::Huffman => {
            base.compression_method(CompressionMethod::Deflated).compression_level(Some(1))
        }
        CompressionLevel::Best => base.compression_method(CompressionMethod::Deflated).compression_level(Some(9)),
    }
}

pub(super) fn write<W: Write + Seek>(w: W, entries: &[PackEntry], ctx: &Ctx<'_>) -> Result<ArchiveReport> {
    let mut zip = ZipWriter::new(w);
    let base = options_for(ctx.level);
    let mut report = ArchiveReport::default();

    for entry in entries {
        ctx.cancel.check()?;
        let opts = base.unix_permissions(entry.mode & 0o7777);
        match entry.kind {
            EntryKind::Dir => zip.add_directory(entry.name.clone(), opts)?,
            EntryKind::Symlink => {
                let target = fs::read_link(&entry.source).map_err(|e| ToolError::from_io(e, &entry.source))?;
                zip.add_symlink(entry.name.clone(), target.to_string_lossy(), opts)?;
            }
            EntryKind::File => {
                let file = File::open(&entry.source).map_err(|e| ToolError::from_io(e, &entry.source))?;
                zip.start_file(entry.name.clone(), opts)?;
                let copied = io::copy(&mut CountingReader::new(file, ctx.progress), &mut zip)
                    .map_err(|e| ToolError::from_io(e, &entry.source))?;
                ctx.progress.record_entry();
                report.bytes += copied;
            }
        }
        report.entries += 1;
    }
    zip.finish()?;
    Ok(report)
}

fn is_symlink_mode(mode: Option<u32>) -> bool {
    mode.map(|m| m & S_IFMT == S_IFLNK).unwrap_or(false)
}

pub(super) fn extract<R: Read + Seek>(r: R, dest: &Path, ctx: &Ctx<'_>) -> Result<ArchiveReport> {
    let mut archive = ZipArchive::new(r)?;
    let mut report = ArchiveReport::default();

    let mut total = 0u64;
    for i in 0..archive.len() {
        total += archive.by_index_raw(i)?.size();
    }
    ctx.progress.set_totals(archive.len() as u64, total);

    for i in 0..archive.len() {
        ctx.cancel.check()?;
        let mut file = archive.by_index(i)?;
        let name = file.name().replace('\\', "/");
        let size = file.size();

        if file.is_dir() {
            if ctx.filter.accepts_dir(&name) {
                let out = safe_join(dest, &name, ctx.validate)?;
                fs::create_dir_all(&out).map_err(|e| ToolError::from_io(e, &out))?;
            }
            continue;
        }
        if !ctx.filter.accepts(&name, size) {
            report.skipped += 1;
            continue;
        }

        let out = safe_join(dest, &name, ctx.validate)?;
        prepare_output(&out, ctx.overwrite)?;
        let mode = file.unix_mode();

        if is_symlink_mode(mode) {
            let mut target = String::new();
            file.read_to_string(&mut target).map_err(|e| ToolError::from_io(e, &out))?;
            check_link_target(&name, Path::new(&target), ctx.validate)?;
            make_symlink(&target, &out)?;
        } else {
            let mut out_file = File::create(&out).map_err(|e| ToolError::from_io(e, &out))?;
            let copied = io::copy(&mut CountingReader::new(&mut file, ctx.progress), &mut out_file)
                .map_err(|e| ToolError::from_io(e, &out))?;
            report.bytes += copied;
            if let Some(m) = mode {
                platform::set_mode(&out, m & 0o7777).map_err(|e| ToolError::from_io(e, &out))?;
            }
        }
        ctx.progress.record_entry();
        report.entries += 1;
    }
    debug!("extracted {} zip entries", report.entries);
    Ok(report)
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| ToolError::from_io(e, link))
}

/// Symlinks need privileges on Windows; store the target as a small file.
#[cfg(not(unix))]
fn make_symlink(target: &str, link: &Path) -> Result<()> {
    fs::write(link, target.as_bytes()).map_err(|e| ToolError::from_io(e, link))
}

pub(super) fn list<R: Read + Seek>(r: R) -> Result<Vec<ArchiveEntryInfo>> {
    let mut archive = ZipArchive::new(r)?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        let kind = if file.is_dir() {
            EntryKind::Dir
        } else if is_symlink_mode(file.unix_mode()) {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };
        let dt = file.last_modified();
        out.push(ArchiveEntryInfo {
            name: file.name().trim_end_matches('/').to_string(),
            kind,
            size: file.size(),
            compressed_size: Some(file.compressed_size()),
            modified: Some(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}",
                dt.year(),
                dt.month(),
                dt.day(),
                dt.hour(),
                dt.minute()
            )),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symlink_mode_detection() {
        assert!(is_symlink_mode(Some(0o120777)));
        assert!(!is_symlink_mode(Some(0o100644)));
        assert!(!is_symlink_mode(None));
    }
}
