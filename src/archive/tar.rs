//! `.tar` and `.tar.gz` back-end. Compression is layered on by the caller.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use ::tar::{Archive, Builder, EntryType, Header};
use tracing::debug;

use super::{
    check_link_target, format_system_time, prepare_output, safe_join, ArchiveEntryInfo, ArchiveReport, Ctx,
    CountingReader, EntryKind, PackEntry,
};
use crate::error::{Result, ToolError};
use crate::platform;

/// Append every entry, returning the underlying writer once the trailer is
/// written.
pub(super) fn write<W: Write>(w: W, entries: &[PackEntry], ctx: &Ctx<'_>) -> Result<(W, ArchiveReport)> {
    let mut builder = Builder::new(w);
    builder.follow_symlinks(false);
    let mut report = ArchiveReport::default();

    for entry in entries {
        ctx.cancel.check()?;
        let io_err = |e: io::Error| ToolError::from_io(e, &entry.source);
        match entry.kind {
            EntryKind::Dir => builder.append_dir(&entry.name, &entry.source).map_err(io_err)?,
            EntryKind::Symlink => builder.append_path_with_name(&entry.source, &entry.name).map_err(io_err)?,
            EntryKind::File => {
                let file = File::open(&entry.source).map_err(io_err)?;
                let md = file.metadata().map_err(io_err)?;
                let mut header = Header::new_gnu();
                header.set_metadata(&md);
                builder
                    .append_data(&mut header, &entry.name, CountingReader::new(file, ctx.progress))
                    .map_err(io_err)?;
                ctx.progress.record_entry();
                report.bytes += md.len();
            }
        }
        report.entries += 1;
    }

    let w = builder.into_inner().map_err(|e| ToolError::from_io(e, "<archive>"))?;
    Ok((w, report))
}

pub(super) fn extract<R: Read>(r: R, dest: &Path, ctx: &Ctx<'_>) -> Result<ArchiveReport> {
    let mut archive = Archive::new(r);
    let mut report = ArchiveReport::default();
    let bad = |e: io::Error| ToolError::invalid(format!("tar: {}", e));

    for entry in archive.entries().map_err(bad)? {
        ctx.cancel.check()?;
        let mut entry = entry.map_err(bad)?;
        let name = entry.path().map_err(bad)?.to_string_lossy().replace('\\', "/");
        let size = entry.size();
        let kind = entry.header().entry_type();

        match kind {
            EntryType::Directory => {
                if ctx.filter.accepts_dir(&name) {
                    let out = safe_join(dest, &name, ctx.validate)?;
                    fs::create_dir_all(&out).map_err(|e| ToolError::from_io(e, &out))?;
                }
                continue;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::Symlink | EntryType::Link => {}
            other => {
                debug!("skipping tar entry '{}' of type {:?}", name, other);
                continue;
            }
        }

        if !ctx.filter.accepts(&name, size) {
            report.skipped += 1;
            continue;
        }
        let out = safe_join(dest, &name, ctx.validate)?;
        prepare_output(&out, ctx.overwrite)?;

        if kind == EntryType::Symlink || kind == EntryType::Link {
            let target = entry
                .link_name()
                .map_err(bad)?
                .ok_or_else(|| ToolError::invalid(format!("tar: link '{}' has no target", name)))?
                .into_owned();
            check_link_target(&name, &target, ctx.validate)?;
            if kind == EntryType::Link {
                // hard links name another archive member
                let src = safe_join(dest, &target.to_string_lossy(), ctx.validate)?;
                fs::hard_link(&src, &out).map_err(|e| ToolError::from_io(e, &out))?;
            } else {
                entry.unpack(&out).map_err(|e| ToolError::from_io(e, &out))?;
            }
        } else {
            let mode = entry.header().mode().ok();
            let mut out_file = File::create(&out).map_err(|e| ToolError::from_io(e, &out))?;
            let copied = io::copy(&mut CountingReader::new(&mut entry, ctx.progress), &mut out_file)
                .map_err(|e| ToolError::from_io(e, &out))?;
            report.bytes += copied;
            if let Some(m) = mode {
                platform::set_mode(&out, m & 0o7777).map_err(|e| ToolError::from_io(e, &out))?;
            }
        }
        ctx.progress.record_entry();
        report.entries += 1;
    }
    Ok(report)
}

pub(super) fn list<R: Read>(r: R) -> Result<Vec<ArchiveEntryInfo>> {
    let mut archive = Archive::new(r);
    let bad = |e: io::Error| ToolError::invalid(format!("tar: {}", e));
    let mut out = Vec::new();

    for entry in archive.entries().map_err(bad)? {
        let entry = entry.map_err(bad)?;
        let header = entry.header();
        let kind = match header.entry_type() {
            EntryType::Directory => EntryKind::Dir,
            EntryType::Symlink | EntryType::Link => EntryKind::Symlink,
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            _ => continue,
        };
        let modified = header
            .mtime()
            .ok()
            .map(|secs| format_system_time(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs)));
        out.push(ArchiveEntryInfo {
            name: entry.path().map_err(bad)?.to_string_lossy().trim_end_matches('/').to_string(),
            kind,
            size: entry.size(),
            compressed_size: None,
            modified,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::{ArchiveOptions, EntryFilter};
    use super::*;
    use crate::cancel::CancelToken;
    use crate::progress::ProgressTracker;
    use tempfile::tempdir;

    fn ctx<'a>(cancel: &'a CancelToken, progress: &'a ProgressTracker, opts: &ArchiveOptions) -> Ctx<'a> {
        Ctx {
            filter: EntryFilter::allow_all(),
            level: opts.level,
            overwrite: opts.overwrite,
            validate: !opts.no_validate,
            cancel,
            progress,
        }
    }

    fn hostile_tar(name: &str) -> Vec<u8> {
        let mut header = Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        // set_path refuses `..`, so write the raw name bytes
        let raw = &mut header.as_old_mut().name;
        raw[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();
        let mut builder = Builder::new(Vec::new());
        builder.append(&header, &b"evil"[..]).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn rejects_parent_components() {
        let dir = tempdir().unwrap();
        let data = hostile_tar("../escape.txt");
        let (cancel, progress) = (CancelToken::new(), ProgressTracker::disabled());
        let opts = ArchiveOptions::default();
        let err = extract(&data[..], &dir.path().join("out"), &ctx(&cancel, &progress, &opts)).unwrap_err();
        assert!(err.to_string().contains("unsafe path"));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn no_validate_accepts_parent_components() {
        let dir = tempdir().unwrap();
        let data = hostile_tar("../escape.txt");
        let (cancel, progress) = (CancelToken::new(), ProgressTracker::disabled());
        let opts = ArchiveOptions { no_validate: true, ..Default::default() };
        extract(&data[..], &dir.path().join("out"), &ctx(&cancel, &progress, &opts)).unwrap();
        assert_eq!(fs::read(dir.path().join("escape.txt")).unwrap(), b"evil");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_survive_a_round_trip() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();
        fs::write(tree.join("real"), b"data").unwrap();
        std::os::unix::fs::symlink("real", tree.join("link")).unwrap();

        let (cancel, progress) = (CancelToken::new(), ProgressTracker::disabled());
        let opts = ArchiveOptions::default();
        let c = ctx(&cancel, &progress, &opts);
        let entries = super::super::collect_entries(&[tree.clone()], Path::new("/nonexistent"), &c.filter, &cancel).unwrap();
        let (bytes, report) = write(Vec::new(), &entries, &c).unwrap();
        assert_eq!(report.entries, 2);

        let listed = list(&bytes[..]).unwrap();
        assert!(listed.iter().any(|e| e.name == "link" && e.kind == EntryKind::Symlink));

        let out = dir.path().join("out");
        extract(&bytes[..], &out, &c).unwrap();
        assert_eq!(fs::read_link(out.join("link")).unwrap(), Path::new("real"));
        assert_eq!(fs::read(out.join("link")).unwrap(), b"data");
    }
}
