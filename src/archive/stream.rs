//! Single-file `.gz`, `.bz2` and `.zlib` streams.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::GzBuilder;
use tempfile::NamedTempFile;
use tracing::debug;

use super::{
    format_system_time, prepare_output, safe_join, ArchiveEntryInfo, ArchiveFormat, ArchiveReport, Ctx,
    CountingReader, EntryKind, PackEntry,
};
use crate::error::{Result, ToolError};

/// Output name for a stream archive: its file name minus the compression
/// extension, or `out` when nothing is left.
pub(super) fn stripped_name(archive: &Path) -> String {
    let name = archive.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    let stem_len = [".gz", ".bz2", ".bzip2", ".zlib"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| name.len() - ext.len())
        .unwrap_or(name.len());
    let stem = &name[..stem_len];
    if stem.is_empty() {
        "out".to_string()
    } else {
        stem.to_string()
    }
}

fn decoder<'a, R: Read + 'a>(format: ArchiveFormat, r: R) -> Result<Box<dyn Read + 'a>> {
    let r = BufReader::new(r);
    Ok(match format {
        ArchiveFormat::Gz => Box::new(MultiGzDecoder::new(r)),
        ArchiveFormat::Bz2 => Box::new(BzDecoder::new(r)),
        ArchiveFormat::Zlib => Box::new(ZlibDecoder::new(r)),
        other => return Err(ToolError::Unsupported(format!("{} is not a single-file format", other))),
    })
}

pub(super) fn compress<W: Write>(format: ArchiveFormat, entry: &PackEntry, w: W, ctx: &Ctx<'_>) -> Result<ArchiveReport> {
    ctx.cancel.check()?;
    let src = &entry.source;
    let io_err = |e: io::Error| ToolError::from_io(e, src);
    let mut input = CountingReader::new(File::open(src).map_err(io_err)?, ctx.progress);

    let (copied, mut w) = match format {
        ArchiveFormat::Gz => {
            let mut enc = GzBuilder::new().filename(entry.name.as_bytes()).write(w, ctx.level.flate2());
            let n = io::copy(&mut input, &mut enc).map_err(io_err)?;
            (n, enc.finish().map_err(io_err)?)
        }
        ArchiveFormat::Bz2 => {
            let mut enc = BzEncoder::new(w, ctx.level.bzip2());
            let n = io::copy(&mut input, &mut enc).map_err(io_err)?;
            (n, enc.finish().map_err(io_err)?)
        }
        ArchiveFormat::Zlib => {
            let mut enc = ZlibEncoder::new(w, ctx.level.flate2());
            let n = io::copy(&mut input, &mut enc).map_err(io_err)?;
            (n, enc.finish().map_err(io_err)?)
        }
        other => return Err(ToolError::Unsupported(format!("{} is not a single-file format", other))),
    };
    w.flush().map_err(io_err)?;
    ctx.progress.record_entry();
    Ok(ArchiveReport { format: None, entries: 1, bytes: copied, skipped: 0 })
}

pub(super) fn decompress(format: ArchiveFormat, file: File, name: &str, dest: &Path, ctx: &Ctx<'_>) -> Result<ArchiveReport> {
    ctx.cancel.check()?;
    if !ctx.filter.accepts_name(name) {
        return Ok(ArchiveReport { format: None, entries: 0, bytes: 0, skipped: 1 });
    }
    let out = safe_join(dest, name, ctx.validate)?;
    let parent = out.parent().unwrap_or(dest);
    fs::create_dir_all(parent).map_err(|e| ToolError::from_io(e, parent))?;

    // the size is only known once decoded, so size rules are applied before
    // the temp file replaces anything
    let mut input = CountingReader::new(decoder(format, file)?, ctx.progress);
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| ToolError::from_io(e, parent))?;
    let copied = io::copy(&mut input, tmp.as_file_mut()).map_err(|e| ToolError::from_io(e, &out))?;
    if !ctx.filter.accepts_size(copied) {
        debug!("{}: {} bytes is outside the size bounds", name, copied);
        return Ok(ArchiveReport { format: None, entries: 0, bytes: 0, skipped: 1 });
    }

    prepare_output(&out, ctx.overwrite)?;
    tmp.persist(&out).map_err(|e| ToolError::from_io(e.error, &out))?;
    ctx.progress.record_entry();
    Ok(ArchiveReport { format: None, entries: 1, bytes: copied, skipped: 0 })
}

/// Decompresses to a sink to learn the original size.
pub(super) fn list(format: ArchiveFormat, file: File, name: &str, modified: Option<SystemTime>) -> Result<Vec<ArchiveEntryInfo>> {
    let compressed = file.metadata().ok().map(|m| m.len());
    let mut input = decoder(format, file)?;
    let size = io::copy(&mut input, &mut io::sink()).map_err(|e| ToolError::invalid(format!("{}: {}", format, e)))?;
    Ok(vec![ArchiveEntryInfo {
        name: name.to_string(),
        kind: EntryKind::File,
        size,
        compressed_size: compressed,
        modified: modified.map(format_system_time),
    }])
}
