//! Common types shared by the scanners and the printers.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

use crate::classify::{self, FileTag};
use crate::platform;

/// A scanned file-system entry. Created by the walkers and the list scanner,
/// never mutated afterwards.
#[derive(Serialize, Debug, Clone)]
pub struct FileEntry {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Name shown to the user (usually the base name).
    pub name: String,
    pub tag: FileTag,
    pub size: u64,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
    /// Unix permission bits (synthesized on Windows).
    pub mode: u32,
    pub owner: String,
    pub group: String,
    /// Lower-cased extension with a leading dot, empty when absent.
    pub extension: String,
    /// Target of a symbolic link, as stored in the link.
    pub link_target: Option<PathBuf>,
}

impl FileEntry {
    /// Stat `path` (without following links) and build an entry.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let md = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(path, &md))
    }

    /// Build an entry from metadata obtained with `symlink_metadata`.
    pub fn from_metadata(path: &Path, md: &Metadata) -> Self {
        let tag = classify::classify(path, md);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let (owner, group) = platform::owner_from_metadata(md);
        let link_target = if md.file_type().is_symlink() { fs::read_link(path).ok() } else { None };
        FileEntry {
            path: path.to_path_buf(),
            extension: classify::extension_of(path),
            name,
            tag,
            size: md.len(),
            modified: md.modified().ok(),
            mode: platform::mode_bits(md),
            owner,
            group,
            link_target,
        }
    }

    /// Override the display name (e.g. `.` for a directory listed as itself).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_dir(&self) -> bool {
        self.tag == FileTag::Dir
    }

    /// Resolved target of a symlink, relative targets joined to the link's parent.
    pub fn resolved_target(&self) -> Option<PathBuf> {
        let target = self.link_target.as_ref()?;
        if target.is_absolute() {
            Some(target.clone())
        } else {
            Some(self.path.parent().unwrap_or_else(|| Path::new("")).join(target))
        }
    }
}
