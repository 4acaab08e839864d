//! Per-OS file attributes.
//!
//! On Unix hidden means a dot-prefixed basename and ownership is resolved
//! through the user/group databases. On Windows the HIDDEN and READONLY
//! attribute bits are consulted as well, and ownership is reported as `?`.
//!
//! Nothing here propagates errors: lookups that fail fall back to `false`
//! or `"?"`.

use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Placeholder for unknown owner or group.
pub const UNKNOWN_OWNER: &str = "?";

/// Returns true for dot-files (other than `.` / `..`) and, on Windows, for
/// entries carrying the HIDDEN attribute.
pub fn is_hidden(path: &Path) -> bool {
    if has_dot_prefix(path) {
        return true;
    }
    #[cfg(windows)]
    {
        if let Ok(md) = std::fs::symlink_metadata(path) {
            return has_attribute(&md, FILE_ATTRIBUTE_HIDDEN);
        }
    }
    false
}

/// Name-only half of [`is_hidden`], usable without touching the filesystem.
pub fn has_dot_prefix(path: &Path) -> bool {
    // `file_name` is None for `.`, `..`, `/` and drive roots such as `C:\`.
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with('.') && name != "." && name != ".." && !is_drive_root(name),
        None => false,
    }
}

fn is_drive_root(name: &str) -> bool {
    let b = name.as_bytes();
    (b.len() == 2 || (b.len() == 3 && (b[2] == b'\\' || b[2] == b'/'))) && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// True if nobody may write the entry (Unix) or the READONLY attribute is set (Windows).
pub fn is_readonly(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(md) => readonly_from_metadata(&md),
        Err(_) => false,
    }
}

#[cfg(unix)]
pub fn readonly_from_metadata(md: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o222 == 0
}

#[cfg(windows)]
pub fn readonly_from_metadata(md: &Metadata) -> bool {
    has_attribute(md, FILE_ATTRIBUTE_READONLY)
}

#[cfg(not(any(unix, windows)))]
pub fn readonly_from_metadata(md: &Metadata) -> bool {
    md.permissions().readonly()
}

/// Owner and group names for `path`, `("?", "?")` when unavailable.
pub fn get_owner(path: &Path) -> (String, String) {
    match std::fs::symlink_metadata(path) {
        Ok(md) => owner_from_metadata(&md),
        Err(_) => (UNKNOWN_OWNER.to_string(), UNKNOWN_OWNER.to_string()),
    }
}

#[cfg(unix)]
pub fn owner_from_metadata(md: &Metadata) -> (String, String) {
    use std::os::unix::fs::MetadataExt;
    let user = uzers::get_user_by_uid(md.uid())
        .map(|u| u.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| UNKNOWN_OWNER.to_string());
    let group = uzers::get_group_by_gid(md.gid())
        .map(|g| g.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| UNKNOWN_OWNER.to_string());
    (user, group)
}

#[cfg(not(unix))]
pub fn owner_from_metadata(_md: &Metadata) -> (String, String) {
    (UNKNOWN_OWNER.to_string(), UNKNOWN_OWNER.to_string())
}

/// Unix permission bits. Windows synthesizes them from the READONLY bit and
/// the entry kind so listings stay comparable across platforms.
#[cfg(unix)]
pub fn mode_bits(md: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn mode_bits(md: &Metadata) -> u32 {
    let base = if md.is_dir() { 0o755 } else { 0o644 };
    if md.permissions().readonly() {
        base & !0o222
    } else {
        base
    }
}

/// Set POSIX permission bits on Unix.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// No-op on Windows: POSIX permission bits are not preserved.
#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(windows)]
const FILE_ATTRIBUTE_READONLY: u32 = 0x1;
#[cfg(windows)]
const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

#[cfg(windows)]
fn has_attribute(md: &Metadata, attr: u32) -> bool {
    use std::os::windows::fs::MetadataExt;
    md.file_attributes() & attr != 0
}
