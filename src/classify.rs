//! File-type classification and extension-based coloring.
//!
//! Every entry gets exactly one [`FileTag`]. Colors are picked from the tag
//! first (directories, links, executables, empty files, devices) and from the
//! static extension tables otherwise.

use std::fs::Metadata;
use std::path::Path;

use colored::{ColoredString, Colorize};
use serde::Serialize;

/// Enumerated file-type label applied to every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FileTag {
    Dir,
    Symlink,
    Socket,
    Pipe,
    BlockDev,
    CharDev,
    Executable,
    Empty,
    File,
    Unknown,
}

impl FileTag {
    /// One-letter code used in `--type` filters and the `Type` column.
    pub fn letter(self) -> char {
        match self {
            FileTag::Dir => 'd',
            FileTag::Symlink => 'l',
            FileTag::Socket => 's',
            FileTag::Pipe => 'p',
            FileTag::BlockDev => 'b',
            FileTag::CharDev => 'c',
            FileTag::Executable => 'x',
            FileTag::Empty => 'e',
            FileTag::File => 'f',
            FileTag::Unknown => '?',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileTag::Dir => "dir",
            FileTag::Symlink => "link",
            FileTag::Socket => "socket",
            FileTag::Pipe => "pipe",
            FileTag::BlockDev => "block",
            FileTag::CharDev => "char",
            FileTag::Executable => "exec",
            FileTag::Empty => "empty",
            FileTag::File => "file",
            FileTag::Unknown => "?",
        }
    }

    /// Regular files, whatever their size or execute bits.
    pub fn is_regular(self) -> bool {
        matches!(self, FileTag::File | FileTag::Executable | FileTag::Empty)
    }

    pub fn is_device(self) -> bool {
        matches!(self, FileTag::BlockDev | FileTag::CharDev | FileTag::Socket | FileTag::Pipe)
    }

    /// Does a `--type` letter select this tag? `f` covers every regular file.
    pub fn matches_letter(self, letter: char) -> bool {
        match letter {
            'f' => self.is_regular(),
            other => self.letter() == other,
        }
    }
}

/// Letters accepted by `--type`.
pub const TYPE_LETTERS: &str = "fdlxespbc";

/// Classify an entry from its `symlink_metadata`.
pub fn classify(path: &Path, md: &Metadata) -> FileTag {
    let ft = md.file_type();
    if ft.is_symlink() {
        return FileTag::Symlink;
    }
    if ft.is_dir() {
        return FileTag::Dir;
    }
    if let Some(tag) = special_tag(md) {
        return tag;
    }
    if ft.is_file() {
        if windows_link_policy(path) {
            return FileTag::Symlink;
        }
        if md.len() == 0 {
            return FileTag::Empty;
        }
        if is_executable(path, md) {
            return FileTag::Executable;
        }
        return FileTag::File;
    }
    FileTag::Unknown
}

#[cfg(unix)]
fn special_tag(md: &Metadata) -> Option<FileTag> {
    use std::os::unix::fs::FileTypeExt;
    let ft = md.file_type();
    if ft.is_socket() {
        Some(FileTag::Socket)
    } else if ft.is_fifo() {
        Some(FileTag::Pipe)
    } else if ft.is_block_device() {
        Some(FileTag::BlockDev)
    } else if ft.is_char_device() {
        Some(FileTag::CharDev)
    } else {
        None
    }
}

#[cfg(not(unix))]
fn special_tag(_md: &Metadata) -> Option<FileTag> {
    None
}

/// Any execute bit on a regular file.
#[cfg(unix)]
pub fn is_executable(_path: &Path, md: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    md.is_file() && md.permissions().mode() & 0o111 != 0
}

/// Extension allowlist.
#[cfg(not(unix))]
pub fn is_executable(path: &Path, md: &Metadata) -> bool {
    md.is_file() && WINDOWS_EXEC_EXTS.contains(&extension_of(path).as_str())
}

#[cfg(not(unix))]
const WINDOWS_EXEC_EXTS: &[&str] = &[".exe", ".bat", ".cmd", ".ps1", ".psm1", ".msi"];

// Shell shortcuts count as links on Windows.
#[cfg(windows)]
fn windows_link_policy(path: &Path) -> bool {
    matches!(extension_of(path).as_str(), ".lnk" | ".url")
}

#[cfg(not(windows))]
fn windows_link_policy(_path: &Path) -> bool {
    false
}

/// Lower-cased extension with a leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{}", ext.to_ascii_lowercase()),
        _ => String::new(),
    }
}

/// Fixed color classes used by every printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorClass {
    Blue,
    Cyan,
    Green,
    Yellow,
    Red,
    Magenta,
    Gray,
    White,
    Default,
}

const GREEN_EXTS: &[&str] = &[
    ".sh", ".bash", ".zsh", ".fish", ".py", ".rb", ".pl", ".php", ".js", ".mjs", ".ts", ".go", ".rs", ".c", ".h",
    ".cpp", ".hpp", ".cc", ".java", ".kt", ".swift", ".lua", ".exe", ".bat", ".cmd", ".ps1", ".psm1", ".msi",
    ".jar", ".bin", ".app", ".com",
];

const YELLOW_EXTS: &[&str] = &[
    ".md", ".txt", ".rst", ".doc", ".docx", ".pdf", ".odt", ".rtf", ".tex", ".json", ".yaml", ".yml", ".toml",
    ".ini", ".cfg", ".conf", ".xml", ".csv", ".tsv", ".log", ".lock", ".env", ".sql", ".html", ".htm", ".css",
];

const RED_EXTS: &[&str] = &[
    ".zip", ".tar", ".gz", ".tgz", ".bz2", ".bzip2", ".xz", ".zst", ".7z", ".rar", ".zlib", ".lz", ".lzma", ".iso",
    ".dmg", ".deb", ".rpm", ".apk", ".cab",
];

const MAGENTA_EXTS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".svg", ".webp", ".ico", ".tif", ".tiff", ".heic", ".psd", ".mp3",
    ".wav", ".flac", ".ogg", ".aac", ".m4a", ".mp4", ".mkv", ".avi", ".mov", ".webm", ".wmv", ".flv",
];

/// Extensionless file names that still deserve a color.
const YELLOW_NAMES: &[&str] = &[
    "makefile", "dockerfile", "license", "licence", "readme", "changelog", "authors", "contributing", "vagrantfile",
    "procfile", "gemfile", "rakefile", "justfile", "cmakelists.txt",
];

/// Color class for an extension (leading dot, any case).
pub fn color_for_extension(ext: &str) -> ColorClass {
    let ext = ext.to_ascii_lowercase();
    let ext = ext.as_str();
    if GREEN_EXTS.contains(&ext) {
        ColorClass::Green
    } else if YELLOW_EXTS.contains(&ext) {
        ColorClass::Yellow
    } else if RED_EXTS.contains(&ext) {
        ColorClass::Red
    } else if MAGENTA_EXTS.contains(&ext) {
        ColorClass::Magenta
    } else {
        ColorClass::Default
    }
}

/// Color class for a bare file name, checking the special-name table first.
pub fn color_for_name(name: &str) -> ColorClass {
    let lower = name.to_ascii_lowercase();
    if YELLOW_NAMES.contains(&lower.as_str()) {
        return ColorClass::Yellow;
    }
    color_for_extension(&extension_of(Path::new(name)))
}

/// Tag wins over extension.
pub fn color_for(tag: FileTag, name: &str) -> ColorClass {
    match tag {
        FileTag::Dir => ColorClass::Blue,
        FileTag::Symlink => ColorClass::Cyan,
        FileTag::Executable => ColorClass::Green,
        FileTag::Empty => ColorClass::Gray,
        FileTag::BlockDev | FileTag::CharDev | FileTag::Socket | FileTag::Pipe => ColorClass::Yellow,
        FileTag::File | FileTag::Unknown => color_for_name(name),
    }
}

pub fn paint(text: &str, class: ColorClass) -> ColoredString {
    match class {
        ColorClass::Blue => text.blue().bold(),
        ColorClass::Cyan => text.cyan(),
        ColorClass::Green => text.green(),
        ColorClass::Yellow => text.yellow(),
        ColorClass::Red => text.red(),
        ColorClass::Magenta => text.magenta(),
        ColorClass::Gray => text.bright_black(),
        ColorClass::White => text.white(),
        ColorClass::Default => text.normal(),
    }
}

/// Paint `text` the way an entry named `name` with `tag` is painted.
pub fn paint_entry(text: &str, tag: FileTag, name: &str) -> ColoredString {
    paint(text, color_for(tag, name))
}

/// Nerd-font style icon for `--icons`.
pub fn icon_for(tag: FileTag, name: &str) -> &'static str {
    match tag {
        FileTag::Dir => "\u{f115}",
        FileTag::Symlink => "\u{f0c1}",
        FileTag::Executable => "\u{f489}",
        t if t.is_device() => "\u{f0a0}",
        _ => match color_for_name(name) {
            ColorClass::Red => "\u{f410}",
            ColorClass::Magenta => "\u{f1c5}",
            ColorClass::Yellow => "\u{f15c}",
            ColorClass::Green => "\u{f121}",
            _ => "\u{f15b}",
        },
    }
}
