//! # Hashing
//!
//! Single-file digests ([`checksum`]) with a read buffer sized to the file,
//! plus the command-level driver that turns user inputs into a manifest via
//! the concurrent [`pool`].

pub mod pool;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::bufpool::BufferPool;
use crate::cancel::CancelToken;
use crate::error::{ErrorList, Result, ToolError};
use crate::manifest::{ManifestFile, ManifestHeader, ManifestMode};
use crate::pathx;
use crate::walk::{WalkControl, WalkOptions, Walker};

pub use pool::{HashInput, HashPool, HashSummary};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Md5 => "md5",
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha512 => "sha512",
        }
    }

    /// Length of the hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgo::Md5 => 32,
            HashAlgo::Sha1 => 40,
            HashAlgo::Sha256 => 64,
            HashAlgo::Sha512 => 128,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(HashAlgo::Md5),
            "sha1" => Some(HashAlgo::Sha1),
            "sha256" => Some(HashAlgo::Sha256),
            "sha512" => Some(HashAlgo::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgo {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        HashAlgo::from_name(s).ok_or_else(|| ToolError::invalid(format!("unknown hash algorithm '{}'", s)))
    }
}

/// Incremental digest state for any [`HashAlgo`].
pub enum Digester {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Digester {
    pub fn new(algo: HashAlgo) -> Self {
        match algo {
            HashAlgo::Md5 => Digester::Md5(md5::Context::new()),
            HashAlgo::Sha1 => Digester::Sha1(Sha1::new()),
            HashAlgo::Sha256 => Digester::Sha256(Sha256::new()),
            HashAlgo::Sha512 => Digester::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Md5(c) => c.consume(data),
            Digester::Sha1(h) => h.update(data),
            Digester::Sha256(h) => h.update(data),
            Digester::Sha512(h) => h.update(data),
        }
    }

    /// Lower-case hex digest.
    pub fn finish_hex(self) -> String {
        match self {
            Digester::Md5(c) => format!("{:x}", c.compute()),
            Digester::Sha1(h) => format!("{:x}", h.finalize()),
            Digester::Sha256(h) => format!("{:x}", h.finalize()),
            Digester::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Read buffer size for a file of `len` bytes.
pub fn buffer_size_for(len: u64) -> usize {
    let size = match len {
        l if l < 32 * KIB => 32 * KIB,
        l if l < 128 * KIB => 64 * KIB,
        l if l < 512 * KIB => 128 * KIB,
        l if l < MIB => 256 * KIB,
        l if l < 4 * MIB => 512 * KIB,
        l if l < 16 * MIB => MIB,
        l if l < 64 * MIB => 2 * MIB,
        _ => 4 * MIB,
    };
    size as usize
}

/// Hash everything `reader` yields using `buf` as scratch space.
pub fn checksum_reader<R: Read>(reader: &mut R, algo: HashAlgo, buf: &mut [u8]) -> io::Result<String> {
    let mut digester = Digester::new(algo);
    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        digester.update(&buf[..n]);
    }
    Ok(digester.finish_hex())
}

/// Digest of the file at `path`. The digest is either fully computed or an
/// error is returned.
pub fn checksum(path: &Path, algo: HashAlgo) -> Result<String> {
    let mut file = File::open(path).map_err(|e| ToolError::from_io(e, path))?;
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut buf = BufferPool::global().get(buffer_size_for(len));
    checksum_reader(&mut file, algo, &mut buf).map_err(|e| ToolError::from_io(e, path))
}

/// Options for the `hash` command.
#[derive(Debug, Clone)]
pub struct HashOptions {
    pub paths: Vec<String>,
    pub algo: HashAlgo,
    pub recursive: bool,
    pub hidden: bool,
    /// Write a manifest instead of printing to stdout.
    pub write: bool,
    /// Manifest file name; defaults to `checksum.<algo>`.
    pub output: Option<PathBuf>,
    /// Write a LOCAL manifest (paths relative to the parent of the one root).
    pub local: bool,
    pub jobs: usize,
}

impl HashOptions {
    pub fn manifest_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from(format!("checksum.{}", self.algo.name())))
    }
}

/// LOCAL keys drop the first path segment, so a LOCAL manifest must come
/// from exactly one directory that has a parent.
fn local_root(roots: &[PathBuf]) -> Result<PathBuf> {
    let [root] = roots else {
        return Err(ToolError::invalid(format!("--local needs exactly one directory, got {} inputs", roots.len())));
    };
    let abs = pathx::absolute(root);
    if !abs.is_dir() {
        return Err(ToolError::invalid(format!("--local needs a directory, '{}' is not one", root.display())));
    }
    abs.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ToolError::invalid(format!("--local cannot hash the filesystem root '{}'", root.display())))
}

/// Resolve inputs to the list of files to hash.
///
/// Directories contribute their direct children, or their whole subtree when
/// `recursive` is set. `manifest` is the file being written, if any: it is
/// never hashed, and PORTABLE display paths are relative to its directory
/// (to the working directory when printing), or absolute when a file lies
/// outside it. In LOCAL mode display paths start with the root's directory
/// name and the returned base path is the root's parent.
pub fn collect_inputs(opts: &HashOptions, manifest: Option<&Path>, cancel: &CancelToken) -> Result<(Vec<HashInput>, Option<PathBuf>)> {
    let raw = if opts.paths.is_empty() { vec![".".to_string()] } else { opts.paths.clone() };
    let roots = pathx::expand(&raw)?;
    let skip = manifest.map(pathx::absolute);

    let base = if opts.local {
        local_root(&roots)?
    } else {
        skip.as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| pathx::absolute(Path::new(".")))
    };
    let display_for = |path: &Path| -> String {
        let abs = pathx::absolute(path);
        pathx::relative_slash(&abs, &base)
            .filter(|rel| !rel.is_empty())
            .unwrap_or_else(|| abs.to_string_lossy().into_owned())
    };

    let mut inputs = Vec::new();
    for root in roots {
        pathx::reject_system_path(&root)?;
        let md = fs::symlink_metadata(&root).map_err(|e| ToolError::from_io(e, &root))?;

        if md.file_type().is_symlink() {
            debug!("skipping symlink {}", root.display());
            continue;
        }
        if md.is_file() {
            inputs.push(HashInput { path: root.clone(), display: display_for(&root) });
            continue;
        }

        let walk_opts = WalkOptions {
            max_depth: if opts.recursive { -1 } else { 1 },
            hidden: opts.hidden,
            follow_links: false,
        };
        Walker::new(&root, walk_opts).walk(cancel, |entry| {
            if entry.file_type.is_file() {
                let is_skipped = skip.as_ref().map(|s| pathx::absolute(&entry.path) == *s).unwrap_or(false);
                if !is_skipped {
                    inputs.push(HashInput { path: entry.path.clone(), display: display_for(&entry.path) });
                }
            }
            Ok(WalkControl::Continue)
        })?;
    }

    Ok((inputs, opts.local.then_some(base)))
}

/// Result of the `hash` command.
#[derive(Debug)]
pub struct HashReport {
    pub summary: HashSummary,
    pub manifest: Option<PathBuf>,
}

/// Run the `hash` command: collect inputs, then stream digests either to
/// `stdout` or to a manifest file with a header.
pub fn hash_paths(opts: &HashOptions, stdout: &mut (dyn Write + Send), cancel: &CancelToken) -> std::result::Result<HashReport, ErrorList> {
    let manifest_path = opts.write.then(|| opts.manifest_path());
    let (inputs, base) = collect_inputs(opts, manifest_path.as_deref(), cancel)?;
    let pool = HashPool::new(opts.algo, opts.jobs, cancel.clone());

    match manifest_path {
        Some(path) => {
            let mode = if opts.local { ManifestMode::Local } else { ManifestMode::Portable };
            let base = base.map(|b| b.to_string_lossy().into_owned());
            let header = ManifestHeader::now(opts.algo, mode, base);
            let mut file = ManifestFile::create(&path, &header).map_err(ErrorList::from)?;
            let result = pool.run(inputs, &mut file);
            // flush even when the pool failed so the partial manifest is readable
            let closed = file.close();
            let summary = result?;
            closed.map_err(ErrorList::from)?;
            Ok(HashReport { summary, manifest: Some(path) })
        }
        None => {
            let summary = pool.run(inputs, stdout)?;
            Ok(HashReport { summary, manifest: None })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn known_digests() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("a.txt");
        fs::write(&p, b"hi").unwrap();
        assert_eq!(checksum(&p, HashAlgo::Md5).unwrap(), "49f68a5c8493ec2c0bf489821c21fc3b");
        assert_eq!(checksum(&p, HashAlgo::Sha1).unwrap(), "c22b5f9178342609428d6f51b2c5af4c0bde6a42");
        assert_eq!(
            checksum(&p, HashAlgo::Sha256).unwrap(),
            "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4"
        );
        assert_eq!(checksum(&p, HashAlgo::Sha512).unwrap().len(), 128);
    }

    #[test]
    fn empty_file_digest() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("b.txt");
        fs::write(&p, b"").unwrap();
        assert_eq!(checksum(&p, HashAlgo::Md5).unwrap(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = checksum(&dir.path().join("nope"), HashAlgo::Md5).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn buffer_table() {
        assert_eq!(buffer_size_for(0), 32 * 1024);
        assert_eq!(buffer_size_for(32 * 1024), 64 * 1024);
        assert_eq!(buffer_size_for(600 * 1024), 256 * 1024);
        assert_eq!(buffer_size_for(MIB), 512 * 1024);
        assert_eq!(buffer_size_for(20 * MIB), 2 * 1024 * 1024);
        assert_eq!(buffer_size_for(64 * MIB), 4 * 1024 * 1024);
    }

    #[test]
    fn algo_names_round_trip() {
        for algo in [HashAlgo::Md5, HashAlgo::Sha1, HashAlgo::Sha256, HashAlgo::Sha512] {
            assert_eq!(HashAlgo::from_name(algo.name()), Some(algo));
        }
        assert!("crc32".parse::<HashAlgo>().is_err());
    }
}
