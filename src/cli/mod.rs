//! Command-line surface.
//!
//! `clap` parses into [`Args`]; each subcommand converts its flags into the
//! options struct of the subsystem that runs it, so no subsystem ever sees
//! clap types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::action::{Action, ActionFlags};
use crate::archive::{ArchiveOptions, CompressionLevel, FilterRules};
use crate::error::{Result, ToolError};
use crate::find::{self, FindOptions};
use crate::hash::{HashAlgo, HashOptions};
use crate::humansize;
use crate::list::{ListOptions, SortKey};
use crate::matcher::FindCriteria;
use crate::pretty::TableStyle;
use crate::progress::ProgressStyle;
use crate::size::SizeOptions;
use crate::verify::CheckOptions;
use crate::watch::WatchOptions;

/// Environment variable overriding the default worker count.
pub const JOBS_ENV: &str = "FTK_JOBS";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// When to color output.
    #[arg(short, long, value_enum, default_value_t = ColorChoice::Auto, global = true)]
    pub color: ColorChoice,

    /// Log debug diagnostics to stderr (FTK_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Compute digests of files, or write them to a manifest.
    Hash(HashArgs),
    /// Verify a manifest against a directory tree.
    Check(CheckArgs),
    /// Compare two trees, or a manifest against a tree.
    Diff(DiffArgs),
    /// Locate entries below one or more paths.
    Find(FindArgs),
    /// List directory contents.
    #[command(alias = "ls")]
    List(ListArgs),
    /// Report the size of files and directories.
    #[command(alias = "du")]
    Size(SizeArgs),
    /// Create an archive.
    #[command(alias = "c")]
    Pack(PackArgs),
    /// Extract an archive.
    #[command(alias = "x")]
    Unpack(UnpackArgs),
    /// Show the contents of an archive without extracting it.
    #[command(alias = "l")]
    Preview(PreviewArgs),
    /// Run a command periodically.
    Watch(WatchArgs),
}

/// Explicit `--jobs`, then `FTK_JOBS`, then `0` (auto).
pub fn resolve_jobs(flag: Option<usize>) -> usize {
    flag.or_else(|| std::env::var(JOBS_ENV).ok().and_then(|v| v.trim().parse().ok())).unwrap_or(0)
}

#[derive(ClapArgs, Clone, Debug)]
pub struct HashArgs {
    /// Files, directories or glob patterns.
    pub paths: Vec<String>,

    /// Digest algorithm.
    #[arg(short = 't', long = "type", value_enum, default_value_t = HashAlgo::Md5)]
    pub algo: HashAlgo,

    /// Descend into subdirectories.
    #[arg(short, long = "recursion", visible_alias = "recursive")]
    pub recursive: bool,

    /// Include hidden entries.
    #[arg(short = 'H', long)]
    pub hidden: bool,

    /// Write a manifest (`checksum.<algo>` unless --output is given).
    #[arg(short, long)]
    pub write: bool,

    /// Manifest path; implies --write.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Record paths relative to the parent of the hashed root.
    #[arg(long)]
    pub local: bool,

    /// Worker threads [0 = 2 x CPU, max 20].
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

impl HashArgs {
    pub fn into_options(self) -> HashOptions {
        HashOptions {
            write: self.write || self.output.is_some(),
            paths: self.paths,
            algo: self.algo,
            recursive: self.recursive,
            hidden: self.hidden,
            output: self.output,
            local: self.local,
            jobs: resolve_jobs(self.jobs),
        }
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct CheckArgs {
    /// Manifest file.
    pub manifest: PathBuf,

    /// Directory to verify against.
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Only print failures and the summary.
    #[arg(short, long)]
    pub quiet: bool,
}

impl CheckArgs {
    pub fn into_options(self) -> CheckOptions {
        CheckOptions { manifest: self.manifest, dir: self.dir, quiet: self.quiet }
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct DiffArgs {
    /// A directory, or a manifest file.
    pub left: PathBuf,

    /// The directory to compare with.
    pub right: PathBuf,

    /// Digest algorithm for directory comparisons.
    #[arg(short = 't', long = "type", value_enum, default_value_t = HashAlgo::Md5)]
    pub algo: HashAlgo,

    /// Include hidden entries.
    #[arg(short = 'H', long)]
    pub hidden: bool,

    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Only print differences and the summary.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct FindArgs {
    /// Starting points.
    #[arg(default_value = ".")]
    pub roots: Vec<String>,

    /// Match on the entry name.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Match on the whole path.
    #[arg(short, long)]
    pub path: Option<String>,

    /// Skip entries whose name matches.
    #[arg(long)]
    pub ex_name: Option<String>,

    /// Skip entries whose path matches.
    #[arg(long)]
    pub ex_path: Option<String>,

    /// Treat patterns as regular expressions.
    #[arg(short = 'E', long)]
    pub regex: bool,

    /// Whole-string match instead of substring.
    #[arg(short, long)]
    pub word: bool,

    /// Case-sensitive matching.
    #[arg(short = 'C', long)]
    pub case: bool,

    /// Accept entries matching --name OR --path.
    #[arg(long)]
    pub or: bool,

    /// Extensions, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub ext: Vec<String>,

    /// `[+-]N[BKMG]`.
    #[arg(long, allow_hyphen_values = true)]
    pub size: Option<String>,

    /// `[+-]N` days.
    #[arg(long, allow_hyphen_values = true)]
    pub mtime: Option<String>,

    /// Entry types: f d l x e s p b c.
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Include hidden entries.
    #[arg(short = 'H', long)]
    pub hidden: bool,

    /// Maximum depth below each root [-1 = unbounded].
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub max_depth: isize,

    /// Follow symbolic links.
    #[arg(short = 'L', long)]
    pub follow: bool,

    /// Only count matches.
    #[arg(long)]
    pub count: bool,

    /// Delete matches.
    #[arg(long)]
    pub delete: bool,

    /// Print each path before deleting it.
    #[arg(long)]
    pub print_del: bool,

    /// Move matches into this directory.
    #[arg(long)]
    pub mv: Option<PathBuf>,

    /// Run a shell command per match; `{}` is replaced by the quoted path.
    #[arg(long)]
    pub exec: Option<String>,

    /// Print each command before running it.
    #[arg(long)]
    pub print_cmd: bool,

    /// Print absolute paths.
    #[arg(long)]
    pub full_path: bool,

    /// Concurrent workers [0 = serial walk, auto = twice the CPU count].
    #[arg(short = 'x', long, default_value = "0", value_parser = parse_workers)]
    pub workers: usize,
}

fn parse_workers(s: &str) -> std::result::Result<usize, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(find::default_workers());
    }
    s.parse().map_err(|_| format!("expected a worker count or 'auto', got '{}'", s))
}

fn type_letters(raw: &[String]) -> Vec<char> {
    raw.iter().flat_map(|s| s.trim().chars()).collect()
}

impl FindArgs {
    pub fn into_options(self, color: bool) -> Result<FindOptions> {
        let flags = ActionFlags {
            count: self.count,
            delete: self.delete,
            print_del: self.print_del,
            mv: self.mv,
            exec: self.exec,
            print_cmd: self.print_cmd,
        };
        let action = Action::from_flags(&flags)?;
        let criteria = FindCriteria {
            name: self.name.unwrap_or_default(),
            path: self.path.unwrap_or_default(),
            ex_name: self.ex_name.unwrap_or_default(),
            ex_path: self.ex_path.unwrap_or_default(),
            is_regex: self.regex,
            whole_word: self.word,
            case_sensitive: self.case,
            use_or: self.or,
            extensions: self.ext,
            size: self.size,
            mtime: self.mtime,
            types: type_letters(&self.types),
        };
        Ok(FindOptions {
            roots: self.roots,
            criteria,
            hidden: self.hidden,
            max_depth: self.max_depth,
            follow_links: self.follow,
            action,
            count_only: self.count,
            full_path: self.full_path,
            color,
            workers: self.workers,
        })
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct ListArgs {
    pub paths: Vec<String>,

    /// Long table format.
    #[arg(short, long)]
    pub long: bool,

    /// List subdirectories recursively.
    #[arg(short, long = "recursion", visible_alias = "recursive")]
    pub recursive: bool,

    /// List directories themselves, not their contents.
    #[arg(short, long)]
    pub dir: bool,

    /// Include hidden entries.
    #[arg(short = 'H', long)]
    pub hidden: bool,

    #[arg(short, long, value_enum, default_value_t = SortKey::Name)]
    pub sort: SortKey,

    /// Reverse the sort order.
    #[arg(long)]
    pub reverse: bool,

    /// Add owner and group columns.
    #[arg(short, long)]
    pub owner: bool,

    /// Entry types: f d l x e s p b c.
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Prefix names with an icon.
    #[arg(long)]
    pub icons: bool,

    #[arg(long, value_enum, default_value_t = TableStyle::Default, visible_alias = "ts")]
    pub table_style: TableStyle,
}

impl ListArgs {
    pub fn into_options(self, color: bool) -> ListOptions {
        ListOptions {
            types: type_letters(&self.types),
            paths: self.paths,
            long: self.long,
            recursive: self.recursive,
            dir_itself: self.dir,
            hidden: self.hidden,
            sort: self.sort,
            reverse: self.reverse,
            owner: self.owner,
            icons: self.icons,
            table_style: self.table_style,
            color,
            width: None,
        }
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct SizeArgs {
    pub paths: Vec<String>,

    /// Include hidden entries.
    #[arg(short = 'H', long)]
    pub hidden: bool,

    /// Worker threads [0 = 2 x CPU, max 20].
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Append a total line.
    #[arg(long)]
    pub total: bool,

    /// Largest first.
    #[arg(short, long)]
    pub sort: bool,

    /// Print byte counts.
    #[arg(long)]
    pub raw: bool,

    /// Show a byte counter on stderr while scanning.
    #[arg(short, long)]
    pub progress: bool,
}

impl SizeArgs {
    pub fn into_options(self) -> SizeOptions {
        SizeOptions {
            paths: self.paths,
            hidden: self.hidden,
            jobs: resolve_jobs(self.jobs),
            total: self.total,
            sort: self.sort,
            raw: self.raw,
        }
    }
}

/// Entry selection shared by pack and unpack.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct FilterArgs {
    /// Only entries matching one of these globs.
    #[arg(short, long)]
    pub include: Vec<String>,

    /// Skip entries matching any of these globs.
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Smallest entry size, e.g. `10K`.
    #[arg(long, value_parser = parse_size_arg)]
    pub min_size: Option<u64>,

    /// Largest entry size, e.g. `2M`.
    #[arg(long, value_parser = parse_size_arg)]
    pub max_size: Option<u64>,
}

fn parse_size_arg(s: &str) -> std::result::Result<u64, String> {
    humansize::parse_size(s).map_err(|e| e.to_string())
}

impl FilterArgs {
    pub fn rules(self) -> Result<FilterRules> {
        let rules = FilterRules {
            include: self.include,
            exclude: self.exclude,
            min_size: self.min_size.unwrap_or(0),
            max_size: self.max_size.unwrap_or(0),
        };
        if rules.max_size > 0 && rules.min_size > rules.max_size {
            return Err(ToolError::invalid("--min-size is larger than --max-size"));
        }
        Ok(rules)
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct ProgressArgs {
    /// Show progress on stderr.
    #[arg(short, long)]
    pub progress: bool,

    #[arg(long, value_enum, default_value_t = ProgressStyle::Default)]
    pub progress_style: ProgressStyle,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct PackArgs {
    /// Archive to create; the extension selects the format.
    pub archive: PathBuf,

    /// Files and directories to add.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = CompressionLevel::Default)]
    pub level: CompressionLevel,

    /// Replace an existing archive.
    #[arg(long)]
    pub overwrite: bool,

    /// Keep the partial archive when packing fails.
    #[arg(long)]
    pub keep_partial: bool,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub progress: ProgressArgs,
}

impl PackArgs {
    pub fn options(&self) -> Result<ArchiveOptions> {
        Ok(ArchiveOptions {
            level: self.level,
            overwrite: self.overwrite,
            progress: self.progress.progress,
            progress_style: self.progress.progress_style,
            no_validate: false,
            keep_partial: self.keep_partial,
            filter: self.filter.clone().rules()?,
        })
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct UnpackArgs {
    pub archive: PathBuf,

    /// Destination directory.
    #[arg(default_value = ".")]
    pub dest: PathBuf,

    /// Replace existing files.
    #[arg(long)]
    pub overwrite: bool,

    /// Accept absolute and `..` entry names.
    #[arg(long)]
    pub no_validate: bool,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub progress: ProgressArgs,
}

impl UnpackArgs {
    pub fn options(&self) -> Result<ArchiveOptions> {
        Ok(ArchiveOptions {
            level: CompressionLevel::Default,
            overwrite: self.overwrite,
            progress: self.progress.progress,
            progress_style: self.progress.progress_style,
            no_validate: self.no_validate,
            keep_partial: false,
            filter: self.filter.clone().rules()?,
        })
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct PreviewArgs {
    pub archive: PathBuf,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    #[arg(long, value_enum, default_value_t = TableStyle::Default, visible_alias = "ts")]
    pub table_style: TableStyle,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct WatchArgs {
    /// Seconds between runs.
    #[arg(short = 'n', long, default_value_t = 2.0)]
    pub interval: f64,

    /// Stop after this many runs.
    #[arg(long)]
    pub count: Option<u64>,

    /// Kill a run after this many seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Command to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| ToolError::invalid(format!("invalid {} '{}'", flag, value)))
}

impl WatchArgs {
    pub fn into_options(self) -> Result<WatchOptions> {
        Ok(WatchOptions {
            interval: seconds(self.interval, "--interval")?,
            timeout: self.timeout.map(|t| seconds(t, "--timeout")).transpose()?,
            count: self.count,
            command: self.command,
        })
    }
}

/// Parses the process arguments.
pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn find_flags_convert() {
        let args = parse_from(&["ftk", "find", "src", "--name", "main", "--type", "f,d", "--size", "-1M", "-x", "4"]);
        let Commands::Find(find) = args.command else { panic!("expected find") };
        let opts = find.into_options(false).unwrap();
        assert_eq!(opts.roots, vec!["src"]);
        assert_eq!(opts.criteria.name, "main");
        assert_eq!(opts.criteria.types, vec!['f', 'd']);
        assert_eq!(opts.criteria.size.as_deref(), Some("-1M"));
        assert_eq!(opts.workers, 4);
        assert_eq!(opts.max_depth, -1);
    }

    #[test]
    fn find_workers_accept_auto() {
        let workers = |extra: &[&str]| {
            let mut argv = vec!["ftk", "find"];
            argv.extend_from_slice(extra);
            let Commands::Find(find) = parse_from(&argv).command else { panic!("expected find") };
            find.into_options(false).unwrap().workers
        };
        assert_eq!(workers(&[]), 0);
        assert_eq!(workers(&["-x", "auto"]), 2 * num_cpus::get());
        assert_eq!(workers(&["--workers", "AUTO"]), crate::find::default_workers());
        assert!(Args::try_parse_from(["ftk", "find", "-x", "many"]).is_err());
    }

    #[test]
    fn conflicting_actions_are_rejected() {
        let args = parse_from(&["ftk", "find", "--delete", "--mv", "x"]);
        let Commands::Find(find) = args.command else { panic!("expected find") };
        assert!(find.into_options(false).is_err());
    }

    #[test]
    fn hash_output_implies_write() {
        let args = parse_from(&["ftk", "hash", "-t", "sha256", "-o", "sums.txt", "a"]);
        let Commands::Hash(hash) = args.command else { panic!("expected hash") };
        let opts = hash.into_options();
        assert!(opts.write);
        assert_eq!(opts.algo, HashAlgo::Sha256);
    }

    #[test]
    fn pack_filters_parse_sizes() {
        let args = parse_from(&["ftk", "--color", "never", "pack", "out.zip", "dir", "-e", "*.log", "--min-size", "1K"]);
        assert_eq!(args.color, ColorChoice::Never);
        let Commands::Pack(pack) = args.command else { panic!("expected pack") };
        let opts = pack.options().unwrap();
        assert_eq!(opts.filter.exclude, vec!["*.log"]);
        assert_eq!(opts.filter.min_size, 1024);
    }

    #[test]
    fn watch_takes_trailing_command() {
        let args = parse_from(&["ftk", "watch", "-n", "0.5", "--count", "1", "--", "ls", "-la"]);
        let Commands::Watch(watch) = args.command else { panic!("expected watch") };
        let opts = watch.into_options().unwrap();
        assert_eq!(opts.command, vec!["ls", "-la"]);
        assert_eq!(opts.interval, Duration::from_millis(500));
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
