//! # Action Dispatcher
//!
//! What `find` does with a matching entry: print it, delete it, move it or
//! run a shell command on it. Exactly one action applies per run; the
//! combinations are rejected up front by [`Action::from_flags`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::classify::{self, FileTag};
use crate::error::{Result, ToolError};
use crate::pathx;

/// Post-match action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Print,
    Delete { print: bool },
    Move { target: PathBuf },
    Exec { template: String, print_cmd: bool },
}

/// Raw action flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ActionFlags {
    pub count: bool,
    pub delete: bool,
    pub print_del: bool,
    pub mv: Option<PathBuf>,
    pub exec: Option<String>,
    pub print_cmd: bool,
}

impl Action {
    /// Validate the flag combination and pick the action.
    pub fn from_flags(flags: &ActionFlags) -> Result<Action> {
        let chosen = [flags.delete, flags.mv.is_some(), flags.exec.is_some()].iter().filter(|b| **b).count();
        if chosen > 1 {
            return Err(ToolError::invalid("--delete, --mv and --exec are mutually exclusive"));
        }
        if flags.count && chosen > 0 {
            return Err(ToolError::invalid("--count cannot be combined with --delete, --mv or --exec"));
        }
        if flags.print_del && !flags.delete {
            return Err(ToolError::invalid("--print-del requires --delete"));
        }
        if flags.print_cmd && flags.exec.is_none() {
            return Err(ToolError::invalid("--print-cmd requires --exec"));
        }

        if flags.delete {
            return Ok(Action::Delete { print: flags.print_del });
        }
        if let Some(target) = &flags.mv {
            if target.as_os_str().is_empty() {
                return Err(ToolError::invalid("--mv target is empty"));
            }
            return Ok(Action::Move { target: target.clone() });
        }
        if let Some(template) = &flags.exec {
            if !template.contains("{}") {
                return Err(ToolError::invalid("--exec command must contain '{}'"));
            }
            return Ok(Action::Exec { template: template.clone(), print_cmd: flags.print_cmd });
        }
        Ok(Action::Print)
    }

    /// Whether running the action removes the entry from where the walk
    /// would look for its children.
    pub fn relocates(&self) -> bool {
        matches!(self, Action::Delete { .. } | Action::Move { .. })
    }
}

/// Executes the chosen [`Action`] and serializes every output line through
/// one writer.
pub struct ActionDispatcher<W: Write + Send> {
    action: Action,
    count_only: bool,
    full_path: bool,
    color: bool,
    out: Mutex<W>,
}

impl<W: Write + Send> ActionDispatcher<W> {
    pub fn new(action: Action, out: W) -> Self {
        Self { action, count_only: false, full_path: false, color: false, out: Mutex::new(out) }
    }

    pub fn count_only(mut self, yes: bool) -> Self {
        self.count_only = yes;
        self
    }

    pub fn full_path(mut self, yes: bool) -> Self {
        self.full_path = yes;
        self
    }

    pub fn color(mut self, yes: bool) -> Self {
        self.color = yes;
        self
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the action for one matched entry.
    pub fn dispatch(&self, path: &Path, tag: FileTag) -> Result<()> {
        if self.count_only {
            return Ok(());
        }
        match &self.action {
            Action::Print => self.print(path, tag),
            Action::Delete { print } => {
                if *print {
                    self.print(path, tag)?;
                }
                delete_path(path)
            }
            Action::Move { target } => {
                let dest = move_path(path, target)?;
                debug!("moved {} -> {}", path.display(), dest.display());
                Ok(())
            }
            Action::Exec { template, print_cmd } => {
                let cmd = build_exec_command(template, path)?;
                if *print_cmd {
                    self.write_line(&cmd)?;
                }
                let status = run_shell(&cmd)?;
                if !status.success() {
                    warn!("command exited with {}: {}", status, cmd);
                }
                Ok(())
            }
        }
    }

    fn print(&self, path: &Path, tag: FileTag) -> Result<()> {
        let shown = if self.full_path { pathx::absolute(path) } else { pathx::clean(path) };
        let text = shown.to_string_lossy();
        if self.color {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            self.write_line(&classify::paint_entry(&text, tag, &name).to_string())
        } else {
            self.write_line(&text)
        }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{}", line).map_err(|e| ToolError::from_io(e, "<stdout>"))
    }

    pub fn flush(&self) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.flush().map_err(|e| ToolError::from_io(e, "<stdout>"))
    }
}

/// Remove a file, a symlink, or a directory (recursively when non-empty).
pub fn delete_path(path: &Path) -> Result<()> {
    let md = fs::symlink_metadata(path).map_err(|e| ToolError::from_io(e, path))?;
    let result = if md.is_dir() {
        let empty = fs::read_dir(path).map_err(|e| ToolError::from_io(e, path))?.next().is_none();
        if empty {
            fs::remove_dir(path)
        } else {
            fs::remove_dir_all(path)
        }
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| ToolError::from_io(e, path))
}

/// Move `src` into the directory `target`, creating it when missing.
///
/// Returns the destination path. A directory cannot be moved into itself or
/// one of its descendants, and an existing destination is never replaced.
pub fn move_path(src: &Path, target: &Path) -> Result<PathBuf> {
    let src_abs = pathx::absolute(src);
    let target_abs = pathx::absolute(target);
    let name = src_abs
        .file_name()
        .ok_or_else(|| ToolError::invalid(format!("cannot move '{}'", src.display())))?;
    let dest = target_abs.join(name);

    let md = fs::symlink_metadata(&src_abs).map_err(|e| ToolError::from_io(e, &src_abs))?;
    if md.is_dir() && pathx::is_within(&dest, &src_abs) {
        return Err(ToolError::invalid(format!(
            "cannot move into subdirectory: '{}' -> '{}'",
            src.display(),
            target.display()
        )));
    }
    if fs::symlink_metadata(&dest).is_ok() {
        return Err(ToolError::invalid(format!("target already exists: '{}'", dest.display())));
    }

    fs::create_dir_all(&target_abs).map_err(|e| ToolError::from_io(e, &target_abs))?;
    fs::rename(&src_abs, &dest).map_err(|e| ToolError::from_io(e, &src_abs))?;
    Ok(dest)
}

/// Quote a path for the platform shell.
#[cfg(not(windows))]
pub fn quote_path(path: &str) -> String {
    format!("'{}'", path.replace('\'', "'\\''"))
}

#[cfg(windows)]
pub fn quote_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len() + 2);
    for c in path.chars() {
        if matches!(c, '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("\"{}\"", escaped)
}

/// Substitute every `{}` in `template` with the quoted path.
pub fn build_exec_command(template: &str, path: &Path) -> Result<String> {
    if !template.contains("{}") {
        return Err(ToolError::invalid("--exec command must contain '{}'"));
    }
    Ok(template.replace("{}", &quote_path(&path.to_string_lossy())))
}

/// Shell candidates in preference order: program and the flag that takes a
/// command string.
#[cfg(not(windows))]
const SHELLS: &[(&str, &str)] = &[("bash", "-c"), ("sh", "-c")];

#[cfg(windows)]
const SHELLS: &[(&str, &str)] = &[("powershell", "-Command"), ("cmd", "/C")];

/// A `Command` running `cmd` through the first available shell.
pub fn shell_command(cmd: &str) -> Command {
    let (shell, flag) = SHELLS.iter().copied().find(|(s, _)| shell_available(s)).unwrap_or(SHELLS[SHELLS.len() - 1]);
    let mut command = Command::new(shell);
    command.arg(flag).arg(cmd);
    command
}

fn shell_available(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
    })
}

/// Run `cmd` through the shell with inherited stdio and wait for it.
pub fn run_shell(cmd: &str) -> Result<ExitStatus> {
    shell_command(cmd).status().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ToolError::Unsupported("no usable shell found".into()),
        _ => ToolError::from_io(e, cmd),
    })
}
