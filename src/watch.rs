//! Periodic command runner.
//!
//! Runs a shell command every `interval`, printing a timestamped header
//! before each run. A child that outlives its deadline is killed; the loop
//! ends after `count` runs or when the cancel token fires.

use std::io::Write;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, warn};

use crate::action;
use crate::cancel::CancelToken;
use crate::error::{Result, ToolError};

const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Command words, joined with spaces and handed to the shell.
    pub command: Vec<String>,
    pub interval: Duration,
    /// Stop after this many runs.
    pub count: Option<u64>,
    /// Per-run deadline.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchReport {
    pub runs: u64,
    /// Runs that exited non-zero.
    pub failures: u64,
    pub timeouts: u64,
}

enum RunOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

fn stop(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("kill failed: {}", e);
    }
    let _ = child.wait();
}

fn run_once(cmd: &str, timeout: Option<Duration>, cancel: &CancelToken) -> Result<RunOutcome> {
    let mut child = action::shell_command(cmd).spawn().map_err(|e| ToolError::from_io(e, cmd))?;
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        if let Some(status) = child.try_wait().map_err(|e| ToolError::from_io(e, cmd))? {
            return Ok(RunOutcome::Exited(status));
        }
        if cancel.is_cancelled() {
            stop(&mut child);
            return Ok(RunOutcome::Cancelled);
        }
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            stop(&mut child);
            return Ok(RunOutcome::TimedOut);
        }
        thread::sleep(POLL);
    }
}

/// Sleep for `d`, waking early on cancellation.
fn pause(d: Duration, cancel: &CancelToken) {
    let until = Instant::now() + d;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= until {
            break;
        }
        thread::sleep(POLL.min(until - now));
    }
}

/// Run the loop. Cancellation is the normal way out when no count is set,
/// so it ends the loop without an error.
pub fn watch<W: Write>(opts: &WatchOptions, out: &mut W, cancel: &CancelToken) -> Result<WatchReport> {
    let cmd = opts.command.join(" ");
    if cmd.trim().is_empty() {
        return Err(ToolError::invalid("watch needs a command"));
    }
    if opts.count == Some(0) {
        return Err(ToolError::invalid("--count must be at least 1"));
    }

    let mut report = WatchReport::default();
    while !cancel.is_cancelled() {
        writeln!(
            out,
            "Every {:.1}s: {}    {}",
            opts.interval.as_secs_f64(),
            cmd,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        out.flush()?;

        match run_once(&cmd, opts.timeout, cancel)? {
            RunOutcome::Exited(status) => {
                if !status.success() {
                    report.failures += 1;
                    warn!("command exited with {}", status);
                }
            }
            RunOutcome::TimedOut => {
                report.timeouts += 1;
                warn!("command killed after {:?}", opts.timeout.unwrap_or_default());
            }
            RunOutcome::Cancelled => {
                report.runs += 1;
                break;
            }
        }
        report.runs += 1;
        if opts.count.map(|c| report.runs >= c).unwrap_or(false) {
            break;
        }
        pause(opts.interval, cancel);
    }
    Ok(report)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn opts(cmd: &str) -> WatchOptions {
        WatchOptions { command: vec![cmd.to_string()], interval: Duration::ZERO, count: Some(2), timeout: None }
    }

    #[test]
    fn runs_count_times_with_headers() {
        let mut out = Vec::new();
        let report = watch(&opts("true"), &mut out, &CancelToken::new()).unwrap();
        assert_eq!(report.runs, 2);
        assert_eq!(report.failures, 0);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("Every 0.0s: true")).count(), 2);
    }

    #[test]
    fn failures_are_counted() {
        let report = watch(&opts("exit 3"), &mut Vec::new(), &CancelToken::new()).unwrap();
        assert_eq!(report.failures, 2);
    }

    #[test]
    fn slow_command_is_killed() {
        let o = WatchOptions { count: Some(1), timeout: Some(Duration::from_millis(200)), ..opts("sleep 5") };
        let started = Instant::now();
        let report = watch(&o, &mut Vec::new(), &CancelToken::new()).unwrap();
        assert_eq!(report.timeouts, 1);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn cancelled_token_runs_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel("test");
        let report = watch(&opts("true"), &mut Vec::new(), &cancel).unwrap();
        assert_eq!(report.runs, 0);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(watch(&opts("  "), &mut Vec::new(), &CancelToken::new()).is_err());
    }
}
