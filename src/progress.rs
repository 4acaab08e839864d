//! Byte-driven progress tracking.
//!
//! Workers record processed files and bytes through atomic counters; the
//! tracker turns them into a [`ProgressState`] and hands it to a callback at
//! most once per emit interval. [`terminal_callback`] renders the state on
//! stderr in one of four [`ProgressStyle`]s.
//!
//! When no byte total is known (directory sizing) the line degrades to a
//! spinner with the running byte count.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use clap::ValueEnum;

use crate::humansize;

/// Snapshot of an operation's progress.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_files: u64,
    pub processed_files: u64,
    /// `0` when unknown.
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
    /// Set on the final emission.
    pub finished: bool,
}

impl ProgressState {
    /// Estimated time remaining based on current speed
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        if self.speed_mbps <= 0.0 || self.total_bytes == 0 {
            return None;
        }
        let remaining_bytes = self.total_bytes.saturating_sub(self.processed_bytes);
        let remaining_mb = remaining_bytes as f32 / (1024.0 * 1024.0);
        Some(Duration::from_secs_f32((remaining_mb / self.speed_mbps).max(0.0)))
    }
}

/// Progress callback function type
pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

/// Shared progress counters plus a rate-limited callback.
pub struct ProgressTracker {
    total_files: AtomicU64,
    total_bytes: AtomicU64,
    processed_files: AtomicU64,
    processed_bytes: AtomicU64,
    start_time: Instant,
    last_emit_time: Mutex<Instant>,
    emit_interval: Duration,
    callback: Option<Arc<ProgressCallback>>,
    finished: AtomicBool,
}

impl ProgressTracker {
    /// A tracker that never calls back. Recording still counts.
    pub fn disabled() -> Self {
        Self::build(None, Duration::from_millis(100))
    }

    pub fn with_callback<F>(callback: F, emit_interval: Duration) -> Self
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        Self::build(Some(Arc::new(callback)), emit_interval)
    }

    fn build(callback: Option<Arc<ProgressCallback>>, emit_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total_files: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            processed_files: AtomicU64::new(0),
            processed_bytes: AtomicU64::new(0),
            start_time: now,
            last_emit_time: Mutex::new(now),
            emit_interval,
            callback,
            finished: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    pub fn set_totals(&self, files: u64, bytes: u64) {
        self.total_files.store(files, Ordering::Relaxed);
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Count a finished file of `size` bytes.
    pub fn record_file(&self, size: u64) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.record_bytes(size);
    }

    /// Count a finished file whose bytes were already recorded.
    pub fn record_entry(&self) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit();
    }

    /// Count `n` more bytes, possibly emitting.
    pub fn record_bytes(&self, n: u64) {
        self.processed_bytes.fetch_add(n, Ordering::Relaxed);
        self.maybe_emit();
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }

    pub fn processed_files(&self) -> u64 {
        self.processed_files.load(Ordering::Relaxed)
    }

    fn maybe_emit(&self) {
        let Some(callback) = &self.callback else {
            return;
        };
        let now = Instant::now();
        let should_emit = {
            let mut last = self.last_emit_time.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last) >= self.emit_interval {
                *last = now;
                true
            } else {
                false
            }
        };
        if should_emit {
            callback(self.state());
        }
    }

    /// Emit the final state once.
    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(callback) = &self.callback {
            let mut state = self.state();
            state.finished = true;
            if state.total_bytes > 0 {
                state.progress_percent = 100.0;
            }
            callback(state);
        }
    }

    pub fn state(&self) -> ProgressState {
        let total_files = self.total_files.load(Ordering::Relaxed);
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        let processed_files = self.processed_files.load(Ordering::Relaxed);
        let processed_bytes = self.processed_bytes.load(Ordering::Relaxed);
        let elapsed_time = self.start_time.elapsed();

        let speed_mbps = if elapsed_time.as_secs_f32() > 0.0 {
            (processed_bytes as f32 / (1024.0 * 1024.0)) / elapsed_time.as_secs_f32()
        } else {
            0.0
        };
        let progress_percent = if total_bytes > 0 {
            (processed_bytes as f32 / total_bytes as f32 * 100.0).min(100.0)
        } else if total_files > 0 {
            (processed_files as f32 / total_files as f32 * 100.0).min(100.0)
        } else {
            0.0
        };

        ProgressState {
            total_files,
            processed_files,
            total_bytes,
            processed_bytes,
            elapsed_time,
            speed_mbps,
            progress_percent,
            finished: self.finished.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::disabled()
    }
}

/// How the terminal progress line looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProgressStyle {
    /// Numbers only, no bar.
    Text,
    #[default]
    Default,
    Unicode,
    Ascii,
}

impl ProgressStyle {
    /// Filled and empty bar cells.
    fn cells(self) -> Option<(&'static str, &'static str)> {
        match self {
            ProgressStyle::Text => None,
            ProgressStyle::Default => Some(("█", "░")),
            ProgressStyle::Unicode => Some(("━", "─")),
            ProgressStyle::Ascii => Some(("#", "-")),
        }
    }

    fn spinner(self) -> &'static [&'static str] {
        match self {
            ProgressStyle::Ascii | ProgressStyle::Text => &["|", "/", "-", "\\"],
            _ => &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
        }
    }
}

fn format_eta(state: &ProgressState) -> String {
    match state.estimated_time_remaining() {
        Some(eta) if eta.as_secs_f32() > 60.0 => format!("{:.1}m", eta.as_secs_f32() / 60.0),
        Some(eta) => format!("{:.1}s", eta.as_secs_f32()),
        None => "--".to_string(),
    }
}

/// Build one status line no wider than `width` (the bar shrinks first).
pub fn render_line(operation: &str, style: ProgressStyle, state: &ProgressState, tick: usize, width: usize) -> String {
    let op = operation.to_uppercase();

    if state.total_bytes == 0 && state.total_files == 0 {
        let frames = style.spinner();
        let frame = if state.finished { "✓" } else { frames[tick % frames.len()] };
        let frame = if style == ProgressStyle::Ascii && state.finished { "*" } else { frame };
        return format!(
            "[{}] {} {} | {} files | {:.1} MB/s",
            op,
            frame,
            humansize::format_size(state.processed_bytes),
            state.processed_files,
            state.speed_mbps
        );
    }

    let tail = format!(
        "{:.1}% | {}/{} | {}/{} files | {:.1} MB/s | ETA: {}",
        state.progress_percent,
        humansize::format_size(state.processed_bytes),
        humansize::format_size(state.total_bytes),
        state.processed_files,
        state.total_files,
        state.speed_mbps,
        format_eta(state)
    );

    let Some((full, empty)) = style.cells() else {
        return format!("[{}] {}", op, tail);
    };

    let mut bar_width: usize = 40;
    loop {
        let filled = ((state.progress_percent / 100.0) * bar_width as f32) as usize;
        let filled = filled.min(bar_width);
        let bar = format!("[{}{}]", full.repeat(filled), empty.repeat(bar_width - filled));
        let line = format!("[{}] {} {}", op, bar, tail);
        if line.chars().count() <= width || bar_width <= 10 {
            return line;
        }
        bar_width = bar_width.saturating_sub(4).max(10);
    }
}

/// Callback drawing progress on stderr, redrawing in place.
pub fn terminal_callback(operation: &str, style: ProgressStyle) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_string();
    let prev_len = Mutex::new(0usize);
    let tick = AtomicU64::new(0);
    let done = AtomicBool::new(false);

    move |state: ProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let n = tick.fetch_add(1, Ordering::Relaxed) as usize;
        let mut line = render_line(&operation, style, &state, n, term_width);

        {
            let mut prev = prev_len.lock().unwrap_or_else(PoisonError::into_inner);
            let len = line.chars().count();
            if *prev > len {
                line.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        let mut err = io::stderr().lock();
        let _ = write!(err, "\r\x1B[2K{}", line);
        if state.finished {
            let _ = writeln!(err);
            done.store(true, Ordering::Relaxed);
        }
        let _ = err.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn state(total: u64, done: u64) -> ProgressState {
        ProgressState {
            total_files: 4,
            processed_files: 2,
            total_bytes: total,
            processed_bytes: done,
            elapsed_time: Duration::from_secs(1),
            speed_mbps: 1.0,
            progress_percent: if total > 0 { done as f32 / total as f32 * 100.0 } else { 0.0 },
            finished: false,
        }
    }

    #[test]
    fn tracker_counts_across_threads() {
        let tracker = Arc::new(ProgressTracker::disabled());
        tracker.set_totals(1000, 1024 * 1000);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&tracker);
                thread::spawn(move || {
                    for _ in 0..250 {
                        t.record_file(1024);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = tracker.state();
        assert_eq!(s.processed_files, 1000);
        assert_eq!(s.processed_bytes, 1024 * 1000);
        assert!((s.progress_percent - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn callback_is_rate_limited_and_finish_fires_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = ProgressTracker::with_callback(
            move |s: ProgressState| sink.lock().unwrap().push(s.finished),
            Duration::from_secs(3600),
        );
        tracker.set_totals(1, 10);
        tracker.record_file(5);
        tracker.finish();
        tracker.finish();
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn styles_render_their_bars() {
        let s = state(100, 50);
        assert!(render_line("pack", ProgressStyle::Ascii, &s, 0, 200).contains("[####"));
        assert!(render_line("pack", ProgressStyle::Default, &s, 0, 200).contains('█'));
        assert!(render_line("pack", ProgressStyle::Unicode, &s, 0, 200).contains('━'));
        let text = render_line("pack", ProgressStyle::Text, &s, 0, 200);
        assert!(text.starts_with("[PACK] 50.0%"));
    }

    #[test]
    fn bar_shrinks_to_fit() {
        let s = state(100, 50);
        let wide = render_line("unpack", ProgressStyle::Ascii, &s, 0, 400);
        let narrow = render_line("unpack", ProgressStyle::Ascii, &s, 0, 90);
        assert!(narrow.len() < wide.len());
    }

    #[test]
    fn unknown_total_uses_spinner() {
        let s = state(0, 2048);
        let mut s = ProgressState { total_files: 0, ..s };
        let line = render_line("size", ProgressStyle::Ascii, &s, 1, 80);
        assert!(line.starts_with("[SIZE] / 2 KB"));
        s.finished = true;
        assert!(render_line("size", ProgressStyle::Ascii, &s, 1, 80).contains(" * "));
    }
}
