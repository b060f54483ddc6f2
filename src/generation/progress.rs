//! Batch Progress Streaming
//!
//! Event-based progress reporting for batch generation.
//!
//! ## Features
//!
//! - Broadcast channel of [`ProgressEvent`]s for any number of subscribers
//! - Throughput and ETA calculation
//! - Console renderer with a redraw loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use console::style;
use tokio::sync::broadcast;

/// Progress event types
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Batch admitted
    BatchStarted { total: usize, label: String },
    /// One request finished (success or failure)
    ItemCompleted {
        completed: usize,
        total: usize,
        prompt_id: String,
        success: bool,
        throughput: f32, // images per second
    },
    /// Estimated time remaining
    EtaUpdate { remaining_secs: u64 },
    /// A request exhausted every backend
    ItemFailed { prompt_id: String, error: String },
    /// Batch finished
    Finished {
        successful: usize,
        failed: usize,
        total_duration_secs: u64,
    },
}

/// Progress tracker state
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    pub label: String,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    /// Most recently finished prompt id
    pub current_item: String,
    pub throughput: f32,
    pub eta_secs: Option<u64>,
    pub is_running: bool,
    pub elapsed_secs: u64,
}

/// Real-time batch progress tracker
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<RwLock<ProgressState>>,
    sender: broadcast::Sender<ProgressEvent>,
    start_time: Arc<RwLock<Option<Instant>>>,
    active: Arc<AtomicBool>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);

        Self {
            state: Arc::new(RwLock::new(ProgressState::default())),
            sender,
            start_time: Arc::new(RwLock::new(None)),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send an event; dropped silently when nobody listens
    #[inline]
    fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn state(&self) -> ProgressState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn elapsed(&self) -> Duration {
        self.start_time
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    /// Start tracking a batch of `total` requests
    pub fn start(&self, total: usize, label: &str) {
        self.active.store(true, Ordering::SeqCst);
        *self
            .start_time
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());

        *self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = ProgressState {
            label: label.to_string(),
            total,
            is_running: true,
            ..Default::default()
        };

        self.emit(ProgressEvent::BatchStarted {
            total,
            label: label.to_string(),
        });
    }

    /// Record one finished request
    pub fn record(&self, prompt_id: &str, success: bool, error: Option<&str>) {
        let elapsed = self.elapsed().as_secs_f32();

        let (completed, total, throughput, eta) = {
            let mut state = self
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.completed += 1;
            if success {
                state.successful += 1;
            } else {
                state.failed += 1;
            }
            state.current_item = prompt_id.to_string();
            state.throughput = state.completed as f32 / elapsed.max(0.1);
            state.elapsed_secs = elapsed as u64;

            let remaining = state.total.saturating_sub(state.completed);
            state.eta_secs = (state.throughput > 0.0 && remaining > 0)
                .then(|| (remaining as f32 / state.throughput) as u64);

            (state.completed, state.total, state.throughput, state.eta_secs)
        };

        if !success {
            self.emit(ProgressEvent::ItemFailed {
                prompt_id: prompt_id.to_string(),
                error: error.unwrap_or("unknown error").to_string(),
            });
        }
        if let Some(remaining_secs) = eta {
            self.emit(ProgressEvent::EtaUpdate { remaining_secs });
        }
        self.emit(ProgressEvent::ItemCompleted {
            completed,
            total,
            prompt_id: prompt_id.to_string(),
            success,
            throughput,
        });
    }

    /// Finish tracking
    pub fn finish(&self) {
        let duration = self.elapsed().as_secs();
        let (successful, failed) = {
            let mut state = self
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.is_running = false;
            state.eta_secs = None;
            (state.successful, state.failed)
        };
        self.active.store(false, Ordering::SeqCst);

        self.emit(ProgressEvent::Finished {
            successful,
            failed,
            total_duration_secs: duration,
        });
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Console progress renderer
pub struct ConsoleRenderer {
    tracker: ProgressTracker,
    show_eta: bool,
}

impl ConsoleRenderer {
    pub fn new(tracker: ProgressTracker) -> Self {
        Self {
            tracker,
            show_eta: true,
        }
    }

    pub fn with_eta(mut self, show: bool) -> Self {
        self.show_eta = show;
        self
    }

    /// Render current state as one line
    pub fn render(&self) -> String {
        let state = self.tracker.state();

        if !state.is_running {
            return String::new();
        }

        let chars = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
        let spinner = chars[(state.elapsed_secs as usize) % chars.len()];

        let eta = if self.show_eta {
            state
                .eta_secs
                .map(|s| format!(" ETA: {}", format_duration(s)))
                .unwrap_or_default()
        } else {
            String::new()
        };

        let throughput = if state.throughput > 0.0 {
            format!(" ({:.1}/s)", state.throughput)
        } else {
            String::new()
        };

        let failed = if state.failed > 0 {
            format!(" {}", style(format!("✗{}", state.failed)).red())
        } else {
            String::new()
        };

        format!(
            "{} {} {} {}/{}{}{}{}",
            style(spinner).cyan(),
            state.label,
            render_progress_bar(state.completed, state.total, 30),
            state.completed,
            state.total,
            failed,
            throughput,
            eta,
        )
    }

    /// Start rendering loop (non-blocking)
    pub fn start_render_loop(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while self.tracker.is_active() {
                let output = self.render();
                if !output.is_empty() {
                    eprint!("\r\x1B[K{}", output);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            eprintln!();
        })
    }
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
