//! Transient notifications and yes/no prompts.

use parking_lot::Mutex;
use std::{
    io::{self, BufRead, Write},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::debug;

/// How long a toast stays up before it starts leaving.
pub const DISPLAY_FOR: Duration = Duration::from_secs(3);
/// Length of the exit transition.
pub const EXIT_TRANSITION: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
}

/// Whatever actually draws toasts.
pub trait ToastRenderer: Send + Sync + 'static {
    fn show(&self, toast: &Toast);

    /// Start the exit transition. The toast is removed [`EXIT_TRANSITION`] later.
    fn begin_exit(&self, _toast: &Toast) {}

    fn remove(&self, toast: &Toast);
}

struct Active {
    toast: Toast,
    timer: JoinHandle<()>,
}

/// Shows at most one toast at a time.
///
/// A new toast evicts the visible one immediately. Each toast dismisses
/// itself after [`DISPLAY_FOR`] plus [`EXIT_TRANSITION`].
pub struct Notifier<R: ToastRenderer> {
    renderer: Arc<R>,
    current: Arc<Mutex<Option<Active>>>,
    next_id: AtomicU64,
}

impl<R: ToastRenderer> Notifier<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer: Arc::new(renderer),
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Show `message`, replacing any visible toast. Needs a tokio runtime.
    pub fn notify(&self, message: impl Into<String>, severity: Severity) -> Toast {
        let toast = Toast {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            severity,
        };

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            previous.timer.abort();
            self.renderer.remove(&previous.toast);
        }
        self.renderer.show(&toast);
        debug!(toast = toast.id, severity = ?toast.severity, "toast shown");

        let renderer = self.renderer.clone();
        let slot = self.current.clone();
        let id = toast.id;
        let display = tokio::time::sleep(DISPLAY_FOR);
        let timer = tokio::spawn(async move {
            display.await;
            let exiting = slot
                .lock()
                .as_ref()
                .filter(|a| a.toast.id == id)
                .map(|a| a.toast.clone());
            if let Some(toast) = exiting {
                renderer.begin_exit(&toast);
            }
            tokio::time::sleep(EXIT_TRANSITION).await;
            let mut active = slot.lock();
            if active.as_ref().is_some_and(|a| a.toast.id == id) {
                if let Some(done) = active.take() {
                    renderer.remove(&done.toast);
                }
            }
        });

        *current = Some(Active {
            toast: toast.clone(),
            timer,
        });
        toast
    }

    pub fn success(&self, message: impl Into<String>) -> Toast {
        self.notify(message, Severity::Success)
    }

    pub fn error(&self, message: impl Into<String>) -> Toast {
        self.notify(message, Severity::Error)
    }

    /// The toast currently on screen.
    pub fn visible(&self) -> Option<Toast> {
        self.current.lock().as_ref().map(|a| a.toast.clone())
    }
}

/// Blocking yes/no question.
pub trait Prompt {
    fn confirm(&self, message: &str) -> bool;
}

/// Asks on stderr, reads the answer from stdin. Anything but y/yes is "no".
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> bool {
        let mut stderr = io::stderr();
        if write!(stderr, "{message} [y/N] ").and_then(|_| stderr.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

/// Ask `message` on the terminal.
pub fn confirm(message: &str) -> bool {
    TerminalPrompt.confirm(message)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
