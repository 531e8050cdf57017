//! Presentation helpers for whatever front end sits on top of the facades.

pub mod debounce;
pub mod format;
pub mod notify;

pub use debounce::{Debounced, debounce};
pub use format::{escape_text, format_price, is_valid_hex_color};
pub use notify::{Notifier, Prompt, Severity, TerminalPrompt, Toast, ToastRenderer, confirm};
