//! Outbound notification delivery to the Telegram Bot API.

pub mod client;
pub mod format;

pub use client::{DispatchError, TelegramClient, DEFAULT_TELEGRAM_API_BASE};
pub use format::{priority_label, render_task_notification};
