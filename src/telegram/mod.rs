mod client;
mod markdown;
mod types;

pub use client::TelegramClient;
pub use markdown::{escape_markdown_v2, escape_url, priority_indicator, render_message};
pub use types::{ChatId, Dialect, Payload};
