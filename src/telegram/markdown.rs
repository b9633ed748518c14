use crate::config::FormattingOptions;
use crate::error::Result;
use crate::source::{EnrichedMessage, Extra};
use crate::telegram::Dialect;
use chrono::SecondsFormat;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::LazyLock;

/// Characters MarkdownV2 reserves outside of entities
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

static IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").expect("image pattern is valid"));

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("link pattern is valid"));

/// Render an enriched message for Telegram
///
/// Sections, in order: bold title, body, priority indicator, extras,
/// timestamp. Only the body keeps inline links; everything else is escaped.
pub fn render_message(message: &EnrichedMessage, options: &FormattingOptions) -> Result<String> {
    let dialect: Dialect = options.parse_mode.parse()?;
    let event = &message.event;
    let mut out = String::new();

    if !event.title.is_empty() {
        let title = if options.include_app_name {
            format_title(&message.app_name, &event.title)
        } else {
            event.title.clone()
        };
        let _ = write!(out, "*{}*\n\n", escape_markdown_v2(&title));
    }

    let body = match dialect {
        Dialect::MarkdownV2 => format_body(&event.body),
    };
    out.push_str(&body);
    out.push('\n');

    if options.include_priority && event.priority > options.priority_threshold {
        out.push('\n');
        out.push_str(&escape_markdown_v2(priority_indicator(event.priority)));
    }

    if options.include_extras && !event.extras.is_empty() {
        out.push_str("\n*Additional Info:*");
        format_extras(&mut out, &event.extras, "");
    }

    if options.include_timestamp {
        let now = chrono::Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let _ = write!(out, "\n🕒 {}", escape_markdown_v2(&now));
    }

    Ok(out)
}

/// Prefix every reserved character with a backslash
///
/// Backslashes are never reserved, so an existing `\n` sequence in the
/// text passes through untouched.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape a link target: only the parentheses that would close it early
pub fn escape_url(url: &str) -> String {
    let mut escaped = String::with_capacity(url.len());
    for c in url.chars() {
        if c == '(' || c == ')' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Emoji label for a priority, checked from the highest tier down
pub fn priority_indicator(priority: u32) -> &'static str {
    match priority {
        p if p >= 8 => "🔴 Critical Priority",
        p if p >= 6 => "🟠 High Priority",
        p if p >= 4 => "🟡 Medium Priority",
        _ => "🟢 Low Priority",
    }
}

fn format_title(app_name: &str, title: &str) -> String {
    format!("[{}] {}", app_name, title)
}

fn format_body(text: &str) -> String {
    let text = convert_image_markdown(text);
    process_markdown_links(&text)
}

/// Replace `![alt](url)` with the bare url; the line pass escapes it later
fn convert_image_markdown(text: &str) -> String {
    IMAGE_RE
        .replace_all(text, |caps: &regex::Captures| caps[2].to_string())
        .into_owned()
}

/// Escape link text and target separately, then escape the remaining lines
///
/// Lines that carry a link are left alone after the link itself has been
/// escaped so it is not escaped twice.
fn process_markdown_links(text: &str) -> String {
    let linked = LINK_RE.replace_all(text, |caps: &regex::Captures| {
        format!("[{}]({})", escape_markdown_v2(&caps[1]), escape_url(&caps[2]))
    });

    linked
        .split('\n')
        .map(|line| {
            if LINK_RE.is_match(line) {
                line.to_string()
            } else {
                escape_markdown_v2(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_extras(out: &mut String, extras: &BTreeMap<String, Extra>, prefix: &str) {
    for (key, value) in extras {
        let key = escape_markdown_v2(key);
        match value {
            Extra::Nested(nested) => {
                let _ = write!(out, "\n{}• {}:", prefix, key);
                format_extras(out, nested, &format!("{prefix}  "));
            }
            Extra::Scalar(scalar) => {
                let _ = write!(
                    out,
                    "\n{}• {}: `{}`",
                    prefix,
                    key,
                    escape_markdown_v2(scalar)
                );
            }
        }
    }
}
