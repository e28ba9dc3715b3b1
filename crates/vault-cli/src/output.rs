//! Rendering primitives for CLI output.

use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use owo_colors::OwoColorize;

/// Status badge shown before a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Ok,
    Warn,
    Err,
    Info,
}

impl Badge {
    fn text(&self) -> &'static str {
        match self {
            Self::Ok => "[OK]",
            Self::Warn => "[WARN]",
            Self::Err => "[ERR]",
            Self::Info => "[INFO]",
        }
    }
}

/// Whether stdout should receive ANSI colors.
///
/// Disabled when stdout is not a TTY, `NO_COLOR` is set, or `TERM=dumb`.
pub fn color_enabled() -> bool {
    let term_is_dumb = std::env::var("TERM").map(|v| v == "dumb").unwrap_or(false);
    let no_color_env = std::env::var("NO_COLOR").is_ok();
    std::io::stdout().is_terminal() && !no_color_env && !term_is_dumb
}

pub fn badge(color: bool, kind: Badge, message: &str) -> String {
    let text = kind.text();
    let badge = if !color {
        text.to_string()
    } else {
        match kind {
            Badge::Ok => text.green().bold().to_string(),
            Badge::Warn => text.yellow().bold().to_string(),
            Badge::Err => text.red().bold().to_string(),
            Badge::Info => text.cyan().bold().to_string(),
        }
    };
    if message.is_empty() {
        badge
    } else {
        format!("{} {}", badge, message)
    }
}

/// Render a `Key: value` line with a dimmed key.
pub fn kv(color: bool, key: &str, value: &str) -> String {
    let label = format!("{}:", key);
    if color {
        format!("{} {}", label.dimmed(), value)
    } else {
        format!("{} {}", label, value)
    }
}

pub fn bold(color: bool, text: &str) -> String {
    if color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

/// Build a table with the standard preset and the given header row.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(Cell::new));
    table
}

/// Format bytes in human-readable form.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// Shorten a conversation id for tables.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Truncate to `max` characters, appending an ellipsis when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_badge_plain() {
        assert_eq!(badge(false, Badge::Ok, "done"), "[OK] done");
        assert_eq!(badge(false, Badge::Err, ""), "[ERR]");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ääääääääääää", 6), "äää...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(&"f".repeat(64)), "ffffffffffff");
    }

    #[test]
    fn test_format_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-09 07:05");
    }
}
