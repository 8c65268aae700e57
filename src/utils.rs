//! Small helpers for text handling, dates and output directories.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

use crate::error::{NewsError, Result};

/// `"... [+2101 chars]"` style suffix the news API appends to snippets.
static TRUNCATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[\+\d+\s*chars\]\s*$").expect("valid regex"));

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with an
/// ellipsis and the number of dropped bytes appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Keep the first `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// A response cut off by the model's token limit fails with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Strip the API's `[+N chars]` marker from a content snippet.
///
/// A snippet that carried the marker gets `...` appended so readers can tell
/// it was cut.
pub fn clean_snippet(snippet: &str) -> String {
    let trimmed = snippet.trim();
    if TRUNCATION_MARKER.is_match(trimmed) {
        let body = TRUNCATION_MARKER.replace(trimmed, "");
        let body = body.trim_end().trim_end_matches('…').trim_end_matches("...");
        format!("{}...", body.trim_end())
    } else {
        trimmed.to_string()
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Human-friendly relative date for article cards.
///
/// `"Today, Jul 20"`, `"Yesterday, Jul 19"`, `"3 days ago"`, else
/// `"Jul 01, 2025"`.
pub fn format_date_for_display(published: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(raw) = published else {
        return "Unknown Date".to_string();
    };
    let Ok(date) = DateTime::parse_from_rfc3339(raw) else {
        return "Unknown Date".to_string();
    };
    let date = date.with_timezone(&Utc);
    let days = (now - date).num_days();
    match days {
        0 => format!("Today, {}", date.format("%b %d")),
        1 => format!("Yesterday, {}", date.format("%b %d")),
        2..=6 => format!("{days} days ago"),
        _ => date.format("%b %d, %Y").to_string(),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| NewsError::io(path, e))?;
    let probe_path = path.join("..__probe_write__");
    fs::write(&probe_path, b"")
        .await
        .map_err(|e| NewsError::io(&probe_path, e))?;
    let _ = fs::remove_file(&probe_path).await;
    info!("Output directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "é".repeat(10);
        let result = truncate_for_log(&s, 5);
        assert!(result.starts_with("éé"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_looks_truncated() {
        let result: std::result::Result<serde_json::Value, _> =
            serde_json::from_str(r#"{"field": "value"#);
        assert!(looks_truncated(&result.unwrap_err()));

        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{]");
        assert!(!looks_truncated(&result.unwrap_err()));
    }

    #[test]
    fn test_clean_snippet() {
        assert_eq!(
            clean_snippet("Stocks rose on Monday… [+2101 chars]"),
            "Stocks rose on Monday..."
        );
        assert_eq!(clean_snippet("Plain text"), "Plain text");
        assert_eq!(clean_snippet("  Padded [+12 chars]  "), "Padded...");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_format_date_for_display() {
        let now = Utc.with_ymd_and_hms(2025, 7, 20, 18, 0, 0).unwrap();
        assert_eq!(
            format_date_for_display(Some("2025-07-20T09:00:00Z"), now),
            "Today, Jul 20"
        );
        assert_eq!(
            format_date_for_display(Some("2025-07-19T09:00:00Z"), now),
            "Yesterday, Jul 19"
        );
        assert_eq!(
            format_date_for_display(Some("2025-07-16T09:00:00Z"), now),
            "4 days ago"
        );
        assert_eq!(
            format_date_for_display(Some("2025-07-01T09:00:00Z"), now),
            "Jul 01, 2025"
        );
        assert_eq!(format_date_for_display(None, now), "Unknown Date");
        assert_eq!(format_date_for_display(Some("garbage"), now), "Unknown Date");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }
}
