//! Small formatting and parsing helpers shared by the compiler, the CLI and
//! the HTTP layer.

use crate::source::SourceId;

/// Format a count with a K/M suffix for log lines.
///
/// ```
/// use blocklist_compiler::utils::format_count;
/// assert_eq!(format_count(500), "500");
/// assert_eq!(format_count(1500), "1.5K");
/// assert_eq!(format_count(2_300_000), "2.3M");
/// ```
pub fn format_count(count: usize) -> String {
    match count {
        c if c >= 1_000_000 => format!("{:.1}M", c as f64 / 1_000_000.0),
        c if c >= 1_000 => format!("{:.1}K", c as f64 / 1_000.0),
        c => c.to_string(),
    }
}

/// Format a download size (B, KB, MB).
///
/// ```
/// use blocklist_compiler::utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Shorten `s` to at most `max` characters, marking the cut with "...".
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Split a comma-separated query value, dropping blank items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a comma-separated list of source ids. Items that are not integers
/// are returned separately so the caller can report them.
pub fn parse_id_list(raw: &str) -> (Vec<SourceId>, Vec<String>) {
    let mut ids = Vec::new();
    let mut invalid = Vec::new();
    for item in split_list(raw) {
        match item.parse::<SourceId>() {
            Ok(id) => ids.push(id),
            Err(_) => invalid.push(item),
        }
    }
    (ids, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1.0K");
        assert_eq!(format_count(1_000_000), "1.0M");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1500), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("https://feeds.example.com/long", 12), "https://f...");
        assert_eq!(truncate("abc", 2), "...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_parse_id_list() {
        let (ids, invalid) = parse_id_list("1, 2,x,3");
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(invalid, vec!["x".to_string()]);
    }
}
