//! RouterOS address-list import script rendering.
//!
//! The script is additive only: every entry is added inside its own
//! `:do { ... } on-error={}` so an entry already present on the device does
//! not abort the import, and nothing is ever removed.

use std::fmt::Write;

use crate::aggregator::NetworkEntry;
use crate::compiler::CompiledOutput;

/// Maximum length accepted for list names and timeouts
const MAX_TOKEN_LEN: usize = 64;

/// Render a compiled output as an import script.
pub fn render(output: &CompiledOutput) -> String {
    let mut script = String::with_capacity(64 + output.entries.len() * 96);

    let _ = writeln!(script, "# generated by blocklist-compiler {}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(
        script,
        "# list={} entries={} compiled-at={}",
        output.list_name,
        output.entries.len(),
        output.compiled_at.format("%Y-%m-%dT%H:%M:%SZ")
    );
    script.push_str("/ip firewall address-list\n");

    for entry in &output.entries {
        render_entry(&mut script, entry, &output.list_name, &output.timeout);
        script.push('\n');
    }

    script
}

fn render_entry(out: &mut String, entry: &NetworkEntry, list_name: &str, timeout: &str) {
    let _ = write!(out, ":do {{ add list={} address=", list_name);
    if entry.is_host() {
        let _ = write!(out, "{}", entry.net.addr());
    } else {
        let _ = write!(out, "{}", entry.net);
    }
    let _ = write!(out, " comment=\"{}\"", escape_comment(&entry.comment));
    if !timeout.is_empty() {
        let _ = write!(out, " timeout={}", timeout);
    }
    out.push_str(" } on-error={}");
}

/// Escape a comment for a double-quoted RouterOS string.
///
/// `\`, `"` and `$` (variable expansion) are escaped; control characters are
/// dropped so one entry always stays on one line.
pub fn escape_comment(comment: &str) -> String {
    let mut out = String::with_capacity(comment.len());
    for c in comment.chars() {
        match c {
            '\\' | '"' | '$' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Address-list names: ASCII letters, digits, `_`, `-`, `.`.
pub fn is_valid_list_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOKEN_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.".contains(c))
}

/// RouterOS durations such as `02:00:00`, `1d02:00:00`, `12h` or `1w2d`.
pub fn is_valid_timeout(timeout: &str) -> bool {
    !timeout.is_empty()
        && timeout.len() <= MAX_TOKEN_LEN
        && timeout.starts_with(|c: char| c.is_ascii_digit())
        && timeout
            .chars()
            .all(|c| c.is_ascii_digit() || ":wdhms".contains(c))
}

/// Express a whole number of hours as a RouterOS duration. Zero means none.
pub fn format_timeout_hours(hours: u32) -> String {
    match (hours / 24, hours % 24) {
        (0, 0) => String::new(),
        (0, h) => format!("{:02}:00:00", h),
        (d, h) => format!("{}d{:02}:00:00", d, h),
    }
}
