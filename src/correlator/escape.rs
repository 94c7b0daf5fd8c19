//! TeamCity service-message value escaping.

use regex::Regex;
use std::sync::OnceLock;

/// Reverses TeamCity escaping (`|n`, `|r`, `|'`, `||`, `|[`, `|]`, `|0xNNNN`)
/// and strips trailing whitespace left by escaped line breaks.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '|' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\'') => out.push('\''),
            Some('|') => out.push('|'),
            Some('[') => out.push('['),
            Some(']') => out.push(']'),
            Some('0') if chars.peek() == Some(&'x') => {
                chars.next();
                let hex: String = std::iter::from_fn(|| chars.next_if(char::is_ascii_hexdigit))
                    .take(4)
                    .collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("|0x");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('|');
                out.push(other);
            }
            // dangling escape at the end of the value
            None => {}
        }
    }

    out.trim_end().to_string()
}

fn location_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^\s*(.+?):(\d+)\s*$").expect("valid location pattern"))
}

/// The last `<file>:<line>` locator in an unescaped failure detail.
pub fn last_location(detail: &str) -> Option<(String, u32)> {
    location_pattern()
        .captures_iter(detail)
        .filter_map(|caps| {
            let line = caps[2].parse().ok()?;
            Some((caps[1].trim().to_string(), line))
        })
        .last()
}
