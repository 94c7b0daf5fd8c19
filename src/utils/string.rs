/// Strips one level of matching quotes from a PHP string literal.
pub fn unquote_string(s: &str) -> String {
    let s = s.trim();
    let is_quoted = (s.starts_with('"') && s.ends_with('"'))
        || (s.starts_with('\'') && s.ends_with('\''));

    if is_quoted && s.len() >= 2 {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Last segment of a backslash-qualified PHP name.
pub fn last_segment(qualified: &str) -> &str {
    qualified
        .trim_end_matches('\\')
        .rsplit('\\')
        .next()
        .unwrap_or(qualified)
}

/// Normalizes a configuration path entry: no leading `./`, no trailing `/`.
pub fn normalize_entry(entry: &str) -> String {
    let mut entry = entry.trim();
    while let Some(rest) = entry.strip_prefix("./") {
        entry = rest;
    }
    let trimmed = entry.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() && entry.starts_with('/') {
        return "/".to_string();
    }
    trimmed.to_string()
}
