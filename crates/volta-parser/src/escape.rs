//! Dump-line escaping: literal spaces become `\s`, backslashes `\\`,
//! newlines `\n`, so every parameter stays a single whitespace-free
//! token.

/// Escape a parameter for a dump line.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ' ' => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    if out.is_empty() {
        // Empty parameters still need a token on the line.
        out.push_str("\\0");
    }
    out
}

/// Undo [`escape`].
pub fn unescape(token: &str) -> String {
    if token == "\\0" {
        return String::new();
    }
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some('0') => {}
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for text in ["plain", "with space", "a\\b", "multi  spaces", "nl\nend", ""] {
            let escaped = escape(text);
            assert!(
                !escaped.contains(' ') && !escaped.contains('\n'),
                "escaped form must be one token: {escaped:?}"
            );
            assert_eq!(unescape(&escaped), text);
        }
    }

    #[test]
    fn test_known_forms() {
        assert_eq!(escape("a b"), "a\\sb");
        assert_eq!(escape("a\\b"), "a\\\\b");
        assert_eq!(unescape("x\\sy"), "x y");
    }
}
