//! Rendering of secrets for logs, errors, and audit records.
//!
//! Every place a token secret could end up in a `Display`, `Debug`, error
//! string, or audit field must go through [`obfuscate`] first, so a raw
//! token value never reaches a log line, error message, or audit record.

/// Render `secret` as a fixed-shape placeholder: first 2 and last 2
/// characters separated by an ellipsis for strings of at least 8 bytes,
/// `****` for anything shorter (so the length itself doesn't leak too much
/// for very short inputs).
pub fn obfuscate(secret: &str) -> String {
    let len = secret.chars().count();
    if len < 8 {
        return "****".to_string();
    }
    let chars: Vec<char> = secret.chars().collect();
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[len - 2..].iter().collect();
    format!("{head}...{tail}")
}

/// Obfuscate a token id (UUID) the same way, for use in log lines where the
/// full id would otherwise let a caller correlate log lines to token rows.
pub fn obfuscate_uuid(id: &uuid::Uuid) -> String {
    obfuscate(&id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_become_stars() {
        assert_eq!(obfuscate("abc"), "****");
        assert_eq!(obfuscate(""), "****");
        assert_eq!(obfuscate("1234567"), "****");
    }

    #[test]
    fn long_strings_keep_head_and_tail() {
        assert_eq!(obfuscate("lpk_abcdefghijklmnop"), "lp...op");
    }

    #[test]
    fn never_contains_the_middle() {
        let secret = "lpk_supersecretvalue1234567890";
        let rendered = obfuscate(secret);
        assert!(!rendered.contains("supersecret"));
    }
}
