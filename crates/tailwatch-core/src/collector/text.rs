//! Small string helpers shared by the line parsers.

use std::borrow::Cow;

/// Borrows the line as text, replacing invalid UTF-8.
pub(crate) fn as_text(line: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(line)
}

/// Returns the text following the first occurrence of `needle`.
pub(crate) fn after<'a>(haystack: &'a str, needle: &str) -> Option<&'a str> {
    haystack
        .find(needle)
        .map(|pos| &haystack[pos + needle.len()..])
}

/// Parses the leading decimal digits, ignoring leading blanks.
///
/// Returns 0 when no digit is present and saturates at `u64::MAX`.
pub(crate) fn leading_u64(s: &str) -> u64 {
    let s = s.trim_start();
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    match s[..end].parse() {
        Ok(n) => n,
        Err(_) if end > 0 => u64::MAX,
        Err(_) => 0,
    }
}

/// Parses the leading floating point number, 0.0 when there is none.
pub(crate) fn leading_f64(s: &str) -> f64 {
    let s = s.trim_start();
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .unwrap_or(s.len());
    // Longest parsable prefix, so that "1.5e" still reads as 1.5.
    (1..=end)
        .rev()
        .find_map(|len| s[..len].parse::<f64>().ok())
        .unwrap_or(0.0)
}
