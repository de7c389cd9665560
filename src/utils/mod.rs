use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decodes UTF-8 bytes, skipping a leading byte order mark.
pub fn decode_utf8(bytes: &[u8]) -> Result<String, std::string::FromUtf8Error> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8(body.to_vec())
}

/// Removes a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("valid fence regex")
    });

    match fence.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

/// Drops characters XML 1.0 cannot carry. Tab, line feed and carriage return stay.
pub fn xml_safe(text: &str) -> Cow<'_, str> {
    let allowed = |c: char| {
        !matches!(c, '\u{FFFE}' | '\u{FFFF}')
            && (!c.is_control() || matches!(c, '\t' | '\n' | '\r'))
    };
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| allowed(c)).collect())
    }
}

/// Splits plain text into paragraphs separated by one or more blank lines.
pub fn split_blank_lines(text: &str) -> Vec<&str> {
    static BLANK: OnceLock<Regex> = OnceLock::new();
    let blank = BLANK.get_or_init(|| Regex::new(r"\r?\n[ \t]*\r?\n").expect("valid blank-line regex"));

    blank
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}
