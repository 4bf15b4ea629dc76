use crate::consts::DOUBLE_ENCODED;
use regex::Captures;
use std::borrow::Cow;

/// Normalize fetched text so that cosmetic differences don't register as
/// changes.
///
/// Double-encoded UTF-8 is repaired where it decodes cleanly, every line is
/// stripped of surrounding whitespace, and the result ends with exactly one
/// newline. Repair and stripping are repeated until the text stops changing,
/// so `canonicalize(canonicalize(x)) == canonicalize(x)` always holds.
///
/// # Examples
///
/// ```
/// use presswatch_text::canonicalize;
///
/// assert_eq!(canonicalize("  Caf\u{c3}\u{a9}  \nau lait \n\n"), "Café\nau lait\n");
/// ```
pub fn canonicalize(text: &str) -> String {
    let mut current = normalize(text);
    loop {
        let next = normalize(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize(text: &str) -> String {
    strip_whitespace(&repair_double_encoding(text))
}

/// Restore UTF-8 sequences that were decoded as Latin-1 somewhere upstream
/// (`"Ã©"` back to `"é"`). Runs that don't form valid UTF-8 once re-encoded
/// are left exactly as they were.
pub fn repair_double_encoding(text: &str) -> Cow<'_, str> {
    DOUBLE_ENCODED.replace_all(text, |caps: &Captures| {
        let matched = &caps[0];
        // Every character in the match is below U+0100, so each one maps
        // onto a single Latin-1 byte.
        let bytes: Option<Vec<u8>> = matched.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect();
        match bytes.map(String::from_utf8) {
            Some(Ok(repaired)) => repaired,
            _ => matched.to_string(),
        }
    })
}

/// Strip whitespace (including non-breaking spaces) from both ends of every
/// line and of the text as a whole, then terminate with a single newline.
pub fn strip_whitespace(text: &str) -> String {
    let lines = text.split('\n').map(str::trim).collect::<Vec<_>>();
    let mut stripped = lines.join("\n").trim().to_string();
    stripped.push('\n');
    stripped
}
