const HEX: &[u8; 16] = b"0123456789abcdef";
const LOG_PREVIEW_CHARS: usize = 80;

/// Append `value` as a quoted JSON string literal.
#[inline]
pub fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

/// Decode the body of a JSON string literal (without its quotes).
///
/// Lenient: unknown escapes keep the escaped character, a trailing lone
/// backslash is dropped, and unpaired surrogates become U+FFFD. Values cut
/// mid-stream therefore still decode to their readable prefix.
#[must_use]
pub fn unescape_json_string(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_owned();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0c}'),
            Some('u') => push_unicode_escape(&mut out, &mut chars),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

fn push_unicode_escape(out: &mut String, chars: &mut std::str::Chars<'_>) {
    let Some(high) = read_hex4(chars) else {
        return;
    };
    if !(0xD800..0xDC00).contains(&high) {
        out.push(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER));
        return;
    }

    let mut lookahead = chars.clone();
    if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
        if let Some(low) = read_hex4(&mut lookahead) {
            if (0xDC00..0xE000).contains(&low) {
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                *chars = lookahead;
                return;
            }
        }
    }
    out.push(char::REPLACEMENT_CHARACTER);
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        value = (value << 4) | chars.next()?.to_digit(16)?;
    }
    Some(value)
}

/// Short, single-line rendering of `text` for log fields.
#[must_use]
pub(crate) fn log_preview(text: &str) -> String {
    let mut out: String = text
        .chars()
        .take(LOG_PREVIEW_CHARS)
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if text.chars().nth(LOG_PREVIEW_CHARS).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "mix \"\\\n\t\r\u{0000}",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn escape_then_unescape_is_identity() {
        let inputs = [
            "a\nb",
            "tab\there",
            "say \"hi\"",
            "back\\slash",
            "\\n literal",
            "\"\\\n\t\"",
            "\\\"\n\t\\\\",
            "",
        ];
        for input in inputs {
            let mut escaped = String::new();
            push_json_string_escaped(&mut escaped, input);
            let body = &escaped[1..escaped.len() - 1];
            assert_eq!(unescape_json_string(body), input, "escaped form {escaped}");
        }
    }

    #[test]
    fn unescape_decodes_unicode_and_surrogates() {
        assert_eq!(unescape_json_string(r"caf\u00e9"), "café");
        assert_eq!(unescape_json_string(r"\ud83d\ude00"), "😀");
        assert_eq!(unescape_json_string(r"\ud83d alone"), "\u{fffd} alone");
    }

    #[test]
    fn unescape_tolerates_truncation() {
        assert_eq!(unescape_json_string("cut here\\"), "cut here");
        assert_eq!(unescape_json_string(r"half \u00"), "half ");
        assert_eq!(unescape_json_string(r"odd \q"), "odd q");
    }

    #[test]
    fn log_preview_truncates_long_text() {
        let long = "x".repeat(200);
        let preview = log_preview(&long);
        assert!(preview.ends_with('…'));
        assert_eq!(preview.chars().count(), LOG_PREVIEW_CHARS + 1);
        assert_eq!(log_preview("a\nb"), "a b");
    }
}
