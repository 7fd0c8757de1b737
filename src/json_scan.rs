use std::ops::Range;

use memchr::memmem;

#[inline]
pub(crate) fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    while i < len {
        match bytes[i] {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            _ => break,
        }
    }
    i
}

#[inline]
pub(crate) fn parse_json_string_end(bytes: &[u8], start: usize) -> Result<usize, ()> {
    let len = bytes.len();
    if start >= len || bytes[start] != b'"' {
        return Err(());
    }
    let mut i = start + 1;
    while i < len {
        match bytes[i] {
            b'"' => return Ok(i + 1),
            b'\\' => {
                i += 2;
                if i > len {
                    return Err(());
                }
            }
            0x00..=0x1F => return Err(()),
            _ => i += 1,
        }
    }
    Err(())
}

/// Strict end offset of the JSON value starting at (or after whitespace from) `start`.
#[inline]
pub(crate) fn parse_json_value_end(bytes: &[u8], start: usize) -> Result<usize, ()> {
    let i = skip_ws(bytes, start);
    match bytes.get(i) {
        Some(b'"') => parse_json_string_end(bytes, i),
        Some(b'{') => parse_container_end(bytes, i, b'{', b'}'),
        Some(b'[') => parse_container_end(bytes, i, b'[', b']'),
        Some(b't') => consume_literal(bytes, i, b"true"),
        Some(b'f') => consume_literal(bytes, i, b"false"),
        Some(b'n') => consume_literal(bytes, i, b"null"),
        Some(b'-' | b'0'..=b'9') => parse_json_number_end(bytes, i),
        _ => Err(()),
    }
}

fn parse_container_end(bytes: &[u8], start: usize, open: u8, close: u8) -> Result<usize, ()> {
    if bytes.get(start) != Some(&open) {
        return Err(());
    }
    let is_object = open == b'{';
    let mut i = skip_ws(bytes, start + 1);
    if bytes.get(i) == Some(&close) {
        return Ok(i + 1);
    }
    loop {
        if is_object {
            i = parse_json_string_end(bytes, skip_ws(bytes, i))?;
            i = skip_ws(bytes, i);
            if bytes.get(i) != Some(&b':') {
                return Err(());
            }
            i += 1;
        }
        i = skip_ws(bytes, parse_json_value_end(bytes, i)?);
        match bytes.get(i) {
            Some(b',') => i += 1,
            Some(c) if *c == close => return Ok(i + 1),
            _ => return Err(()),
        }
    }
}

#[inline]
fn consume_literal(bytes: &[u8], start: usize, lit: &[u8]) -> Result<usize, ()> {
    let end = start.checked_add(lit.len()).ok_or(())?;
    if bytes.get(start..end) == Some(lit) {
        Ok(end)
    } else {
        Err(())
    }
}

fn parse_json_number_end(bytes: &[u8], start: usize) -> Result<usize, ()> {
    let mut i = start;
    if bytes.get(i) == Some(&b'-') {
        i += 1;
    }
    let digits_start = i;
    while bytes.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    if i == digits_start {
        return Err(());
    }
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        let frac_start = i;
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i == frac_start {
            return Err(());
        }
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_start = i;
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i == exp_start {
            return Err(());
        }
    }
    Ok(i)
}

/// `true` when `text` is exactly one syntactically complete JSON object,
/// ignoring surrounding whitespace.
#[must_use]
pub(crate) fn is_complete_object(text: &str) -> bool {
    let bytes = text.as_bytes();
    let start = skip_ws(bytes, 0);
    if bytes.get(start) != Some(&b'{') {
        return false;
    }
    parse_json_value_end(bytes, start).is_ok_and(|end| skip_ws(bytes, end) == bytes.len())
}

/// Result of a lenient brace-depth scan over a text that may hold several
/// top-level objects.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ObjectScan {
    /// Byte ranges of every top-level `{...}` span that closed.
    pub spans: Vec<Range<usize>>,
    /// The scan ended inside an object or inside a string.
    pub unterminated: bool,
    /// Non-whitespace bytes were found between top-level spans.
    pub has_gaps: bool,
}

/// Brace-depth scan that respects string literals and escapes.
///
/// This does not validate JSON; it only tracks where top-level objects open
/// and close, so a literal `}{` inside a string value never splits a span.
#[must_use]
pub(crate) fn scan_top_level_objects(bytes: &[u8]) -> ObjectScan {
    let mut scan = ObjectScan::default();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut span_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    span_start = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    scan.spans.push(span_start..i + 1);
                }
            }
            b' ' | b'\n' | b'\r' | b'\t' => {}
            _ if depth == 0 => scan.has_gaps = true,
            _ => {}
        }
        i += 1;
    }

    scan.unterminated = depth > 0 || in_string;
    scan
}

/// A `"key": "value"` match located by [`find_string_field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldMatch {
    /// Raw (still escaped) value bytes, without the surrounding quotes.
    pub value: Range<usize>,
    /// An unescaped closing quote terminated the value.
    pub closed: bool,
}

/// Find the first `"key"` followed by `:` and a string value, starting the
/// search at `from`. Whitespace around the colon is allowed.
#[must_use]
pub(crate) fn find_string_field(bytes: &[u8], key: &str, from: usize) -> Option<FieldMatch> {
    let mut needle = Vec::with_capacity(key.len() + 2);
    needle.push(b'"');
    needle.extend_from_slice(key.as_bytes());
    needle.push(b'"');
    let finder = memmem::Finder::new(&needle);

    let mut search_from = from;
    while search_from < bytes.len() {
        let rel = finder.find(&bytes[search_from..])?;
        let key_end = search_from + rel + needle.len();
        search_from = key_end;

        let colon = skip_ws(bytes, key_end);
        if bytes.get(colon) != Some(&b':') {
            continue;
        }
        let quote = skip_ws(bytes, colon + 1);
        if bytes.get(quote) != Some(&b'"') {
            continue;
        }
        let value_start = quote + 1;
        return Some(match string_body_end(bytes, value_start) {
            Some(end) => FieldMatch {
                value: value_start..end,
                closed: true,
            },
            None => FieldMatch {
                value: value_start..bytes.len(),
                closed: false,
            },
        });
    }
    None
}

/// Offset of the first unescaped `"` at or after `start`.
#[inline]
fn string_body_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}
