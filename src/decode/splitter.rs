use std::sync::LazyLock;

use memchr::memchr;
use regex_lite::Regex;

use super::{ChunkKind, ResponseChunk};
use crate::json_scan::{is_complete_object, scan_top_level_objects};

const BOUNDARY_MARKER: char = '\u{1e}';
const MARKED_BOUNDARY: &str = "}\u{1e}{";

static OBJECT_BOUNDARY_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\}[ \t\r]*\{").ok());
static KNOWN_SHAPE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"\{[^{}]*"message"\s*:\s*\{[^{}]*\}[^{}]*\}|\{[^{}]*"response"\s*:\s*"(?:[^"\\]|\\.)*"[^{}]*\}"#,
    )
    .ok()
});

/// Split a raw body into classified chunks.
///
/// 1. Bodies with newlines are split per line (blank lines dropped); a line
///    holding several objects is split further by step 2.
/// 2. Separator-less object runs are split at object boundaries.
/// 3. Runs of known-shape objects embedded in other text are matched out.
/// 4. Otherwise the whole body is one chunk.
///
/// Always returns at least one chunk.
#[must_use]
pub fn split(raw: &str) -> Vec<ResponseChunk> {
    let mut chunks = if memchr(b'\n', raw.as_bytes()).is_some() {
        split_lines(raw)
    } else {
        split_single_line(raw)
    };

    if chunks.is_empty() {
        chunks.push(ResponseChunk::new(raw));
    }
    chunks
}

fn split_lines(raw: &str) -> Vec<ResponseChunk> {
    let mut chunks = Vec::new();
    let mut segments = raw.split('\n').peekable();
    while let Some(segment) = segments.next() {
        let line_break = segments.peek().is_some();
        let segment = segment.strip_suffix('\r').unwrap_or(segment);
        if segment.trim().is_empty() {
            continue;
        }

        let chunk = ResponseChunk::new(segment);
        if chunk.kind() == ChunkKind::ConcatenatedObjects {
            let mut pieces = split_objects(segment);
            if let Some(last) = pieces.pop() {
                pieces.push(last.with_line_break(line_break));
            }
            chunks.extend(pieces);
        } else {
            chunks.push(chunk.with_line_break(line_break));
        }
    }
    chunks
}

fn split_single_line(raw: &str) -> Vec<ResponseChunk> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    // Prose may contain `} {`; only JSON-looking bodies are cut at boundaries.
    let whole = ResponseChunk::new(raw);
    if whole.kind() == ChunkKind::PlainText {
        return vec![whole];
    }
    if looks_concatenated(raw) {
        return split_objects(raw);
    }
    if let Some(re) = KNOWN_SHAPE_RE.as_ref() {
        let matches: Vec<&str> = re.find_iter(raw).map(|m| m.as_str()).collect();
        if matches.len() >= 2 {
            return matches.into_iter().map(ResponseChunk::new).collect();
        }
    }
    vec![whole]
}

#[inline]
fn looks_concatenated(text: &str) -> bool {
    OBJECT_BOUNDARY_RE
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

/// Split a run of objects. Uses the escape-aware span scanner when it accounts
/// for the whole text, else the textual `}{` boundary heuristic.
pub(crate) fn split_objects(text: &str) -> Vec<ResponseChunk> {
    let scan = scan_top_level_objects(text.as_bytes());
    if !scan.has_gaps && scan.spans.len() >= 2 {
        let mut pieces: Vec<&str> = scan.spans.iter().map(|span| &text[span.clone()]).collect();
        if scan.unterminated {
            let tail_start = scan.spans.last().map_or(0, |span| span.end);
            pieces.push(text[tail_start..].trim());
        }
        return pieces.into_iter().map(ResponseChunk::new).collect();
    }

    let Some(re) = OBJECT_BOUNDARY_RE.as_ref() else {
        return vec![ResponseChunk::new(text)];
    };
    let normalized = re.replace_all(text, MARKED_BOUNDARY);

    normalized
        .split(BOUNDARY_MARKER)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| ResponseChunk::new(pad_object(piece)))
        .collect()
}

/// Add a missing leading `{` and/or trailing `}` when that turns the piece into
/// a complete object; otherwise keep the piece as-is.
fn pad_object(piece: &str) -> String {
    let needs_open = !piece.starts_with('{');
    let needs_close = !piece.ends_with('}');
    if !needs_open && !needs_close {
        return piece.to_owned();
    }

    let open = if needs_open { "{" } else { "" };
    let candidates = [
        format!("{open}{piece}"),
        format!("{piece}}}"),
        format!("{open}{piece}}}"),
    ];
    candidates
        .into_iter()
        .find(|candidate| is_complete_object(candidate))
        .unwrap_or_else(|| piece.to_owned())
}
