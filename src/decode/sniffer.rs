use memchr::memmem;

use super::ChunkKind;
use crate::json_scan::{is_complete_object, scan_top_level_objects};

/// Field markers that identify a chunk as server JSON even when it does not
/// start with `{` (for example a line cut at its head).
const JSON_FIELD_MARKERS: [&str; 4] = ["\"model\":", "\"message\":", "\"role\":", "\"response\":"];

/// Classify a chunk into one of the known response shapes.
///
/// Rules are checked in priority order:
/// 1. no leading `{` and no field markers: [`ChunkKind::PlainText`]
/// 2. exactly one complete object: [`ChunkKind::SingleObject`]
/// 3. several lines that each start with `{`: [`ChunkKind::NdJson`]
/// 4. unbalanced and carrying a content marker: [`ChunkKind::Truncated`]
/// 5. two or more closed top-level spans: [`ChunkKind::ConcatenatedObjects`]
/// 6. anything else: [`ChunkKind::Unknown`]
#[must_use]
pub fn classify(chunk: &str) -> ChunkKind {
    let trimmed = chunk.trim();
    if !trimmed.starts_with('{') && !has_json_marker(trimmed) {
        return ChunkKind::PlainText;
    }
    if is_complete_object(trimmed) {
        return ChunkKind::SingleObject;
    }
    if looks_like_ndjson(trimmed) {
        return ChunkKind::NdJson;
    }

    let scan = scan_top_level_objects(trimmed.as_bytes());
    if scan.unterminated && has_truncation_marker(trimmed) {
        return ChunkKind::Truncated;
    }
    if scan.spans.len() >= 2 {
        return ChunkKind::ConcatenatedObjects;
    }
    ChunkKind::Unknown
}

#[inline]
fn has_json_marker(text: &str) -> bool {
    JSON_FIELD_MARKERS
        .iter()
        .any(|marker| memmem::find(text.as_bytes(), marker.as_bytes()).is_some())
}

#[inline]
fn has_truncation_marker(text: &str) -> bool {
    let bytes = text.as_bytes();
    let nested = memmem::find(bytes, b"\"message\":").is_some()
        && memmem::find(bytes, b"\"content\":").is_some();
    nested || memmem::find(bytes, b"\"response\":").is_some()
}

fn looks_like_ndjson(text: &str) -> bool {
    let mut object_lines = 0usize;
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if !line.starts_with('{') {
            return false;
        }
        object_lines += 1;
    }
    object_lines >= 2
}
