use super::artifacts::remove_json_artifacts;
use super::{ChunkKind, ExtractionResult, ResponseChunk, TokenUsage, WireChunk};
use crate::config::DecoderConfig;
use crate::json_scan::{find_string_field, scan_top_level_objects};
use crate::util::unescape_json_string;

/// Keys that carry generated text, in lookup order.
const CONTENT_KEYS: [&str; 2] = ["content", "response"];

/// Per-request knobs for the extraction cascade.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    /// Model name from the request, stripped as a token during artifact removal.
    pub model: Option<&'a str>,
    /// Fragments with fewer characters are reported as [`ExtractionResult::NoContent`].
    pub min_fragment_chars: usize,
    /// Artifact-strip residue must be strictly longer than this to count.
    pub artifact_min_chars: usize,
}

impl<'a> ExtractContext<'a> {
    #[must_use]
    pub fn new(config: &DecoderConfig, model: Option<&'a str>) -> Self {
        Self {
            model,
            min_fragment_chars: config.min_fragment_chars,
            artifact_min_chars: config.artifact_min_chars,
        }
    }
}

impl Default for ExtractContext<'_> {
    fn default() -> Self {
        Self::new(&DecoderConfig::default(), None)
    }
}

/// Which cascade step produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PlainText,
    Structured,
    TargetedField,
    PartialField,
    ArtifactStrip,
    Exhausted,
}

/// [`ExtractionResult`] plus the out-of-band signals a structured line can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub result: ExtractionResult,
    pub strategy: Strategy,
    /// A structured line reported `"done": true`.
    pub done: bool,
    /// A structured line carried an `"error"` field.
    pub server_error: Option<String>,
    /// Token counts from a final structured line.
    pub usage: Option<TokenUsage>,
}

impl Extraction {
    fn new(result: ExtractionResult, strategy: Strategy) -> Self {
        Self {
            result,
            strategy,
            done: false,
            server_error: None,
            usage: None,
        }
    }
}

/// Run the extraction cascade over one classified chunk.
///
/// Order: plain-text identity, structured decode, targeted field scan,
/// partial field recovery (truncated chunks only), artifact stripping. The
/// first step that yields an answer wins; failures fall through silently.
#[must_use]
pub fn extract(chunk: &ResponseChunk, ctx: &ExtractContext<'_>) -> Extraction {
    let text = chunk.text();
    match chunk.kind() {
        ChunkKind::PlainText if text.trim().is_empty() => {
            return Extraction::new(ExtractionResult::NoContent, Strategy::PlainText);
        }
        ChunkKind::PlainText => {
            return Extraction::new(gate(text.to_owned(), ctx), Strategy::PlainText);
        }
        ChunkKind::NdJson | ChunkKind::ConcatenatedObjects => {
            return extract_each(chunk, ctx);
        }
        ChunkKind::SingleObject | ChunkKind::Truncated | ChunkKind::Unknown => {}
    }

    if let Some(extraction) = structured_decode(text, ctx) {
        return extraction;
    }
    if let Some(value) = targeted_field(text) {
        return Extraction::new(gate(value, ctx), Strategy::TargetedField);
    }
    if chunk.kind() == ChunkKind::Truncated {
        if let Some(value) = partial_field(text) {
            return Extraction::new(gate(value, ctx), Strategy::PartialField);
        }
    }

    let residue = remove_json_artifacts(text, ctx.model);
    if residue.chars().count() > ctx.artifact_min_chars {
        return Extraction::new(gate(residue, ctx), Strategy::ArtifactStrip);
    }

    tracing::trace!(kind = %chunk.kind(), "extraction cascade exhausted");
    let result = if chunk.kind() == ChunkKind::Unknown {
        ExtractionResult::Malformed
    } else {
        ExtractionResult::NoContent
    };
    Extraction::new(result, Strategy::Exhausted)
}

#[inline]
fn gate(text: String, ctx: &ExtractContext<'_>) -> ExtractionResult {
    if text.chars().count() < ctx.min_fragment_chars.max(1) {
        ExtractionResult::NoContent
    } else {
        ExtractionResult::Fragment(text)
    }
}

/// Decode against the flat (`response`) and nested (`message.content`) schemas.
///
/// Returns `None` when the text is not a JSON object of a recognised shape.
/// A recognised object without text is a definitive `NoContent`.
pub(crate) fn structured_decode(text: &str, ctx: &ExtractContext<'_>) -> Option<Extraction> {
    let wire: WireChunk = serde_json::from_str(text.trim()).ok()?;
    if !wire.is_recognized() {
        return None;
    }

    let result = match wire.content() {
        Some(content) => gate(content.to_owned(), ctx),
        None => ExtractionResult::NoContent,
    };
    Some(Extraction {
        result,
        strategy: Strategy::Structured,
        done: wire.done == Some(true),
        usage: wire.usage(),
        server_error: wire.error.map(super::WireError::into_message),
    })
}

/// First complete `"content":"…"` or `"response":"…"` value, unescaped.
pub(crate) fn targeted_field(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    CONTENT_KEYS.iter().find_map(|key| {
        let found = find_string_field(bytes, key, 0)?;
        found
            .closed
            .then(|| unescape_json_string(&text[found.value]))
    })
}

/// Value of a `"content":"` / `"response":"` marker up to the first unescaped
/// quote, or to the end of the text when the value was cut off.
pub(crate) fn partial_field(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    CONTENT_KEYS.iter().find_map(|key| {
        let found = find_string_field(bytes, key, 0)?;
        Some(unescape_json_string(&text[found.value]))
    })
}

fn extract_each(chunk: &ResponseChunk, ctx: &ExtractContext<'_>) -> Extraction {
    let text = chunk.text();
    let pieces: Vec<&str> = if chunk.kind() == ChunkKind::NdJson {
        text.lines().filter(|line| !line.trim().is_empty()).collect()
    } else {
        let scan = scan_top_level_objects(text.as_bytes());
        let mut pieces: Vec<&str> = scan.spans.iter().map(|span| &text[span.clone()]).collect();
        if scan.unterminated {
            let tail_start = scan.spans.last().map_or(0, |span| span.end);
            pieces.push(&text[tail_start..]);
        }
        pieces
    };

    let mut joined = String::new();
    let mut done = false;
    let mut server_error = None;
    let mut usage = None;
    for piece in pieces {
        let sub = extract(&ResponseChunk::new(piece), ctx);
        done |= sub.done;
        usage = sub.usage.or(usage);
        if server_error.is_none() {
            server_error = sub.server_error;
        }
        if let ExtractionResult::Fragment(fragment) = sub.result {
            joined.push_str(&fragment);
        }
    }

    Extraction {
        result: gate(joined, ctx),
        strategy: Strategy::Structured,
        done,
        server_error,
        usage,
    }
}
