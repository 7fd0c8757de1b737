use std::sync::LazyLock;

use regex_lite::Regex;

use super::artifacts::remove_json_artifacts;
use super::extractor::ExtractContext;
use super::WireChunk;
use crate::json_scan::find_string_field;
use crate::util::unescape_json_string;

static AGGRESSIVE_FIELD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""(?:content|response|text)"\s*:\s*"((?:[^"\\]|\\.)*)"#).ok()
});

/// Which whole-body recovery step produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    StructuredStream,
    BalancedFields,
    AggressivePattern,
    ArtifactStrip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub text: String,
    pub strategy: RecoveryStrategy,
}

/// Last-resort pass over an entire body that produced no fragments.
///
/// Tries, in order: a streaming structured decode of every JSON value in the
/// body, a scan for every complete `content`/`response` string, a permissive
/// pattern that also accepts cut-off values, and artifact stripping.
#[must_use]
pub fn recover_body(raw: &str, ctx: &ExtractContext<'_>) -> Option<Recovered> {
    let steps: [(RecoveryStrategy, fn(&str, &ExtractContext<'_>) -> Option<String>); 4] = [
        (RecoveryStrategy::StructuredStream, structured_stream),
        (RecoveryStrategy::BalancedFields, balanced_fields),
        (RecoveryStrategy::AggressivePattern, aggressive_pattern),
        (RecoveryStrategy::ArtifactStrip, artifact_strip),
    ];

    for (strategy, step) in steps {
        let Some(text) = step(raw, ctx) else {
            continue;
        };
        if text.trim().is_empty() || text.chars().count() < ctx.min_fragment_chars.max(1) {
            continue;
        }
        tracing::debug!(?strategy, chars = text.chars().count(), "recovered body text");
        return Some(Recovered { text, strategy });
    }
    None
}

fn structured_stream(raw: &str, _ctx: &ExtractContext<'_>) -> Option<String> {
    let mut joined = String::new();
    let mut recognized = false;
    for value in serde_json::Deserializer::from_str(raw.trim()).into_iter::<WireChunk>() {
        let Ok(wire) = value else {
            break;
        };
        recognized |= wire.is_recognized();
        if let Some(content) = wire.content() {
            joined.push_str(content);
        }
    }
    recognized.then_some(joined)
}

fn balanced_fields(raw: &str, _ctx: &ExtractContext<'_>) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut values: Vec<(usize, String)> = Vec::new();
    for key in ["content", "response"] {
        let mut from = 0;
        while let Some(found) = find_string_field(bytes, key, from) {
            if !found.closed {
                break;
            }
            values.push((found.value.start, unescape_json_string(&raw[found.value.clone()])));
            from = found.value.end + 1;
        }
    }
    if values.is_empty() {
        return None;
    }
    values.sort_by_key(|(start, _)| *start);
    Some(values.into_iter().map(|(_, value)| value).collect())
}

fn aggressive_pattern(raw: &str, _ctx: &ExtractContext<'_>) -> Option<String> {
    let re = AGGRESSIVE_FIELD_RE.as_ref()?;
    let mut joined = String::new();
    let mut matched = false;
    for captures in re.captures_iter(raw) {
        if let Some(value) = captures.get(1) {
            matched = true;
            joined.push_str(&unescape_json_string(value.as_str()));
        }
    }
    matched.then_some(joined)
}

fn artifact_strip(raw: &str, ctx: &ExtractContext<'_>) -> Option<String> {
    let residue = remove_json_artifacts(raw, ctx.model);
    (residue.chars().count() > ctx.artifact_min_chars).then_some(residue)
}
