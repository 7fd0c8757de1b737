//! Format-recovery decoding of local model server output.
//!
//! The pieces are pure functions: [`splitter::split`] slices a body into
//! [`ResponseChunk`]s, [`sniffer::classify`] tags each slice with a
//! [`ChunkKind`], and [`extractor::extract`] runs the strategy cascade that
//! turns a chunk into an [`ExtractionResult`]. [`recovery::recover_body`] is the
//! last-resort pass over a whole body.

pub mod artifacts;
pub mod extractor;
pub mod recovery;
pub mod sniffer;
pub mod splitter;

use std::fmt;

use serde::Deserialize;

pub use artifacts::remove_json_artifacts;
pub use extractor::{extract, ExtractContext, Extraction, Strategy};
pub use recovery::{recover_body, Recovered, RecoveryStrategy};
pub use sniffer::classify;
pub use splitter::split;

/// Response shape of a chunk as seen by [`sniffer::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    PlainText,
    SingleObject,
    NdJson,
    ConcatenatedObjects,
    Truncated,
    Unknown,
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkKind::PlainText => "plain_text",
            ChunkKind::SingleObject => "single_object",
            ChunkKind::NdJson => "ndjson",
            ChunkKind::ConcatenatedObjects => "concatenated_objects",
            ChunkKind::Truncated => "truncated",
            ChunkKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified slice of a response body. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    text: String,
    kind: ChunkKind,
    line_break: bool,
}

impl ResponseChunk {
    /// Classify `text` and wrap it.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = sniffer::classify(&text);
        Self {
            text,
            kind,
            line_break: false,
        }
    }

    /// Mark that the chunk was followed by a newline in the source body.
    #[must_use]
    pub(crate) fn with_line_break(mut self, line_break: bool) -> Self {
        self.line_break = line_break;
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Whether a newline followed this chunk in the body it was split from.
    #[must_use]
    pub fn line_break(&self) -> bool {
        self.line_break
    }
}

/// Outcome of running the extraction cascade over one chunk. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    /// Non-empty generated text.
    Fragment(String),
    /// The chunk carried no usable payload (metadata, control lines).
    NoContent,
    /// The chunk could not be classified or parsed at all.
    Malformed,
}

/// Token counts reported by the server on its final line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Wire shape shared by the flat (`/api/generate`) and nested (`/api/chat`)
/// response lines.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub message: Option<WireMessage>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub error: Option<WireError>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(default)]
    #[allow(dead_code)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireError {
    Message(String),
    Nested { message: String },
}

impl WireError {
    pub(crate) fn into_message(self) -> String {
        match self {
            WireError::Message(message) | WireError::Nested { message } => message,
        }
    }
}

impl WireChunk {
    /// Whether the object matched one of the known response schemas at all.
    pub(crate) fn is_recognized(&self) -> bool {
        self.response.is_some()
            || self.message.is_some()
            || self.done.is_some()
            || self.error.is_some()
            || self.model.is_some()
    }

    /// Generated text carried by this line, preferring the nested schema.
    pub(crate) fn content(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|message| message.content.as_deref())
            .or(self.response.as_deref())
    }

    pub(crate) fn usage(&self) -> Option<TokenUsage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(TokenUsage {
            prompt_tokens: self.prompt_eval_count,
            output_tokens: self.eval_count,
        })
    }
}
